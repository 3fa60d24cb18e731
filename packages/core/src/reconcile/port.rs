//! Data Access Port
//!
//! The only seam between the reconciliation core and storage. The core
//! reads counts/procedures/instruments through this trait and writes
//! nothing but alert records. `upsert_alert` must be atomic with respect
//! to the active-alert dedup key — see `db.rs` for the index that backs
//! the SQLite implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::reconcile::error::CoreError;
use crate::reconcile::types::{
    Alert, AlertFilter, AlertSummary, CountObservation, Instrument, NewAlert, Procedure,
};

/// Outcome of an atomic insert-or-fetch against the dedup invariant.
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// No active alert held the dedup key; a new row was inserted.
    Inserted(Alert),
    /// An active alert already held the dedup key; its row is returned.
    Fetched(Alert),
}

#[async_trait]
pub trait CountDataPort: Send + Sync {
    async fn fetch_procedure(&self, id: i64) -> Result<Option<Procedure>, CoreError>;

    /// All count observations for a procedure, as one consistent snapshot.
    async fn fetch_counts(&self, procedure_id: i64) -> Result<Vec<CountObservation>, CoreError>;

    async fn fetch_instrument(&self, id: i64) -> Result<Option<Instrument>, CoreError>;

    /// Non-terminal procedures that have at least one INITIAL and one
    /// FINAL observation — the discrepancy sweep's working set.
    async fn fetch_procedures_needing_sweep(&self) -> Result<Vec<Procedure>, CoreError>;

    /// Instruments whose maintenance falls due on or before `cutoff`.
    async fn fetch_instruments_due_maintenance(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Instrument>, CoreError>;

    /// Non-terminal procedures started on or before `cutoff`.
    async fn fetch_long_running_procedures(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Procedure>, CoreError>;

    /// Atomic insert-or-fetch for the at-most-one-active-alert invariant.
    async fn upsert_alert(&self, alert: NewAlert) -> Result<UpsertOutcome, CoreError>;

    async fn fetch_alert(&self, id: i64) -> Result<Option<Alert>, CoreError>;

    /// Transition Active→Resolved. `Ok(None)` when the id is unknown;
    /// `AlreadyResolved` when the row is already terminal.
    async fn mark_resolved(
        &self,
        id: i64,
        resolver_id: i64,
        note: Option<String>,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<Alert>, CoreError>;

    /// Active alerts matching `filter`, ordered by priority descending
    /// then created_at descending. Capped for dashboard use; sweeps
    /// needing a complete working set must not go through this.
    async fn fetch_active_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, CoreError>;

    /// ACTIVE discrepancy-class alerts created on or before `cutoff` —
    /// the stale-count sweep's working set. Deliberately unbounded: a
    /// missed row here is a missed escalation.
    async fn fetch_stale_discrepancy_alerts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Alert>, CoreError>;

    async fn count_active_by_priority(&self) -> Result<AlertSummary, CoreError>;

    /// Delete RESOLVED alerts with resolved_at older than `cutoff`.
    /// Returns the number of rows removed. Active alerts are never touched.
    async fn delete_resolved_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError>;
}
