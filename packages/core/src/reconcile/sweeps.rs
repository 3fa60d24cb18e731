//! Periodic verification sweeps.
//!
//! `VerificationService` bundles the detector and the alert engine
//! behind the four recurring checks the scheduler drives, plus the
//! on-demand entry points used by the API layer. Each sweep is a single
//! fetch → compute → persist pass; dedup in the engine makes repeated
//! runs and concurrent on-demand calls safe.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use crate::reconcile::config::ReconcileConfig;
use crate::reconcile::detector::{classify, DiscrepancyDetector};
use crate::reconcile::engine::AlertEngine;
use crate::reconcile::error::CoreError;
use crate::reconcile::port::CountDataPort;
use crate::reconcile::types::{
    AlertFilter, AlertPriority, AlertType, DiscrepancyKind, EntityRef, FinalizationStatus,
    VerificationReport,
};

/// Outcome counters for one sweep iteration, for logging and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    pub alerts_created: usize,
}

pub struct VerificationService {
    port: Arc<dyn CountDataPort>,
    detector: DiscrepancyDetector,
    engine: AlertEngine,
    config: ReconcileConfig,
}

impl VerificationService {
    pub fn new(port: Arc<dyn CountDataPort>, config: ReconcileConfig) -> Self {
        Self {
            detector: DiscrepancyDetector::new(port.clone()),
            engine: AlertEngine::new(port.clone()),
            port,
            config,
        }
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Run the detector over every non-terminal procedure with both
    /// count phases present and raise alerts for its discrepancies.
    pub async fn run_discrepancy_sweep(&self) -> Result<SweepStats, CoreError> {
        let procedures = self.port.fetch_procedures_needing_sweep().await?;
        let mut stats = SweepStats {
            examined: procedures.len(),
            ..Default::default()
        };

        for procedure in &procedures {
            let discrepancies = match self.detector.detect(procedure.id).await {
                Ok(d) => d,
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    // The procedure vanished under us or its snapshot was
                    // rejected; skip it and keep sweeping the rest.
                    tracing::warn!(procedure_id = procedure.id, %err, "Skipping procedure in sweep");
                    continue;
                }
            };

            for discrepancy in &discrepancies {
                let result = self
                    .engine
                    .create_for_discrepancy(procedure.id, discrepancy)
                    .await?;
                if result.was_created() {
                    stats.alerts_created += 1;
                }
            }
        }

        tracing::info!(
            procedures = stats.examined,
            alerts_created = stats.alerts_created,
            "Discrepancy sweep complete"
        );
        Ok(stats)
    }

    /// Raise alerts for instruments overdue for maintenance (HIGH) or
    /// due within the configured lead time (MEDIUM).
    pub async fn run_maintenance_sweep(&self) -> Result<SweepStats, CoreError> {
        let now = Utc::now();
        let cutoff = now + self.config.maintenance_lead_time;
        let instruments = self.port.fetch_instruments_due_maintenance(cutoff).await?;
        let mut stats = SweepStats {
            examined: instruments.len(),
            ..Default::default()
        };

        for instrument in &instruments {
            let (alert_type, message) = if instrument.maintenance_due <= now {
                (
                    AlertType::MaintenanceOverdue,
                    format!(
                        "Instrument {} ({}) is overdue for maintenance since {}",
                        instrument.id,
                        instrument.name,
                        instrument.maintenance_due.format("%Y-%m-%d")
                    ),
                )
            } else {
                let days_left = (instrument.maintenance_due - now).num_days();
                (
                    AlertType::MaintenanceDue,
                    format!(
                        "Instrument {} ({}) requires maintenance in {} days",
                        instrument.id, instrument.name, days_left
                    ),
                )
            };

            let result = self
                .engine
                .create(
                    alert_type,
                    EntityRef::instrument(instrument.id),
                    message,
                    alert_type.default_priority(),
                )
                .await?;
            if result.was_created() {
                stats.alerts_created += 1;
            }
        }

        tracing::info!(
            instruments = stats.examined,
            alerts_created = stats.alerts_created,
            "Maintenance sweep complete"
        );
        Ok(stats)
    }

    /// Escalate procedures whose discrepancy alerts have sat unresolved
    /// past the stale threshold, and flag procedures running longer than
    /// the long-procedure threshold.
    pub async fn run_stale_count_sweep(&self) -> Result<SweepStats, CoreError> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        let stale_alerts = self
            .port
            .fetch_stale_discrepancy_alerts(now - self.config.stale_count_threshold)
            .await?;

        let mut stale_procedures: BTreeSet<i64> = BTreeSet::new();
        for alert in &stale_alerts {
            if let Some(procedure_id) = alert.entity.procedure_id() {
                stale_procedures.insert(procedure_id);
            }
        }

        for procedure_id in &stale_procedures {
            stats.examined += 1;
            let result = self
                .engine
                .create(
                    AlertType::CountPending,
                    EntityRef::procedure(*procedure_id),
                    format!(
                        "Count discrepancy for procedure {} unresolved for more than {} minutes",
                        procedure_id,
                        self.config.stale_count_threshold.num_minutes()
                    ),
                    AlertPriority::Critical,
                )
                .await?;
            if result.was_created() {
                stats.alerts_created += 1;
            }
        }

        let long_cutoff = now - self.config.long_procedure_threshold;
        let long_running = self.port.fetch_long_running_procedures(long_cutoff).await?;
        for procedure in &long_running {
            stats.examined += 1;
            let result = self
                .engine
                .create(
                    AlertType::LongProcedure,
                    EntityRef::procedure(procedure.id),
                    format!(
                        "Procedure {} ({}) active for more than {} hours",
                        procedure.id,
                        procedure.name,
                        self.config.long_procedure_threshold.num_hours()
                    ),
                    AlertPriority::Medium,
                )
                .await?;
            if result.was_created() {
                stats.alerts_created += 1;
            }
        }

        tracing::info!(
            escalations = stale_procedures.len(),
            long_running = long_running.len(),
            alerts_created = stats.alerts_created,
            "Stale-count sweep complete"
        );
        Ok(stats)
    }

    /// Delete RESOLVED alerts older than the retention window. ACTIVE
    /// alerts are never touched regardless of age.
    pub async fn run_retention_cleanup(&self) -> Result<u64, CoreError> {
        let cutoff = Utc::now() - self.config.retention_window;
        let deleted = self.port.delete_resolved_older_than(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, "Retention cleanup removed resolved alerts");
        }
        Ok(deleted)
    }

    /// On-demand verification of one procedure, safe to race any sweep.
    pub async fn verify_now(&self, procedure_id: i64) -> Result<VerificationReport, CoreError> {
        let discrepancies = self.detector.detect(procedure_id).await?;

        let mut created = 0;
        let mut deduplicated = 0;
        for discrepancy in &discrepancies {
            let result = self
                .engine
                .create_for_discrepancy(procedure_id, discrepancy)
                .await?;
            if result.was_created() {
                created += 1;
            } else {
                deduplicated += 1;
            }
        }

        Ok(VerificationReport {
            procedure_id,
            discrepancies,
            alerts_created: created,
            alerts_deduplicated: deduplicated,
        })
    }

    /// Whether a procedure satisfies the finalization invariant: a FINAL
    /// observation for every initially counted instrument and no
    /// unresolved CRITICAL alert referencing it.
    pub async fn finalization_ready(
        &self,
        procedure_id: i64,
    ) -> Result<FinalizationStatus, CoreError> {
        if self.port.fetch_procedure(procedure_id).await?.is_none() {
            return Err(CoreError::not_found("procedure", procedure_id));
        }

        let observations = self.port.fetch_counts(procedure_id).await?;
        let instruments_missing_final: Vec<i64> = classify(&observations)
            .into_iter()
            .filter(|d| d.kind == DiscrepancyKind::MissingInFinal)
            .map(|d| d.instrument_id)
            .collect();

        let critical_filter = AlertFilter {
            min_priority: Some(AlertPriority::Critical),
            procedure_id: Some(procedure_id),
            ..Default::default()
        };
        let open_critical_alerts = self.port.fetch_active_alerts(&critical_filter).await?.len() as i64;

        let ready = !observations.is_empty()
            && instruments_missing_final.is_empty()
            && open_critical_alerts == 0;

        Ok(FinalizationStatus {
            procedure_id,
            ready,
            instruments_missing_final,
            open_critical_alerts,
        })
    }
}
