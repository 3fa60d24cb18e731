//! Alert Engine — owns the alert lifecycle.
//!
//! `create` is idempotent under the dedup invariant: at most one ACTIVE
//! alert exists per (type, entity) key, and concurrent creators for the
//! same key all observe the winning record. The engine persists alert
//! rows only; notification delivery is somebody else's problem.

use std::sync::Arc;

use chrono::Utc;

use crate::reconcile::error::CoreError;
use crate::reconcile::port::{CountDataPort, UpsertOutcome};
use crate::reconcile::types::{
    Alert, AlertFilter, AlertPriority, AlertSummary, AlertType, CreateAlertResult, Discrepancy,
    DiscrepancyKind, EntityRef, NewAlert,
};

pub struct AlertEngine {
    port: Arc<dyn CountDataPort>,
}

impl AlertEngine {
    pub fn new(port: Arc<dyn CountDataPort>) -> Self {
        Self { port }
    }

    /// Create an alert, or return the ACTIVE alert already holding the
    /// same dedup key. An unexpected conflict (the insert lost a race
    /// and the winner vanished before re-fetch) is retried exactly once
    /// before surfacing `Conflict`.
    pub async fn create(
        &self,
        alert_type: AlertType,
        entity: EntityRef,
        message: impl Into<String>,
        priority: AlertPriority,
    ) -> Result<CreateAlertResult, CoreError> {
        let new_alert = NewAlert {
            alert_type,
            entity,
            message: message.into(),
            priority,
        };

        let outcome = match self.port.upsert_alert(new_alert.clone()).await {
            Ok(outcome) => outcome,
            Err(CoreError::Conflict { .. }) => self.port.upsert_alert(new_alert).await?,
            Err(err) => return Err(err),
        };

        Ok(match outcome {
            UpsertOutcome::Inserted(alert) => {
                tracing::info!(
                    alert_id = alert.id,
                    alert_type = alert.alert_type.as_str(),
                    priority = alert.priority.as_str(),
                    entity = %alert.entity.key(),
                    "Alert created"
                );
                CreateAlertResult::Created { alert }
            }
            UpsertOutcome::Fetched(alert) => {
                tracing::debug!(
                    alert_id = alert.id,
                    entity = %alert.entity.key(),
                    "Alert already active, deduplicated"
                );
                CreateAlertResult::Deduplicated { alert }
            }
        })
    }

    /// Create the alert corresponding to one detected discrepancy.
    pub async fn create_for_discrepancy(
        &self,
        procedure_id: i64,
        discrepancy: &Discrepancy,
    ) -> Result<CreateAlertResult, CoreError> {
        let alert_type = AlertType::from(discrepancy.kind);
        let entity = EntityRef::procedure_instrument(procedure_id, discrepancy.instrument_id);
        let message = discrepancy_message(procedure_id, discrepancy);
        self.create(alert_type, entity, message, alert_type.default_priority())
            .await
    }

    /// Transition an alert Active→Resolved, stamping resolver and note.
    pub async fn resolve(
        &self,
        alert_id: i64,
        resolver_id: i64,
        note: Option<String>,
    ) -> Result<Alert, CoreError> {
        let resolved = self
            .port
            .mark_resolved(alert_id, resolver_id, note, Utc::now())
            .await?
            .ok_or_else(|| CoreError::not_found("alert", alert_id))?;

        tracing::info!(alert_id, resolver_id, "Alert resolved");
        Ok(resolved)
    }

    /// Active alerts ordered most urgent, most recent first.
    pub async fn list_active(&self, filter: &AlertFilter) -> Result<Vec<Alert>, CoreError> {
        self.port.fetch_active_alerts(filter).await
    }

    /// ACTIVE counts grouped by priority, for the dashboard.
    pub async fn summary(&self) -> Result<AlertSummary, CoreError> {
        self.port.count_active_by_priority().await
    }
}

fn discrepancy_message(procedure_id: i64, discrepancy: &Discrepancy) -> String {
    match discrepancy.kind {
        DiscrepancyKind::MissingInFinal => format!(
            "Instrument {} missing in final count of procedure {} (expected {}, found 0)",
            discrepancy.instrument_id, procedure_id, discrepancy.expected_qty
        ),
        DiscrepancyKind::ExtraInFinal => format!(
            "Instrument {} appears in final count of procedure {} with no initial count (found {})",
            discrepancy.instrument_id, procedure_id, discrepancy.found_qty
        ),
        DiscrepancyKind::QuantityMismatch => format!(
            "Count mismatch for instrument {} in procedure {} (expected {}, found {})",
            discrepancy.instrument_id,
            procedure_id,
            discrepancy.expected_qty,
            discrepancy.found_qty
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use crate::repository::SqliteRepository;

    async fn make_engine() -> AlertEngine {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        AlertEngine::new(Arc::new(SqliteRepository::new(pool)))
    }

    fn mismatch(instrument_id: i64) -> Discrepancy {
        Discrepancy {
            instrument_id,
            kind: DiscrepancyKind::QuantityMismatch,
            expected_qty: 6,
            found_qty: 5,
        }
    }

    #[tokio::test]
    async fn create_returns_created_for_new_key() {
        let engine = make_engine().await;

        let result = engine
            .create(
                AlertType::MaintenanceDue,
                EntityRef::instrument(3),
                "maintenance due",
                AlertPriority::Medium,
            )
            .await
            .unwrap();

        assert!(result.was_created());
        assert_eq!(result.alert().priority, AlertPriority::Medium);
    }

    #[tokio::test]
    async fn second_create_with_same_key_is_deduplicated() {
        let engine = make_engine().await;
        let entity = EntityRef::procedure_instrument(1, 3);

        let first = engine
            .create(AlertType::MissingInFinal, entity, "first", AlertPriority::Critical)
            .await
            .unwrap();
        let second = engine
            .create(AlertType::MissingInFinal, entity, "second", AlertPriority::Critical)
            .await
            .unwrap();

        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(second.alert().id, first.alert().id);
        // The original record is returned unchanged.
        assert_eq!(second.alert().message, "first");
    }

    #[tokio::test]
    async fn same_entity_different_type_creates_both() {
        let engine = make_engine().await;
        let entity = EntityRef::instrument(9);

        let due = engine
            .create(AlertType::MaintenanceDue, entity, "due", AlertPriority::Medium)
            .await
            .unwrap();
        let overdue = engine
            .create(AlertType::MaintenanceOverdue, entity, "overdue", AlertPriority::High)
            .await
            .unwrap();

        assert!(due.was_created());
        assert!(overdue.was_created());
    }

    #[tokio::test]
    async fn discrepancy_alert_uses_priority_table() {
        let engine = make_engine().await;

        let result = engine
            .create_for_discrepancy(1, &mismatch(3))
            .await
            .unwrap();

        assert_eq!(result.alert().alert_type, AlertType::QuantityMismatch);
        assert_eq!(result.alert().priority, AlertPriority::High);

        let missing = Discrepancy {
            instrument_id: 4,
            kind: DiscrepancyKind::MissingInFinal,
            expected_qty: 6,
            found_qty: 0,
        };
        let result = engine.create_for_discrepancy(1, &missing).await.unwrap();
        assert_eq!(result.alert().priority, AlertPriority::Critical);
    }

    #[tokio::test]
    async fn resolve_stamps_resolution_fields() {
        let engine = make_engine().await;
        let created = engine
            .create_for_discrepancy(1, &mismatch(3))
            .await
            .unwrap();

        let resolved = engine
            .resolve(created.alert().id, 42, Some("recount confirmed".into()))
            .await
            .unwrap();

        assert_eq!(resolved.state, crate::reconcile::types::AlertState::Resolved);
        assert_eq!(resolved.resolved_by, Some(42));
        assert_eq!(resolved.resolution_note.as_deref(), Some("recount confirmed"));
        assert!(resolved.resolved_at.is_some());
    }

    #[tokio::test]
    async fn resolve_unknown_id_is_not_found() {
        let engine = make_engine().await;

        let err = engine.resolve(9999, 1, None).await.unwrap_err();

        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn resolve_is_terminal() {
        let engine = make_engine().await;
        let created = engine
            .create_for_discrepancy(1, &mismatch(3))
            .await
            .unwrap();
        let id = created.alert().id;

        let first = engine.resolve(id, 42, None).await.unwrap();
        let err = engine.resolve(id, 77, Some("again".into())).await.unwrap_err();

        assert!(matches!(err, CoreError::AlreadyResolved { .. }));
        assert_eq!(first.resolved_by, Some(42));

        // The failed second resolve leaves the alert out of the active set.
        let active = engine.list_active(&AlertFilter::default()).await.unwrap();
        assert!(active.iter().all(|a| a.id != id));
    }

    #[tokio::test]
    async fn create_after_resolve_starts_a_fresh_alert() {
        let engine = make_engine().await;
        let entity = EntityRef::procedure_instrument(1, 3);

        let first = engine
            .create(AlertType::QuantityMismatch, entity, "m", AlertPriority::High)
            .await
            .unwrap();
        engine.resolve(first.alert().id, 1, None).await.unwrap();

        let second = engine
            .create(AlertType::QuantityMismatch, entity, "m", AlertPriority::High)
            .await
            .unwrap();

        assert!(second.was_created());
        assert_ne!(second.alert().id, first.alert().id);
    }

    #[tokio::test]
    async fn list_active_orders_by_priority_then_recency() {
        let engine = make_engine().await;

        engine
            .create(AlertType::LongProcedure, EntityRef::procedure(1), "slow", AlertPriority::Medium)
            .await
            .unwrap();
        engine
            .create(
                AlertType::MissingInFinal,
                EntityRef::procedure_instrument(1, 2),
                "missing",
                AlertPriority::Critical,
            )
            .await
            .unwrap();
        engine
            .create(
                AlertType::MaintenanceOverdue,
                EntityRef::instrument(5),
                "overdue",
                AlertPriority::High,
            )
            .await
            .unwrap();

        let active = engine.list_active(&AlertFilter::default()).await.unwrap();

        let priorities: Vec<AlertPriority> = active.iter().map(|a| a.priority).collect();
        assert_eq!(
            priorities,
            vec![AlertPriority::Critical, AlertPriority::High, AlertPriority::Medium]
        );
    }

    #[tokio::test]
    async fn list_active_filters_by_min_priority() {
        let engine = make_engine().await;

        engine
            .create(AlertType::LongProcedure, EntityRef::procedure(1), "slow", AlertPriority::Medium)
            .await
            .unwrap();
        engine
            .create(
                AlertType::MaintenanceOverdue,
                EntityRef::instrument(5),
                "overdue",
                AlertPriority::High,
            )
            .await
            .unwrap();

        let filter = AlertFilter {
            min_priority: Some(AlertPriority::High),
            ..Default::default()
        };
        let active = engine.list_active(&filter).await.unwrap();

        assert_eq!(active.len(), 1);
        assert_eq!(active[0].priority, AlertPriority::High);
    }

    #[tokio::test]
    async fn summary_counts_active_by_priority() {
        let engine = make_engine().await;

        engine
            .create(
                AlertType::MissingInFinal,
                EntityRef::procedure_instrument(1, 2),
                "missing",
                AlertPriority::Critical,
            )
            .await
            .unwrap();
        engine
            .create(
                AlertType::CountPending,
                EntityRef::procedure(1),
                "stale",
                AlertPriority::Critical,
            )
            .await
            .unwrap();
        let medium = engine
            .create(AlertType::LongProcedure, EntityRef::procedure(2), "slow", AlertPriority::Medium)
            .await
            .unwrap();

        let summary = engine.summary().await.unwrap();
        assert_eq!(summary.critical, 2);
        assert_eq!(summary.medium, 1);
        assert_eq!(summary.total(), 3);

        // Resolved alerts drop out of the summary.
        engine.resolve(medium.alert().id, 1, None).await.unwrap();
        let summary = engine.summary().await.unwrap();
        assert_eq!(summary.medium, 0);
        assert_eq!(summary.total(), 2);
    }

    #[tokio::test]
    async fn concurrent_creates_yield_one_active_alert() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let port: Arc<dyn CountDataPort> = Arc::new(SqliteRepository::new(pool));
        let engine = Arc::new(AlertEngine::new(port));
        let entity = EntityRef::procedure_instrument(1, 3);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .create(
                        AlertType::MissingInFinal,
                        entity,
                        "missing",
                        AlertPriority::Critical,
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut ids = Vec::new();
        let mut created = 0;
        for handle in handles {
            let result = handle.await.unwrap();
            if result.was_created() {
                created += 1;
            }
            ids.push(result.alert().id);
        }

        assert_eq!(created, 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let active = engine.list_active(&AlertFilter::default()).await.unwrap();
        assert_eq!(active.len(), 1);
    }
}
