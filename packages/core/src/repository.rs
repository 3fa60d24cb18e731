//! SQLite implementation of the data-access port.
//!
//! All read/write SQL lives here. Timestamps are stored as RFC 3339
//! strings so lexicographic comparison matches chronological order.
//! The counting workflow writes procedures/instruments/observations
//! through the seed helpers; the reconciliation core only ever writes
//! alert rows, and count observations are append-only — corrections are
//! new rows, never updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::reconcile::error::CoreError;
use crate::reconcile::port::{CountDataPort, UpsertOutcome};
use crate::reconcile::types::{
    Alert, AlertFilter, AlertPriority, AlertState, AlertSummary, AlertType, CountObservation,
    CountPhase, EntityRef, Instrument, NewAlert, Procedure, ProcedureState,
};

const ACTIVE_PROCEDURE_STATES: &str = "('INITIAL_COUNT', 'IN_PROGRESS', 'FINAL_COUNT')";

// Must stay in sync with `AlertType::is_discrepancy`; a test below
// checks the two against each other.
const DISCREPANCY_ALERT_TYPES: &str =
    "('MISSING_IN_FINAL', 'EXTRA_IN_FINAL', 'QUANTITY_MISMATCH')";

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ---- Write path for the counting workflow (and tests) ----

    pub async fn insert_procedure(
        &self,
        id: i64,
        name: &str,
        state: ProcedureState,
        started_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query("INSERT INTO procedures (id, name, state, started_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(state.as_str())
            .bind(started_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_procedure_state(
        &self,
        id: i64,
        state: ProcedureState,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query("UPDATE procedures SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_instrument(
        &self,
        id: i64,
        name: &str,
        maintenance_due: DateTime<Utc>,
        stock_qty: i64,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO instruments (id, name, maintenance_due, stock_qty) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(maintenance_due.to_rfc3339())
        .bind(stock_qty)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_observation(
        &self,
        procedure_id: i64,
        instrument_id: i64,
        phase: CountPhase,
        counted_qty: i64,
        expected_qty: i64,
        counter_id: i64,
        recorded_at: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        let result = sqlx::query(
            "INSERT INTO count_observations
             (procedure_id, instrument_id, phase, counted_qty, expected_qty, counter_id, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(procedure_id)
        .bind(instrument_id)
        .bind(phase.as_str())
        .bind(counted_qty)
        .bind(expected_qty)
        .bind(counter_id)
        .bind(recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

// ---- Row mapping ----

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn row_to_procedure(row: &SqliteRow) -> Option<Procedure> {
    Some(Procedure {
        id: row.try_get("id").ok()?,
        name: row.try_get("name").ok()?,
        state: ProcedureState::parse(row.try_get::<String, _>("state").ok()?.as_str())?,
        started_at: parse_timestamp(row.try_get::<String, _>("started_at").ok()?.as_str())?,
    })
}

fn row_to_instrument(row: &SqliteRow) -> Option<Instrument> {
    Some(Instrument {
        id: row.try_get("id").ok()?,
        name: row.try_get("name").ok()?,
        maintenance_due: parse_timestamp(
            row.try_get::<String, _>("maintenance_due").ok()?.as_str(),
        )?,
        stock_qty: row.try_get("stock_qty").ok()?,
    })
}

fn row_to_observation(row: &SqliteRow) -> Option<CountObservation> {
    Some(CountObservation {
        id: row.try_get("id").ok()?,
        procedure_id: row.try_get("procedure_id").ok()?,
        instrument_id: row.try_get("instrument_id").ok()?,
        phase: CountPhase::parse(row.try_get::<String, _>("phase").ok()?.as_str())?,
        counted_qty: row.try_get("counted_qty").ok()?,
        expected_qty: row.try_get("expected_qty").ok()?,
        counter_id: row.try_get("counter_id").ok()?,
        recorded_at: parse_timestamp(row.try_get::<String, _>("recorded_at").ok()?.as_str())?,
    })
}

fn row_to_alert(row: &SqliteRow) -> Option<Alert> {
    let procedure_id: Option<i64> = row.try_get("procedure_id").ok()?;
    let instrument_id: Option<i64> = row.try_get("instrument_id").ok()?;
    let resolved_at: Option<String> = row.try_get("resolved_at").ok()?;

    Some(Alert {
        id: row.try_get("id").ok()?,
        alert_type: AlertType::parse(row.try_get::<String, _>("alert_type").ok()?.as_str())?,
        entity: EntityRef::from_ids(procedure_id, instrument_id)?,
        message: row.try_get("message").ok()?,
        priority: AlertPriority::parse(row.try_get::<String, _>("priority").ok()?.as_str())?,
        state: AlertState::parse(row.try_get::<String, _>("state").ok()?.as_str())?,
        created_at: parse_timestamp(row.try_get::<String, _>("created_at").ok()?.as_str())?,
        resolved_at: resolved_at.as_deref().and_then(parse_timestamp),
        resolved_by: row.try_get("resolved_by").ok()?,
        resolution_note: row.try_get("resolution_note").ok()?,
    })
}

const ALERT_COLUMNS: &str = "id, alert_type, entity_key, procedure_id, instrument_id, message,
     priority, priority_rank, state, created_at, resolved_at, resolved_by, resolution_note";

#[async_trait]
impl CountDataPort for SqliteRepository {
    async fn fetch_procedure(&self, id: i64) -> Result<Option<Procedure>, CoreError> {
        let row = sqlx::query("SELECT id, name, state, started_at FROM procedures WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().and_then(row_to_procedure))
    }

    async fn fetch_counts(&self, procedure_id: i64) -> Result<Vec<CountObservation>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, procedure_id, instrument_id, phase, counted_qty, expected_qty,
                    counter_id, recorded_at
             FROM count_observations
             WHERE procedure_id = ?
             ORDER BY recorded_at ASC, id ASC",
        )
        .bind(procedure_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_observation).collect())
    }

    async fn fetch_instrument(&self, id: i64) -> Result<Option<Instrument>, CoreError> {
        let row = sqlx::query(
            "SELECT id, name, maintenance_due, stock_qty FROM instruments WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().and_then(row_to_instrument))
    }

    async fn fetch_procedures_needing_sweep(&self) -> Result<Vec<Procedure>, CoreError> {
        let rows = sqlx::query(
            "SELECT p.id, p.name, p.state, p.started_at
             FROM procedures p
             WHERE p.state NOT IN ('FINALIZED', 'CANCELLED')
               AND EXISTS (SELECT 1 FROM count_observations o
                           WHERE o.procedure_id = p.id AND o.phase = 'INITIAL')
               AND EXISTS (SELECT 1 FROM count_observations o
                           WHERE o.procedure_id = p.id AND o.phase = 'FINAL')
             ORDER BY p.id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_procedure).collect())
    }

    async fn fetch_instruments_due_maintenance(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Instrument>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, name, maintenance_due, stock_qty
             FROM instruments
             WHERE maintenance_due <= ?
             ORDER BY id ASC",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_instrument).collect())
    }

    async fn fetch_long_running_procedures(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Procedure>, CoreError> {
        let sql = format!(
            "SELECT id, name, state, started_at
             FROM procedures
             WHERE state IN {} AND started_at <= ?
             ORDER BY id ASC",
            ACTIVE_PROCEDURE_STATES
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(row_to_procedure).collect())
    }

    async fn upsert_alert(&self, alert: NewAlert) -> Result<UpsertOutcome, CoreError> {
        let entity_key = alert.entity.key();

        // The partial unique index makes this race-safe: of any set of
        // concurrent inserts for the same key, exactly one lands a row.
        let result = sqlx::query(
            "INSERT INTO alerts
             (alert_type, entity_key, procedure_id, instrument_id, message,
              priority, priority_rank, state, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'ACTIVE', ?)
             ON CONFLICT(alert_type, entity_key) WHERE state = 'ACTIVE' DO NOTHING",
        )
        .bind(alert.alert_type.as_str())
        .bind(&entity_key)
        .bind(alert.entity.procedure_id())
        .bind(alert.entity.instrument_id())
        .bind(&alert.message)
        .bind(alert.priority.as_str())
        .bind(alert.priority.rank())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            let inserted = self
                .fetch_alert(result.last_insert_rowid())
                .await?
                .ok_or_else(|| CoreError::storage("inserted alert row not readable"))?;
            return Ok(UpsertOutcome::Inserted(inserted));
        }

        // Lost the race — return the winner's active row. If the winner
        // was resolved in between, the caller retries the whole upsert.
        let sql = format!(
            "SELECT {} FROM alerts WHERE alert_type = ? AND entity_key = ? AND state = 'ACTIVE'",
            ALERT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(alert.alert_type.as_str())
            .bind(&entity_key)
            .fetch_optional(&self.pool)
            .await?;

        match row.as_ref().and_then(row_to_alert) {
            Some(existing) => Ok(UpsertOutcome::Fetched(existing)),
            None => Err(CoreError::conflict(format!(
                "active alert for ({}, {}) vanished during insert",
                alert.alert_type.as_str(),
                entity_key
            ))),
        }
    }

    async fn fetch_alert(&self, id: i64) -> Result<Option<Alert>, CoreError> {
        let sql = format!("SELECT {} FROM alerts WHERE id = ?", ALERT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().and_then(row_to_alert))
    }

    async fn mark_resolved(
        &self,
        id: i64,
        resolver_id: i64,
        note: Option<String>,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<Alert>, CoreError> {
        let result = sqlx::query(
            "UPDATE alerts
             SET state = 'RESOLVED', resolved_at = ?, resolved_by = ?, resolution_note = ?
             WHERE id = ? AND state = 'ACTIVE'",
        )
        .bind(resolved_at.to_rfc3339())
        .bind(resolver_id)
        .bind(&note)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return self.fetch_alert(id).await;
        }

        // Nothing transitioned: either unknown, or already terminal.
        match self.fetch_alert(id).await? {
            None => Ok(None),
            Some(_) => Err(CoreError::already_resolved(id)),
        }
    }

    async fn fetch_active_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, CoreError> {
        let mut conditions = vec!["state = 'ACTIVE'".to_string()];
        if filter.alert_type.is_some() {
            conditions.push("alert_type = ?".to_string());
        }
        if filter.min_priority.is_some() {
            conditions.push("priority_rank >= ?".to_string());
        }
        if filter.procedure_id.is_some() {
            conditions.push("procedure_id = ?".to_string());
        }
        if filter.created_before.is_some() {
            conditions.push("created_at <= ?".to_string());
        }

        let limit = filter.limit.unwrap_or(100).clamp(1, 500);

        let sql = format!(
            "SELECT {} FROM alerts WHERE {}
             ORDER BY priority_rank DESC, created_at DESC, id DESC
             LIMIT ?",
            ALERT_COLUMNS,
            conditions.join(" AND ")
        );

        let rows = {
            let mut query = sqlx::query(&sql);
            if let Some(alert_type) = filter.alert_type {
                query = query.bind(alert_type.as_str());
            }
            if let Some(min_priority) = filter.min_priority {
                query = query.bind(min_priority.rank());
            }
            if let Some(procedure_id) = filter.procedure_id {
                query = query.bind(procedure_id);
            }
            if let Some(created_before) = filter.created_before {
                query = query.bind(created_before.to_rfc3339());
            }
            query.bind(limit).fetch_all(&self.pool).await?
        };

        Ok(rows.iter().filter_map(row_to_alert).collect())
    }

    async fn fetch_stale_discrepancy_alerts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Alert>, CoreError> {
        // No LIMIT: the sweep must see every stale row, however many.
        let sql = format!(
            "SELECT {} FROM alerts
             WHERE state = 'ACTIVE' AND created_at <= ? AND alert_type IN {}
             ORDER BY id ASC",
            ALERT_COLUMNS, DISCREPANCY_ALERT_TYPES
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(row_to_alert).collect())
    }

    async fn count_active_by_priority(&self) -> Result<AlertSummary, CoreError> {
        let rows = sqlx::query(
            "SELECT priority, COUNT(*) AS cnt FROM alerts WHERE state = 'ACTIVE' GROUP BY priority",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = AlertSummary::default();
        for row in &rows {
            let priority: String = row.try_get("priority")?;
            let count: i64 = row.try_get("cnt")?;
            match AlertPriority::parse(&priority) {
                Some(AlertPriority::Critical) => summary.critical = count,
                Some(AlertPriority::High) => summary.high = count,
                Some(AlertPriority::Medium) => summary.medium = count,
                Some(AlertPriority::Low) => summary.low = count,
                None => {}
            }
        }
        Ok(summary)
    }

    async fn delete_resolved_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        let result = sqlx::query(
            "DELETE FROM alerts
             WHERE state = 'RESOLVED' AND resolved_at IS NOT NULL AND resolved_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
