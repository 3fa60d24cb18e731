//! SQLite pool creation and schema bootstrap.
//!
//! The partial unique index `idx_alerts_active_dedup` is what makes
//! `upsert_alert` atomic: among ACTIVE rows, (alert_type, entity_key)
//! is unique, so concurrent creators race on a single constraint and
//! the loser re-fetches the winner's row.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS procedures (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    state       TEXT NOT NULL,
    started_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS instruments (
    id              INTEGER PRIMARY KEY,
    name            TEXT NOT NULL,
    maintenance_due TEXT NOT NULL,
    stock_qty       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS count_observations (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    procedure_id  INTEGER NOT NULL,
    instrument_id INTEGER NOT NULL,
    phase         TEXT NOT NULL,
    counted_qty   INTEGER NOT NULL,
    expected_qty  INTEGER NOT NULL,
    counter_id    INTEGER NOT NULL,
    recorded_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_observations_procedure
    ON count_observations(procedure_id);

CREATE TABLE IF NOT EXISTS alerts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_type      TEXT NOT NULL,
    entity_key      TEXT NOT NULL,
    procedure_id    INTEGER,
    instrument_id   INTEGER,
    message         TEXT NOT NULL,
    priority        TEXT NOT NULL,
    priority_rank   INTEGER NOT NULL,
    state           TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    resolved_at     TEXT,
    resolved_by     INTEGER,
    resolution_note TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_active_dedup
    ON alerts(alert_type, entity_key) WHERE state = 'ACTIVE';
"#;

/// Connect to `database_url` and apply the schema.
///
/// In-memory databases are pinned to a single connection so every
/// handle sees the same data.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    for statement in SCHEMA.split(';') {
        let statement = statement.trim();
        if !statement.is_empty() {
            sqlx::query(statement).execute(&pool).await?;
        }
    }

    Ok(pool)
}
