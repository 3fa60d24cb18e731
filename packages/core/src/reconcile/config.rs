//! Configuration for the reconciliation core.
//!
//! Everything the engine and sweeps parameterize on lives here and is
//! passed in at construction — the only constants baked into the engine
//! itself are the fixed type→priority table.

use chrono::Duration;
use std::time::Duration as StdDuration;

/// Tunables for the verification sweeps and alert lifecycle.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Fixed delay between discrepancy sweep iterations.
    pub discrepancy_sweep_interval: StdDuration,
    /// Fixed delay between maintenance sweep iterations.
    pub maintenance_sweep_interval: StdDuration,
    /// Fixed delay between stale-count sweep iterations.
    pub stale_count_sweep_interval: StdDuration,
    /// Fixed delay between retention cleanup iterations.
    pub retention_sweep_interval: StdDuration,
    /// Resolved alerts older than this are eligible for deletion.
    pub retention_window: Duration,
    /// Maintenance due within this lead time raises a MEDIUM alert.
    pub maintenance_lead_time: Duration,
    /// Discrepancy alerts unresolved for longer than this escalate to a
    /// CRITICAL count-pending alert.
    pub stale_count_threshold: Duration,
    /// Procedures active for longer than this raise a MEDIUM alert.
    pub long_procedure_threshold: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            discrepancy_sweep_interval: StdDuration::from_secs(5 * 60),
            maintenance_sweep_interval: StdDuration::from_secs(60 * 60),
            stale_count_sweep_interval: StdDuration::from_secs(15 * 60),
            retention_sweep_interval: StdDuration::from_secs(24 * 60 * 60),
            retention_window: Duration::days(30),
            maintenance_lead_time: Duration::days(7),
            stale_count_threshold: Duration::minutes(30),
            long_procedure_threshold: Duration::hours(4),
        }
    }
}
