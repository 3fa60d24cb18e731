use std::env;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::cli::Cli;
use crate::reconcile::ReconcileConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub summary_cache_ttl_seconds: u64,
    pub reconcile: ReconcileConfig,
}

impl Config {
    /// Build configuration from the environment. Every variable has a
    /// production default, so an empty environment is valid.
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://count-sentinel.db".to_string());
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let summary_cache_ttl_seconds =
            opt_u64("SUMMARY_CACHE_TTL_SECONDS")?.unwrap_or(5);

        let mut reconcile = ReconcileConfig::default();

        if let Some(secs) = opt_interval_secs("DISCREPANCY_SWEEP_SECONDS")? {
            reconcile.discrepancy_sweep_interval = StdDuration::from_secs(secs);
        }
        if let Some(secs) = opt_interval_secs("MAINTENANCE_SWEEP_SECONDS")? {
            reconcile.maintenance_sweep_interval = StdDuration::from_secs(secs);
        }
        if let Some(secs) = opt_interval_secs("STALE_COUNT_SWEEP_SECONDS")? {
            reconcile.stale_count_sweep_interval = StdDuration::from_secs(secs);
        }
        if let Some(secs) = opt_interval_secs("RETENTION_SWEEP_SECONDS")? {
            reconcile.retention_sweep_interval = StdDuration::from_secs(secs);
        }
        if let Some(days) = opt_i64("RETENTION_DAYS")? {
            reconcile.retention_window = Duration::days(days);
        }
        if let Some(days) = opt_i64("MAINTENANCE_LEAD_DAYS")? {
            reconcile.maintenance_lead_time = Duration::days(days);
        }
        if let Some(minutes) = opt_i64("STALE_COUNT_MINUTES")? {
            reconcile.stale_count_threshold = Duration::minutes(minutes);
        }
        if let Some(hours) = opt_i64("LONG_PROCEDURE_HOURS")? {
            reconcile.long_procedure_threshold = Duration::hours(hours);
        }

        Ok(Self {
            database_url,
            bind_addr,
            summary_cache_ttl_seconds,
            reconcile,
        })
    }

    /// Command-line flags win over environment variables.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.database_url {
            self.database_url = url.clone();
        }
        if let Some(addr) = &cli.bind_addr {
            self.bind_addr = addr.clone();
        }
        if let Some(days) = cli.retention_days {
            self.reconcile.retention_window = Duration::days(days);
        }
    }
}

fn opt_u64(name: &str) -> Result<Option<u64>, String> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| format!("{} must be a non-negative number, got '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}

// Sweep intervals: a zero value would turn the check loop into a busy
// spin, so it is a configuration error rather than "as fast as possible".
fn opt_interval_secs(name: &str) -> Result<Option<u64>, String> {
    match env::var(name) {
        Ok(raw) => parse_interval_secs(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_interval_secs(name: &str, raw: &str) -> Result<u64, String> {
    match raw.parse::<u64>() {
        Ok(0) => Err(format!("{} must be greater than zero", name)),
        Ok(secs) => Ok(secs),
        Err(_) => Err(format!("{} must be a positive number, got '{}'", name, raw)),
    }
}

fn opt_i64(name: &str) -> Result<Option<i64>, String> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| format!("{} must be a number, got '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_of_zero_is_rejected() {
        let err = parse_interval_secs("DISCREPANCY_SWEEP_SECONDS", "0").unwrap_err();
        assert!(err.contains("greater than zero"));
    }

    #[test]
    fn non_numeric_interval_is_rejected() {
        assert!(parse_interval_secs("RETENTION_SWEEP_SECONDS", "soon").is_err());
    }

    #[test]
    fn positive_interval_parses() {
        assert_eq!(parse_interval_secs("MAINTENANCE_SWEEP_SECONDS", "300"), Ok(300));
    }
}
