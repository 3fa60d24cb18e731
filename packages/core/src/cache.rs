//! TTL cache for the dashboard summary.
//!
//! The `/alerts/summary` endpoint is hit on every dashboard refresh;
//! the counts only move when a sweep or a resolution lands, so a short
//! TTL takes the read load off the alerts table. Callers wrap this in
//! `Arc<Mutex<_>>` to share it between handler invocations.

use std::time::{Duration, Instant};

use crate::reconcile::types::AlertSummary;

pub struct SummaryCache {
    entry: Option<(AlertSummary, Instant)>,
    ttl: Duration,
}

impl SummaryCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    /// Returns the cached summary only while it is within the TTL.
    pub fn get(&self) -> Option<AlertSummary> {
        match &self.entry {
            Some((summary, cached_at)) if cached_at.elapsed() <= self.ttl => Some(*summary),
            _ => None,
        }
    }

    pub fn put(&mut self, summary: AlertSummary) {
        self.entry = Some((summary, Instant::now()));
    }

    /// Drop the cached value, forcing the next read to hit storage.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn summary(critical: i64) -> AlertSummary {
        AlertSummary {
            critical,
            ..Default::default()
        }
    }

    #[test]
    fn empty_cache_misses() {
        let cache = SummaryCache::new(Duration::from_secs(5));
        assert!(cache.get().is_none());
    }

    #[test]
    fn fresh_entry_hits() {
        let mut cache = SummaryCache::new(Duration::from_secs(5));
        cache.put(summary(2));
        assert_eq!(cache.get().unwrap().critical, 2);
    }

    #[test]
    fn expired_entry_misses() {
        let mut cache = SummaryCache::new(Duration::from_millis(10));
        cache.put(summary(2));
        thread::sleep(Duration::from_millis(20));
        assert!(cache.get().is_none());
    }

    #[test]
    fn invalidate_forces_a_miss() {
        let mut cache = SummaryCache::new(Duration::from_secs(5));
        cache.put(summary(2));
        cache.invalidate();
        assert!(cache.get().is_none());
    }
}
