//! Prometheus metrics registry for the count sentinel.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it
//! to the scheduler and HTTP layer.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format.

use prometheus::{CounterVec, GaugeVec, Histogram, HistogramOpts, Opts, Registry};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Sweep iterations started, labelled by check name.
    pub sweep_runs_total: CounterVec,
    /// Sweep iterations that failed after retries, labelled by check name.
    pub sweep_failures_total: CounterVec,
    /// Transient storage retries performed inside sweep iterations.
    pub sweep_retries_total: CounterVec,
    /// Current number of ACTIVE alerts, labelled by priority.
    pub active_alerts: GaugeVec,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated (should not happen in practice).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let sweep_runs_total = CounterVec::new(
            Opts::new("count_sentinel_sweep_runs_total", "Sweep iterations started"),
            &["check"],
        )?;

        let sweep_failures_total = CounterVec::new(
            Opts::new(
                "count_sentinel_sweep_failures_total",
                "Sweep iterations that failed after retries",
            ),
            &["check"],
        )?;

        let sweep_retries_total = CounterVec::new(
            Opts::new(
                "count_sentinel_sweep_retries_total",
                "Transient storage retries inside sweep iterations",
            ),
            &["check"],
        )?;

        let active_alerts = GaugeVec::new(
            Opts::new("count_sentinel_active_alerts", "Current ACTIVE alerts by priority"),
            &["priority"],
        )?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "count_sentinel_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "count_sentinel_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(sweep_runs_total.clone()))?;
        registry.register(Box::new(sweep_failures_total.clone()))?;
        registry.register(Box::new(sweep_retries_total.clone()))?;
        registry.register(Box::new(active_alerts.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            sweep_runs_total,
            sweep_failures_total,
            sweep_retries_total,
            active_alerts,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Record the outcome of a summary read on the active-alert gauges.
    pub fn record_summary(&self, summary: &crate::reconcile::types::AlertSummary) {
        self.active_alerts
            .with_label_values(&["CRITICAL"])
            .set(summary.critical as f64);
        self.active_alerts
            .with_label_values(&["HIGH"])
            .set(summary.high as f64);
        self.active_alerts
            .with_label_values(&["MEDIUM"])
            .set(summary.medium as f64);
        self.active_alerts
            .with_label_values(&["LOW"])
            .set(summary.low as f64);
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}
