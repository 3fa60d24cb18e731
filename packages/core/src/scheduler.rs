//! Periodic verification scheduler.
//!
//! Runs the four recurring checks — discrepancy sweep, maintenance
//! sweep, stale-count sweep, and retention cleanup — as independent
//! tokio tasks, each with its own fixed-delay interval (measured from
//! the end of one iteration to the start of the next). No loop blocks
//! another; they share only the data-access port, and the alert dedup
//! invariant makes their outputs commutative.
//!
//! Iterations classify failures instead of swallowing them uniformly:
//! transient storage errors are retried with jittered exponential
//! backoff inside the iteration; anything else is logged and the loop
//! proceeds to its next scheduled run. `stop` signals all loops through
//! a watch channel and waits, with a bounded grace period, for in-flight
//! iterations to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::metrics::AppMetrics;
use crate::reconcile::{CoreError, VerificationService};

/// Scheduler lifecycle: STOPPED → RUNNING → STOPPING → STOPPED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    Stopping,
}

/// Bounded retry of transient storage errors within one iteration.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with up to 50% random jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt - 1);
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }
}

pub struct VerificationScheduler {
    service: Arc<VerificationService>,
    metrics: Arc<AppMetrics>,
    retry: RetryPolicy,
    state: SchedulerState,
    shutdown: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl VerificationScheduler {
    pub fn new(service: Arc<VerificationService>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            service,
            metrics,
            retry: RetryPolicy::default(),
            state: SchedulerState::Stopped,
            shutdown: None,
            handles: Vec::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Spawn all four check loops. Idempotent while running.
    pub fn start(&mut self) {
        if self.state == SchedulerState::Running {
            tracing::warn!("Scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);
        let config = self.service.config().clone();

        {
            let service = self.service.clone();
            self.handles.push(self.spawn_check(
                "discrepancy",
                config.discrepancy_sweep_interval,
                shutdown_rx.clone(),
                move || {
                    let service = service.clone();
                    async move { service.run_discrepancy_sweep().await.map(|_| ()) }
                },
            ));
        }
        {
            let service = self.service.clone();
            self.handles.push(self.spawn_check(
                "maintenance",
                config.maintenance_sweep_interval,
                shutdown_rx.clone(),
                move || {
                    let service = service.clone();
                    async move { service.run_maintenance_sweep().await.map(|_| ()) }
                },
            ));
        }
        {
            let service = self.service.clone();
            self.handles.push(self.spawn_check(
                "stale_count",
                config.stale_count_sweep_interval,
                shutdown_rx.clone(),
                move || {
                    let service = service.clone();
                    async move { service.run_stale_count_sweep().await.map(|_| ()) }
                },
            ));
        }
        {
            let service = self.service.clone();
            self.handles.push(self.spawn_check(
                "retention",
                config.retention_sweep_interval,
                shutdown_rx,
                move || {
                    let service = service.clone();
                    async move { service.run_retention_cleanup().await.map(|_| ()) }
                },
            ));
        }

        self.state = SchedulerState::Running;
        tracing::info!("Verification scheduler started (4 checks)");
    }

    /// Signal all loops to cancel and wait up to `grace` for in-flight
    /// iterations to finish. Loops still running after the grace period
    /// are aborted — a loop that misses the signal between iterations is
    /// a bug, not something to wait out.
    pub async fn stop(&mut self, grace: Duration) {
        if self.state != SchedulerState::Running {
            return;
        }
        self.state = SchedulerState::Stopping;

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        let handles = std::mem::take(&mut self.handles);
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if time::timeout(grace, join_all).await.is_err() {
            tracing::warn!("Check loops did not stop within grace period; aborting");
            for abort in aborts {
                abort.abort();
            }
        }

        self.state = SchedulerState::Stopped;
        tracing::info!("Verification scheduler stopped");
    }

    fn spawn_check<F, Fut>(
        &self,
        name: &'static str,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        run: F,
    ) -> JoinHandle<()>
    where
        // `run_iteration` borrows `run` across awaits, so the spawned
        // future is Send only if `F` is also Sync.
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send,
    {
        let metrics = self.metrics.clone();
        let retry = self.retry;

        tokio::spawn(async move {
            tracing::info!(check = name, interval_secs = interval.as_secs_f64(), "Check loop started");
            loop {
                if *shutdown.borrow() {
                    break;
                }

                run_iteration(name, &metrics, retry, &run).await;

                // Fixed delay: measured from the end of this iteration.
                tokio::select! {
                    _ = time::sleep(interval) => {}
                    changed = shutdown.changed() => {
                        // A closed channel means the scheduler is gone.
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(check = name, "Check loop exited");
        })
    }
}

/// One iteration: run the check, retrying transient storage errors with
/// bounded backoff. Any remaining failure is logged and contained — it
/// never terminates the loop or affects the other checks.
async fn run_iteration<F, Fut>(name: &'static str, metrics: &AppMetrics, retry: RetryPolicy, run: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), CoreError>>,
{
    metrics.sweep_runs_total.with_label_values(&[name]).inc();

    let mut attempt = 0;
    loop {
        match run().await {
            Ok(()) => return,
            Err(err) if err.is_transient() && attempt < retry.max_retries => {
                attempt += 1;
                metrics.sweep_retries_total.with_label_values(&[name]).inc();
                let delay = retry.delay_for(attempt);
                tracing::warn!(
                    check = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %err,
                    "Transient storage error, retrying"
                );
                time::sleep(delay).await;
            }
            Err(err) => {
                metrics.sweep_failures_total.with_label_values(&[name]).inc();
                tracing::error!(check = name, %err, "Check iteration failed; will run again next interval");
                return;
            }
        }
    }
}
