//! Autoscaler: periodic policy evaluation across node classes.
//!
//! A single timer drives evaluation passes. Each pass reads every policy
//! and fans enabled ones out to a bounded pool of workers; a worker
//! evaluates one class and, when a check fires and the scaler's
//! preconditions pass, submits the scaling request as its own task.
//!
//! At most one pass is in flight. A tick arriving while a pass is still
//! dispatching is skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use tidepool_resource::ResourceTracker;
use tidepool_scale::Scale;
use tidepool_state::{Policy, PolicyBackend, ScalingRequest};

use crate::decision;

/// How often `stop` re-checks for in-flight work.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shortest accepted evaluation interval. The timer rejects zero.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct AutoscalerConfig {
    /// Time between evaluation passes.
    pub interval: Duration,
    /// Size of the worker pool.
    pub threads: usize,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            threads: 3,
        }
    }
}

struct AutoscalerInner {
    config: AutoscalerConfig,
    policies: Arc<dyn PolicyBackend>,
    tracker: ResourceTracker,
    scaler: Arc<dyn Scale>,
    pool: Arc<Semaphore>,
    /// An evaluation pass is dispatching workers.
    in_progress: AtomicBool,
    /// The timer loop is running.
    running: AtomicBool,
    active_workers: AtomicUsize,
    shutdown: watch::Sender<bool>,
}

/// Decrements the active worker count when the worker ends.
struct WorkerGuard(Arc<AutoscalerInner>);

impl WorkerGuard {
    fn new(inner: &Arc<AutoscalerInner>) -> Self {
        inner.active_workers.fetch_add(1, Ordering::SeqCst);
        Self(inner.clone())
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Marks the timer loop running for as long as it is held, including
/// when the loop unwinds.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn new(running: &'a AtomicBool) -> Self {
        running.store(true, Ordering::SeqCst);
        Self(running)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Cloneable handle to the autoscaler.
#[derive(Clone)]
pub struct Autoscaler {
    inner: Arc<AutoscalerInner>,
}

impl Autoscaler {
    pub fn new(
        mut config: AutoscalerConfig,
        policies: Arc<dyn PolicyBackend>,
        tracker: ResourceTracker,
        scaler: Arc<dyn Scale>,
    ) -> Self {
        if config.interval < MIN_INTERVAL {
            warn!(
                interval_ms = config.interval.as_millis() as u64,
                "autoscaler interval too short, using minimum"
            );
            config.interval = MIN_INTERVAL;
        }
        let threads = config.threads.max(1);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(AutoscalerInner {
                config,
                policies,
                tracker,
                scaler,
                pool: Arc::new(Semaphore::new(threads)),
                in_progress: AtomicBool::new(false),
                running: AtomicBool::new(false),
                active_workers: AtomicUsize::new(0),
                shutdown,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run the timer loop on its own task.
    pub fn spawn(&self) -> JoinHandle<()> {
        let autoscaler = self.clone();
        tokio::spawn(async move { autoscaler.run().await })
    }

    /// Run the timer loop until [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }

        let interval = self.inner.config.interval;
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let _running = RunningGuard::new(&self.inner.running);
        info!(
            interval_secs = interval.as_secs(),
            threads = self.inner.config.threads,
            "autoscaler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!("triggering autoscaler evaluation run");
                    let autoscaler = self.clone();
                    tokio::spawn(async move { autoscaler.run_evaluation().await });
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("autoscaler loop stopped");
    }

    /// Perform one evaluation pass. Returns `false` when another pass was
    /// already in flight and this one was skipped.
    pub async fn run_evaluation(&self) -> bool {
        if self.inner.in_progress.swap(true, Ordering::SeqCst) {
            info!("scaling run in progress, skipping new assessment");
            return false;
        }

        self.dispatch_workers().await;

        // Cleared once every worker is dispatched; workers may still run.
        self.inner.in_progress.store(false, Ordering::SeqCst);
        true
    }

    async fn dispatch_workers(&self) {
        let policies = match self.inner.policies.get_policies() {
            Ok(policies) => policies,
            Err(e) => {
                error!(error = %e, "autoscaler unable to get scaling policies");
                return;
            }
        };

        if policies.is_empty() {
            debug!("no scaling policies found for autoscaler to iterate");
            return;
        }

        for policy in policies.into_values().filter(|p| p.enabled) {
            let permit = match self.inner.pool.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("autoscaler worker pool closed, abandoning evaluation run");
                    break;
                }
            };
            let guard = WorkerGuard::new(&self.inner);
            let autoscaler = self.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                autoscaler.evaluate_class(policy).await;
            });
        }
    }

    /// Evaluate one class and submit a scaling request if warranted.
    async fn evaluate_class(&self, policy: Policy) {
        let class = policy.class.clone();

        if *self.inner.shutdown.borrow() {
            debug!(%class, "exiting autoscaling worker as a result of shutdown request");
            return;
        }

        let stats = match self.inner.tracker.class_resource_allocation(&class).await {
            Ok(stats) => stats,
            Err(e) => {
                error!(%class, error = %e, "unable to perform node class scaling decision");
                return;
            }
        };

        let Some(direction) = decision::evaluate(&policy.checks, &stats) else {
            debug!(%class, "no scaling action required");
            return;
        };

        let req = ScalingRequest::new(policy, direction);
        if let Err(e) = self.inner.scaler.ok_to_scale(&req).await {
            info!(%class, reason = %e, "autoscaling activity not allowed to continue");
            return;
        }

        info!(%class, activity_id = %req.id, %direction, "submitting autoscaling activity");
        // Runs independently of the worker; its outcome is recorded as an
        // activity.
        drop(self.inner.scaler.submit_scaling(req));
    }

    /// Stop the timer loop and wait for in-flight work to finish.
    pub async fn stop(&self) {
        self.inner.shutdown.send_replace(true);

        loop {
            let idle = !self.inner.running.load(Ordering::SeqCst)
                && !self.inner.in_progress.load(Ordering::SeqCst)
                && self.inner.active_workers.load(Ordering::SeqCst) == 0;
            if idle {
                self.inner.pool.close();
                info!("successfully drained autoscaler worker pool");
                return;
            }
            debug!("autoscaler still has in-flight workers, will continue to check");
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }
}
