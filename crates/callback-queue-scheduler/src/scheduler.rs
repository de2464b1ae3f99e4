use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use callback_queue_core::{Result, SchedulerConfig, SchedulerError, TaskKey, TaskOutcome};

use crate::metrics::SchedulerMetrics;
use crate::reaper;
use crate::registry::WorkerRegistry;
use crate::worker::Job;

/// Per-key sequential task scheduler.
///
/// Tasks submitted under the same key run strictly in submission order on
/// that key's worker lane; tasks under different keys run in parallel. The
/// scheduler owns the lane registry and a background reaper that retires
/// lanes idle past the configured threshold.
///
/// Must be created inside a tokio runtime.
pub struct CallbackScheduler {
    config: SchedulerConfig,
    registry: Arc<WorkerRegistry>,
    metrics: Arc<SchedulerMetrics>,
    shutting_down: AtomicBool,
    reaper_shutdown: Arc<Notify>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackScheduler {
    pub fn new(config: SchedulerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let metrics = Arc::new(SchedulerMetrics::new()?);
        let registry = Arc::new(WorkerRegistry::new(metrics.clone()));
        let reaper_shutdown = Arc::new(Notify::new());

        let reaper = tokio::spawn(reaper::run(
            registry.clone(),
            config.clone(),
            metrics.clone(),
            reaper_shutdown.clone(),
        ));

        Ok(CallbackScheduler {
            config,
            registry,
            metrics,
            shutting_down: AtomicBool::new(false),
            reaper_shutdown,
            reaper: Mutex::new(Some(reaper)),
        })
    }

    /// Submit a task under a key and wait for its result, using the default
    /// timeout from the configuration
    pub async fn submit<T, F, Fut>(&self, key: impl Into<TaskKey>, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.config.default_task_timeout();
        self.submit_with_timeout(key, op, timeout).await
    }

    /// Submit a task under a key and wait for its result.
    ///
    /// The timeout is measured from submission and covers queue wait plus
    /// execution. On elapse the task is abandoned (skipped if not started,
    /// cancelled at its next await point if in flight) and the lane moves on
    /// to the next task for that key.
    ///
    /// A worker retiring between lookup and enqueue is repaired by evicting
    /// the stale registry entry and retrying against a fresh worker, up to
    /// `submit_max_attempts` times.
    pub async fn submit_with_timeout<T, F, Fut>(
        &self,
        key: impl Into<TaskKey>,
        op: F,
        timeout: Duration,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }

        let key = key.into();
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut job = Job::new(key.clone(), timeout, op, reply_tx);

        let max_attempts = self.config.submit_max_attempts;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let worker = self.registry.get_or_create(&key);
            match worker.try_enqueue(job) {
                Ok(_seq) => break,
                Err(rejected) => {
                    job = rejected;
                    self.metrics.submit_retries_total.inc();
                    debug!(key = %key, attempt, "worker was retiring, evicting stale entry");
                    self.registry.remove_retired(&key, &worker);

                    if attempt >= max_attempts {
                        warn!(key = %key, attempts = attempt, "submit retry budget exhausted");
                        self.metrics.scheduling_failures_total.inc();
                        return Err(SchedulerError::Scheduling {
                            key,
                            attempts: attempt,
                        });
                    }
                }
            }
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => Err(SchedulerError::Abandoned { key }),
            Err(_elapsed) => {
                self.metrics
                    .task_settled(TaskOutcome::TimedOut, timeout.as_secs_f64());
                debug!(
                    key = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    "submit timed out waiting for task"
                );
                Err(SchedulerError::Timeout { key, timeout })
            }
        }
    }

    /// Stop accepting work, stop the reaper, and drain every worker lane.
    ///
    /// Lanes get to finish their backlog within the global shutdown grace
    /// budget; lanes still running past the deadline are aborted. This is the
    /// only path that retires `Active` workers. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(workers = self.registry.len(), "scheduler shutting down");

        self.reaper_shutdown.notify_one();
        let reaper = self.reaper.lock().take();
        if let Some(handle) = reaper {
            let _ = handle.await;
        }

        let deadline = Instant::now() + self.config.shutdown_grace();
        let force_grace = self.config.shutdown_force_grace();

        let mut entries = self.registry.drain_entries();
        while !entries.is_empty() {
            for (key, worker) in entries {
                let prior = worker.force_retire();
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    warn!(key = %key, "shutdown grace exhausted, aborting lane");
                }
                worker.drain(remaining, force_grace).await;
                debug!(key = %key, prior_phase = prior.as_str(), "worker drained");
            }

            // submissions that raced the intake flag may have spawned
            // stragglers; sweep until the map stays empty
            entries = self.registry.drain_entries();
        }

        info!("scheduler shutdown complete");
    }

    /// Run one reaper pass immediately, outside the background schedule.
    /// Returns how many idle workers were retired and removed.
    pub async fn reap_idle_workers(&self) -> usize {
        reaper::reap_once(&self.registry, &self.config, &self.metrics).await
    }

    /// Number of worker lanes currently registered
    pub fn worker_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        self.metrics.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl Drop for CallbackScheduler {
    fn drop(&mut self) {
        // a scheduler dropped without shutdown() must not leave the reaper
        // task running
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }
    }
}
