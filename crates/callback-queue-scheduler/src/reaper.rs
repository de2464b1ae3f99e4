use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

use callback_queue_core::SchedulerConfig;

use crate::metrics::SchedulerMetrics;
use crate::registry::WorkerRegistry;
use crate::state::now_ms;

/// Periodic scan that retires long-idle workers. Marking idle and retiring
/// are separate CAS attempts on each worker's state cell, so a task arriving
/// between them reactivates the lane and the retirement fails harmlessly.
pub(crate) async fn run(
    registry: Arc<WorkerRegistry>,
    config: SchedulerConfig,
    metrics: Arc<SchedulerMetrics>,
    shutdown: Arc<Notify>,
) {
    let mut interval = tokio::time::interval(config.reap_interval());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let reaped = reap_once(&registry, &config, &metrics).await;
                if reaped > 0 {
                    info!(reaped, remaining = registry.len(), "reaped idle workers");
                }
            }
            _ = shutdown.notified() => {
                debug!("reaper stopping");
                break;
            }
        }
    }
}

/// One reaper pass over the registry. Returns how many workers were removed.
pub(crate) async fn reap_once(
    registry: &WorkerRegistry,
    config: &SchedulerConfig,
    metrics: &SchedulerMetrics,
) -> usize {
    let now = now_ms();
    let threshold_ms = config.idle_timeout().as_millis() as i64;
    let mut reaped = 0;

    for worker in registry.snapshot() {
        // (a) mark stale workers idle; also picks up entries a previous pass
        // retired but failed to remove
        if !worker.mark_idle_if_stale(now, threshold_ms) && !worker.is_shutting_down() {
            continue;
        }

        // (b) retire; fails if a submission reactivated the lane since (a)
        if !worker.try_retire() {
            debug!(key = %worker.key(), "retirement lost to a concurrent submission");
            continue;
        }

        // (c) drain and compare-and-remove
        worker
            .drain(config.reap_drain_grace(), config.shutdown_force_grace())
            .await;

        if registry.remove_retired(worker.key(), &worker) {
            metrics.workers_reaped_total.inc();
            reaped += 1;
            debug!(
                key = %worker.key(),
                idle_ms = now.saturating_sub(worker.last_access_ms()),
                "reaped idle worker"
            );
        }
    }

    reaped
}
