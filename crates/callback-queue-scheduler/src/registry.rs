use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use callback_queue_core::TaskKey;

use crate::metrics::SchedulerMetrics;
use crate::worker::Worker;

/// Process-wide key-to-worker map. All mutation is atomic map operations
/// (insert-if-absent, compare-and-remove); no lock is held across a
/// lookup-and-enqueue pair, so unrelated keys never serialize on each other.
pub(crate) struct WorkerRegistry {
    workers: DashMap<TaskKey, Arc<Worker>>,
    metrics: Arc<SchedulerMetrics>,
}

impl WorkerRegistry {
    pub(crate) fn new(metrics: Arc<SchedulerMetrics>) -> Self {
        WorkerRegistry {
            workers: DashMap::new(),
            metrics,
        }
    }

    /// Look up the worker for a key, spawning one in `Active` state if absent
    pub(crate) fn get_or_create(&self, key: &str) -> Arc<Worker> {
        if let Some(found) = self.workers.get(key) {
            return found.clone();
        }

        let entry = self.workers.entry(key.to_string()).or_insert_with(|| {
            info!(key, "creating worker lane");
            self.metrics.workers_created_total.inc();
            Worker::spawn(key.to_string(), self.metrics.clone())
        });
        let worker = entry.value().clone();
        drop(entry);

        self.metrics.workers_live.set(self.workers.len() as i64);
        worker
    }

    /// Compare-and-remove: drop the entry only if it still holds this exact
    /// worker and that worker has reached `ShuttingDown`. A concurrent
    /// replacement under the same key is left alone.
    pub(crate) fn remove_retired(&self, key: &str, worker: &Arc<Worker>) -> bool {
        let removed = self
            .workers
            .remove_if(key, |_, current| {
                Arc::ptr_eq(current, worker) && current.is_shutting_down()
            })
            .is_some();

        if removed {
            self.metrics.workers_live.set(self.workers.len() as i64);
        }
        removed
    }

    /// Clone out every live worker for a reaper pass
    pub(crate) fn snapshot(&self) -> Vec<Arc<Worker>> {
        self.workers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Take every entry out of the map, for shutdown
    pub(crate) fn drain_entries(&self) -> Vec<(TaskKey, Arc<Worker>)> {
        let keys: Vec<TaskKey> = self.workers.iter().map(|entry| entry.key().clone()).collect();

        let mut drained = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.workers.remove(&key) {
                drained.push(entry);
            }
        }

        self.metrics.workers_live.set(self.workers.len() as i64);
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
