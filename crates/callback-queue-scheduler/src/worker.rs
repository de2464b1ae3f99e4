use callback_queue_core::{SchedulerError, TaskContext, TaskKey, TaskOutcome};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::metrics::SchedulerMetrics;
use crate::state::{WorkerPhase, WorkerState};

/// A queued unit of work: metadata plus the boxed closure that runs the
/// caller's operation and settles its reply channel.
pub(crate) struct Job {
    pub(crate) ctx: TaskContext,
    run: Box<dyn FnOnce() -> BoxFuture<'static, TaskOutcome> + Send>,
}

impl Job {
    pub(crate) fn new<T, F, Fut>(
        key: TaskKey,
        timeout: Duration,
        op: F,
        reply: oneshot::Sender<Result<T, SchedulerError>>,
    ) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let ctx = TaskContext::new(key, timeout);
        let run = Box::new(move || -> BoxFuture<'static, TaskOutcome> {
            if reply.is_closed() {
                // caller already gave up; skip without running the operation
                return Box::pin(std::future::ready(TaskOutcome::Abandoned));
            }

            let mut reply = reply;
            Box::pin(async move {
                let operation = op();
                tokio::select! {
                    biased;
                    _ = reply.closed() => TaskOutcome::Abandoned,
                    result = operation => {
                        match result {
                            Ok(value) => {
                                let _ = reply.send(Ok(value));
                                TaskOutcome::Completed
                            }
                            Err(err) => {
                                let _ = reply.send(Err(SchedulerError::Task(err)));
                                TaskOutcome::Failed
                            }
                        }
                    }
                }
            })
        });

        Job { ctx, run }
    }
}

struct Lane {
    next_seq: u64,
    tx: Option<mpsc::UnboundedSender<Job>>,
}

/// The serial execution lane for one key: an unbounded channel drained by a
/// single tokio task, plus the lifecycle state the scheduler and reaper
/// coordinate through.
pub(crate) struct Worker {
    key: TaskKey,
    state: WorkerState,
    // seq assignment and the channel send share this lock so the per-worker
    // sequence numbers match channel FIFO order exactly
    lane: Mutex<Lane>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn spawn(key: TaskKey, metrics: Arc<SchedulerMetrics>) -> Arc<Worker> {
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Arc::new(Worker {
            key: key.clone(),
            state: WorkerState::new(),
            lane: Mutex::new(Lane {
                next_seq: 0,
                tx: Some(tx),
            }),
            join: Mutex::new(None),
        });

        let handle = tokio::spawn(run_lane(key, rx, metrics));
        *worker.join.lock() = Some(handle);

        worker
    }

    /// Hand a job to the lane if the worker is not shutting down. On
    /// rejection the job comes back to the caller, who retries against a
    /// fresh worker. Returns the sequence number assigned at enqueue.
    pub(crate) fn try_enqueue(&self, mut job: Job) -> Result<u64, Job> {
        if !self.state.try_touch() {
            trace!(key = %self.key, "enqueue rejected, worker is shutting down");
            return Err(job);
        }

        let mut lane = self.lane.lock();
        let tx = match lane.tx.as_ref() {
            Some(tx) => tx,
            // a force drain closed the intake between the phase check and here
            None => return Err(job),
        };

        let seq = lane.next_seq;
        job.ctx.seq = seq;
        match tx.send(job) {
            Ok(()) => {
                lane.next_seq += 1;
                Ok(seq)
            }
            Err(mpsc::error::SendError(job)) => Err(job),
        }
    }

    /// Close the intake and wait for the lane to finish its backlog. Aborts
    /// the lane task if the grace period elapses.
    pub(crate) async fn drain(&self, grace: Duration, force_grace: Duration) {
        self.lane.lock().tx.take();

        let handle = self.join.lock().take();
        let mut handle = match handle {
            Some(handle) => handle,
            None => return, // already drained
        };

        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!(
                key = %self.key,
                grace_ms = grace.as_millis() as u64,
                "worker lane did not drain in time, aborting"
            );
            handle.abort();
            if tokio::time::timeout(force_grace, &mut handle).await.is_err() {
                error!(key = %self.key, "worker lane still running after abort");
            }
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn phase(&self) -> WorkerPhase {
        self.state.phase()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.state.phase() == WorkerPhase::ShuttingDown
    }

    pub(crate) fn mark_idle_if_stale(&self, now_ms: i64, idle_threshold_ms: i64) -> bool {
        self.state.mark_idle_if_stale(now_ms, idle_threshold_ms)
    }

    pub(crate) fn try_retire(&self) -> bool {
        self.state.try_retire()
    }

    pub(crate) fn force_retire(&self) -> WorkerPhase {
        self.state.force_retire()
    }

    pub(crate) fn last_access_ms(&self) -> i64 {
        self.state.last_access_ms()
    }
}

async fn run_lane(key: TaskKey, mut rx: mpsc::UnboundedReceiver<Job>, metrics: Arc<SchedulerMetrics>) {
    while let Some(job) = rx.recv().await {
        let outcome = (job.run)().await;
        metrics.task_settled(outcome, job.ctx.age_secs());

        if outcome == TaskOutcome::Completed {
            trace!(key = %key, task = %job.ctx.id, seq = job.ctx.seq, "task completed");
        } else {
            debug!(
                key = %key,
                task = %job.ctx.id,
                seq = job.ctx.seq,
                outcome = outcome.as_str(),
                "task settled"
            );
        }
    }

    trace!(key = %key, "worker lane exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn test_metrics() -> Arc<SchedulerMetrics> {
        Arc::new(SchedulerMetrics::new().unwrap())
    }

    fn enqueue(worker: &Worker, job: Job) -> u64 {
        match worker.try_enqueue(job) {
            Ok(seq) => seq,
            Err(_) => panic!("enqueue rejected"),
        }
    }

    #[tokio::test]
    async fn test_jobs_run_and_reply() {
        let worker = Worker::spawn("doc-a".to_string(), test_metrics());

        let (tx, rx) = oneshot::channel();
        let job = Job::new(
            "doc-a".to_string(),
            Duration::from_secs(5),
            || async { Ok(42u32) },
            tx,
        );
        enqueue(&worker, job);

        assert_eq!(rx.await.unwrap().unwrap(), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_completion_order_matches_enqueue_seq() {
        let worker = Worker::spawn("doc-a".to_string(), test_metrics());
        let log = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(false));

        let mut submitters = Vec::new();
        let mut replies = Vec::new();
        for id in 0..5u64 {
            let (tx, rx) = oneshot::channel::<Result<(), SchedulerError>>();
            replies.push(rx);

            let worker = worker.clone();
            let log = log.clone();
            let running = running.clone();
            submitters.push(tokio::spawn(async move {
                let job = Job::new(
                    "doc-a".to_string(),
                    Duration::from_secs(5),
                    move || async move {
                        // the lane must never run two tasks at once
                        assert!(!running.swap(true, Ordering::SeqCst));
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        log.lock().push(id);
                        running.store(false, Ordering::SeqCst);
                        Ok(())
                    },
                    tx,
                );
                (id, enqueue(&worker, job))
            }));
        }

        let mut seq_of = HashMap::new();
        for submitter in submitters {
            let (id, seq) = submitter.await.unwrap();
            seq_of.insert(id, seq);
        }
        for reply in replies {
            reply.await.unwrap().unwrap();
        }

        let observed: Vec<u64> = log.lock().iter().map(|id| seq_of[id]).collect();
        let mut expected = observed.clone();
        expected.sort_unstable();
        assert_eq!(observed.len(), 5);
        assert_eq!(observed, expected, "completion order must follow enqueue order");
    }

    #[tokio::test]
    async fn test_enqueue_rejected_after_retirement() {
        let worker = Worker::spawn("doc-a".to_string(), test_metrics());
        worker.force_retire();

        let (tx, _rx) = oneshot::channel::<Result<(), SchedulerError>>();
        let job = Job::new(
            "doc-a".to_string(),
            Duration::from_secs(5),
            || async { Ok(()) },
            tx,
        );

        assert!(worker.try_enqueue(job).is_err());
    }

    #[tokio::test]
    async fn test_drain_finishes_backlog() {
        let worker = Worker::spawn("doc-a".to_string(), test_metrics());
        let completed = Arc::new(AtomicUsize::new(0));

        let mut replies = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = oneshot::channel::<Result<(), SchedulerError>>();
            replies.push(rx);
            let completed = completed.clone();
            let job = Job::new(
                "doc-a".to_string(),
                Duration::from_secs(5),
                move || async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                tx,
            );
            enqueue(&worker, job);
        }

        worker.force_retire();
        worker
            .drain(Duration::from_secs(5), Duration::from_secs(1))
            .await;

        assert_eq!(completed.load(Ordering::SeqCst), 3);
        for reply in replies {
            reply.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_skips_job_whose_caller_left() {
        let worker = Worker::spawn("doc-a".to_string(), test_metrics());
        let ran = Arc::new(AtomicBool::new(false));

        let (tx, rx) = oneshot::channel::<Result<(), SchedulerError>>();
        drop(rx); // caller gone before the lane reaches the job

        let ran_clone = ran.clone();
        let job = Job::new(
            "doc-a".to_string(),
            Duration::from_secs(5),
            move || async move {
                ran_clone.store(true, Ordering::SeqCst);
                Ok(())
            },
            tx,
        );
        enqueue(&worker, job);

        worker.force_retire();
        worker
            .drain(Duration::from_secs(1), Duration::from_secs(1))
            .await;

        assert!(!ran.load(Ordering::SeqCst));
    }
}
