use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a submitted task
pub type TaskId = Uuid;

/// Key scoping the serial-execution guarantee (one key = one document/session)
pub type TaskKey = String;

/// How a task left its worker lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskOutcome {
    /// Task ran to completion and its result was handed to the caller
    Completed,
    /// Task ran and returned an error, which was handed to the caller
    Failed,
    /// The caller stopped waiting before the lane reached the task
    TimedOut,
    /// The lane dropped the task mid-flight or before it started
    Abandoned,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::Failed => "failed",
            TaskOutcome::TimedOut => "timed_out",
            TaskOutcome::Abandoned => "abandoned",
        }
    }
}

/// Metadata travelling with a queued task. The closure itself stays inside
/// the scheduler; this is what logs and metrics see.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub id: TaskId,
    pub key: TaskKey,
    /// Per-worker sequence number, assigned under the lane's enqueue ticket.
    /// Zero until the task is actually enqueued.
    pub seq: u64,
    pub submitted_at: DateTime<Utc>,
    pub timeout: Duration,
}

impl TaskContext {
    pub fn new(key: TaskKey, timeout: Duration) -> Self {
        TaskContext {
            id: Uuid::new_v4(),
            key,
            seq: 0,
            submitted_at: Utc::now(),
            timeout,
        }
    }

    /// Seconds elapsed since submission, for duration metrics
    pub fn age_secs(&self) -> f64 {
        (Utc::now() - self.submitted_at).num_milliseconds() as f64 / 1000.0
    }
}
