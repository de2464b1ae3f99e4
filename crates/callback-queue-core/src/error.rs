use crate::task::TaskKey;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The task's own operation failed. The inner error is the closure's
    /// error, untouched; callers downcast it to interpret the cause.
    #[error("task failed: {0}")]
    Task(anyhow::Error),

    #[error("task for key '{key}' did not complete within {timeout:?}")]
    Timeout { key: TaskKey, timeout: Duration },

    #[error("could not schedule task for key '{key}' after {attempts} attempts")]
    Scheduling { key: TaskKey, attempts: u32 },

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("worker for key '{key}' was torn down before the task settled")]
    Abandoned { key: TaskKey },
}

impl SchedulerError {
    /// Unwrap the task's own error, if this is a task failure
    pub fn into_task_error(self) -> Option<anyhow::Error> {
        match self {
            SchedulerError::Task(inner) => Some(inner),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
