mod metrics;
mod reaper;
mod registry;
mod scheduler;
mod state;
mod worker;

pub use metrics::SchedulerMetrics;
pub use scheduler::CallbackScheduler;

pub use callback_queue_core::{
    Result, SchedulerConfig, SchedulerError, TaskContext, TaskId, TaskKey, TaskOutcome,
};
