use callback_queue_core::TaskOutcome;
use prometheus::{Counter, CounterVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry};

/// Prometheus metrics for the scheduler.
///
/// A task that times out is counted twice under different labels: once as
/// `timed_out` when the submit call stops waiting, and once as `abandoned`
/// when its lane later drops it.
pub struct SchedulerMetrics {
    pub registry: Registry,

    /// Settled tasks by outcome
    pub tasks_total: CounterVec,

    /// Submission-to-settle duration by outcome
    pub task_duration_seconds: HistogramVec,

    /// Submissions that raced a retiring worker and retried
    pub submit_retries_total: Counter,

    /// Submissions that exhausted their retry budget
    pub scheduling_failures_total: Counter,

    pub workers_created_total: Counter,
    pub workers_reaped_total: Counter,
    pub workers_live: IntGauge,
}

impl SchedulerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let tasks_total = CounterVec::new(
            Opts::new("cbq_tasks_total", "Settled tasks by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(tasks_total.clone()))?;

        let task_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "cbq_task_duration_seconds",
                "Time from submission to settlement in seconds",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(task_duration_seconds.clone()))?;

        let submit_retries_total = Counter::new(
            "cbq_submit_retries_total",
            "Submissions retried after racing a retiring worker",
        )?;
        registry.register(Box::new(submit_retries_total.clone()))?;

        let scheduling_failures_total = Counter::new(
            "cbq_scheduling_failures_total",
            "Submissions that exhausted their retry budget",
        )?;
        registry.register(Box::new(scheduling_failures_total.clone()))?;

        let workers_created_total =
            Counter::new("cbq_workers_created_total", "Worker lanes created")?;
        registry.register(Box::new(workers_created_total.clone()))?;

        let workers_reaped_total =
            Counter::new("cbq_workers_reaped_total", "Idle worker lanes retired")?;
        registry.register(Box::new(workers_reaped_total.clone()))?;

        let workers_live = IntGauge::new("cbq_workers_live", "Worker lanes currently registered")?;
        registry.register(Box::new(workers_live.clone()))?;

        Ok(SchedulerMetrics {
            registry,
            tasks_total,
            task_duration_seconds,
            submit_retries_total,
            scheduling_failures_total,
            workers_created_total,
            workers_reaped_total,
            workers_live,
        })
    }

    /// Record a settled task
    pub fn task_settled(&self, outcome: TaskOutcome, duration_secs: f64) {
        let label = outcome.as_str();
        self.tasks_total.with_label_values(&[label]).inc();
        self.task_duration_seconds
            .with_label_values(&[label])
            .observe(duration_secs);
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
