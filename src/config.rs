use std::time::Duration;

/// Tunables for a [`crate::aggregator::TransactionAggregator`].
#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    /// Width of each aggregation window.
    pub interval: Duration,
    /// How long the consumer thread will keep waiting past a window's
    /// boundary for traces that finished before it but queued late,
    /// before rolling the window over anyway.
    pub queue_poll_grace: Duration,
    /// Name given to the consumer thread, for diagnostics.
    pub consumer_thread_name: String,
    /// Number of worker threads the default [`crate::executor::ThreadExecutor`]
    /// keeps around for flushing closed windows.
    pub executor_parallelism: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            interval: Duration::from_secs(60),
            queue_poll_grace: Duration::from_millis(1000),
            consumer_thread_name: "tracewatch-aggregator".to_string(),
            executor_parallelism: 2,
        }
    }
}
