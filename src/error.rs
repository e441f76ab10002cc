use thiserror::Error;

/// Errors surfaced while building or serializing a [`crate::trace_metric::MetricSnapshot`].
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to serialize metric snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors surfaced by [`crate::aggregator::TransactionAggregator`].
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("transaction aggregator has already been closed")]
    Closed,

    #[error("flush of window closing at {capture_time} failed: {source}")]
    Flush {
        capture_time: i64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("consumer thread failed to start: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}
