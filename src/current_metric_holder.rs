use std::cell::Cell;
use std::sync::Arc;

use crate::trace_metric::TraceMetric;

/// The trace thread's cursor onto whichever [`TraceMetric`] is currently
/// open.
///
/// This is read and written only by the single trace thread that owns a
/// given trace and must never be shared across threads. A `Cell` is
/// enough: trace-thread-only mutable state needs no lock.
pub struct CurrentMetricHolder {
    current: Cell<Option<Arc<TraceMetric>>>,
}

impl CurrentMetricHolder {
    pub fn new(root: Arc<TraceMetric>) -> Self {
        Self {
            current: Cell::new(Some(root)),
        }
    }

    pub fn get(&self) -> Arc<TraceMetric> {
        let current = self.current.take();
        let result = current.clone();
        self.current.set(current);
        result.expect("CurrentMetricHolder used after the trace root closed")
    }

    pub fn set(&self, node: Arc<TraceMetric>) {
        self.current.set(Some(node));
    }

    /// Called when the trace root itself closes: there is no parent to
    /// fall back to.
    pub fn clear(&self) {
        self.current.set(None);
    }
}
