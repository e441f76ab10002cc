use std::cell::RefCell;
use std::sync::Arc;

use crate::current_metric_holder::CurrentMetricHolder;
use crate::metric_name::MetricName;
use crate::ticker::Ticker;
use crate::trace_metric::TraceMetric;

/// Opaque fine-grained profiling payload a trace can carry alongside its
/// `TraceMetric` tree.
///
/// This crate forwards the payload but never interprets it; kept as an
/// opaque byte payload rather than a concrete type so the producer of
/// that data is free to change shape without touching this crate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FineProfile(pub Vec<u8>);

/// A single in-flight or finished trace: its `TraceMetric` root plus the
/// trace-thread-only state needed to record it.
///
/// Owned by the one thread that runs the traced operation; moved, not
/// shared, when handed off to a [`crate::aggregator::TransactionAggregator`]
/// on completion. `Trace` is `Send` (the move across that handoff) but
/// deliberately not `Sync`: nothing here is meant to be touched
/// concurrently, unlike the `Arc<TraceMetric>` tree it owns a root of.
pub struct Trace {
    root: Arc<TraceMetric>,
    current: CurrentMetricHolder,
    ticker: Arc<dyn Ticker>,
    transaction_type: String,
    transaction_name: String,
    is_background: bool,
    error: RefCell<Option<String>>,
    fine_profile: RefCell<Option<FineProfile>>,
}

impl Trace {
    /// Starts a new trace rooted at `root_name`, sampling the start tick
    /// from `ticker`.
    pub fn start(
        ticker: Arc<dyn Ticker>,
        root_name: MetricName,
        transaction_type: impl Into<String>,
        transaction_name: impl Into<String>,
        is_background: bool,
    ) -> Self {
        let root = TraceMetric::new_root(root_name);
        let current = CurrentMetricHolder::new(root.clone());
        root.start(ticker.now(), &current);

        Self {
            root,
            current,
            ticker,
            transaction_type: transaction_type.into(),
            transaction_name: transaction_name.into(),
            is_background,
            error: RefCell::new(None),
            fine_profile: RefCell::new(None),
        }
    }

    /// Opens a nested metric under whichever node is currently open.
    pub fn start_nested(&self, metric_name: MetricName) -> Arc<TraceMetric> {
        let current = self.current.get();
        current.start_nested_now(metric_name, self.ticker.as_ref(), &self.current)
    }

    /// Closes whichever node is currently open.
    pub fn stop_current(&self) {
        let current = self.current.get();
        current.stop(self.ticker.as_ref(), &self.current);
    }

    /// Ends the trace: closes the root (and, defensively, any node a
    /// caller forgot to close), records the overall duration, and
    /// returns `self` ready to hand off to an aggregator.
    pub fn finish(self) -> Self {
        // Unwind any still-open descendants before closing the root, so
        // a caller that forgot a `stop_current` doesn't leave the root
        // stuck with a nonzero nesting level.
        loop {
            let current = self.current.get();
            if Arc::ptr_eq(&current, &self.root) {
                break;
            }
            current.stop(self.ticker.as_ref(), &self.current);
        }

        self.root.stop(self.ticker.as_ref(), &self.current);
        self
    }

    pub fn root(&self) -> &Arc<TraceMetric> {
        &self.root
    }

    pub fn ticker(&self) -> &Arc<dyn Ticker> {
        &self.ticker
    }

    pub fn transaction_type(&self) -> &str {
        &self.transaction_type
    }

    pub fn transaction_name(&self) -> &str {
        &self.transaction_name
    }

    pub fn is_background(&self) -> bool {
        self.is_background
    }

    pub fn duration(&self) -> i64 {
        self.root.total()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *self.error.borrow_mut() = Some(message.into());
    }

    pub fn error(&self) -> Option<String> {
        self.error.borrow().clone()
    }

    pub fn set_fine_profile(&self, profile: FineProfile) {
        *self.fine_profile.borrow_mut() = Some(profile);
    }

    pub fn fine_profile(&self) -> Option<FineProfile> {
        self.fine_profile.borrow().clone()
    }
}

// SAFETY: every field is either `Send` outright (`Arc<TraceMetric>` is
// `Send + Sync`, `Arc<dyn Ticker>` requires `Ticker: Send + Sync`,
// `String`/`bool`) or trace-thread-only state (`RefCell`,
// `CurrentMetricHolder`) that moves wholesale with `self` and is never
// touched concurrently with the move. `Trace` is deliberately not `Sync`.
unsafe impl Send for Trace {}
