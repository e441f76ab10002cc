use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::ticker::Ticker;
use crate::trace::{FineProfile, Trace};
use crate::trace_metric::MetricSnapshot;

const BACKGROUND_BUCKET: &str = "bg";
const FOREGROUND_BUCKET: &str = "";

/// A merged view of a metric subtree, folded across every trace rolled
/// into one [`TransactionPointBuilder`].
///
/// Keyed by name text rather than [`crate::metric_name::MetricName`]
/// identity: this tree outlives the traces it was folded from, so it
/// holds plain owned strings instead of borrowing into any one trace's
/// interned names.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MergedMetricNode {
    pub name: String,
    pub total: i64,
    pub min: i64,
    pub max: i64,
    pub count: i64,
    pub children: HashMap<String, MergedMetricNode>,
}

impl MergedMetricNode {
    fn new(name: String) -> Self {
        Self {
            name,
            total: 0,
            min: i64::MAX,
            max: i64::MIN,
            count: 0,
            children: HashMap::new(),
        }
    }

    fn merge(&mut self, snapshot: &MetricSnapshot) {
        self.total += snapshot.total;
        self.min = self.min.min(snapshot.min);
        self.max = self.max.max(snapshot.max);
        self.count += snapshot.count;

        for child in snapshot.nested_metrics.iter().flatten() {
            self.children
                .entry(child.name.clone())
                .or_insert_with(|| MergedMetricNode::new(child.name.clone()))
                .merge(child);
        }
    }
}

/// Mutable accumulator for one (type, transactionName) key within a
/// window.
pub struct TransactionPointBuilder {
    total: i64,
    count: i64,
    error_count: i64,
    stored_count: i64,
    merged_metrics: Option<MergedMetricNode>,
    fine_profiles: Vec<FineProfile>,
}

impl TransactionPointBuilder {
    fn new() -> Self {
        Self {
            total: 0,
            count: 0,
            error_count: 0,
            stored_count: 0,
            merged_metrics: None,
            fine_profiles: Vec::new(),
        }
    }

    /// Folds one trace in. `fold_profile` is false for the overall
    /// bucket: fine profiles are merged into the per-transaction builder
    /// only, since the overall profile wasn't judged worth the cost.
    fn add(&mut self, trace: &Trace, ticker: &dyn Ticker, fold_profile: bool) {
        self.total += trace.duration();
        self.count += 1;
        if trace.error().is_some() {
            self.error_count += 1;
        }

        let snapshot = trace.root().snapshot(ticker);
        self.merged_metrics
            .get_or_insert_with(|| MergedMetricNode::new(snapshot.name.clone()))
            .merge(&snapshot);

        if fold_profile {
            if let Some(profile) = trace.fine_profile() {
                self.fine_profiles.push(profile);
            }
        }
    }

    fn record_stored(&mut self) {
        self.stored_count += 1;
    }

    fn build(&self, capture_time: i64, transaction_name: Option<String>) -> TransactionPoint {
        TransactionPoint {
            capture_time,
            transaction_name,
            total: self.total,
            count: self.count,
            error_count: self.error_count,
            stored_count: self.stored_count,
            merged_metrics: self.merged_metrics.clone(),
            fine_profiles: self.fine_profiles.clone(),
        }
    }
}

/// The immutable rollup `TransactionPointBuilder::build` produces.
#[derive(Debug, Clone)]
pub struct TransactionPoint {
    pub capture_time: i64,
    /// `None` for the overall, type-wide point.
    pub transaction_name: Option<String>,
    pub total: i64,
    pub count: i64,
    pub error_count: i64,
    pub stored_count: i64,
    pub merged_metrics: Option<MergedMetricNode>,
    pub fine_profiles: Vec<FineProfile>,
}

/// One type bucket ("" for foreground, "bg" for background) within a
/// window.
struct TypeAggregates {
    overall: TransactionPointBuilder,
    per_transaction: HashMap<String, TransactionPointBuilder>,
}

impl TypeAggregates {
    fn new() -> Self {
        Self {
            overall: TransactionPointBuilder::new(),
            per_transaction: HashMap::new(),
        }
    }

    fn add(&mut self, trace: &Trace, ticker: &dyn Ticker, will_be_stored: bool) {
        self.overall.add(trace, ticker, false);
        let per = self
            .per_transaction
            .entry(trace.transaction_name().to_string())
            .or_insert_with(TransactionPointBuilder::new);
        per.add(trace, ticker, true);

        if will_be_stored {
            self.overall.record_stored();
            per.record_stored();
        }
    }

    fn build(&self, capture_time: i64) -> (TransactionPoint, HashMap<String, TransactionPoint>) {
        let overall = self.overall.build(capture_time, None);
        let per_transaction = self
            .per_transaction
            .iter()
            .map(|(name, builder)| (name.clone(), builder.build(capture_time, Some(name.clone()))))
            .collect();
        (overall, per_transaction)
    }
}

/// One wall-clock-aligned window's worth of rolled-up traces. Created
/// on first `add`, sealed at most once.
pub struct Aggregates {
    capture_time: i64,
    by_type: Mutex<HashMap<String, TypeAggregates>>,
    sealed: AtomicBool,
}

impl Aggregates {
    pub fn new(capture_time: i64) -> Self {
        Self {
            capture_time,
            by_type: Mutex::new(HashMap::new()),
            sealed: AtomicBool::new(false),
        }
    }

    pub fn capture_time(&self) -> i64 {
        self.capture_time
    }

    /// Folds `trace` into its bucket. Called only by the aggregator's
    /// consumer thread.
    ///
    /// The lock is held across a call into `trace`/`ticker`, both of
    /// which are host-supplied and can panic. The aggregator's consumer
    /// loop catches that panic and moves on to the next trace, so a
    /// poisoned lock here must not cascade into every later trace folded
    /// into this window: hence recovering the guard instead of
    /// unwrapping it.
    pub fn add(&self, trace: &Trace, ticker: &dyn Ticker, will_be_stored: bool) {
        let bucket_key = if trace.is_background() {
            BACKGROUND_BUCKET
        } else {
            FOREGROUND_BUCKET
        };
        let mut by_type = self.by_type.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        by_type
            .entry(bucket_key.to_string())
            .or_insert_with(TypeAggregates::new)
            .add(trace, ticker, will_be_stored);
    }

    /// Marks this window sealed, returning `true` the first time it is
    /// called and `false` on every call after: guards against a window
    /// being flushed twice if `close()` races a rollover.
    pub fn seal(&self) -> bool {
        self.sealed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Builds the immutable `TransactionPoint`s for every (type,
    /// transactionName) key in this window, for the flush task to hand
    /// to the repository.
    pub fn build_points(&self) -> HashMap<String, (TransactionPoint, HashMap<String, TransactionPoint>)> {
        let by_type = self.by_type.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        by_type
            .iter()
            .map(|(type_key, bucket)| (type_key.clone(), bucket.build(self.capture_time)))
            .collect()
    }
}

/// One item on the aggregator's producer-to-consumer queue.
pub struct PendingAggregation {
    pub capture_time: i64,
    pub trace: Trace,
    pub trace_will_be_stored: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric_name::MetricName;
    use crate::ticker::FakeTicker;
    use std::sync::Arc;

    fn finished_trace(
        ticker: &Arc<FakeTicker>,
        name: &str,
        txn_name: &str,
        is_background: bool,
        duration: i64,
    ) -> Trace {
        let trace = Trace::start(
            ticker.clone(),
            MetricName::intern(name),
            "http",
            txn_name,
            is_background,
        );
        ticker.advance(duration);
        trace.finish()
    }

    /// Background and foreground traces land in distinct buckets.
    #[test]
    fn background_and_foreground_traces_land_in_distinct_buckets() {
        let ticker = Arc::new(FakeTicker::new(0));
        let window = Aggregates::new(1000);

        let fg = finished_trace(&ticker, "root", "GET /a", false, 50);
        window.add(&fg, ticker.as_ref(), true);

        ticker.set(0);
        let bg = finished_trace(&ticker, "root", "job:cleanup", true, 50);
        window.add(&bg, ticker.as_ref(), false);

        let points = window.build_points();
        assert_eq!(points.len(), 2);

        let (fg_overall, fg_per) = &points[""];
        assert_eq!(fg_overall.count, 1);
        assert_eq!(fg_overall.total, 50);
        assert_eq!(fg_overall.stored_count, 1);
        assert_eq!(fg_per.len(), 1);
        assert!(fg_per.contains_key("GET /a"));

        let (bg_overall, bg_per) = &points["bg"];
        assert_eq!(bg_overall.count, 1);
        assert_eq!(bg_overall.stored_count, 0);
        assert_eq!(bg_per.len(), 1);
        assert!(bg_per.contains_key("job:cleanup"));
    }

    #[test]
    fn seal_is_idempotent() {
        let window = Aggregates::new(1000);
        assert!(window.seal());
        assert!(!window.seal());
    }

    #[test]
    fn error_and_stored_counts_accumulate_per_transaction() {
        let ticker = Arc::new(FakeTicker::new(0));
        let window = Aggregates::new(1000);

        let trace = finished_trace(&ticker, "root", "GET /a", false, 10);
        trace.set_error("boom");
        window.add(&trace, ticker.as_ref(), true);

        let points = window.build_points();
        let (overall, per) = &points[""];
        assert_eq!(overall.error_count, 1);
        let per_txn = &per["GET /a"];
        assert_eq!(per_txn.error_count, 1);
        assert_eq!(per_txn.stored_count, 1);
    }
}
