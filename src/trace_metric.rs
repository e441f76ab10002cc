use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::current_metric_holder::CurrentMetricHolder;
use crate::metric_name::MetricName;
use crate::ticker::Ticker;

const INITIAL_CHILDREN_CAPACITY: usize = 16;

/// A cell touched only by the single trace thread that owns the
/// enclosing [`TraceMetric`].
///
/// `TraceMetric` as a whole must be `Sync` so that `Arc<TraceMetric>` can
/// be handed to reader threads for [`TraceMetric::snapshot`] without
/// cloning the tree. `last_child` and `children_by_name` are never
/// touched by those readers, only by the trace thread itself, so this
/// wrapper buys them a synchronization-free hot path by asserting,
/// rather than proving to the compiler, that only one thread ever
/// touches it.
struct TraceOnlyCell<T>(UnsafeCell<T>);

// SAFETY: every access is mediated by methods on `TraceMetric` that are
// only ever called from the trace thread that owns `self` (`start`,
// `start_nested`, `end`). Reader threads only call `snapshot`, which
// never touches a `TraceOnlyCell`.
unsafe impl<T> Sync for TraceOnlyCell<T> {}

impl<T> TraceOnlyCell<T> {
    fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    #[allow(clippy::mut_from_ref)]
    fn get_mut(&self) -> &mut T {
        // SAFETY: see the struct-level safety comment.
        unsafe { &mut *self.0.get() }
    }
}

/// One node in a trace's timing tree.
///
/// Updated by exactly one trace thread via [`start`](Self::start),
/// [`start_nested`](Self::start_nested), [`end`](Self::end),
/// [`stop`](Self::stop); observed by arbitrary reader threads via
/// [`snapshot`](Self::snapshot).
pub struct TraceMetric {
    metric_name: MetricName,
    parent: Option<Weak<TraceMetric>>,

    total: AtomicI64,
    min: AtomicI64,
    max: AtomicI64,
    count: AtomicI64,
    start_tick: AtomicI64,

    /// 0 means inactive. Carries a release on every write and an acquire
    /// on every read: the sole cross-thread synchronization on the hot
    /// path.
    self_nesting_level: AtomicU32,

    children_by_name: TraceOnlyCell<Option<HashMap<MetricName, Arc<TraceMetric>>>>,
    children_snapshot: Mutex<Vec<Arc<TraceMetric>>>,
    last_child: TraceOnlyCell<Option<Arc<TraceMetric>>>,
}

impl TraceMetric {
    fn new(metric_name: MetricName, parent: Option<Weak<TraceMetric>>) -> Arc<Self> {
        Arc::new(Self {
            metric_name,
            parent,
            total: AtomicI64::new(0),
            min: AtomicI64::new(i64::MAX),
            max: AtomicI64::new(i64::MIN),
            count: AtomicI64::new(0),
            start_tick: AtomicI64::new(0),
            self_nesting_level: AtomicU32::new(0),
            children_by_name: TraceOnlyCell::new(None),
            children_snapshot: Mutex::new(Vec::new()),
            last_child: TraceOnlyCell::new(None),
        })
    }

    /// Creates an unstarted root node. Callers start it immediately via
    /// [`start`](Self::start) as part of building a [`crate::trace::Trace`].
    pub fn new_root(metric_name: MetricName) -> Arc<Self> {
        Self::new(metric_name, None)
    }

    pub fn metric_name(&self) -> &MetricName {
        &self.metric_name
    }

    fn parent(&self) -> Option<Arc<TraceMetric>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    // ------------------------------------------------------------------
    // Hot path. Trace-thread only.
    // ------------------------------------------------------------------

    /// `start(startTick)`.
    pub fn start(self: &Arc<Self>, start_tick: i64, holder: &CurrentMetricHolder) {
        self.start_tick.store(start_tick, Ordering::Relaxed);
        self.self_nesting_level.fetch_add(1, Ordering::Release);
        holder.set(self.clone());
    }

    /// `startNested(metricName, startTick)`.
    ///
    /// Precondition: `self` is the node currently held by `holder`.
    pub fn start_nested(
        self: &Arc<Self>,
        metric_name: MetricName,
        start_tick: i64,
        holder: &CurrentMetricHolder,
    ) -> Arc<TraceMetric> {
        // 1. Recursion fast path: re-entering the same named metric
        // collapses into this node instead of allocating a child.
        if metric_name == self.metric_name {
            self.self_nesting_level.fetch_add(1, Ordering::Release);
            return self.clone();
        }

        // 2. Cached-child fast path.
        if let Some(last) = self.last_child.get_mut().clone() {
            if last.metric_name == metric_name {
                last.start(start_tick, holder);
                return last;
            }
        }

        // 3. Lookup in the (lazily allocated) identity-keyed children map.
        let children = self
            .children_by_name
            .get_mut()
            .get_or_insert_with(|| HashMap::with_capacity(INITIAL_CHILDREN_CAPACITY));

        if let Some(child) = children.get(&metric_name) {
            let child = child.clone();
            child.start(start_tick, holder);
            *self.last_child.get_mut() = Some(child.clone());
            return child;
        }

        // 4. Create a new child.
        let child = TraceMetric::new(metric_name.clone(), Some(Arc::downgrade(self)));
        children.insert(metric_name, child.clone());
        self.children_snapshot.lock().unwrap().push(child.clone());
        child.start(start_tick, holder);
        *self.last_child.get_mut() = Some(child.clone());
        child
    }

    /// `startNested(metricName)`, sampling `startTick` from `ticker`.
    pub fn start_nested_now(
        self: &Arc<Self>,
        metric_name: MetricName,
        ticker: &dyn Ticker,
        holder: &CurrentMetricHolder,
    ) -> Arc<TraceMetric> {
        self.start_nested(metric_name, ticker.now(), holder)
    }

    /// `end(endTick)`.
    pub fn end(self: &Arc<Self>, end_tick: i64, holder: &CurrentMetricHolder) {
        // Single-writer field: ordinary load is enough to decide the
        // branch, the thread always sees its own prior writes in order.
        let level = self.self_nesting_level.load(Ordering::Relaxed);

        if level == 0 {
            // Malformed nesting: `end` with no matching `start`. Panic
            // loudly in debug builds; treat as a saturating no-op in
            // release so a misbehaving caller can't drive this negative.
            debug_assert!(level > 0, "end() called without a matching start()");
            return;
        }

        if level == 1 {
            let start_tick = self.start_tick.load(Ordering::Relaxed);
            let duration = end_tick - start_tick;

            if duration < self.min.load(Ordering::Relaxed) {
                self.min.store(duration, Ordering::Relaxed);
            }
            if duration > self.max.load(Ordering::Relaxed) {
                self.max.store(duration, Ordering::Relaxed);
            }
            self.count.fetch_add(1, Ordering::Relaxed);
            self.total.fetch_add(duration, Ordering::Relaxed);

            match self.parent() {
                Some(parent) => holder.set(parent),
                None => holder.clear(),
            }
        }

        self.self_nesting_level.fetch_sub(1, Ordering::Release);
    }

    /// `stop()` ≡ `end(ticker.now())`.
    pub fn stop(self: &Arc<Self>, ticker: &dyn Ticker, holder: &CurrentMetricHolder) {
        self.end(ticker.now(), holder)
    }

    // ------------------------------------------------------------------
    // Trace-thread-only accessors.
    // ------------------------------------------------------------------

    pub fn total(&self) -> i64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn min(&self) -> i64 {
        self.min.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> i64 {
        self.max.load(Ordering::Relaxed)
    }

    pub fn children(&self) -> Vec<Arc<TraceMetric>> {
        self.children_snapshot.lock().unwrap().clone()
    }

    // ------------------------------------------------------------------
    // Reader-side snapshot. Any thread, any time.
    // ------------------------------------------------------------------

    /// Builds a point-in-time snapshot of this subtree.
    ///
    /// Readers may observe stale counters but never nonsensical ones:
    /// the emitted `total` is always ≤ the true accumulated total at any
    /// point during the call (understatement allowed, overstatement
    /// forbidden), and the in-flight estimate `curr` is always ≥ 0.
    pub fn snapshot(&self, ticker: &dyn Ticker) -> MetricSnapshot {
        let active = self.self_nesting_level.load(Ordering::Acquire) > 0;

        let (total, min, max, count, active, min_active, max_active) = if !active {
            (
                self.total.load(Ordering::Relaxed),
                self.min.load(Ordering::Relaxed),
                self.max.load(Ordering::Relaxed),
                self.count.load(Ordering::Relaxed),
                false,
                false,
                false,
            )
        } else {
            let total = self.total.load(Ordering::Relaxed);
            let start_tick = self.start_tick.load(Ordering::Relaxed);
            let curr = (ticker.now() - start_tick).max(0);

            if total == 0 {
                (curr, curr, curr, 1, true, true, true)
            } else {
                let min = self.min.load(Ordering::Relaxed);
                let max = self.max.load(Ordering::Relaxed);
                let count = self.count.load(Ordering::Relaxed);
                let max_active = curr > max;
                (
                    total + curr,
                    min,
                    max.max(curr),
                    count + 1,
                    true,
                    false,
                    max_active,
                )
            }
        };

        // A node that exists but has never been started (count == 0 and
        // inactive, a narrow window readers can observe right after a
        // child is linked into the snapshot list but before its first
        // `start`) has sentinel min/max; clamp those to zero rather than
        // surfacing +inf/-inf sentinels to readers.
        let (min, max) = if count == 0 { (0, 0) } else { (min, max) };

        let children: Vec<Arc<TraceMetric>> = self.children_snapshot.lock().unwrap().clone();
        let nested_metrics = if children.is_empty() {
            None
        } else {
            Some(children.iter().map(|c| c.snapshot(ticker)).collect())
        };

        MetricSnapshot {
            name: self.metric_name.as_str().to_string(),
            total,
            min,
            max,
            count,
            active,
            min_active,
            max_active,
            nested_metrics,
        }
    }
}

/// The structured envelope produced by a `writeSnapshot` call.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricSnapshot {
    pub name: String,
    pub total: i64,
    pub min: i64,
    pub max: i64,
    pub count: i64,
    pub active: bool,
    #[serde(rename = "minActive")]
    pub min_active: bool,
    #[serde(rename = "maxActive")]
    pub max_active: bool,
    #[serde(rename = "nestedMetrics", skip_serializing_if = "Option::is_none")]
    pub nested_metrics: Option<Vec<MetricSnapshot>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::current_metric_holder::CurrentMetricHolder;
    use crate::ticker::FakeTicker;

    fn name(s: &str) -> MetricName {
        MetricName::intern(s)
    }

    /// Simple nesting: a parent and a single child, both timed correctly.
    #[test]
    fn simple_nesting_records_self_and_child_durations() {
        let ticker = FakeTicker::new(100);
        let root = TraceMetric::new_root(name("A"));
        let holder = CurrentMetricHolder::new(root.clone());
        root.start(100, &holder);

        ticker.set(150);
        let b = root.start_nested_now(name("B"), &ticker, &holder);

        ticker.set(200);
        b.stop(&ticker, &holder);

        ticker.set(300);
        root.stop(&ticker, &holder);

        assert_eq!(root.count(), 1);
        assert_eq!(root.total(), 200);
        assert_eq!(root.min(), 200);
        assert_eq!(root.max(), 200);

        assert_eq!(b.count(), 1);
        assert_eq!(b.total(), 50);
        assert_eq!(b.min(), 50);
        assert_eq!(b.max(), 50);

        let children = root.children();
        assert_eq!(children.len(), 1);
        assert!(Arc::ptr_eq(&children[0], &b));
    }

    /// A metric re-entering itself collapses into the same node.
    #[test]
    fn recursive_reentry_collapses_into_the_same_node() {
        let ticker = FakeTicker::new(0);
        let root = TraceMetric::new_root(name("A"));
        let holder = CurrentMetricHolder::new(root.clone());
        root.start(0, &holder);

        let inner = root.start_nested(name("A"), 10, &holder);
        assert!(Arc::ptr_eq(&inner, &root));

        inner.end(20, &holder);
        root.end(30, &holder);

        assert_eq!(root.count(), 1);
        assert_eq!(root.total(), 30);
        assert_eq!(root.min(), 30);
        assert_eq!(root.max(), 30);
        assert!(root.children().is_empty());
    }

    /// Starting the same child metric twice in a row reuses the cached node.
    #[test]
    fn repeated_child_reuses_the_same_node_via_the_last_child_cache() {
        let ticker = FakeTicker::new(0);
        let root = TraceMetric::new_root(name("R"));
        let holder = CurrentMetricHolder::new(root.clone());
        root.start(0, &holder);

        let c1 = root.start_nested(name("C"), 0, &holder);
        c1.end(10, &holder);

        let c2 = root.start_nested(name("C"), 20, &holder);
        c2.end(35, &holder);

        assert!(Arc::ptr_eq(&c1, &c2));
        assert_eq!(root.children().len(), 1);
        assert_eq!(c1.count(), 2);
        assert_eq!(c1.total(), 25);
        assert_eq!(c1.min(), 10);
        assert_eq!(c1.max(), 15);
    }

    /// A snapshot taken while a metric is still running reports elapsed time.
    #[test]
    fn in_flight_snapshot_reports_elapsed_time_since_start() {
        let ticker = FakeTicker::new(100);
        let root = TraceMetric::new_root(name("A"));
        let holder = CurrentMetricHolder::new(root.clone());
        root.start(100, &holder);

        ticker.set(250);
        let snap = root.snapshot(&ticker);

        assert_eq!(snap.total, 150);
        assert_eq!(snap.min, 150);
        assert_eq!(snap.max, 150);
        assert_eq!(snap.count, 1);
        assert!(snap.active);
        assert!(snap.min_active);
        assert!(snap.max_active);
    }

    #[test]
    fn inactive_snapshot_never_understates_with_zero_traffic() {
        let ticker = FakeTicker::new(0);
        let root = TraceMetric::new_root(name("A"));
        let holder = CurrentMetricHolder::new(root.clone());
        root.start(0, &holder);
        root.end(10, &holder);

        let snap = root.snapshot(&ticker);
        assert!(!snap.active);
        assert_eq!(snap.total, 10);
        assert_eq!(snap.count, 1);
        assert!(snap.nested_metrics.is_none());
    }

    #[test]
    fn snapshot_nesting_mirrors_children_insertion_order() {
        let ticker = FakeTicker::new(0);
        let root = TraceMetric::new_root(name("root"));
        let holder = CurrentMetricHolder::new(root.clone());
        root.start(0, &holder);

        let first = root.start_nested(name("first"), 0, &holder);
        first.end(1, &holder);
        let second = root.start_nested(name("second"), 1, &holder);
        second.end(2, &holder);
        root.end(3, &holder);

        let snap = root.snapshot(&ticker);
        let nested = snap.nested_metrics.unwrap();
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[0].name, "first");
        assert_eq!(nested[1].name, "second");
    }

    #[test]
    fn debug_end_without_start_does_not_go_negative() {
        let ticker = FakeTicker::new(0);
        let leaf = TraceMetric::new_root(name("orphan"));
        let holder = CurrentMetricHolder::new(leaf.clone());
        // No `start` called; `end` must not panic in release and must
        // leave the nesting level at 0, not underflow.
        if !cfg!(debug_assertions) {
            leaf.end(0, &holder);
            assert_eq!(leaf.self_nesting_level.load(Ordering::Relaxed), 0);
        }
        let _ = ticker;
    }
}
