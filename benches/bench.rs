use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use tracewatch::metric_name::MetricName;
use tracewatch::ticker::SystemTicker;
use tracewatch::trace::Trace;

fn start_stop_leaf(c: &mut Criterion) {
    let ticker = Arc::new(SystemTicker::new());
    let trace = Trace::start(
        ticker.clone(),
        MetricName::intern("root"),
        "bench",
        "start_stop_leaf",
        false,
    );
    let name = MetricName::intern("leaf");

    c.bench_function("start/stop a leaf metric", |b| {
        b.iter(|| {
            trace.start_nested(name.clone());
            trace.stop_current();
        });
    });
}

fn recursive_collapse(c: &mut Criterion) {
    let ticker = Arc::new(SystemTicker::new());
    let trace = Trace::start(
        ticker,
        MetricName::intern("root"),
        "bench",
        "recursive_collapse",
        false,
    );
    let name = MetricName::intern("root");

    c.bench_function("recursive re-entry fast path", |b| {
        b.iter(|| {
            trace.start_nested(name.clone());
            trace.stop_current();
        });
    });
}

fn snapshot_while_active(c: &mut Criterion) {
    let ticker = Arc::new(SystemTicker::new());
    let trace = Trace::start(
        ticker.clone(),
        MetricName::intern("root"),
        "bench",
        "snapshot_while_active",
        false,
    );
    let _child = trace.start_nested(MetricName::intern("child"));

    c.bench_function("snapshot an active node", |b| {
        b.iter(|| trace.root().snapshot(ticker.as_ref()));
    });
}

criterion_group!(
    benches,
    start_stop_leaf,
    recursive_collapse,
    snapshot_while_active
);
criterion_main!(benches);
