use std::io::Write;

use crate::error::SnapshotError;
use crate::ticker::Ticker;
use crate::trace_metric::{MetricSnapshot, TraceMetric};

/// Builds a [`MetricSnapshot`] of `root` and writes it as JSON to `out`.
///
/// Any thread may call this at any time against a live trace's root
/// without coordinating with the trace thread.
pub fn write_snapshot<W: Write>(
    root: &TraceMetric,
    ticker: &dyn Ticker,
    out: &mut W,
) -> Result<(), SnapshotError> {
    let snapshot = root.snapshot(ticker);
    serde_json::to_writer(out, &snapshot)?;
    Ok(())
}

/// Same as [`write_snapshot`] but returns the JSON text instead of
/// writing it to a sink.
pub fn snapshot_to_string(
    root: &TraceMetric,
    ticker: &dyn Ticker,
) -> Result<String, SnapshotError> {
    let snapshot = root.snapshot(ticker);
    Ok(serde_json::to_string(&snapshot)?)
}

/// Builds the snapshot without serializing it, for callers that want to
/// inspect or further transform it in-process.
pub fn build_snapshot(root: &TraceMetric, ticker: &dyn Ticker) -> MetricSnapshot {
    root.snapshot(ticker)
}
