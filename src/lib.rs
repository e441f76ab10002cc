//! The hot-path and cold-path core of an application-performance-monitoring
//! agent: a per-trace metric tree updated by exactly one thread but
//! snapshot-readable from any thread, and an aggregation pipeline that
//! rolls completed traces into fixed-interval transaction points.
//!
//! ## Recording a trace
//!
//! ```
//! use std::sync::Arc;
//! use tracewatch::metric_name::MetricName;
//! use tracewatch::ticker::SystemTicker;
//! use tracewatch::trace::Trace;
//!
//! let ticker = Arc::new(SystemTicker::new());
//! let trace = Trace::start(
//!     ticker,
//!     MetricName::intern("http request"),
//!     "http",
//!     "GET /widgets",
//!     false,
//! );
//!
//! let _db = trace.start_nested(MetricName::intern("db query"));
//! // ... do the work ...
//! trace.stop_current();
//! let trace = trace.finish();
//! assert_eq!(trace.root().count(), 1);
//! ```
//!
//! ## Aggregating completed traces
//!
//! Build a [`TransactionAggregator`](aggregator::TransactionAggregator)
//! once per process, hand it every [`Trace`](trace::Trace) as it
//! finishes via `add`, and let its consumer thread bucket and flush
//! windows to a [`TransactionPointRepository`](repository::TransactionPointRepository).
//!
//! ## Module map
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`metric_name`] | Interned, identity-compared operation names. |
//! | [`ticker`] | Monotonic nanosecond clock for the hot path. |
//! | [`clock`] | Wall-clock milliseconds and window alignment. |
//! | [`current_metric_holder`] | Per-trace cursor onto the open metric. |
//! | [`trace_metric`] | The timing tree node and its snapshot format. |
//! | [`trace`] | A trace's root metric plus its metadata. |
//! | [`snapshot`] | Serializes a metric subtree for readers. |
//! | [`aggregates`] | Per-window accumulators and immutable rollups. |
//! | [`aggregator`] | The bucket-and-flush pipeline. |
//! | [`executor`] | Where flush tasks run. |
//! | [`repository`] | Where flushed rollups are persisted. |
//! | [`config`] | Aggregator tunables. |
//! | [`error`] | Error types. |

pub mod aggregates;
pub mod aggregator;
pub mod clock;
pub mod config;
pub mod current_metric_holder;
pub mod error;
pub mod executor;
pub mod metric_name;
pub mod repository;
pub mod snapshot;
pub mod ticker;
pub mod trace;
pub mod trace_metric;

pub use aggregates::{Aggregates, PendingAggregation, TransactionPoint};
pub use aggregator::TransactionAggregator;
pub use clock::Clock;
pub use config::AggregatorConfig;
pub use current_metric_holder::CurrentMetricHolder;
pub use error::{AggregatorError, SnapshotError};
pub use executor::Executor;
pub use metric_name::MetricName;
pub use repository::TransactionPointRepository;
pub use ticker::Ticker;
pub use trace::{FineProfile, Trace};
pub use trace_metric::{MetricSnapshot, TraceMetric};
