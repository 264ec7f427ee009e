//! Runtime observability.
//!
//! Structured logging goes through [`crate::tracing_compat`]. This module
//! holds the metrics the runtime records when the `RuntimeMetrics` flag is
//! enabled.

pub mod metrics;

pub use metrics::{Counter, FiberMetrics, Gauge, Histogram, MetricsSnapshot};
