//! Telemetry: per-request access logging and the metrics registry.

pub mod access_log;
pub mod metrics;

pub use access_log::{AccessLogger, AccessRecord};
pub use metrics::MetricsRegistry;
