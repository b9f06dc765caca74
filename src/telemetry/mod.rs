//! Telemetry and observability.
//!
//! Provides job metrics for the worker pool and `tracing` subscriber setup
//! for binaries and demos.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{Metrics, MetricsSnapshot};
