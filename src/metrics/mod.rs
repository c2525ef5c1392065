//! Prometheus metrics for the worker.
//!
//! Covers request outcomes, validation rejections, pipeline run durations
//! and queue depth.
//!
//! # Example
//!
//! ```ignore
//! use datapred_worker::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_request("completed");
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, write_metrics_file};

pub use prometheus::{
    PIPELINE_DURATION, PIPELINE_RUNS_TOTAL, QUEUE_DEPTH, REGISTRY, REQUESTS_IN_PROGRESS,
    REQUESTS_TOTAL, VALIDATION_REJECTIONS,
};
