//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by the worker and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all worker metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of requests handled, labeled by terminal state.
pub static REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total number of requests rejected during validation.
pub static VALIDATION_REJECTIONS: OnceLock<Counter> = OnceLock::new();

/// Total number of pipeline runs, labeled by terminal run status.
pub static PIPELINE_RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock time from submission to terminal run status, in seconds.
pub static PIPELINE_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Number of requests currently being processed.
pub static REQUESTS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of requests waiting in a queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let requests_total = CounterVec::new(
        Opts::new(
            "datapred_worker_requests_total",
            "Total number of requests handled",
        ),
        &["state"],
    )?;

    let validation_rejections = Counter::new(
        "datapred_worker_validation_rejections_total",
        "Total number of requests rejected during validation",
    )?;

    let pipeline_runs_total = CounterVec::new(
        Opts::new(
            "datapred_worker_pipeline_runs_total",
            "Total number of pipeline runs by terminal status",
        ),
        &["status"],
    )?;

    let pipeline_duration = Histogram::with_opts(
        HistogramOpts::new(
            "datapred_worker_pipeline_duration_seconds",
            "Pipeline run duration in seconds",
        )
        .buckets(vec![30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0]),
    )?;

    let requests_in_progress = Gauge::new(
        "datapred_worker_requests_in_progress",
        "Number of requests currently being processed",
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("datapred_worker_queue_depth", "Number of requests in queue"),
        &["queue_name"],
    )?;

    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(validation_rejections.clone()))?;
    registry.register(Box::new(pipeline_runs_total.clone()))?;
    registry.register(Box::new(pipeline_duration.clone()))?;
    registry.register(Box::new(requests_in_progress.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;

    // Already-set statics mean a previous call won; keep those.
    let _ = REGISTRY.set(registry);
    let _ = REQUESTS_TOTAL.set(requests_total);
    let _ = VALIDATION_REJECTIONS.set(validation_rejections);
    let _ = PIPELINE_RUNS_TOTAL.set(pipeline_runs_total);
    let _ = PIPELINE_DURATION.set(pipeline_duration);
    let _ = REQUESTS_IN_PROGRESS.set(requests_in_progress);
    let _ = QUEUE_DEPTH.set(queue_depth);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry has not been initialized
/// or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Writes the current metrics to a file for a textfile collector.
///
/// The file is written to a temporary sibling first and renamed into place
/// so scrapers never read a partial file.
pub fn write_metrics_file(path: &std::path::Path) -> std::io::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, export_metrics())?;
    std::fs::rename(&tmp, path)
}
