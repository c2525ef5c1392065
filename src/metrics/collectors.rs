//! High-level recording interface over the raw Prometheus metrics.

use super::prometheus::{
    PIPELINE_DURATION, PIPELINE_RUNS_TOTAL, QUEUE_DEPTH, REQUESTS_IN_PROGRESS, REQUESTS_TOTAL,
    VALIDATION_REJECTIONS,
};

/// Metrics collector for recording worker operational metrics.
///
/// Recording is a no-op until `init_metrics()` has been called, so the
/// collector can be used freely in tests.
///
/// # Example
///
/// ```ignore
/// use datapred_worker::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
///
/// collector.record_request("completed");
/// collector.record_pipeline_run("completed", 842.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a handled request by its terminal state
    /// (e.g., "completed", "failed", "rejected").
    pub fn record_request(&self, state: &str) {
        if let Some(requests_total) = REQUESTS_TOTAL.get() {
            requests_total.with_label_values(&[state]).inc();
        }

        tracing::trace!(state = state, "Recorded request metric");
    }

    /// Record a request rejected during validation.
    pub fn record_rejection(&self) {
        if let Some(rejections) = VALIDATION_REJECTIONS.get() {
            rejections.inc();
        }
    }

    /// Record a finished pipeline run.
    ///
    /// # Arguments
    ///
    /// * `status` - Terminal run status (e.g., "completed", "failed", "canceled")
    /// * `duration_secs` - Time from submission to terminal status
    pub fn record_pipeline_run(&self, status: &str, duration_secs: f64) {
        if let Some(runs_total) = PIPELINE_RUNS_TOTAL.get() {
            runs_total.with_label_values(&[status]).inc();
        }

        if let Some(duration) = PIPELINE_DURATION.get() {
            duration.observe(duration_secs);
        }

        tracing::trace!(
            status = status,
            duration_secs = duration_secs,
            "Recorded pipeline run metric"
        );
    }

    /// Update the queue depth for a specific queue.
    pub fn update_queue_depth(&self, queue_name: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[queue_name])
                .set(depth as f64);
        }

        tracing::trace!(
            queue_name = queue_name,
            depth = depth,
            "Updated queue depth metric"
        );
    }

    pub fn inc_requests_in_progress(&self) {
        if let Some(in_progress) = REQUESTS_IN_PROGRESS.get() {
            in_progress.inc();
        }
    }

    pub fn dec_requests_in_progress(&self) {
        if let Some(in_progress) = REQUESTS_IN_PROGRESS.get() {
            in_progress.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_record_request_states() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();

        collector.record_request("completed");
        collector.record_request("rejected");
        collector.record_rejection();

        let exported = export_metrics();
        assert!(exported.contains("state=\"rejected\""));
        assert!(exported.contains("datapred_worker_validation_rejections_total"));
    }

    #[test]
    fn test_record_pipeline_run() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();

        collector.record_pipeline_run("completed", 120.5);
        collector.record_pipeline_run("canceled", 3.0);

        let exported = export_metrics();
        assert!(exported.contains("datapred_worker_pipeline_duration_seconds"));
        assert!(exported.contains("status=\"canceled\""));
    }

    #[test]
    fn test_gauges() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();

        collector.update_queue_depth("datapred_requests", 42);
        collector.inc_requests_in_progress();
        collector.dec_requests_in_progress();

        assert!(export_metrics().contains("queue_name=\"datapred_requests\""));
    }
}
