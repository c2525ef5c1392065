//! Single-consumer request listener.
//!
//! Pulls requests from a [`RequestSource`] one at a time and hands each to
//! [`Worker::handle`]. There is no internal parallelism: the next request is
//! only dequeued once the current one has reached a terminal state.
//!
//! Shutdown is signalled over a broadcast channel; the current request is
//! allowed to finish within the shutdown timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue::{QueueError, QueuedRequest, RequestSource};
use crate::config::RedisSettings;
use crate::conventions::PipelineConventionsBuilder;
use crate::metrics::MetricsCollector;
use crate::request::RequestContext;
use crate::worker::Worker;

/// Errors that can occur in the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Listener is already running")]
    AlreadyRunning,

    #[error("Listener is not running")]
    NotRunning,

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Listener timing settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// How long one dequeue waits for a request.
    pub poll_interval: Duration,
    /// How long shutdown waits for the current request.
    pub shutdown_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl ListenerConfig {
    pub fn from_settings(settings: &RedisSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            shutdown_timeout: settings.shutdown_timeout(),
        }
    }
}

/// Counters for processed requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListenerStats {
    pub requests_succeeded: u64,
    pub requests_unsuccessful: u64,
    pub average_duration: Duration,
}

impl ListenerStats {
    pub fn total_processed(&self) -> u64 {
        self.requests_succeeded + self.requests_unsuccessful
    }
}

struct SharedListenerStats {
    succeeded: AtomicU64,
    unsuccessful: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl SharedListenerStats {
    fn new() -> Self {
        Self {
            succeeded: AtomicU64::new(0),
            unsuccessful: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, success: bool, duration: Duration) {
        if success {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.unsuccessful.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn snapshot(&self) -> ListenerStats {
        let succeeded = self.succeeded.load(Ordering::SeqCst);
        let unsuccessful = self.unsuccessful.load(Ordering::SeqCst);
        let total = succeeded + unsuccessful;
        let average_duration = if total > 0 {
            Duration::from_millis(self.total_duration_ms.load(Ordering::SeqCst) / total)
        } else {
            Duration::ZERO
        };

        ListenerStats {
            requests_succeeded: succeeded,
            requests_unsuccessful: unsuccessful,
            average_duration,
        }
    }
}

/// Runs a worker against a request source.
pub struct RequestListener<B: PipelineConventionsBuilder + 'static> {
    config: ListenerConfig,
    worker: Arc<Worker<B>>,
    source: Arc<dyn RequestSource>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<SharedListenerStats>,
    is_running: AtomicBool,
}

impl<B: PipelineConventionsBuilder + 'static> RequestListener<B> {
    pub fn new(
        config: ListenerConfig,
        worker: Arc<Worker<B>>,
        source: Arc<dyn RequestSource>,
    ) -> Self {
        // One shutdown signal is ever sent.
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            worker,
            source,
            shutdown_tx,
            handle: None,
            stats: Arc::new(SharedListenerStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts consuming requests on a background task.
    ///
    /// # Errors
    ///
    /// Returns `ListenerError::AlreadyRunning` if the listener is running.
    pub fn start(&mut self) -> Result<(), ListenerError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(ListenerError::AlreadyRunning);
        }

        let consumer = Consumer {
            worker: Arc::clone(&self.worker),
            source: Arc::clone(&self.source),
            shutdown_rx: self.shutdown_tx.subscribe(),
            poll_interval: self.config.poll_interval,
            stats: Arc::clone(&self.stats),
            metrics: MetricsCollector::new(),
        };

        self.handle = Some(tokio::spawn(consumer.run()));
        self.is_running.store(true, Ordering::SeqCst);
        info!(queue = %self.source.name(), "Request listener started");

        Ok(())
    }

    /// Signals the consumer to stop and waits for the current request.
    ///
    /// # Errors
    ///
    /// Returns `ListenerError::ShutdownTimeout` if the consumer does not stop
    /// within the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), ListenerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(ListenerError::NotRunning);
        }

        info!("Initiating listener shutdown");
        // The consumer may already have stopped.
        let _ = self.shutdown_tx.send(());

        let Some(handle) = self.handle.take() else {
            self.is_running.store(false, Ordering::SeqCst);
            return Ok(());
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, handle).await;
        self.is_running.store(false, Ordering::SeqCst);

        match result {
            Ok(Ok(())) => {
                info!("Listener shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Listener task panicked during shutdown");
                Ok(())
            }
            Err(_) => Err(ListenerError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    pub fn stats(&self) -> ListenerStats {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

struct Consumer<B: PipelineConventionsBuilder + 'static> {
    worker: Arc<Worker<B>>,
    source: Arc<dyn RequestSource>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    stats: Arc<SharedListenerStats>,
    metrics: MetricsCollector,
}

impl<B: PipelineConventionsBuilder + 'static> Consumer<B> {
    async fn run(mut self) {
        info!(queue = %self.source.name(), "Consumer started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!("Consumer received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.source.dequeue(self.poll_interval).await {
                Ok(Some(request)) => {
                    self.process(request).await;
                    self.report_depth().await;
                }
                Ok(None) => {
                    debug!("No requests available");
                }
                Err(e) => {
                    error!(error = %e, "Failed to dequeue request");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!("Consumer stopped");
    }

    async fn process(&self, request: QueuedRequest) {
        let started = Instant::now();
        let context = RequestContext {
            delivery_id: request.id.to_string(),
            received_at: request.enqueued_at,
        };

        info!(delivery_id = %request.id, "Processing request");
        let outcome = self.worker.handle(&request.payload, Some(&context)).await;
        let duration = started.elapsed();
        self.stats.record(outcome.status, duration);

        if outcome.status {
            info!(
                delivery_id = %request.id,
                request_id = %outcome.request_id,
                duration_ms = duration.as_millis() as u64,
                "Request completed"
            );
        } else {
            warn!(
                delivery_id = %request.id,
                request_id = %outcome.request_id,
                state = %outcome.state,
                message = %outcome.message,
                "Request did not complete"
            );
        }

        if let Err(e) = self.source.complete(&request, &outcome).await {
            error!(delivery_id = %request.id, error = %e, "Failed to record outcome");
        }
    }

    async fn report_depth(&self) {
        match self.source.len().await {
            Ok(depth) => self.metrics.update_queue_depth(self.source.name(), depth),
            Err(e) => debug!(error = %e, "Failed to read queue depth"),
        }
    }
}
