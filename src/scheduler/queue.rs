//! Redis-backed request queue with reliable dequeue.
//!
//! The queue uses two Redis lists and one key per outcome:
//!
//! - `{queue_name}`: requests waiting to be processed
//! - `{queue_name}:processing`: the request currently being processed
//! - `{queue_name}:results:{id}`: the outcome of a processed request (7 days)
//!
//! Requests are moved atomically from the main list to the processing list
//! with BRPOPLPUSH, so a request is never lost between dequeue and completion.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::worker::RequestOutcome;

/// How long outcomes are kept after completion.
const RESULT_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// A request envelope as stored in the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedRequest {
    /// Delivery identifier, unique per enqueue.
    pub id: Uuid,
    /// The request payload.
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedRequest {
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

/// Source of requests for the listener.
#[async_trait]
pub trait RequestSource: Send + Sync {
    /// Waits up to `timeout` for the next request.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedRequest>, QueueError>;

    /// Records the outcome and releases the request.
    async fn complete(
        &self,
        request: &QueuedRequest,
        outcome: &RequestOutcome,
    ) -> Result<(), QueueError>;

    /// Number of requests waiting.
    async fn len(&self) -> Result<usize, QueueError>;

    fn name(&self) -> &str;
}

/// Redis-based request queue.
pub struct RequestQueue {
    redis: ConnectionManager,
    queue_name: String,
    processing_queue: String,
    results_key: String,
}

impl RequestQueue {
    /// Connects to Redis and opens the queue.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379/2")
    /// * `queue_name` - Name of the queue (used as prefix for Redis keys)
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Opens the queue on an existing connection manager.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        Self {
            redis,
            queue_name: queue_name.to_string(),
            processing_queue: processing_key(queue_name),
            results_key: results_prefix(queue_name),
        }
    }

    /// Enqueues a request payload and returns its delivery id.
    ///
    /// Requests are pushed on the left and popped from the right (FIFO).
    pub async fn enqueue(&self, payload: Value) -> Result<Uuid, QueueError> {
        let request = QueuedRequest::new(payload);
        let serialized = serde_json::to_string(&request)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?;
        Ok(request.id)
    }

    /// Number of requests being processed.
    pub async fn processing_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.processing_queue).await?;
        Ok(len)
    }

    /// Retrieves the stored outcome of a request, if still retained.
    pub async fn get_outcome(&self, id: Uuid) -> Result<Option<RequestOutcome>, QueueError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(result_key(&self.results_key, id)).await?;

        match data {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// Deletes the waiting and processing lists.
    pub async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.del(&self.queue_name).del(&self.processing_queue);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (pending, processing) = tokio::try_join!(self.len(), self.processing_len())?;

        Ok(QueueStats {
            queue_name: self.queue_name.clone(),
            pending_requests: pending,
            processing_requests: processing,
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn remove_from_processing(&self, id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let entries: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for entry in entries {
            if let Ok(request) = serde_json::from_str::<QueuedRequest>(&entry) {
                if request.id == id {
                    conn.lrem::<_, _, ()>(&self.processing_queue, 1, &entry)
                        .await?;
                    return Ok(());
                }
            }
        }

        // Already gone.
        Ok(())
    }
}

#[async_trait]
impl RequestSource for RequestQueue {
    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedRequest>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.processing_queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match result {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn complete(
        &self,
        request: &QueuedRequest,
        outcome: &RequestOutcome,
    ) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let data = serde_json::to_string(outcome)?;

        conn.set_ex::<_, _, ()>(
            result_key(&self.results_key, request.id),
            &data,
            RESULT_TTL_SECS as _,
        )
        .await?;

        self.remove_from_processing(request.id).await
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.queue_name).await?;
        Ok(len)
    }

    fn name(&self) -> &str {
        &self.queue_name
    }
}

/// Statistics about queue state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queue_name: String,
    pub pending_requests: usize,
    pub processing_requests: usize,
}

impl QueueStats {
    pub fn total_requests(&self) -> usize {
        self.pending_requests + self.processing_requests
    }
}

fn processing_key(queue_name: &str) -> String {
    format!("{}:processing", queue_name)
}

fn results_prefix(queue_name: &str) -> String {
    format!("{}:results", queue_name)
}

fn result_key(results_prefix: &str, id: Uuid) -> String {
    format!("{}:{}", results_prefix, id)
}
