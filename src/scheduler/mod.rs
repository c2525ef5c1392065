//! Request intake over a Redis list.
//!
//! - **RequestQueue**: Redis-backed queue with reliable dequeue (BRPOPLPUSH)
//!   and outcome storage
//! - **RequestListener**: single consumer handing each request to the worker
//!
//! ```text
//!   producer (CLI / dispatcher)
//!            │ LPUSH
//!     ┌──────▼───────┐   BRPOPLPUSH   ┌────────────────────┐
//!     │ {queue}      ├───────────────►│ {queue}:processing │
//!     └──────────────┘                └─────────┬──────────┘
//!                                               │ Worker::handle
//!                                     ┌─────────▼──────────┐
//!                                     │ {queue}:results:id │
//!                                     └────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use datapred_worker::scheduler::{ListenerConfig, RequestListener, RequestQueue};
//! use datapred_worker::worker::Worker;
//!
//! let queue = RequestQueue::connect("redis://localhost:6379/2", "datapred_requests").await?;
//! queue.enqueue(payload).await?;
//!
//! let worker = Arc::new(Worker::from_config(&config).await?);
//! let mut listener = RequestListener::new(ListenerConfig::default(), worker, Arc::new(queue));
//! listener.start()?;
//! // ...
//! listener.shutdown().await?;
//! ```

pub mod listener;
pub mod queue;

pub use listener::{ListenerConfig, ListenerError, ListenerStats, RequestListener};
pub use queue::{QueueError, QueueStats, QueuedRequest, RequestQueue, RequestSource};
