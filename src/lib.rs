//! datapred-worker: request adapter between a dispatcher and Azure ML pipelines.
//!
//! Requests are validated against their required fields and referenced input
//! files, submitted to a published pipeline endpoint, and reported back as a
//! status/message pair once the run reaches a terminal state.

pub mod cache;
pub mod cli;
pub mod config;
pub mod conventions;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod request;
pub mod scheduler;
pub mod storage;
pub mod worker;

pub use config::{ConfigError, WorkerConfig};
pub use error::{CacheError, PipelineError, RequestError, StorageError, WorkerError};
pub use pipeline::PipelineMessage;
pub use worker::{RequestOutcome, RequestState, Worker};
