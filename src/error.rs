//! Error types for the pipeline worker.
//!
//! Defines error types for the collaborators the worker talks to:
//! - Input file storage (existence checks)
//! - Key/value cache and metadata stores
//! - The external ML pipeline runtime
//! - Request decoding and request execution

use thiserror::Error;

/// Errors that can occur while checking input files in storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File '{0}' not found")]
    NotFound(String),

    #[error("Invalid storage path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Storage request failed for '{path}': {message}")]
    RequestFailed { path: String, message: String },

    #[error("Storage access denied for '{0}'")]
    AccessDenied(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid key pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Errors raised by the external ML pipeline runtime.
///
/// Authentication failures are kept as their own variant so callers can
/// tell them apart from submission and runtime failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Workspace '{0}' not found")]
    WorkspaceNotFound(String),

    #[error("Pipeline endpoint '{0}' not found")]
    EndpointNotFound(String),

    #[error("Pipeline submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Failed to tag pipeline run '{run_id}': {message}")]
    TaggingFailed { run_id: String, message: String },

    #[error("Failed to poll pipeline run '{run_id}': {message}")]
    StatusFailed { run_id: String, message: String },

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse runtime response: {0}")]
    ParseError(String),
}

/// Errors that can occur while decoding a request payload.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Request is empty")]
    Empty,

    #[error("Request must be a JSON object")]
    NotAnObject,

    #[error("Missing required field(s): {0}")]
    MissingFields(String),

    #[error("Field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors that escape request execution.
///
/// Expected rejections never show up here; they are reported as negative
/// results. What remains are failures the dispatcher has to deal with.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
