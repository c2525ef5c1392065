//! Input file storage.
//!
//! The worker only needs to know whether the files a request references
//! exist. [`ExistenceChecker`] is that narrow seam; two implementations are
//! provided:
//!
//! - [`LocalStorage`]: files under a local root directory
//! - [`BlobStorage`]: blobs in an Azure storage container, checked with
//!   an HTTP `HEAD` request authorized by a SAS token

mod blob;
mod local;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StorageSettings;
use crate::error::StorageError;

pub use blob::BlobStorage;
pub use local::LocalStorage;

/// Checks that a file exists in storage.
#[async_trait]
pub trait ExistenceChecker: Send + Sync {
    /// Returns `Ok(())` if the file exists, an error otherwise.
    async fn check_file(&self, path: &str) -> Result<(), StorageError>;
}

/// Builds the storage backend selected in configuration.
pub fn from_settings(settings: &StorageSettings) -> Arc<dyn ExistenceChecker> {
    match settings {
        StorageSettings::Local { root } => Arc::new(LocalStorage::new(root.clone())),
        StorageSettings::Blob {
            account_url,
            container,
            sas_token,
        } => Arc::new(BlobStorage::new(account_url, container, sas_token)),
    }
}
