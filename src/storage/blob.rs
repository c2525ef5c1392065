//! Azure Blob storage, checked over HTTP with a SAS token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::ExistenceChecker;
use crate::error::StorageError;

/// Blobs in one container of a storage account.
pub struct BlobStorage {
    account_url: String,
    container: String,
    sas_token: String,
    http_client: Client,
}

impl BlobStorage {
    /// Creates a blob checker.
    ///
    /// # Arguments
    ///
    /// * `account_url` - Account endpoint, e.g. `https://acct.blob.core.windows.net`
    /// * `container` - Container holding the input files
    /// * `sas_token` - SAS token with read/list permission, with or without leading `?`
    pub fn new(account_url: &str, container: &str, sas_token: &str) -> Self {
        Self {
            account_url: account_url.trim_end_matches('/').to_string(),
            container: container.trim_matches('/').to_string(),
            sas_token: sas_token.trim_start_matches('?').to_string(),
            http_client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// URL of a blob without the SAS token.
    pub fn blob_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.account_url,
            self.container,
            path.trim_start_matches('/')
        )
    }

    fn signed_url(&self, path: &str) -> String {
        let url = self.blob_url(path);
        if self.sas_token.is_empty() {
            url
        } else {
            format!("{}?{}", url, self.sas_token)
        }
    }
}

#[async_trait]
impl ExistenceChecker for BlobStorage {
    async fn check_file(&self, path: &str) -> Result<(), StorageError> {
        debug!(url = %self.blob_url(path), "Checking blob");

        let response = self
            .http_client
            .head(self.signed_url(path))
            .send()
            .await
            .map_err(|e| StorageError::RequestFailed {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(path.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StorageError::AccessDenied(path.to_string()))
            }
            status => Err(StorageError::RequestFailed {
                path: path.to_string(),
                message: format!("unexpected status {}", status.as_u16()),
            }),
        }
    }
}
