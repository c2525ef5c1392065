//! Local filesystem storage.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::ExistenceChecker;
use crate::error::StorageError;

/// Files under a root directory. Paths are resolved relative to the root
/// and may not escape it.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
                reason: "must not contain '..'".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ExistenceChecker for LocalStorage {
    async fn check_file(&self, path: &str) -> Result<(), StorageError> {
        let full_path = self.resolve(path)?;
        debug!(path = %full_path.display(), "Checking local file");

        match tokio::fs::metadata(&full_path).await {
            Ok(metadata) if metadata.is_file() => Ok(()),
            Ok(_) => Err(StorageError::InvalidPath {
                path: path.to_string(),
                reason: "not a regular file".to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
