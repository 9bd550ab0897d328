use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::{
    error::{Result, StoreError},
    types::{DirectoryListing, FileContent},
};

/// Core abstraction for the remote document store
///
/// Implementors provide depth-1 listings plus whole-document reads and
/// writes. There is no partial-write or append primitive.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List the direct children of a collection
    ///
    /// Returns `StoreError::NotFound` if the collection doesn't exist
    async fn list(&self, path: &str) -> Result<DirectoryListing>;

    /// Fetch a single file by its path
    ///
    /// Returns `StoreError::NotFound` if the file doesn't exist
    async fn fetch_file(&self, path: &str) -> Result<FileContent>;

    /// Overwrite a file
    ///
    /// With `if_match` set the write only happens when the stored ETag still
    /// matches; otherwise `StoreError::PreconditionFailed`. Returns the new
    /// ETag when the backend reports one.
    async fn put_file(&self, path: &str, content: Bytes, if_match: Option<&str>)
        -> Result<Option<String>>;

    /// Create a collection. An existing collection counts as success.
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Get a human-readable identifier for this store (for logging/debugging)
    fn identifier(&self) -> String;

    async fn read_text(&self, path: &str) -> Result<String> {
        let file = self.fetch_file(path).await?;
        Ok(String::from_utf8_lossy(&file.content).into_owned())
    }

    /// Read a JSON document; a missing document is `Ok(None)`
    async fn read_json(&self, path: &str) -> Result<Option<Value>> {
        match self.fetch_file(path).await {
            Ok(file) => Ok(Some(serde_json::from_slice(&file.content)?)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_json(&self, path: &str, value: &Value) -> Result<()> {
        let body = serde_json::to_vec_pretty(value)?;
        self.write_bytes(path, Bytes::from(body)).await
    }

    /// Unconditional overwrite
    async fn write_bytes(&self, path: &str, content: Bytes) -> Result<()> {
        self.put_file(path, content, None).await?;
        Ok(())
    }

    /// Check if a file exists without keeping its content
    async fn file_exists(&self, path: &str) -> bool {
        self.fetch_file(path).await.is_ok()
    }
}
