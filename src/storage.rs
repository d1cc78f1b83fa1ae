//! Storage abstraction for artifact directories.

use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Range;
use thiserror::Error;

/// Storage-related errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object not found in storage.
    #[error("object not found: {0}")]
    NotFound(String),

    /// I/O error during storage operation.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Error from the underlying storage backend.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Abstraction over blob storage backends (S3, GCS, local filesystem).
///
/// Artifact directories are read-only snapshots from the loader's point of
/// view, so every read method may be called concurrently.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a byte range from an object.
    async fn get_range(&self, path: &str, range: Range<u64>) -> StorageResult<Bytes>;

    /// Read an entire object.
    async fn get(&self, path: &str) -> StorageResult<Bytes>;

    /// Size of an object in bytes, without reading it.
    async fn head(&self, path: &str) -> StorageResult<u64>;

    /// Write data to an object (overwrites if exists).
    async fn put(&self, path: &str, data: Bytes) -> StorageResult<()>;

    /// List objects with a given prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Whether an object exists.
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self.head(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Join an artifact directory prefix and a relative piece path.
pub fn join_path(dir: &str, rel: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", dir, rel)
    }
}
