//! object_store adapter implementing the BlobStore trait.

use crate::storage::{BlobStore, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{local::LocalFileSystem, memory::InMemory, ObjectStore};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

/// BlobStore implementation backed by the object_store crate.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    /// Create a new backend from any object_store implementation.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Create a backend for local filesystem storage rooted at `path`.
    /// The directory must already exist.
    pub fn local(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }

        let store = LocalFileSystem::new_with_prefix(&path)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// Create a backend that keeps every object in memory.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
        }
    }
}

fn map_err(path: &str, e: object_store::Error) -> StorageError {
    match e {
        object_store::Error::NotFound { .. } => StorageError::NotFound(path.to_string()),
        _ => StorageError::Backend(e.to_string()),
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBackend {
    async fn get_range(&self, path: &str, range: Range<u64>) -> StorageResult<Bytes> {
        if range.start >= range.end {
            return Ok(Bytes::new());
        }
        let location = object_store::path::Path::from(path);
        let opts = object_store::GetOptions {
            range: Some(object_store::GetRange::Bounded(
                range.start as usize..range.end as usize,
            )),
            ..Default::default()
        };

        let result = self
            .store
            .get_opts(&location, opts)
            .await
            .map_err(|e| map_err(path, e))?;

        result
            .bytes()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        let location = object_store::path::Path::from(path);

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_err(path, e))?;

        result
            .bytes()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    async fn head(&self, path: &str) -> StorageResult<u64> {
        let location = object_store::path::Path::from(path);
        let meta = self
            .store
            .head(&location)
            .await
            .map_err(|e| map_err(path, e))?;
        Ok(meta.size as u64)
    }

    async fn put(&self, path: &str, data: Bytes) -> StorageResult<()> {
        let location = object_store::path::Path::from(path);
        let payload = object_store::PutPayload::from_bytes(data);

        self.store
            .put(&location, payload)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        use futures::TryStreamExt;

        let prefix_path = if prefix.is_empty() {
            None
        } else {
            Some(object_store::path::Path::from(prefix))
        };

        let stream = self.store.list(prefix_path.as_ref());
        let results: Vec<_> = stream
            .try_collect()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(results
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect())
    }
}

/// Convenience function to create a local filesystem backend.
pub fn local(path: impl Into<PathBuf>) -> StorageResult<ObjectStoreBackend> {
    ObjectStoreBackend::local(path)
}

/// Convenience function to create an in-memory backend.
pub fn memory() -> ObjectStoreBackend {
    ObjectStoreBackend::in_memory()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_put_get() {
        let tmp = TempDir::new().unwrap();
        let store = local(tmp.path()).unwrap();

        let data = Bytes::from("{\"pieces\":[]}");
        store.put("pieces/manifest.json", data.clone()).await.unwrap();

        let retrieved = store.get("pieces/manifest.json").await.unwrap();
        assert_eq!(retrieved, data);
        assert_eq!(store.head("pieces/manifest.json").await.unwrap(), 13);
    }

    #[tokio::test]
    async fn test_local_get_range() {
        let tmp = TempDir::new().unwrap();
        let store = local(tmp.path()).unwrap();

        store
            .put("rows.bin", Bytes::from_static(b"alphabeta"))
            .await
            .unwrap();

        let range = store.get_range("rows.bin", 5..9).await.unwrap();
        assert_eq!(&range[..], b"beta");
        let empty = store.get_range("rows.bin", 3..3).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_local_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = local(tmp.path()).unwrap();

        let result = store.get("missing.json").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(!store.exists("missing.json").await.unwrap());
        assert!(matches!(
            store.head("missing.json").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_local_requires_existing_dir() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("no-such-index");
        assert!(matches!(local(&missing), Err(StorageError::NotFound(_))));
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_memory_list() {
        let store = memory();

        store.put("index/a.json", Bytes::from("a")).await.unwrap();
        store.put("index/b.json", Bytes::from("b")).await.unwrap();
        store.put("other/c.json", Bytes::from("c")).await.unwrap();

        let mut files = store.list("index").await.unwrap();
        files.sort();
        assert_eq!(files, vec!["index/a.json", "index/b.json"]);
        assert!(store.exists("other/c.json").await.unwrap());
    }
}
