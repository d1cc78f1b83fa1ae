//! Per-loader session state: warning deduplication and parsed sidecar cache.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared state for one loader and every stream it creates.
///
/// A degraded-path warning is emitted once per `(dir, artifact, reason)`.
/// Parsed meta sidecars are kept so repeated loads of the same artifact do
/// not re-read them.
#[derive(Debug, Default)]
pub struct LoaderSession {
    warned: Mutex<HashSet<(String, String, String)>>,
    meta: Mutex<HashMap<String, Arc<Value>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LoaderSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `message` at warn level unless this key already warned.
    /// Returns whether the warning was emitted.
    pub fn warn_once(&self, dir: &str, name: &str, reason: &str, message: &str) -> bool {
        let key = (dir.to_string(), name.to_string(), reason.to_string());
        if !lock(&self.warned).insert(key) {
            return false;
        }
        tracing::warn!(dir = %dir, artifact = %name, reason = %reason, "{}", message);
        true
    }

    /// Number of distinct warnings emitted so far.
    pub fn warning_count(&self) -> usize {
        lock(&self.warned).len()
    }

    /// Cached parsed sidecar for a full storage path.
    pub fn cached_meta(&self, path: &str) -> Option<Arc<Value>> {
        lock(&self.meta).get(path).cloned()
    }

    pub fn cache_meta(&self, path: &str, value: Value) -> Arc<Value> {
        let value = Arc::new(value);
        lock(&self.meta).insert(path.to_string(), Arc::clone(&value));
        value
    }

    /// Drop cached sidecars. Warnings stay deduplicated.
    pub fn clear_meta(&self) {
        lock(&self.meta).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warn_once_per_key() {
        let session = LoaderSession::new();
        assert!(session.warn_once("idx", "chunk_meta", "json-stream", "materializing"));
        assert!(!session.warn_once("idx", "chunk_meta", "json-stream", "materializing"));
        assert!(session.warn_once("idx", "file_meta", "json-stream", "materializing"));
        assert!(session.warn_once("other", "chunk_meta", "json-stream", "materializing"));
        assert_eq!(session.warning_count(), 3);
    }

    #[test]
    fn test_meta_cache() {
        let session = LoaderSession::new();
        assert!(session.cached_meta("idx/a.meta.json").is_none());
        session.cache_meta("idx/a.meta.json", serde_json::json!({"count": 2}));
        let cached = session.cached_meta("idx/a.meta.json").unwrap();
        assert_eq!(cached["count"], 2);
        session.clear_meta();
        assert!(session.cached_meta("idx/a.meta.json").is_none());
    }
}
