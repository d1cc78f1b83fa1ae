//! Loader options and limits.

use crate::error::{ArtifactError, Result};

/// Default byte budget for any single artifact read.
pub const MAX_JSON_BYTES: u64 = 512 * 1024 * 1024;

/// Floor for the manifest read budget.
pub const MIN_MANIFEST_BYTES: u64 = 64 * 1024;

/// Upper bound for streaming batch sizes.
pub const MAX_BATCH_ROWS: usize = 4096;

/// Default rows per streaming batch.
pub const DEFAULT_BATCH_ROWS: usize = 256;

/// Default token count of a packed postings decode window.
pub const DEFAULT_PACKED_WINDOW_TOKENS: usize = 1024;

/// Default byte size of a packed postings decode window.
pub const DEFAULT_PACKED_WINDOW_BYTES: u64 = 16 * 1024 * 1024;

const MIN_PACKED_WINDOW_BYTES: u64 = 1024;

/// Options controlling source resolution and decode guards.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Strict manifest resolution.
    pub strict: bool,
    /// Byte budget for raw sources and single rows.
    pub max_bytes: u64,
    /// Keys every JSONL row must carry. `None` uses the per-artifact default.
    pub required_keys: Option<Vec<String>>,
    /// Read a declared `<name>_binary_columnar` companion instead of `<name>`.
    /// `None` defers to the manifest's reader hints.
    pub prefer_binary_columnar: Option<bool>,
    /// Merge `chunk_meta_cold` fields into chunk rows.
    pub include_cold: bool,
    /// Check binary data blobs against `max_bytes` before materializing.
    pub enforce_binary_data_budget: bool,
    /// Decode `token_ids_packed` into `tokenIds`.
    pub materialize_token_ids: bool,
    /// Tokens per packed postings decode window.
    pub packed_window_tokens: usize,
    /// Bytes per packed postings decode window.
    pub packed_window_bytes: u64,
    /// Rows per range read when streaming fixed-width matrices.
    pub batch_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            strict: true,
            max_bytes: MAX_JSON_BYTES,
            required_keys: None,
            prefer_binary_columnar: None,
            include_cold: true,
            enforce_binary_data_budget: true,
            materialize_token_ids: false,
            packed_window_tokens: DEFAULT_PACKED_WINDOW_TOKENS,
            packed_window_bytes: DEFAULT_PACKED_WINDOW_BYTES,
            batch_size: DEFAULT_BATCH_ROWS,
        }
    }
}

impl LoadOptions {
    /// Strict options with default limits.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Tolerant options with default limits.
    pub fn non_strict() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_required_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_prefer_binary_columnar(mut self, prefer: bool) -> Self {
        self.prefer_binary_columnar = Some(prefer);
        self
    }

    pub fn with_include_cold(mut self, include_cold: bool) -> Self {
        self.include_cold = include_cold;
        self
    }

    pub fn with_enforce_binary_data_budget(mut self, enforce: bool) -> Self {
        self.enforce_binary_data_budget = enforce;
        self
    }

    pub fn with_materialize_token_ids(mut self, materialize: bool) -> Self {
        self.materialize_token_ids = materialize;
        self
    }

    pub fn with_packed_window(mut self, tokens: usize, bytes: u64) -> Self {
        self.packed_window_tokens = tokens;
        self.packed_window_bytes = bytes;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Reject budgets that could never admit a read.
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes == 0 {
            return Err(ArtifactError::Invalid(
                "max_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Budget used for the manifest itself.
    pub fn manifest_max_bytes(&self) -> u64 {
        self.max_bytes.max(MIN_MANIFEST_BYTES)
    }

    /// Streaming batch size clamped to `1..=MAX_BATCH_ROWS`.
    pub fn resolved_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_ROWS)
    }

    pub(crate) fn resolved_window_tokens(&self) -> usize {
        self.packed_window_tokens.max(1)
    }

    pub(crate) fn resolved_window_bytes(&self) -> u64 {
        self.packed_window_bytes.max(MIN_PACKED_WINDOW_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = LoadOptions::default();
        assert!(opts.strict);
        assert!(opts.include_cold);
        assert!(opts.enforce_binary_data_budget);
        assert_eq!(opts.max_bytes, MAX_JSON_BYTES);
        assert_eq!(opts.prefer_binary_columnar, None);
    }

    #[test]
    fn test_batch_size_is_clamped() {
        assert_eq!(LoadOptions::default().with_batch_size(0).resolved_batch_size(), 1);
        assert_eq!(
            LoadOptions::default()
                .with_batch_size(usize::MAX)
                .resolved_batch_size(),
            MAX_BATCH_ROWS
        );
    }

    #[test]
    fn test_zero_budget_rejected() {
        let err = LoadOptions::default().with_max_bytes(0).validate().unwrap_err();
        assert_eq!(err.code(), "ERR_ARTIFACT_INVALID");
    }

    #[test]
    fn test_manifest_budget_floor() {
        let opts = LoadOptions::non_strict().with_max_bytes(1024);
        assert!(!opts.strict);
        assert_eq!(opts.manifest_max_bytes(), MIN_MANIFEST_BYTES);
    }
}
