//! Error types for artifact loading and writing.

use crate::storage::StorageError;
use thiserror::Error;

/// Most missing shard names listed in a [`ArtifactError::PartsMissing`] message.
pub const MAX_MISSING_PARTS_LISTED: usize = 8;

/// Top-level error type for artifact operations.
///
/// Each variant corresponds to one stable error code, see [`ArtifactError::code`].
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// No `pieces/manifest.json` where one is required.
    #[error("missing pieces manifest: {0}")]
    ManifestMissing(String),

    /// Manifest entries are structurally inconsistent.
    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    /// A required manifest declaration (sidecar, shard, entry) is absent.
    #[error("incomplete manifest: {0}")]
    ManifestIncomplete(String),

    /// A shard sequence has gaps, or declared files are absent.
    #[error("Missing manifest parts for {name}: {}", .missing.join(", "))]
    PartsMissing { name: String, missing: Vec<String> },

    /// A read would exceed the configured byte budget.
    #[error("artifact too large: {path} is {size} bytes (max {max_bytes})")]
    TooLarge {
        path: String,
        size: u64,
        max_bytes: u64,
    },

    /// Checksum mismatch or structurally invalid content.
    #[error("corrupt artifact: {0}")]
    Corrupt(String),

    /// Invalid path or numeric field.
    #[error("invalid artifact: {0}")]
    Invalid(String),

    /// Malformed or truncated varint stream.
    #[error("varint decode error: {0}")]
    VarintDecode(String),

    /// A compressed stream failed to decode.
    #[error("decompression failed for {path}: {message}")]
    Decompress { path: String, message: String },

    /// Unknown format or byte order declared by a sidecar.
    #[error("unsupported artifact format: {0}")]
    Unsupported(String),

    /// Storage-related errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ArtifactError {
    /// Stable error code for presenting to operators.
    pub fn code(&self) -> &'static str {
        match self {
            ArtifactError::ManifestMissing(_) => "ERR_MANIFEST_MISSING",
            ArtifactError::ManifestInvalid(_) => "ERR_MANIFEST_INVALID",
            ArtifactError::ManifestIncomplete(_) => "ERR_MANIFEST_INCOMPLETE",
            ArtifactError::PartsMissing { .. } => "ERR_ARTIFACT_PARTS_MISSING",
            ArtifactError::TooLarge { .. } => "ERR_ARTIFACT_TOO_LARGE",
            ArtifactError::Corrupt(_) => "ERR_ARTIFACT_CORRUPT",
            ArtifactError::Invalid(_) => "ERR_ARTIFACT_INVALID",
            ArtifactError::VarintDecode(_) => "ERR_VARINT_DECODE",
            ArtifactError::Decompress { .. } => "ERR_ARTIFACT_DECOMPRESS",
            ArtifactError::Unsupported(_) => "ERR_ARTIFACT_UNSUPPORTED",
            ArtifactError::Storage(StorageError::NotFound(_)) => "ERR_ARTIFACT_MISSING",
            ArtifactError::Storage(_) => "ERR_ARTIFACT_IO",
        }
    }

    /// Build a parts-missing error, keeping at most eight names.
    pub fn parts_missing(name: &str, mut missing: Vec<String>) -> Self {
        missing.truncate(MAX_MISSING_PARTS_LISTED);
        ArtifactError::PartsMissing {
            name: name.to_string(),
            missing,
        }
    }

    pub(crate) fn too_large(path: &str, size: u64, max_bytes: u64) -> Self {
        ArtifactError::TooLarge {
            path: path.to_string(),
            size,
            max_bytes,
        }
    }
}

/// Result type for artifact operations.
pub type Result<T> = std::result::Result<T, ArtifactError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            ArtifactError::ManifestMissing("x".into()).code(),
            "ERR_MANIFEST_MISSING"
        );
        assert_eq!(
            ArtifactError::too_large("a.bin", 10, 5).code(),
            "ERR_ARTIFACT_TOO_LARGE"
        );
        assert_eq!(
            ArtifactError::Storage(StorageError::NotFound("a".into())).code(),
            "ERR_ARTIFACT_MISSING"
        );
        assert_eq!(
            ArtifactError::Storage(StorageError::Backend("s3".into())).code(),
            "ERR_ARTIFACT_IO"
        );
    }

    #[test]
    fn test_parts_missing_display() {
        let err = ArtifactError::parts_missing(
            "chunk_meta",
            vec!["chunk_meta.part-000001.jsonl".to_string()],
        );
        assert_eq!(
            err.to_string(),
            "Missing manifest parts for chunk_meta: chunk_meta.part-000001.jsonl"
        );
        assert_eq!(err.code(), "ERR_ARTIFACT_PARTS_MISSING");
    }

    #[test]
    fn test_parts_missing_truncates() {
        let missing: Vec<String> = (0..20).map(|i| format!("x.part-{:06}.jsonl", i)).collect();
        match ArtifactError::parts_missing("x", missing) {
            ArtifactError::PartsMissing { missing, .. } => {
                assert_eq!(missing.len(), MAX_MISSING_PARTS_LISTED)
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
