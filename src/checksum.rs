//! sha1/sha256 checksums over raw artifact bytes.
//!
//! Checksums are written as `algo:hex`. Verification is incremental so that
//! windowed and streaming readers can hash exactly the bytes they read.

use crate::error::{ArtifactError, Result};
use crate::storage::BlobStore;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgo {
    #[default]
    Sha1,
    Sha256,
}

impl ChecksumAlgo {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgo::Sha1 => "sha1",
            ChecksumAlgo::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for ChecksumAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgo {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(ChecksumAlgo::Sha1),
            "sha256" => Ok(ChecksumAlgo::Sha256),
            other => Err(ArtifactError::Invalid(format!(
                "unsupported checksum algorithm: {}",
                other
            ))),
        }
    }
}

/// A computed checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedChecksum {
    pub algo: ChecksumAlgo,
    /// Lowercase hex digest.
    pub value: String,
    /// `algo:value`.
    pub hash: String,
}

impl PackedChecksum {
    fn new(algo: ChecksumAlgo, value: String) -> Self {
        let hash = format!("{}:{}", algo, value);
        Self { algo, value, hash }
    }
}

/// Compute the checksum of a whole buffer.
pub fn compute_packed_checksum(buf: &[u8], algo: ChecksumAlgo) -> PackedChecksum {
    let value = match algo {
        ChecksumAlgo::Sha1 => hex::encode(Sha1::digest(buf)),
        ChecksumAlgo::Sha256 => hex::encode(Sha256::digest(buf)),
    };
    PackedChecksum::new(algo, value)
}

/// An expected checksum as it appears in manifests and sidecars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChecksumSpec {
    /// `"sha1:abcd..."`
    Joined(String),
    /// `{"algo": "sha1", "value": "abcd..."}`
    Parts { algo: String, value: String },
}

impl ChecksumSpec {
    /// Parse into algorithm and normalized hex value.
    pub fn resolve(&self) -> Result<(ChecksumAlgo, String)> {
        let (algo, value) = match self {
            ChecksumSpec::Joined(joined) => joined.split_once(':').ok_or_else(|| {
                ArtifactError::Invalid(format!("malformed checksum: {}", joined))
            })?,
            ChecksumSpec::Parts { algo, value } => (algo.as_str(), value.as_str()),
        };
        let value = value.trim().to_ascii_lowercase();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ArtifactError::Invalid(format!(
                "malformed checksum value: {}",
                value
            )));
        }
        Ok((algo.parse()?, value))
    }
}

/// Parse a `algo:hex` checksum string.
pub fn parse_checksum(joined: &str) -> Result<(ChecksumAlgo, String)> {
    ChecksumSpec::Joined(joined.to_string()).resolve()
}

enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

/// Incremental verifier for one expected checksum.
pub struct PackedChecksumValidator {
    label: String,
    algo: ChecksumAlgo,
    expected: String,
    hasher: Hasher,
}

impl PackedChecksumValidator {
    /// Create a validator from an expected checksum.
    pub fn from_spec(spec: &ChecksumSpec, label: impl Into<String>) -> Result<Self> {
        let (algo, expected) = spec.resolve()?;
        let hasher = match algo {
            ChecksumAlgo::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgo::Sha256 => Hasher::Sha256(Sha256::new()),
        };
        Ok(Self {
            label: label.into(),
            algo,
            expected,
            hasher,
        })
    }

    /// Create a validator from a `algo:hex` string.
    pub fn from_joined(joined: &str, label: impl Into<String>) -> Result<Self> {
        Self::from_spec(&ChecksumSpec::Joined(joined.to_string()), label)
    }

    /// Feed `buf[start..end]`, clamped to the buffer.
    pub fn update(&mut self, buf: &[u8], start: usize, end: usize) {
        let end = end.min(buf.len());
        let start = start.min(end);
        let slice = &buf[start..end];
        match &mut self.hasher {
            Hasher::Sha1(h) => h.update(slice),
            Hasher::Sha256(h) => h.update(slice),
        }
    }

    /// Feed a whole buffer.
    pub fn update_all(&mut self, buf: &[u8]) {
        self.update(buf, 0, buf.len());
    }

    /// Compare the digest of everything fed so far with the expectation.
    pub fn verify(self) -> Result<()> {
        let actual = match self.hasher {
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        };
        if actual != self.expected {
            return Err(ArtifactError::Corrupt(format!(
                "{} checksum mismatch (expected {}:{}, got {}:{})",
                self.label, self.algo, self.expected, self.algo, actual
            )));
        }
        Ok(())
    }
}

/// Range size for [`verify_stored`].
pub const CHECKSUM_CHUNK_BYTES: u64 = 1024 * 1024;

/// Hash the first `size` bytes of a stored object in bounded range reads
/// and compare against `joined`. Streams call this before their first row.
pub async fn verify_stored(
    store: &dyn BlobStore,
    path: &str,
    size: u64,
    joined: &str,
) -> Result<()> {
    let mut validator = PackedChecksumValidator::from_joined(joined, path)?;
    let mut pos = 0;
    while pos < size {
        let end = (pos + CHECKSUM_CHUNK_BYTES).min(size);
        let chunk = store.get_range(path, pos..end).await?;
        if chunk.is_empty() {
            return Err(ArtifactError::Corrupt(format!(
                "{} truncated at byte {}",
                path, pos
            )));
        }
        validator.update_all(&chunk);
        pos += chunk.len() as u64;
    }
    validator.verify()
}

/// Verify a whole buffer against an expected `algo:hex` checksum.
pub fn verify_checksum(buf: &[u8], joined: &str, label: &str) -> Result<()> {
    let mut validator = PackedChecksumValidator::from_joined(joined, label)?;
    validator.update_all(buf);
    validator.verify()
}
