//! Row and payload types decoded from index artifacts.

use serde::{Deserialize, Serialize};

/// Document identifier type.
pub type DocId = u32;

/// A single posting: a document and the term frequency within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Document ID.
    pub doc_id: DocId,
    /// Term frequency in this document.
    pub tf: u32,
}

/// A posting list for one vocabulary token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingList {
    /// Postings sorted by doc_id.
    pub postings: Vec<Posting>,
}

impl PostingList {
    /// Create a new empty posting list.
    pub fn new() -> Self {
        Self {
            postings: Vec::new(),
        }
    }

    /// Build from `(doc_id, tf)` pairs.
    pub fn from_pairs(pairs: &[(DocId, u32)]) -> Self {
        Self {
            postings: pairs
                .iter()
                .map(|&(doc_id, tf)| Posting { doc_id, tf })
                .collect(),
        }
    }

    /// Add a posting.
    pub fn push(&mut self, doc_id: DocId, tf: u32) {
        self.postings.push(Posting { doc_id, tf });
    }

    /// Number of postings.
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }
}

/// Hot chunk metadata row (`chunk_meta`), with optional cold fields merged in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetaRow {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Index into the sidecar `fileTable`; cleared once `file` is hydrated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ref: Option<u64>,
    pub start: u64,
    pub end: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    /// 64-bit token hashes as 16-digit hex strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_ids: Option<Vec<String>>,
    /// Base64 varint64 list of token hashes.
    #[serde(
        default,
        rename = "token_ids_packed",
        skip_serializing_if = "Option::is_none"
    )]
    pub token_ids_packed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docmeta: Option<serde_json::Value>,
}

/// Cold chunk fields (`chunk_meta_cold`), keyed by chunk id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetaColdRow {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docmeta: Option<serde_json::Value>,
}

/// Per-file metadata row (`file_meta`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetaRow {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ref: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Decoded `token_postings` artifact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenPostings {
    /// Vocabulary, one entry per posting list.
    pub vocab: Vec<String>,
    /// Optional stable token ids parallel to `vocab`.
    pub vocab_ids: Vec<String>,
    /// Posting lists parallel to `vocab`.
    pub postings: Vec<PostingList>,
    /// Token count per document.
    pub doc_lengths: Vec<u64>,
    pub avg_doc_len: f64,
    pub total_docs: u64,
    /// Block size for packed sources.
    pub block_size: Option<usize>,
}

impl TokenPostings {
    /// Posting list for a vocabulary token.
    pub fn postings_for(&self, token: &str) -> Option<&PostingList> {
        let idx = self.vocab.iter().position(|t| t == token)?;
        self.postings.get(idx)
    }
}

/// Fixed-width `count x dims` u32 matrix (`minhash_signatures`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureMatrix {
    pub count: usize,
    pub dims: usize,
    /// Row-major values.
    pub values: Vec<u32>,
}

impl SignatureMatrix {
    /// Signature of row `i`.
    pub fn row(&self, i: usize) -> Option<&[u32]> {
        if i >= self.count {
            return None;
        }
        self.values.get(i * self.dims..(i + 1) * self.dims)
    }

    /// Iterate rows in order.
    pub fn rows(&self) -> impl Iterator<Item = &[u32]> {
        // chunks_exact rejects a zero width
        let width = self.dims.max(1);
        self.values.chunks_exact(width).take(self.count)
    }
}

/// Quantized dense vectors, uint8 row-major.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenseVectors {
    pub count: usize,
    pub dims: usize,
    /// Embedding model identifier from the sidecar.
    pub model: Option<String>,
    pub values: Vec<u8>,
}

impl DenseVectors {
    /// Vector of row `i`.
    pub fn row(&self, i: usize) -> Option<&[u8]> {
        if i >= self.count {
            return None;
        }
        self.values.get(i * self.dims..(i + 1) * self.dims)
    }
}
