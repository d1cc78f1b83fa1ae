//! artifact-io - storage and serialization layer for code-search index artifacts.
//!
//! Every artifact of an index directory (chunk metadata, token postings,
//! minhash signatures, dense vectors, graph relations) is declared in
//! `pieces/manifest.json` and read back through it:
//! - **Manifest resolution**: artifact names map to JSON, JSONL shards,
//!   columnar JSON, binary-columnar row frames, packed postings or raw matrices
//! - **Integrity**: declared sha1/sha256 checksums, byte budgets and path
//!   validation are enforced before data is trusted
//! - **Streaming**: row-shaped artifacts can be read as bounded-memory
//!   [`RowStream`]s instead of being materialized
//!
//! Directories live in object storage (S3, GCS, local filesystem) behind the
//! [`BlobStore`] trait.

pub mod binary;
pub mod checksum;
pub mod chunk_meta;
pub mod config;
pub mod error;
pub mod frames;
pub mod json;
pub mod loader;
pub mod manifest;
pub mod object_store;
pub mod packed;
pub mod session;
pub mod storage;
pub mod stream;
pub mod token_postings;
pub mod types;
pub mod varint;
pub mod vectors;
pub mod writer;

// Re-export commonly used types
pub use checksum::{compute_packed_checksum, ChecksumAlgo, PackedChecksum, PackedChecksumValidator};
pub use chunk_meta::{
    load_chunk_meta, load_chunk_meta_cold, load_file_meta, stream_chunk_meta, stream_file_meta,
};
pub use config::LoadOptions;
pub use error::{ArtifactError, Result};
pub use loader::{ArtifactLoader, ArtifactPresence};
pub use manifest::{ArtifactSources, Manifest, Piece, PieceFormat, SourceFormat};
pub use session::LoaderSession;
pub use storage::{BlobStore, StorageError, StorageResult};
pub use stream::{RowReader, RowStream};
pub use token_postings::load_token_postings;
pub use types::{
    ChunkMetaColdRow, ChunkMetaRow, DenseVectors, DocId, FileMetaRow, Posting, PostingList,
    SignatureMatrix, TokenPostings,
};
pub use vectors::{
    load_dense_vectors, load_minhash_signatures, stream_dense_vectors, stream_minhash_signatures,
    DENSE_VECTOR_ARTIFACTS,
};
pub use writer::ArtifactWriter;

// Re-export convenience functions
pub use object_store::{local, memory};
