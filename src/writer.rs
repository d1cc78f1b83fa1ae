//! Artifact writer: payload files first, `pieces/manifest.json` last.
//!
//! Every piece is checksummed as it is written. Until [`ArtifactWriter::finish`]
//! runs, readers keep seeing the previous manifest and the files it names.

use crate::binary::BINARY_COLUMNAR_FORMAT;
use crate::checksum::{compute_packed_checksum, ChecksumAlgo};
use crate::error::{ArtifactError, Result};
use crate::frames::{encode_binary_row_frames, encode_u64_offsets};
use crate::json::Compression;
use crate::manifest::{validate_relative_path, Manifest, Piece, PieceFormat, ReaderHints, MANIFEST_PATH};
use crate::packed::pack_tf_postings;
use crate::storage::{join_path, BlobStore};
use crate::types::{DenseVectors, SignatureMatrix, TokenPostings};
use crate::varint::encode_varint_list;
use crate::vectors::{DENSE_VECTOR_ARTIFACTS, MINHASH_SIGNATURES, UINT8_ROW_MAJOR};
use bytes::Bytes;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::io::Write;
use std::sync::Arc;

/// zstd level for compressed JSONL shards.
const ZSTD_LEVEL: i32 = 3;

fn encode_error(what: &str, e: impl std::fmt::Display) -> ArtifactError {
    ArtifactError::Invalid(format!("failed to encode {}: {}", what, e))
}

fn compress(rel: &str, data: Vec<u8>, compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&data).map_err(|e| encode_error(rel, e))?;
            encoder.finish().map_err(|e| encode_error(rel, e))
        }
        Compression::Zstd => {
            zstd::stream::encode_all(data.as_slice(), ZSTD_LEVEL).map_err(|e| encode_error(rel, e))
        }
    }
}

fn compression_suffix(compression: Compression) -> &'static str {
    match compression {
        Compression::None => "",
        Compression::Gzip => ".gz",
        Compression::Zstd => ".zst",
    }
}

fn to_json_bytes<T: Serialize + ?Sized>(what: &str, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| encode_error(what, e))
}

fn jsonl_bytes<T: Serialize>(what: &str, rows: &[T]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut buf, row).map_err(|e| encode_error(what, e))?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// Writes artifact pieces under a store prefix and records them for the
/// manifest.
pub struct ArtifactWriter {
    store: Arc<dyn BlobStore>,
    dir: String,
    algo: ChecksumAlgo,
    compatibility_key: Option<String>,
    reader: ReaderHints,
    pieces: Vec<Piece>,
}

impl ArtifactWriter {
    /// Create a writer for the artifact directory `dir`.
    pub fn new(store: Arc<dyn BlobStore>, dir: impl Into<String>) -> Self {
        Self {
            store,
            dir: dir.into(),
            algo: ChecksumAlgo::default(),
            compatibility_key: None,
            reader: ReaderHints::default(),
            pieces: Vec::new(),
        }
    }

    /// Checksum algorithm for subsequently written pieces.
    pub fn with_checksum_algo(mut self, algo: ChecksumAlgo) -> Self {
        self.algo = algo;
        self
    }

    pub fn set_compatibility_key(&mut self, key: impl Into<String>) {
        self.compatibility_key = Some(key.into());
    }

    /// Ask readers to prefer `<name>_binary_columnar` companions.
    pub fn set_prefer_binary_columnar(&mut self, prefer: bool) {
        self.reader.prefer_binary_columnar = Some(prefer);
    }

    /// Pieces written so far.
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// Write one payload and record its manifest entry.
    async fn put_piece(
        &mut self,
        name: &str,
        rel: &str,
        format: PieceFormat,
        data: Vec<u8>,
    ) -> Result<&mut Piece> {
        let rel = validate_relative_path(rel)?;
        let mut piece = Piece::new(name, rel, format);
        piece.checksum = Some(compute_packed_checksum(&data, self.algo).hash);
        piece.bytes = Some(data.len() as u64);

        let path = join_path(&self.dir, &piece.path);
        tracing::debug!(
            artifact = %name,
            path = %path,
            format = format.as_str(),
            bytes = data.len(),
            "writing piece"
        );
        self.store.put(&path, Bytes::from(data)).await?;
        self.pieces.push(piece);
        let last = self.pieces.len() - 1;
        Ok(&mut self.pieces[last])
    }

    /// Write any serializable value as `<rel>`.
    pub async fn write_json<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        rel: &str,
        value: &T,
    ) -> Result<()> {
        let data = to_json_bytes(name, value)?;
        self.put_piece(name, rel, PieceFormat::Json, data).await?;
        Ok(())
    }

    /// Write rows as a single `<name>.jsonl` file.
    pub async fn write_jsonl<T: Serialize>(
        &mut self,
        name: &str,
        rows: &[T],
        compression: Compression,
    ) -> Result<()> {
        let rel = format!("{}.jsonl{}", name, compression_suffix(compression));
        let data = compress(&rel, jsonl_bytes(name, rows)?, compression)?;
        let piece = self.put_piece(name, &rel, PieceFormat::Jsonl, data).await?;
        piece.count = Some(rows.len().into());
        Ok(())
    }

    /// Write rows as `<name>.parts/<name>.part-NNNNNN.jsonl` shards of at
    /// most `rows_per_shard` rows, plus a `<name>_meta` listing the parts.
    pub async fn write_jsonl_sharded<T: Serialize>(
        &mut self,
        name: &str,
        rows: &[T],
        rows_per_shard: usize,
        compression: Compression,
    ) -> Result<Vec<String>> {
        if rows_per_shard == 0 {
            return Err(ArtifactError::Invalid(
                "rows_per_shard must be at least 1".to_string(),
            ));
        }
        let mut parts = Vec::new();
        let mut counts = Vec::new();
        // an empty artifact still gets one (empty) shard
        let shards: Vec<&[T]> = if rows.is_empty() {
            vec![rows]
        } else {
            rows.chunks(rows_per_shard).collect()
        };
        for (index, shard) in shards.into_iter().enumerate() {
            let rel = format!(
                "{name}.parts/{name}.part-{index:06}.jsonl{}",
                compression_suffix(compression)
            );
            let data = compress(&rel, jsonl_bytes(name, shard)?, compression)?;
            let piece = self.put_piece(name, &rel, PieceFormat::Jsonl, data).await?;
            piece.count = Some(shard.len().into());
            parts.push(rel);
            counts.push(shard.len());
        }
        let meta = json!({
            "fields": {
                "format": "jsonl-sharded",
                "count": rows.len(),
                "parts": parts,
                "counts": counts,
                "compression": compression_suffix(compression).trim_start_matches('.'),
            }
        });
        self.write_json(&format!("{}_meta", name), &format!("{}.meta.json", name), &meta)
            .await?;
        Ok(parts)
    }

    /// Write row objects as columnar JSON, columns in first-seen key order.
    pub async fn write_columnar(&mut self, name: &str, rows: &[Value]) -> Result<()> {
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            let Some(obj) = row.as_object() else {
                return Err(ArtifactError::Invalid(format!(
                    "{} columnar rows must be objects",
                    name
                )));
            };
            for key in obj.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let mut arrays = Map::new();
        for column in &columns {
            let values: Vec<Value> = rows
                .iter()
                .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
                .collect();
            arrays.insert(column.clone(), Value::Array(values));
        }
        let payload = json!({
            "format": "columnar",
            "columns": columns,
            "length": rows.len(),
            "arrays": arrays,
        });
        let data = to_json_bytes(name, &payload)?;
        let rel = format!("{}.columnar.json", name);
        let piece = self.put_piece(name, &rel, PieceFormat::Columnar, data).await?;
        piece.count = Some(rows.len().into());
        Ok(())
    }

    /// Write raw row payloads as a binary-columnar artifact: data, offsets,
    /// lengths and a meta sidecar carrying `arrays` (e.g. `fileTable`).
    pub async fn write_binary_columnar_frames<B: AsRef<[u8]>>(
        &mut self,
        name: &str,
        rows: &[B],
        arrays: Map<String, Value>,
    ) -> Result<()> {
        let frames = encode_binary_row_frames(rows)?;
        let data_rel = format!("{}.binary-columnar.bin", name);
        let offsets_rel = format!("{}.binary-columnar.offsets.bin", name);
        let lengths_rel = format!("{}.binary-columnar.lengths.varint", name);
        let count = frames.count();

        let piece = self
            .put_piece(name, &data_rel, PieceFormat::BinaryColumnar, frames.data)
            .await?;
        piece.count = Some(count.into());
        self.put_piece(
            &format!("{}_offsets", name),
            &offsets_rel,
            PieceFormat::Binary,
            frames.offsets_buffer,
        )
        .await?;
        self.put_piece(
            &format!("{}_lengths", name),
            &lengths_rel,
            PieceFormat::Varint,
            frames.lengths_buffer,
        )
        .await?;

        let meta = json!({
            "fields": {
                "format": BINARY_COLUMNAR_FORMAT,
                "byteOrder": "little-endian",
                "count": count,
                "data": data_rel,
                "offsets": offsets_rel,
                "lengths": lengths_rel,
            },
            "arrays": arrays,
        });
        self.write_json(
            &format!("{}_meta", name),
            &format!("{}.binary-columnar.meta.json", name),
            &meta,
        )
        .await
    }

    /// Write serializable rows as a binary-columnar artifact of JSON payloads.
    pub async fn write_binary_columnar<T: Serialize>(
        &mut self,
        name: &str,
        rows: &[T],
        arrays: Map<String, Value>,
    ) -> Result<()> {
        let payloads = rows
            .iter()
            .map(|row| to_json_bytes(name, row))
            .collect::<Result<Vec<_>>>()?;
        self.write_binary_columnar_frames(name, &payloads, arrays)
            .await
    }

    /// Write token postings as a packed buffer, its offsets and a
    /// `<name>_packed_meta` sidecar.
    pub async fn write_packed_postings(
        &mut self,
        name: &str,
        postings: &TokenPostings,
        block_size: usize,
    ) -> Result<()> {
        if postings.postings.len() != postings.vocab.len() {
            return Err(ArtifactError::Invalid(format!(
                "{} has {} posting lists for {} tokens",
                name,
                postings.postings.len(),
                postings.vocab.len()
            )));
        }
        let packed = pack_tf_postings(&postings.postings, block_size)?;
        let packed_rel = format!("{}.packed.bin", name);
        let offsets_rel = format!("{}.packed.offsets.bin", name);

        let piece = self
            .put_piece(name, &packed_rel, PieceFormat::Packed, packed.buffer)
            .await?;
        piece.count = Some(postings.vocab.len().into());
        self.put_piece(
            &format!("{}_offsets", name),
            &offsets_rel,
            PieceFormat::Binary,
            encode_u64_offsets(&packed.offsets),
        )
        .await?;

        let mut arrays = Map::new();
        arrays.insert("vocab".to_string(), json!(postings.vocab));
        if !postings.vocab_ids.is_empty() {
            arrays.insert("vocabIds".to_string(), json!(postings.vocab_ids));
        }
        arrays.insert("docLengths".to_string(), json!(postings.doc_lengths));
        let meta = json!({
            "fields": {
                "blockSize": block_size,
                "offsets": offsets_rel,
                "count": postings.vocab.len(),
                "avgDocLen": postings.avg_doc_len,
                "totalDocs": postings.total_docs,
            },
            "arrays": arrays,
        });
        self.write_json(
            &format!("{}_packed_meta", name),
            &format!("{}.packed.meta.json", name),
            &meta,
        )
        .await
    }

    /// Write the minhash signature matrix as u32 little-endian rows.
    pub async fn write_minhash(&mut self, matrix: &SignatureMatrix) -> Result<()> {
        check_matrix_len(MINHASH_SIGNATURES, matrix.count, matrix.dims, matrix.values.len())?;
        let mut data = Vec::with_capacity(matrix.values.len() * 4);
        for value in &matrix.values {
            data.extend_from_slice(&value.to_le_bytes());
        }
        let rel = format!("{}.bin", MINHASH_SIGNATURES);
        let piece = self
            .put_piece(MINHASH_SIGNATURES, &rel, PieceFormat::Binary, data)
            .await?;
        piece.count = Some(matrix.count.into());
        piece.dims = Some(matrix.dims.into());
        Ok(())
    }

    /// Write one of the dense uint8 vector artifacts and its meta sidecar.
    pub async fn write_dense_vectors(&mut self, name: &str, vectors: &DenseVectors) -> Result<()> {
        if !DENSE_VECTOR_ARTIFACTS.contains(&name) {
            return Err(ArtifactError::Invalid(format!(
                "{} is not a dense vector artifact",
                name
            )));
        }
        check_matrix_len(name, vectors.count, vectors.dims, vectors.values.len())?;
        let rel = format!("{}.bin", name);
        let piece = self
            .put_piece(name, &rel, PieceFormat::Binary, vectors.values.clone())
            .await?;
        piece.count = Some(vectors.count.into());
        piece.dims = Some(vectors.dims.into());

        let mut fields = Map::new();
        fields.insert("format".to_string(), json!(UINT8_ROW_MAJOR));
        fields.insert("count".to_string(), json!(vectors.count));
        fields.insert("dims".to_string(), json!(vectors.dims));
        if let Some(model) = &vectors.model {
            fields.insert("model".to_string(), json!(model));
        }
        self.write_json(
            &format!("{}_meta", name),
            &format!("{}.meta.json", name),
            &json!({ "fields": fields }),
        )
        .await
    }

    /// Write a varint list as `<name>.varint`.
    pub async fn write_varint_list(&mut self, name: &str, values: &[u64]) -> Result<()> {
        let rel = format!("{}.varint", name);
        let data = encode_varint_list(values)?;
        let piece = self.put_piece(name, &rel, PieceFormat::Varint, data).await?;
        piece.count = Some(values.len().into());
        Ok(())
    }

    /// Write `pieces/manifest.json` and return the manifest.
    pub async fn finish(self) -> Result<Manifest> {
        let manifest = Manifest {
            compatibility_key: self.compatibility_key,
            pieces: self.pieces,
            reader: self.reader,
        };
        let path = join_path(&self.dir, MANIFEST_PATH);
        let data = serde_json::to_vec_pretty(&manifest).map_err(|e| encode_error(MANIFEST_PATH, e))?;
        self.store.put(&path, Bytes::from(data)).await?;
        tracing::info!(
            dir = %self.dir,
            pieces = manifest.pieces.len(),
            "wrote artifact manifest"
        );
        Ok(manifest)
    }
}

fn check_matrix_len(name: &str, count: usize, dims: usize, len: usize) -> Result<()> {
    match count.checked_mul(dims) {
        Some(expected) if expected == len => Ok(()),
        _ => Err(ArtifactError::Invalid(format!(
            "{} holds {} values, expected {}x{}",
            name, len, count, dims
        ))),
    }
}
