//! Binary-columnar sources: a row-frame data blob with offsets, lengths and
//! a meta sidecar.
//!
//! Materializing reads the whole data blob under the byte budget. Streaming
//! reads one row range at a time, so peak memory follows the largest row.

use crate::error::{ArtifactError, Result};
use crate::frames::{decode_binary_row_frame_lengths, decode_u64_offsets, RowFrameIndex};
use crate::loader::ArtifactLoader;
use crate::checksum::{verify_stored, PackedChecksumValidator};
use crate::manifest::{primary_path, unwrap_fields, validate_relative_path, ArtifactSources};
use crate::stream::RowReader;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};

/// `fields.format` of a binary-columnar meta sidecar.
pub const BINARY_COLUMNAR_FORMAT: &str = "binary-columnar-v1";

/// The `arrays` object of a sidecar, with or without a `fields` envelope.
pub fn meta_arrays(value: &Value) -> Option<&Map<String, Value>> {
    value
        .get("arrays")
        .or_else(|| unwrap_fields(value).get("arrays"))
        .and_then(Value::as_object)
}

/// A string array from sidecar `arrays`. Non-string entries are corrupt.
pub fn string_array(value: &Value, name: &str) -> Result<Option<Vec<String>>> {
    let Some(items) = meta_arrays(value).and_then(|a| a.get(name)) else {
        return Ok(None);
    };
    let Some(items) = items.as_array() else {
        return Err(ArtifactError::Corrupt(format!("arrays.{} is not an array", name)));
    };
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                ArtifactError::Corrupt(format!("arrays.{} holds a non-string entry", name))
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// A non-negative integer array from sidecar `arrays`.
pub fn u64_array(value: &Value, name: &str) -> Result<Option<Vec<u64>>> {
    let Some(items) = meta_arrays(value).and_then(|a| a.get(name)) else {
        return Ok(None);
    };
    let Some(items) = items.as_array() else {
        return Err(ArtifactError::Corrupt(format!("arrays.{} is not an array", name)));
    };
    items
        .iter()
        .map(|item| {
            item.as_u64().ok_or_else(|| {
                ArtifactError::Invalid(format!("arrays.{} holds a non-integer entry", name))
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Parsed binary-columnar meta sidecar.
#[derive(Debug, Clone)]
pub struct BinaryColumnarMeta {
    pub count: usize,
    /// Relative paths of the data, offsets and lengths files.
    pub data: String,
    pub offsets: String,
    pub lengths: String,
    /// The whole sidecar, for `arrays` lookups.
    pub raw: Value,
}

impl BinaryColumnarMeta {
    /// Parse a sidecar. Paths missing from `fields` fall back to the
    /// manifest-declared pieces. Paths present are re-validated and must name
    /// the declared piece, so every byte read is covered by the manifest.
    pub fn parse(raw: &Value, sources: &ArtifactSources) -> Result<Self> {
        let Some(sidecars) = sources.sidecars.as_ref() else {
            return Err(ArtifactError::ManifestIncomplete(format!(
                "binary-columnar sidecars for {} are not declared",
                sources.name
            )));
        };
        let fields = unwrap_fields(raw);
        match fields.get("format") {
            None | Some(Value::Null) => {}
            Some(Value::String(format))
                if format.trim().to_ascii_lowercase() == BINARY_COLUMNAR_FORMAT => {}
            Some(other) => {
                return Err(ArtifactError::Unsupported(format!(
                    "{} meta format {}",
                    sources.name, other
                )))
            }
        }
        if let Some(order) = fields.get("byteOrder").and_then(Value::as_str) {
            if !matches!(order.to_ascii_lowercase().as_str(), "little-endian" | "le") {
                return Err(ArtifactError::Unsupported(format!(
                    "{} byte order {}",
                    sources.name, order
                )));
            }
        }
        let count = fields
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                ArtifactError::Invalid(format!(
                    "{} meta count is not a non-negative integer",
                    sources.name
                ))
            })?;

        let path_field = |key: &str, declared: &str| -> Result<String> {
            let path = match fields.get(key) {
                None | Some(Value::Null) => return Ok(declared.to_string()),
                Some(Value::String(path)) => validate_relative_path(path)?,
                Some(other) => {
                    return Err(ArtifactError::Invalid(format!(
                        "{} meta {} is not a path: {}",
                        sources.name, key, other
                    )))
                }
            };
            if path != primary_path(declared) {
                return Err(ArtifactError::ManifestIncomplete(format!(
                    "{} meta {} {} is not the declared piece {}",
                    sources.name, key, path, declared
                )));
            }
            Ok(declared.to_string())
        };
        let data_fallback = sources.paths.first().ok_or_else(|| {
            ArtifactError::ManifestIncomplete(format!("no data piece for {}", sources.name))
        })?;

        Ok(Self {
            count: usize::try_from(count).map_err(|_| {
                ArtifactError::Invalid(format!("{} meta count {} too large", sources.name, count))
            })?,
            data: path_field("data", data_fallback)?,
            offsets: path_field("offsets", &sidecars.offsets.path)?,
            lengths: path_field("lengths", &sidecars.lengths.path)?,
            raw: raw.clone(),
        })
    }

    /// `arrays.fileTable`, when present.
    pub fn file_table(&self) -> Result<Option<Vec<String>>> {
        string_array(&self.raw, "fileTable")
    }
}

/// An opened binary-columnar source with a validated row index.
#[derive(Debug, Clone)]
pub struct BinaryColumnarSource {
    pub meta: BinaryColumnarMeta,
    pub index: RowFrameIndex,
    /// Full storage path of the data blob.
    pub data_path: String,
    pub data_len: u64,
    data_checksum: Option<String>,
}

impl BinaryColumnarSource {
    /// Read the meta and index sidecars and validate every row range.
    /// The data blob itself is not read.
    pub async fn open(loader: &ArtifactLoader, sources: &ArtifactSources) -> Result<Self> {
        let Some(sidecars) = sources.sidecars.as_ref() else {
            return Err(ArtifactError::ManifestIncomplete(format!(
                "binary-columnar sidecars for {} are not declared",
                sources.name
            )));
        };
        let raw = loader.read_meta(&sidecars.meta.path).await?;
        let meta = BinaryColumnarMeta::parse(&raw, sources)?;

        let max_bytes = loader.options().max_bytes;
        let offsets = decode_u64_offsets(&loader.read_verified(&meta.offsets, Some(max_bytes)).await?)?;
        let lengths = decode_binary_row_frame_lengths(
            &loader.read_verified(&meta.lengths, Some(max_bytes)).await?,
        )?;
        if lengths.len() != meta.count {
            return Err(ArtifactError::Corrupt(format!(
                "{} has {} row lengths but meta count {}",
                sources.name,
                lengths.len(),
                meta.count
            )));
        }

        let data_path = loader.path(&meta.data);
        let data_len = loader.store().head(&data_path).await?;
        let index = RowFrameIndex::new(offsets, lengths, meta.count, data_len)?;
        tracing::debug!(
            artifact = %sources.name,
            rows = meta.count,
            data_len,
            "opened binary-columnar source"
        );
        Ok(Self {
            data_checksum: loader.checksum_for(&meta.data),
            meta,
            index,
            data_path,
            data_len,
        })
    }

    /// Read the data blob and slice out every row payload.
    pub async fn read_all_rows(&self, loader: &ArtifactLoader) -> Result<Vec<Bytes>> {
        let options = loader.options();
        if options.enforce_binary_data_budget && self.data_len > options.max_bytes {
            return Err(ArtifactError::too_large(
                &self.data_path,
                self.data_len,
                options.max_bytes,
            ));
        }
        let data = loader.store().get(&self.data_path).await?;
        if let Some(checksum) = self.data_checksum.as_deref() {
            let mut validator = PackedChecksumValidator::from_joined(checksum, &self.data_path)?;
            validator.update_all(&data);
            validator.verify()?;
        }
        if data.len() as u64 != self.data_len {
            return Err(ArtifactError::Corrupt(format!(
                "{} changed size while reading",
                self.data_path
            )));
        }
        (0..self.index.len())
            .map(|i| {
                let range = self.index.row_range(i).ok_or_else(|| {
                    ArtifactError::Corrupt(format!("{} row {} missing", self.data_path, i))
                })?;
                Ok(data.slice(range.start as usize..range.end as usize))
            })
            .collect()
    }

    /// Row-at-a-time reader over the data blob.
    pub fn into_reader(self, loader: ArtifactLoader) -> BinaryRowReader {
        BinaryRowReader {
            loader,
            source: self,
            next: 0,
            verified: false,
        }
    }
}

/// Decode one row payload as UTF-8 JSON.
pub fn decode_json_row(path: &str, row: usize, payload: &[u8]) -> Result<Value> {
    serde_json::from_slice(payload)
        .map_err(|e| ArtifactError::Corrupt(format!("{} row {}: {}", path, row, e)))
}

/// Streams raw row payloads, one bounded range read per row.
pub struct BinaryRowReader {
    loader: ArtifactLoader,
    source: BinaryColumnarSource,
    next: usize,
    verified: bool,
}

impl BinaryRowReader {
    /// Hash the data blob in bounded chunks before the first row is trusted.
    async fn verify_data(&mut self) -> Result<()> {
        match self.source.data_checksum.as_deref() {
            Some(checksum) => {
                verify_stored(
                    self.loader.store().as_ref(),
                    &self.source.data_path,
                    self.source.data_len,
                    checksum,
                )
                .await
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RowReader for BinaryRowReader {
    type Row = Bytes;

    async fn next_row(&mut self) -> Result<Option<Bytes>> {
        if !self.verified {
            self.verify_data().await?;
            self.verified = true;
        }
        let Some(range) = self.source.index.row_range(self.next) else {
            return Ok(None);
        };
        let len = range.end - range.start;
        let max_bytes = self.loader.options().max_bytes;
        if len > max_bytes {
            return Err(ArtifactError::too_large(&self.source.data_path, len, max_bytes));
        }
        let payload = self
            .loader
            .store()
            .get_range(&self.source.data_path, range)
            .await?;
        if payload.len() as u64 != len {
            return Err(ArtifactError::Corrupt(format!(
                "{} row {} read {} of {} bytes",
                self.source.data_path,
                self.next,
                payload.len(),
                len
            )));
        }
        self.next += 1;
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{BinaryColumnarSidecars, PieceFormat, Piece, SourceFormat};
    use serde_json::json;

    fn sources() -> ArtifactSources {
        ArtifactSources {
            name: "chunk_meta".to_string(),
            format: SourceFormat::Piece(PieceFormat::BinaryColumnar),
            paths: vec!["chunk_meta.binary-columnar.bin".to_string()],
            meta: None,
            sidecars: Some(BinaryColumnarSidecars {
                meta: Piece::new("chunk_meta_meta", "chunk_meta.binary-columnar.meta.json", PieceFormat::Json),
                offsets: Piece::new("chunk_meta_offsets", "chunk_meta.binary-columnar.offsets.bin", PieceFormat::Binary),
                lengths: Piece::new("chunk_meta_lengths", "chunk_meta.binary-columnar.lengths.varint", PieceFormat::Varint),
            }),
            merged: false,
        }
    }

    #[test]
    fn test_meta_defaults_to_manifest_paths() {
        let raw = json!({
            "fields": { "format": "binary-columnar-v1", "count": 2 },
            "arrays": { "fileTable": ["src/alpha.js", "src/beta.js"] }
        });
        let meta = BinaryColumnarMeta::parse(&raw, &sources()).unwrap();
        assert_eq!(meta.count, 2);
        assert_eq!(meta.data, "chunk_meta.binary-columnar.bin");
        assert_eq!(meta.lengths, "chunk_meta.binary-columnar.lengths.varint");
        assert_eq!(meta.file_table().unwrap().unwrap()[1], "src/beta.js");
    }

    #[test]
    fn test_meta_rejects_traversal() {
        let raw = json!({
            "fields": { "format": "binary-columnar-v1", "count": 1, "data": "../outside.bin" }
        });
        let err = BinaryColumnarMeta::parse(&raw, &sources()).unwrap_err();
        assert_eq!(err.code(), "ERR_ARTIFACT_INVALID");
    }

    #[test]
    fn test_meta_paths_must_name_declared_pieces() {
        let raw = json!({
            "fields": { "format": "binary-columnar-v1", "count": 1, "data": "./chunk_meta.binary-columnar.bin" }
        });
        assert_eq!(
            BinaryColumnarMeta::parse(&raw, &sources()).unwrap().data,
            "chunk_meta.binary-columnar.bin"
        );
        for key in ["data", "offsets", "lengths"] {
            let raw = json!({ "fields": { "format": "binary-columnar-v1", "count": 1, key: "evil.bin" } });
            let err = BinaryColumnarMeta::parse(&raw, &sources()).unwrap_err();
            assert_eq!(err.code(), "ERR_MANIFEST_INCOMPLETE", "{key}");
        }
    }

    #[test]
    fn test_meta_format_is_lenient() {
        for raw in [
            json!({ "fields": { "count": 1 } }),
            json!({ "fields": { "format": " Binary-Columnar-V1 ", "count": 1 } }),
        ] {
            assert_eq!(BinaryColumnarMeta::parse(&raw, &sources()).unwrap().count, 1);
        }
    }

    #[test]
    fn test_meta_rejects_unknown_format_and_byte_order() {
        let raw = json!({ "fields": { "format": "binary-columnar-v2", "count": 1 } });
        assert_eq!(
            BinaryColumnarMeta::parse(&raw, &sources()).unwrap_err().code(),
            "ERR_ARTIFACT_UNSUPPORTED"
        );
        let raw = json!({ "fields": { "format": "binary-columnar-v1", "count": 1, "byteOrder": "big-endian" } });
        assert_eq!(
            BinaryColumnarMeta::parse(&raw, &sources()).unwrap_err().code(),
            "ERR_ARTIFACT_UNSUPPORTED"
        );
        let raw = json!({ "fields": { "format": "binary-columnar-v1", "count": 1.5 } });
        assert_eq!(
            BinaryColumnarMeta::parse(&raw, &sources()).unwrap_err().code(),
            "ERR_ARTIFACT_INVALID"
        );
    }

    #[test]
    fn test_arrays_helpers() {
        let raw = json!({ "arrays": { "vocab": ["a", "b"], "docLengths": [3, 4], "bad": [1, "x"] } });
        assert_eq!(string_array(&raw, "vocab").unwrap().unwrap().len(), 2);
        assert_eq!(u64_array(&raw, "docLengths").unwrap().unwrap(), vec![3, 4]);
        assert!(string_array(&raw, "missing").unwrap().is_none());
        assert!(string_array(&raw, "bad").is_err());
        assert!(u64_array(&raw, "bad").is_err());
    }

    #[test]
    fn test_decode_json_row() {
        assert_eq!(decode_json_row("d.bin", 0, b"{\"id\":1}").unwrap()["id"], 1);
        let err = decode_json_row("d.bin", 3, &[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.code(), "ERR_ARTIFACT_CORRUPT");
        assert!(err.to_string().contains("row 3"));
    }
}
