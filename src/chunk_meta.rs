//! chunk_meta and file_meta loaders.
//!
//! Rows may carry a `fileRef` into a shared file table instead of an inline
//! `file`. Chunk rows may also be split into hot and cold artifacts keyed by
//! `id`; cold fields are merged only when asked for.

use crate::binary::string_array;
use crate::error::{ArtifactError, Result};
use crate::loader::ArtifactLoader;
use crate::manifest::{ArtifactSources, PieceFormat, SourceFormat};
use crate::stream::RowStream;
use crate::types::{ChunkMetaColdRow, ChunkMetaRow, FileMetaRow};
use crate::varint::decode_varint64_list;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const CHUNK_META: &str = "chunk_meta";
pub const CHUNK_META_COLD: &str = "chunk_meta_cold";
pub const FILE_META: &str = "file_meta";

/// File table for `fileRef` hydration: the binary-columnar sidecar's
/// `arrays.fileTable`, or the one in `<name>_meta` for JSON sources.
async fn file_table(
    loader: &ArtifactLoader,
    sources: &ArtifactSources,
) -> Result<Option<Arc<Vec<String>>>> {
    let meta = match (&sources.format, &sources.sidecars) {
        (SourceFormat::Piece(PieceFormat::BinaryColumnar), Some(sidecars)) => {
            Some(loader.read_meta(&sidecars.meta.path).await?)
        }
        _ => loader.named_meta(&sources.name).await?,
    };
    let Some(meta) = meta else {
        return Ok(None);
    };
    Ok(string_array(&meta, "fileTable")?.map(Arc::new))
}

/// Replace `file_ref` with the table entry when `file` is absent.
fn hydrate_file(
    file: &mut Option<String>,
    file_ref: &mut Option<u64>,
    table: Option<&[String]>,
    id: u64,
) -> Result<()> {
    let Some(index) = file_ref.take() else {
        return Ok(());
    };
    if file.is_some() {
        return Ok(());
    }
    let Some(table) = table else {
        return Err(ArtifactError::Invalid(format!(
            "row {} has fileRef {} but no fileTable is declared",
            id, index
        )));
    };
    let path = usize::try_from(index)
        .ok()
        .and_then(|i| table.get(i))
        .ok_or_else(|| {
            ArtifactError::Corrupt(format!(
                "row {} fileRef {} is outside a file table of {} entries",
                id,
                index,
                table.len()
            ))
        })?;
    *file = Some(path.clone());
    Ok(())
}

/// Decode `token_ids_packed` into 16-digit hex `tokenIds`.
pub fn materialize_token_ids(row: &mut ChunkMetaRow) -> Result<()> {
    let Some(packed) = row.token_ids_packed.take() else {
        return Ok(());
    };
    if row.token_ids.is_some() {
        return Ok(());
    }
    let bytes = STANDARD.decode(packed.as_bytes()).map_err(|e| {
        ArtifactError::Corrupt(format!("chunk {} token_ids_packed is not base64: {}", row.id, e))
    })?;
    let ids = decode_varint64_list(&bytes)?;
    row.token_ids = Some(ids.iter().map(|id| format!("{:016x}", id)).collect());
    Ok(())
}

/// Fill absent hot fields from the cold row.
fn merge_cold(row: &mut ChunkMetaRow, cold: ChunkMetaColdRow) {
    if row.pre_context.is_none() {
        row.pre_context = cold.pre_context;
    }
    if row.post_context.is_none() {
        row.post_context = cold.post_context;
    }
    if row.doc_comment.is_none() {
        row.doc_comment = cold.doc_comment;
    }
    if row.docmeta.is_none() {
        row.docmeta = cold.docmeta;
    }
}

fn typed<T: DeserializeOwned>(name: &str, row: Value) -> Result<T> {
    serde_json::from_value(row).map_err(|e| {
        ArtifactError::Corrupt(format!("{} row does not match the expected shape: {}", name, e))
    })
}

/// Per-row transform shared by the materializing and streaming paths.
struct ChunkRowFinisher {
    table: Option<Arc<Vec<String>>>,
    cold: Option<HashMap<u64, ChunkMetaColdRow>>,
    token_ids: bool,
}

impl ChunkRowFinisher {
    async fn new(loader: &ArtifactLoader, sources: &ArtifactSources) -> Result<Self> {
        let options = loader.options();
        let cold = if options.include_cold && loader.has_artifact(CHUNK_META_COLD) {
            let rows = load_chunk_meta_cold(loader).await?;
            Some(rows.into_iter().map(|row| (row.id, row)).collect())
        } else {
            None
        };
        Ok(Self {
            table: file_table(loader, sources).await?,
            cold,
            token_ids: options.materialize_token_ids,
        })
    }

    fn finish(&mut self, row: Value) -> Result<ChunkMetaRow> {
        let mut row: ChunkMetaRow = typed(CHUNK_META, row)?;
        hydrate_file(
            &mut row.file,
            &mut row.file_ref,
            self.table.as_deref().map(Vec::as_slice),
            row.id,
        )?;
        if let Some(cold) = self.cold.as_mut().and_then(|cold| cold.remove(&row.id)) {
            merge_cold(&mut row, cold);
        }
        if self.token_ids {
            materialize_token_ids(&mut row)?;
        }
        Ok(row)
    }
}

/// Materialize chunk_meta rows with file paths hydrated and, when enabled,
/// cold fields merged.
pub async fn load_chunk_meta(loader: &ArtifactLoader) -> Result<Vec<ChunkMetaRow>> {
    let sources = loader.resolve(CHUNK_META).await?;
    let mut finisher = ChunkRowFinisher::new(loader, &sources).await?;
    loader
        .load_source_values(&sources, &loader.required_keys(CHUNK_META))
        .await?
        .into_iter()
        .map(|row| finisher.finish(row))
        .collect()
}

/// Stream chunk_meta rows. The cold artifact, when included, is indexed
/// before the first row is yielded.
pub async fn stream_chunk_meta(loader: &ArtifactLoader) -> Result<RowStream<ChunkMetaRow>> {
    let sources = loader.resolve(CHUNK_META).await?;
    let mut finisher = ChunkRowFinisher::new(loader, &sources).await?;
    Ok(loader
        .stream_source_values(&sources, loader.required_keys(CHUNK_META))
        .await?
        .map_rows(move |row| finisher.finish(row)))
}

/// Materialize the cold chunk fields.
pub async fn load_chunk_meta_cold(loader: &ArtifactLoader) -> Result<Vec<ChunkMetaColdRow>> {
    let sources = loader.resolve(CHUNK_META_COLD).await?;
    loader
        .load_source_values(&sources, &loader.required_keys(CHUNK_META_COLD))
        .await?
        .into_iter()
        .map(|row| typed(CHUNK_META_COLD, row))
        .collect()
}

fn finish_file_row(row: Value, table: Option<&[String]>) -> Result<FileMetaRow> {
    let mut row: FileMetaRow = typed(FILE_META, row)?;
    hydrate_file(&mut row.file, &mut row.file_ref, table, row.id)?;
    Ok(row)
}

/// Materialize file_meta rows.
pub async fn load_file_meta(loader: &ArtifactLoader) -> Result<Vec<FileMetaRow>> {
    let sources = loader.resolve(FILE_META).await?;
    let table = file_table(loader, &sources).await?;
    loader
        .load_source_values(&sources, &loader.required_keys(FILE_META))
        .await?
        .into_iter()
        .map(|row| finish_file_row(row, table.as_deref().map(Vec::as_slice)))
        .collect()
}

/// Stream file_meta rows.
pub async fn stream_file_meta(loader: &ArtifactLoader) -> Result<RowStream<FileMetaRow>> {
    let sources = loader.resolve(FILE_META).await?;
    let table = file_table(loader, &sources).await?;
    Ok(loader
        .stream_source_values(&sources, loader.required_keys(FILE_META))
        .await?
        .map_rows(move |row| finish_file_row(row, table.as_deref().map(Vec::as_slice))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::encode_varint64_list;

    #[test]
    fn test_hydrate_file() {
        let table = vec!["src/a.js".to_string(), "src/b.js".to_string()];
        let mut file = None;
        let mut file_ref = Some(1);
        hydrate_file(&mut file, &mut file_ref, Some(table.as_slice()), 7).unwrap();
        assert_eq!(file.as_deref(), Some("src/b.js"));
        assert_eq!(file_ref, None);

        let mut file = Some("inline.js".to_string());
        let mut file_ref = Some(0);
        hydrate_file(&mut file, &mut file_ref, Some(table.as_slice()), 7).unwrap();
        assert_eq!(file.as_deref(), Some("inline.js"));
    }

    #[test]
    fn test_hydrate_file_errors() {
        let table = vec!["src/a.js".to_string()];
        let err = hydrate_file(&mut None, &mut Some(4), Some(table.as_slice()), 1).unwrap_err();
        assert_eq!(err.code(), "ERR_ARTIFACT_CORRUPT");
        let err = hydrate_file(&mut None, &mut Some(0), None, 1).unwrap_err();
        assert_eq!(err.code(), "ERR_ARTIFACT_INVALID");
    }

    #[test]
    fn test_merge_cold_fills_absent_only() {
        let mut row = ChunkMetaRow {
            id: 3,
            pre_context: Some("hot".into()),
            ..Default::default()
        };
        merge_cold(
            &mut row,
            ChunkMetaColdRow {
                id: 3,
                pre_context: Some("cold".into()),
                doc_comment: Some("/** doc */".into()),
                ..Default::default()
            },
        );
        assert_eq!(row.pre_context.as_deref(), Some("hot"));
        assert_eq!(row.doc_comment.as_deref(), Some("/** doc */"));
    }

    #[test]
    fn test_materialize_token_ids() {
        let ids = [0u64, 0xdead_beef, u64::MAX];
        let mut row = ChunkMetaRow {
            token_ids_packed: Some(STANDARD.encode(encode_varint64_list(&ids))),
            ..Default::default()
        };
        materialize_token_ids(&mut row).unwrap();
        assert_eq!(
            row.token_ids.unwrap(),
            vec!["0000000000000000", "00000000deadbeef", "ffffffffffffffff"]
        );
        assert!(row.token_ids_packed.is_none());

        let mut bad = ChunkMetaRow {
            token_ids_packed: Some("***".into()),
            ..Default::default()
        };
        assert_eq!(materialize_token_ids(&mut bad).unwrap_err().code(), "ERR_ARTIFACT_CORRUPT");
    }
}
