//! Artifact loader: resolves names through the manifest and dispatches to the
//! per-format decode paths.

use crate::binary::{decode_json_row, BinaryColumnarSource};
use crate::checksum::verify_checksum;
use crate::config::LoadOptions;
use crate::error::{ArtifactError, Result};
use crate::json::{
    check_required_keys, inflate_columnar, json_rows, parse_json, parse_jsonl, read_budgeted,
    read_json_value, read_text_source, Compression, JsonlRowReader, JsonlSource,
};
use crate::manifest::{
    load_pieces_manifest, primary_path, resolve_artifact_sources, ArtifactSources, Manifest,
    PieceFormat, SourceFormat, BAK_SUFFIX,
};
use crate::object_store::ObjectStoreBackend;
use crate::session::LoaderSession;
use crate::storage::{join_path, BlobStore};
use crate::stream::RowStream;
use crate::varint::decode_varint_list;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Keys every row of a well-known artifact must carry.
pub fn default_required_keys(name: &str) -> &'static [&'static str] {
    match name {
        "chunk_meta" => &["id", "start", "end"],
        "chunk_meta_cold" | "file_meta" => &["id"],
        _ => &[],
    }
}

/// Presence report for one artifact, used by the operator tooling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactPresence {
    pub name: String,
    /// Resolved format, when resolution succeeded.
    pub format: Option<String>,
    /// Every physical file the artifact needs, sidecars included.
    pub paths: Vec<String>,
    /// Files from `paths` (or named by a shard gap) that do not exist.
    pub missing: Vec<String>,
    /// Error code of a failed resolution.
    pub error: Option<String>,
}

impl ArtifactPresence {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.missing.is_empty()
    }
}

/// Loader bound to one artifact directory.
///
/// The manifest is read once on open. Clones share the manifest and the
/// session, so warnings stay deduplicated across streams.
#[derive(Clone)]
pub struct ArtifactLoader {
    store: Arc<dyn BlobStore>,
    dir: String,
    manifest: Arc<Manifest>,
    options: LoadOptions,
    session: Arc<LoaderSession>,
}

impl ArtifactLoader {
    /// Open the artifact directory `dir` (a store prefix).
    pub async fn open(
        store: Arc<dyn BlobStore>,
        dir: impl Into<String>,
        options: LoadOptions,
    ) -> Result<Self> {
        options.validate()?;
        let dir = dir.into();
        let session = Arc::new(LoaderSession::new());
        let manifest = load_pieces_manifest(
            store.as_ref(),
            &dir,
            options.manifest_max_bytes(),
            options.strict,
            &session,
        )
        .await?;
        Ok(Self {
            store,
            dir,
            manifest: Arc::new(manifest),
            options,
            session,
        })
    }

    /// Open a directory on the local filesystem.
    pub async fn open_local(path: impl Into<PathBuf>, options: LoadOptions) -> Result<Self> {
        let store = ObjectStoreBackend::local(path)?;
        Self::open(Arc::new(store), "", options).await
    }

    /// Same directory and session, different options.
    pub fn with_options(&self, options: LoadOptions) -> Self {
        Self {
            options,
            ..self.clone()
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub fn session(&self) -> &LoaderSession {
        &self.session
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Full storage path of a piece path.
    pub fn path(&self, rel: &str) -> String {
        join_path(&self.dir, rel)
    }

    /// Declared checksum of a piece path.
    pub fn checksum_for(&self, rel: &str) -> Option<String> {
        self.manifest.checksum_for(rel).map(str::to_string)
    }

    /// Whether the manifest declares `name`.
    pub fn has_artifact(&self, name: &str) -> bool {
        !self.manifest.entries(name).is_empty()
    }

    /// Log a degraded-path warning once per artifact and reason.
    pub(crate) fn warn_once(&self, name: &str, reason: &str, message: &str) {
        self.session.warn_once(&self.dir, name, reason, message);
    }

    /// The trimmed compatibility key.
    ///
    /// A missing key is an error in strict mode and a warning otherwise.
    pub fn read_compatibility_key(&self) -> Result<Option<String>> {
        match self.manifest.compatibility_key.clone() {
            Some(key) => Ok(Some(key)),
            None if self.options.strict => Err(ArtifactError::ManifestInvalid(format!(
                "{} has no compatibilityKey",
                self.path(crate::manifest::MANIFEST_PATH)
            ))),
            None => {
                self.warn_once(
                    "manifest",
                    "missing-compatibility-key",
                    "manifest has no compatibilityKey",
                );
                Ok(None)
            }
        }
    }

    /// The readable copy of a piece path: the file itself, else the `.bak`
    /// an interrupted directory swap left behind. `None` when neither exists.
    pub(crate) async fn readable(&self, rel: &str) -> Result<Option<String>> {
        if self.store.exists(&self.path(rel)).await? {
            return Ok(Some(rel.to_string()));
        }
        let backup = format!("{}{}", rel, BAK_SUFFIX);
        if self.store.exists(&self.path(&backup)).await? {
            return Ok(Some(backup));
        }
        Ok(None)
    }

    /// Storage path to read `rel` from. Falls back to the primary path so a
    /// missing file surfaces as a storage not-found error.
    async fn read_path(&self, rel: &str) -> Result<String> {
        let found = self.readable(rel).await?;
        Ok(self.path(found.as_deref().unwrap_or(rel)))
    }

    /// Point every path of `sources` at its readable copy. Declared files
    /// present in neither form fail as [`ArtifactError::PartsMissing`].
    async fn locate(&self, mut sources: ArtifactSources) -> Result<ArtifactSources> {
        let mut missing = Vec::new();
        if sources.format == SourceFormat::Piece(PieceFormat::Dir) {
            for rel in &sources.paths {
                if self.store.list(&self.path(rel)).await?.is_empty() {
                    missing.push(rel.clone());
                }
            }
        } else {
            for rel in sources.paths.iter_mut() {
                match self.readable(rel).await? {
                    Some(found) => *rel = found,
                    None => missing.push(rel.clone()),
                }
            }
        }
        if let Some(sidecars) = sources.sidecars.as_mut() {
            for piece in [&mut sidecars.meta, &mut sidecars.offsets, &mut sidecars.lengths] {
                match self.readable(&piece.path).await? {
                    Some(found) => piece.path = found,
                    None => missing.push(piece.path.clone()),
                }
            }
        }
        if !missing.is_empty() {
            return Err(ArtifactError::parts_missing(&sources.name, missing));
        }
        Ok(sources)
    }

    /// Read a piece, optionally under a byte budget, and verify its declared
    /// checksum.
    pub(crate) async fn read_verified(&self, rel: &str, max_bytes: Option<u64>) -> Result<Bytes> {
        let path = self.read_path(rel).await?;
        let data = match max_bytes {
            Some(max_bytes) => read_budgeted(self.store.as_ref(), &path, max_bytes).await?,
            None => self.store.get(&path).await?,
        };
        if let Some(checksum) = self.manifest.checksum_for(rel) {
            verify_checksum(&data, checksum, &path)?;
        }
        Ok(data)
    }

    /// Parsed JSON sidecar, cached for the lifetime of the session.
    pub(crate) async fn read_meta(&self, rel: &str) -> Result<Arc<Value>> {
        let key = self.path(rel);
        if let Some(cached) = self.session.cached_meta(&key) {
            return Ok(cached);
        }
        let path = self.read_path(rel).await?;
        let checksum = self.manifest.checksum_for(rel);
        let value =
            read_json_value(self.store.as_ref(), &path, self.options.max_bytes, checksum).await?;
        Ok(self.session.cache_meta(&key, value))
    }

    /// Parsed `<name>_meta` sidecar, when declared.
    pub(crate) async fn named_meta(&self, name: &str) -> Result<Option<Arc<Value>>> {
        let meta_name = format!("{}_meta", name);
        match self.manifest.single_entry(&meta_name, self.options.strict)? {
            Some(piece) => {
                let path = piece.path.clone();
                Ok(Some(self.read_meta(&path).await?))
            }
            None => Ok(None),
        }
    }

    fn prefers_binary_columnar(&self) -> bool {
        self.options
            .prefer_binary_columnar
            .unwrap_or_else(|| self.manifest.prefers_binary_columnar())
    }

    async fn resolve_named(&self, name: &str) -> Result<Option<ArtifactSources>> {
        let meta = self.named_meta(name).await?;
        let sources =
            match resolve_artifact_sources(&self.manifest, name, meta.as_deref(), self.options.strict)? {
                Some(sources) => Some(self.locate(sources).await?),
                None => None,
            };
        if let Some(sources) = &sources {
            if sources.merged {
                self.warn_once(
                    name,
                    "multi-source-merge",
                    &format!("merging {} json sources", sources.paths.len()),
                );
            }
            tracing::debug!(
                dir = %self.dir,
                artifact = %name,
                format = sources.format.as_str(),
                paths = sources.paths.len(),
                "resolved artifact sources"
            );
        }
        Ok(sources)
    }

    /// Resolve `name`, or `None` when the manifest does not declare it.
    pub async fn resolve_optional(&self, name: &str) -> Result<Option<ArtifactSources>> {
        if self.prefers_binary_columnar() {
            let companion = format!("{}_binary_columnar", name);
            if self.has_artifact(&companion) {
                return self.resolve_named(&companion).await;
            }
        }
        self.resolve_named(name).await
    }

    /// Resolve `name` to its physical sources.
    pub async fn resolve(&self, name: &str) -> Result<ArtifactSources> {
        self.resolve_optional(name).await?.ok_or_else(|| {
            ArtifactError::ManifestIncomplete(format!("Missing manifest entry for {}", name))
        })
    }

    pub(crate) fn required_keys(&self, name: &str) -> Vec<String> {
        match &self.options.required_keys {
            Some(keys) => keys.clone(),
            None => default_required_keys(name)
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }

    /// Materialize every row of `name` as JSON values.
    pub async fn load_values(&self, name: &str) -> Result<Vec<Value>> {
        let sources = self.resolve(name).await?;
        self.load_source_values(&sources, &self.required_keys(name))
            .await
    }

    /// Materialize every row of `name`.
    pub async fn load_rows<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        self.load_values(name)
            .await?
            .into_iter()
            .map(|row| row_from_value(name, row))
            .collect()
    }

    /// Stream the rows of `name`. Resolution errors surface here, decode
    /// errors surface from the stream.
    pub async fn stream_values(&self, name: &str) -> Result<RowStream<Value>> {
        let sources = self.resolve(name).await?;
        self.stream_source_values(&sources, self.required_keys(name))
            .await
    }

    /// Stream the rows of `name`, converted to `T`.
    pub async fn stream_rows<T>(&self, name: &str) -> Result<RowStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let owned = name.to_string();
        Ok(self
            .stream_values(name)
            .await?
            .map_rows(move |row| row_from_value(&owned, row)))
    }

    pub(crate) async fn load_source_values(
        &self,
        sources: &ArtifactSources,
        required: &[String],
    ) -> Result<Vec<Value>> {
        let max_bytes = self.options.max_bytes;
        let mut rows = Vec::new();
        match sources.format {
            SourceFormat::Piece(PieceFormat::Json) => {
                for rel in &sources.paths {
                    let value = self.read_json_piece(rel).await?;
                    rows.extend(json_rows(rel, value)?);
                }
            }
            SourceFormat::Piece(PieceFormat::Columnar) => {
                for rel in &sources.paths {
                    let value = self.read_json_piece(rel).await?;
                    rows.extend(inflate_columnar(rel, &value)?);
                }
            }
            SourceFormat::Piece(PieceFormat::Jsonl) | SourceFormat::Sharded => {
                for rel in &sources.paths {
                    let path = self.path(rel);
                    let checksum = self.manifest.checksum_for(rel);
                    let text =
                        read_text_source(self.store.as_ref(), &path, max_bytes, checksum).await?;
                    if is_json_part(rel) {
                        rows.extend(json_rows(&path, parse_json(&path, &text)?)?);
                    } else {
                        rows.extend(parse_jsonl(&path, &text, required)?);
                    }
                }
            }
            SourceFormat::Piece(PieceFormat::BinaryColumnar) => {
                let source = BinaryColumnarSource::open(self, sources).await?;
                for (i, payload) in source.read_all_rows(self).await?.iter().enumerate() {
                    rows.push(decode_json_row(&source.data_path, i, payload)?);
                }
            }
            SourceFormat::Piece(other) => {
                return Err(ArtifactError::Unsupported(format!(
                    "{} is a {} artifact, not row-shaped",
                    sources.name,
                    other.as_str()
                )))
            }
        }
        if !required.is_empty() {
            for (i, row) in rows.iter().enumerate() {
                check_required_keys(&format!("{} row {}", sources.name, i), row, required)?;
            }
        }
        Ok(rows)
    }

    pub(crate) async fn stream_source_values(
        &self,
        sources: &ArtifactSources,
        required: Vec<String>,
    ) -> Result<RowStream<Value>> {
        match sources.format {
            SourceFormat::Piece(PieceFormat::Jsonl) | SourceFormat::Sharded
                if !sources.paths.iter().any(|p| is_json_part(p)) =>
            {
                let jsonl = sources
                    .paths
                    .iter()
                    .map(|rel| JsonlSource {
                        path: self.path(rel),
                        checksum: self.checksum_for(rel),
                    })
                    .collect();
                Ok(RowStream::from_reader(JsonlRowReader::new(
                    Arc::clone(&self.store),
                    jsonl,
                    self.options.max_bytes,
                    required,
                )))
            }
            SourceFormat::Piece(PieceFormat::BinaryColumnar) => {
                let source = BinaryColumnarSource::open(self, sources).await?;
                let data_path = source.data_path.clone();
                let name = sources.name.clone();
                let mut row = 0usize;
                Ok(RowStream::from_reader(source.into_reader(self.clone())).map_rows(
                    move |payload| {
                        let value = decode_json_row(&data_path, row, &payload)?;
                        if !required.is_empty() {
                            check_required_keys(&format!("{} row {}", name, row), &value, &required)?;
                        }
                        row += 1;
                        Ok(value)
                    },
                ))
            }
            _ => {
                self.warn_once(
                    &sources.name,
                    "materialized-stream",
                    &format!(
                        "{} sources cannot be streamed; materializing",
                        sources.format.as_str()
                    ),
                );
                let rows = self.load_source_values(sources, &required).await?;
                Ok(RowStream::from_rows(rows))
            }
        }
    }

    pub(crate) async fn read_json_piece(&self, rel: &str) -> Result<Value> {
        let path = self.read_path(rel).await?;
        read_json_value(
            self.store.as_ref(),
            &path,
            self.options.max_bytes,
            self.manifest.checksum_for(rel),
        )
        .await
    }

    /// Read a single-object JSON artifact.
    pub async fn load_object<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let sources = self.resolve(name).await?;
        let rel = match (sources.format, sources.paths.as_slice()) {
            (SourceFormat::Piece(PieceFormat::Json), [rel]) => rel,
            (SourceFormat::Piece(PieceFormat::Json), _) => {
                return Err(ArtifactError::ManifestInvalid(format!(
                    "{} resolves to {} objects",
                    name,
                    sources.paths.len()
                )))
            }
            (format, _) => {
                return Err(ArtifactError::Unsupported(format!(
                    "{} is a {} artifact, not a JSON object",
                    name,
                    format.as_str()
                )))
            }
        };
        let value = self.read_json_piece(rel).await?;
        serde_json::from_value(value).map_err(|e| {
            ArtifactError::Corrupt(format!("{} does not match the expected shape: {}", name, e))
        })
    }

    /// Read a `varint` list artifact.
    pub async fn load_varint_list(&self, name: &str) -> Result<Vec<u64>> {
        let sources = self.resolve(name).await?;
        let rel = match (sources.format, sources.paths.as_slice()) {
            (SourceFormat::Piece(PieceFormat::Varint), [rel]) => rel,
            (format, _) => {
                return Err(ArtifactError::Unsupported(format!(
                    "{} is a {} artifact, not a varint list",
                    name,
                    format.as_str()
                )))
            }
        };
        let data = self.read_verified(rel, Some(self.options.max_bytes)).await?;
        decode_varint_list(&data)
    }

    /// Report which files `name` needs and which of them are missing.
    /// Never fails: resolution errors, missing files included, are recorded
    /// in the report.
    pub async fn artifact_presence(&self, name: &str) -> ArtifactPresence {
        let mut presence = ArtifactPresence {
            name: name.to_string(),
            ..Default::default()
        };
        let sources = match self.resolve(name).await {
            Ok(sources) => sources,
            Err(e) => {
                if let ArtifactError::PartsMissing { missing, .. } = &e {
                    presence.missing = missing.clone();
                }
                presence.error = Some(e.code().to_string());
                return presence;
            }
        };
        presence.format = Some(sources.format.as_str().to_string());
        presence.paths = sources.paths;
        if let Some(sidecars) = sources.sidecars {
            for piece in [sidecars.meta, sidecars.offsets, sidecars.lengths] {
                presence.paths.push(piece.path);
            }
        }
        presence
    }
}

/// Whether a shard holds a JSON document instead of JSON lines.
fn is_json_part(rel: &str) -> bool {
    let rel = primary_path(rel);
    let plain = match Compression::from_path(rel) {
        Compression::Gzip => rel.trim_end_matches(".gz"),
        Compression::Zstd => rel.trim_end_matches(".zst"),
        Compression::None => rel,
    };
    plain.ends_with(".json")
}

fn row_from_value<T: DeserializeOwned>(name: &str, row: Value) -> Result<T> {
    serde_json::from_value(row)
        .map_err(|e| ArtifactError::Corrupt(format!("{} row does not match the expected shape: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::memory;
    use serde_json::json;

    async fn put_json(store: &dyn BlobStore, path: &str, value: Value) {
        store
            .put(path, Bytes::from(serde_json::to_vec(&value).unwrap()))
            .await
            .unwrap();
    }

    async fn fixture() -> Arc<dyn BlobStore> {
        let store: Arc<dyn BlobStore> = Arc::new(memory());
        put_json(
            store.as_ref(),
            "idx/pieces/manifest.json",
            json!({
                "compatibilityKey": "abc",
                "pieces": [
                    { "name": "file_meta", "path": "file_meta.json", "format": "json" },
                    { "name": "graph_relations", "path": "graph.jsonl", "format": "jsonl" },
                    { "name": "index_state", "path": "index_state.json", "format": "json" },
                    { "name": "doc_ids", "path": "doc_ids.varint", "format": "varint" },
                    { "name": "symbols", "path": "symbols.columnar.json", "format": "columnar" }
                ]
            }),
        )
        .await;
        put_json(
            store.as_ref(),
            "idx/file_meta.json",
            json!([{ "id": 0, "file": "src/a.rs" }, { "id": 1, "file": "src/b.rs" }]),
        )
        .await;
        store
            .put(
                "idx/graph.jsonl",
                Bytes::from_static(b"{\"from\":0,\"to\":1}\n{\"from\":1,\"to\":0}\n"),
            )
            .await
            .unwrap();
        put_json(store.as_ref(), "idx/index_state.json", json!({ "mode": "code", "chunks": 2 })).await;
        store
            .put(
                "idx/doc_ids.varint",
                Bytes::from(crate::varint::encode_varint_list(&[1, 300, 70000]).unwrap()),
            )
            .await
            .unwrap();
        put_json(
            store.as_ref(),
            "idx/symbols.columnar.json",
            json!({ "columns": ["name"], "arrays": { "name": ["alpha", "beta"] } }),
        )
        .await;
        store
    }

    #[tokio::test]
    async fn test_load_rows_and_objects() {
        let loader = ArtifactLoader::open(fixture().await, "idx", LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(loader.read_compatibility_key().unwrap().as_deref(), Some("abc"));

        let rows: Vec<Value> = loader.load_rows("graph_relations").await.unwrap();
        assert_eq!(rows.len(), 2);

        #[derive(serde::Deserialize)]
        struct State {
            mode: String,
            chunks: u32,
        }
        let state: State = loader.load_object("index_state").await.unwrap();
        assert_eq!((state.mode.as_str(), state.chunks), ("code", 2));

        assert_eq!(loader.load_varint_list("doc_ids").await.unwrap(), vec![1, 300, 70000]);
        let symbols = loader.load_values("symbols").await.unwrap();
        assert_eq!(symbols[1], json!({ "name": "beta" }));
    }

    #[tokio::test]
    async fn test_undeclared_artifact() {
        let loader = ArtifactLoader::open(fixture().await, "idx", LoadOptions::default())
            .await
            .unwrap();
        let err = loader.load_values("chunk_meta").await.unwrap_err();
        assert_eq!(err.code(), "ERR_MANIFEST_INCOMPLETE");
        assert!(err.to_string().contains("Missing manifest entry for chunk_meta"));
        assert!(loader.load_values("doc_ids").await.is_err());
    }

    #[tokio::test]
    async fn test_stream_json_materializes_with_one_warning() {
        let loader = ArtifactLoader::open(fixture().await, "idx", LoadOptions::default())
            .await
            .unwrap();
        for _ in 0..2 {
            let rows = loader
                .stream_values("file_meta")
                .await
                .unwrap()
                .try_collect_rows()
                .await
                .unwrap();
            assert_eq!(rows.len(), 2);
        }
        assert_eq!(loader.session().warning_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_jsonl_rows() {
        let loader = ArtifactLoader::open(fixture().await, "idx", LoadOptions::default())
            .await
            .unwrap();
        let mut stream = loader.stream_values("graph_relations").await.unwrap();
        assert_eq!(stream.next_row().await.unwrap().unwrap()["to"], 1);
        stream.close();
        assert!(stream.next_row().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_required_keys_override() {
        let loader = ArtifactLoader::open(
            fixture().await,
            "idx",
            LoadOptions::default().with_required_keys(["id", "hash"]),
        )
        .await
        .unwrap();
        let err = loader.load_values("file_meta").await.unwrap_err();
        assert_eq!(err.code(), "ERR_ARTIFACT_INVALID");
    }

    #[tokio::test]
    async fn test_missing_compatibility_key() {
        let store: Arc<dyn BlobStore> = Arc::new(memory());
        put_json(store.as_ref(), "pieces/manifest.json", json!({ "pieces": [] })).await;
        let strict = ArtifactLoader::open(Arc::clone(&store), "", LoadOptions::strict())
            .await
            .unwrap();
        assert_eq!(
            strict.read_compatibility_key().unwrap_err().code(),
            "ERR_MANIFEST_INVALID"
        );
        let tolerant = strict.with_options(LoadOptions::non_strict());
        assert_eq!(tolerant.read_compatibility_key().unwrap(), None);
        assert_eq!(tolerant.session().warning_count(), 1);
    }

    #[tokio::test]
    async fn test_artifact_presence() {
        let store = fixture().await;
        store.put("idx/pieces/manifest.json", Bytes::from(json!({
            "compatibilityKey": "abc",
            "pieces": [
                { "name": "file_meta", "path": "file_meta.json", "format": "json" },
                { "name": "gone", "path": "gone.json", "format": "json" }
            ]
        }).to_string())).await.unwrap();
        let loader = ArtifactLoader::open(store, "idx", LoadOptions::default())
            .await
            .unwrap();
        assert!(loader.artifact_presence("file_meta").await.is_complete());
        let gone = loader.artifact_presence("gone").await;
        assert_eq!(gone.missing, vec!["gone.json"]);
        let undeclared = loader.artifact_presence("nope").await;
        assert_eq!(undeclared.error.as_deref(), Some("ERR_MANIFEST_INCOMPLETE"));
    }

    #[tokio::test]
    async fn test_open_local_missing_manifest() {
        let tmp = tempfile::TempDir::new().unwrap();
        for options in [LoadOptions::strict(), LoadOptions::non_strict()] {
            let err = ArtifactLoader::open_local(tmp.path(), options)
                .await
                .err()
                .unwrap();
            assert_eq!(err.code(), "ERR_MANIFEST_MISSING");
        }
    }
}
