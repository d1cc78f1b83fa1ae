//! Pieces manifest: maps logical artifact names to physical sources.
//!
//! Every artifact directory carries `pieces/manifest.json`. Resolution is
//! manifest-first; an artifact that is not declared there does not exist.

use crate::error::{ArtifactError, Result};
use crate::json::read_budgeted;
use crate::session::LoaderSession;
use crate::storage::{join_path, BlobStore, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Location of the manifest inside an artifact directory.
pub const MANIFEST_PATH: &str = "pieces/manifest.json";

/// Suffix of the copy an interrupted directory swap leaves behind.
pub const BAK_SUFFIX: &str = ".bak";

const BINARY_COLUMNAR_META_FORMAT_SUFFIXES: [&str; 2] = ["_binary_columnar_", "_"];

/// Physical format of one manifest piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PieceFormat {
    Json,
    Jsonl,
    Columnar,
    BinaryColumnar,
    Binary,
    Varint,
    Packed,
    Dir,
}

impl PieceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PieceFormat::Json => "json",
            PieceFormat::Jsonl => "jsonl",
            PieceFormat::Columnar => "columnar",
            PieceFormat::BinaryColumnar => "binary-columnar",
            PieceFormat::Binary => "binary",
            PieceFormat::Varint => "varint",
            PieceFormat::Packed => "packed",
            PieceFormat::Dir => "dir",
        }
    }
}

/// Format of a resolved source set. Adds `Sharded` for meta-declared parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Piece(PieceFormat),
    /// JSON parts listed by a `<name>_meta` sidecar.
    Sharded,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Piece(format) => format.as_str(),
            SourceFormat::Sharded => "sharded",
        }
    }
}

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub name: String,
    /// Relative POSIX path under the artifact directory.
    pub path: String,
    pub format: PieceFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Kept as raw numbers so loaders can reject non-integers explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dims: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

impl Piece {
    pub fn new(name: impl Into<String>, path: impl Into<String>, format: PieceFormat) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            format,
            checksum: None,
            count: None,
            dims: None,
            bytes: None,
        }
    }
}

/// Reader policy hints stored alongside the pieces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_binary_columnar: Option<bool>,
}

/// Parsed `pieces/manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility_key: Option<String>,
    pub pieces: Vec<Piece>,
    #[serde(default, skip_serializing_if = "is_default_hints")]
    pub reader: ReaderHints,
}

fn is_default_hints(hints: &ReaderHints) -> bool {
    hints == &ReaderHints::default()
}

/// Unwrap the `fields` envelope some writers put around objects.
pub fn unwrap_fields(value: &Value) -> &Value {
    match value.get("fields") {
        Some(fields) if fields.is_object() => fields,
        _ => value,
    }
}

impl Manifest {
    /// Parse manifest bytes.
    ///
    /// Strict mode rejects malformed pieces and unsafe paths. Otherwise those
    /// pieces are dropped and reported through `on_skip(name, path, reason)`.
    pub fn parse(
        raw: &[u8],
        strict: bool,
        mut on_skip: impl FnMut(&str, &str, &str),
    ) -> Result<Manifest> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| ArtifactError::ManifestInvalid(format!("unparseable manifest: {}", e)))?;
        let source = unwrap_fields(&value);
        let Some(raw_pieces) = source.get("pieces").and_then(Value::as_array) else {
            return Err(ArtifactError::ManifestInvalid(
                "manifest has no pieces array".to_string(),
            ));
        };

        let mut pieces = Vec::with_capacity(raw_pieces.len());
        for raw_piece in raw_pieces {
            let mut piece: Piece = match serde_json::from_value(raw_piece.clone()) {
                Ok(piece) => piece,
                Err(e) if strict => {
                    return Err(ArtifactError::ManifestInvalid(format!(
                        "malformed piece {}: {}",
                        raw_piece, e
                    )))
                }
                Err(e) => {
                    let name = raw_piece.get("name").and_then(Value::as_str).unwrap_or("?");
                    let path = raw_piece.get("path").and_then(Value::as_str).unwrap_or("?");
                    on_skip(name, path, &e.to_string());
                    continue;
                }
            };
            match validate_relative_path(&piece.path) {
                Ok(normalized) => piece.path = normalized,
                Err(e) if strict => {
                    return Err(ArtifactError::ManifestInvalid(format!(
                        "piece {}: {}",
                        piece.name, e
                    )))
                }
                Err(_) => {
                    on_skip(&piece.name, &piece.path, "unsafe path");
                    continue;
                }
            }
            pieces.push(piece);
        }

        let compatibility_key = source
            .get("compatibilityKey")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);
        let reader = source
            .get("reader")
            .and_then(|r| serde_json::from_value(r.clone()).ok())
            .unwrap_or_default();

        Ok(Manifest {
            compatibility_key,
            pieces,
            reader,
        })
    }

    /// All entries declared under `name`, in manifest order.
    pub fn entries(&self, name: &str) -> Vec<&Piece> {
        self.pieces.iter().filter(|p| p.name == name).collect()
    }

    /// The single entry for `name`. Strict mode rejects duplicates.
    pub fn single_entry(&self, name: &str, strict: bool) -> Result<Option<&Piece>> {
        let entries = self.entries(name);
        if entries.len() > 1 && strict {
            return Err(ArtifactError::ManifestInvalid(format!(
                "multiple manifest entries for {}",
                name
            )));
        }
        Ok(entries.into_iter().next())
    }

    /// The entry for a physical file path. A `.bak` copy maps to the piece
    /// it backs up.
    pub fn piece_by_path(&self, rel: &str) -> Option<&Piece> {
        let rel = validate_relative_path(primary_path(rel)).ok()?;
        self.pieces.iter().find(|p| p.path == rel)
    }

    /// Declared checksum for a physical file path.
    pub fn checksum_for(&self, rel: &str) -> Option<&str> {
        self.piece_by_path(rel)?.checksum.as_deref()
    }

    /// Whether the writer asked readers to prefer binary-columnar companions.
    pub fn prefers_binary_columnar(&self) -> bool {
        self.reader.prefer_binary_columnar.unwrap_or(false)
    }

    /// Distinct artifact names in manifest order, without sidecar entries.
    pub fn artifact_names(&self) -> Vec<String> {
        const SIDECAR_SUFFIXES: [&str; 8] = [
            "_binary_columnar_meta",
            "_binary_columnar_offsets",
            "_binary_columnar_lengths",
            "_binary_columnar",
            "_packed_meta",
            "_meta",
            "_offsets",
            "_lengths",
        ];
        let declared = |name: &str| self.pieces.iter().any(|p| p.name == name);
        let mut names: Vec<String> = Vec::new();
        for piece in &self.pieces {
            if names.contains(&piece.name) {
                continue;
            }
            let is_sidecar = SIDECAR_SUFFIXES.iter().any(|suffix| {
                piece
                    .name
                    .strip_suffix(suffix)
                    .is_some_and(|base| !base.is_empty() && declared(base))
            });
            if !is_sidecar {
                names.push(piece.name.clone());
            }
        }
        names
    }
}

/// Read `pieces/manifest.json` under `dir`.
///
/// A missing manifest is [`ArtifactError::ManifestMissing`] in both modes.
pub async fn load_pieces_manifest(
    store: &dyn BlobStore,
    dir: &str,
    max_bytes: u64,
    strict: bool,
    session: &LoaderSession,
) -> Result<Manifest> {
    let path = join_path(dir, MANIFEST_PATH);
    let raw = match read_budgeted(store, &path, max_bytes).await {
        Err(ArtifactError::Storage(StorageError::NotFound(_))) => {
            return Err(ArtifactError::ManifestMissing(path))
        }
        other => other?,
    };
    let manifest = Manifest::parse(&raw, strict, |name, piece_path, reason| {
        session.warn_once(
            dir,
            name,
            "manifest-piece-skipped",
            &format!("skipping manifest piece {}: {}", piece_path, reason),
        );
    })?;
    tracing::debug!(dir = %dir, pieces = manifest.pieces.len(), "loaded pieces manifest");
    Ok(manifest)
}

/// The path a `.bak` copy stands in for; other paths are returned as is.
pub fn primary_path(path: &str) -> &str {
    path.strip_suffix(BAK_SUFFIX).unwrap_or(path)
}

/// Normalize a relative POSIX path, rejecting anything that could escape the
/// artifact directory.

pub fn validate_relative_path(path: &str) -> Result<String> {
    let invalid = |reason: &str| ArtifactError::Invalid(format!("{}: {}", reason, path));
    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.contains('\\') {
        return Err(invalid("path must use forward slashes"));
    }
    if path.starts_with('/') || path.as_bytes().get(1) == Some(&b':') {
        return Err(invalid("absolute path"));
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(invalid("path escapes artifact directory")),
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(invalid("empty path"));
    }
    Ok(segments.join("/"))
}

/// Sidecar pieces for a binary-columnar artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryColumnarSidecars {
    pub meta: Piece,
    pub offsets: Piece,
    pub lengths: Piece,
}

/// Concrete sources for one logical artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSources {
    pub name: String,
    pub format: SourceFormat,
    /// Relative paths, in read order.
    pub paths: Vec<String>,
    /// Meta fields when the sources came from a sharded meta.
    pub meta: Option<Value>,
    pub sidecars: Option<BinaryColumnarSidecars>,
    /// Several json sources were merged (non-strict only).
    pub merged: bool,
}

/// Meta `parts` entries, validated as relative paths.
pub fn meta_parts(fields: &Value) -> Result<Vec<String>> {
    let Some(parts) = fields.get("parts").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    parts
        .iter()
        .filter_map(|part| match part {
            Value::String(path) => Some(path.as_str()),
            Value::Object(obj) => obj.get("path").and_then(Value::as_str),
            _ => None,
        })
        .map(validate_relative_path)
        .collect()
}

fn meta_source_format(fields: &Value) -> SourceFormat {
    match fields.get("format").and_then(Value::as_str) {
        Some("jsonl-sharded") | Some("sharded") => SourceFormat::Sharded,
        Some("json") => SourceFormat::Piece(PieceFormat::Json),
        _ => SourceFormat::Piece(PieceFormat::Jsonl),
    }
}

/// Resolve `name` against the manifest.
///
/// `meta` is the parsed `<name>_meta` sidecar when the manifest declares one.
/// Returns `Ok(None)` when the manifest has no entry for `name`.
pub fn resolve_artifact_sources(
    manifest: &Manifest,
    name: &str,
    meta: Option<&Value>,
    strict: bool,
) -> Result<Option<ArtifactSources>> {
    let entries = manifest.entries(name);

    if let Some(meta) = meta {
        let fields = unwrap_fields(meta);
        let parts = meta_parts(fields)?;
        if !parts.is_empty() {
            if strict {
                if let Some(part) = parts.iter().find(|part| !entries.iter().any(|e| &e.path == *part)) {
                    return Err(ArtifactError::ManifestIncomplete(format!(
                        "manifest missing shard path for {}: {}",
                        name, part
                    )));
                }
                let offsets = fields.get("offsets").and_then(Value::as_array);
                if let Some(offsets) = offsets.filter(|o| !o.is_empty()) {
                    if offsets.len() != parts.len() {
                        return Err(ArtifactError::ManifestInvalid(format!(
                            "manifest offsets length mismatch for {}",
                            name
                        )));
                    }
                }
            }
            check_shard_sequence(name, &parts)?;
            return Ok(Some(ArtifactSources {
                name: name.to_string(),
                format: meta_source_format(fields),
                paths: parts,
                meta: Some(fields.clone()),
                sidecars: None,
                merged: false,
            }));
        }
        let raw_format = fields.get("format").and_then(Value::as_str);
        if strict && matches!(raw_format, Some("jsonl-sharded") | Some("sharded")) {
            return Err(ArtifactError::ManifestInvalid(format!(
                "manifest meta missing parts for {}",
                name
            )));
        }
    }

    let Some(first) = entries.first() else {
        return Ok(None);
    };
    let format = first.format;
    if entries.iter().any(|e| e.format != format) {
        return Err(ArtifactError::ManifestInvalid(format!(
            "mixed formats declared for {}",
            name
        )));
    }

    let mut merged = false;
    let paths: Vec<String> = if entries.len() == 1 {
        vec![first.path.clone()]
    } else if let Some(canonical) = canonical_variant(&entries) {
        vec![canonical.path.clone()]
    } else {
        match format {
            PieceFormat::Jsonl => order_shards(name, &entries)?,
            PieceFormat::Json if !strict => {
                merged = true;
                entries.iter().map(|e| e.path.clone()).collect()
            }
            _ => {
                return Err(ArtifactError::ManifestInvalid(format!(
                    "ambiguous manifest entries for {}",
                    name
                )))
            }
        }
    };
    if format == PieceFormat::Jsonl {
        check_shard_sequence(name, &paths)?;
    }

    let sidecars = if format == PieceFormat::BinaryColumnar {
        Some(resolve_binary_columnar_sidecars(manifest, name, strict)?)
    } else {
        None
    };

    Ok(Some(ArtifactSources {
        name: name.to_string(),
        format: SourceFormat::Piece(format),
        paths,
        meta: None,
        sidecars,
        merged,
    }))
}

/// Find the meta/offsets/lengths sidecars of a binary-columnar artifact.
pub fn resolve_binary_columnar_sidecars(
    manifest: &Manifest,
    name: &str,
    strict: bool,
) -> Result<BinaryColumnarSidecars> {
    let find = |kind: &str| -> Result<Piece> {
        for infix in BINARY_COLUMNAR_META_FORMAT_SUFFIXES {
            let candidate = format!("{}{}{}", name, infix, kind);
            if let Some(piece) = manifest.single_entry(&candidate, strict)? {
                return Ok(piece.clone());
            }
        }
        Err(ArtifactError::ManifestIncomplete(format!(
            "binary-columnar {} sidecar for {} is not declared",
            kind, name
        )))
    };
    Ok(BinaryColumnarSidecars {
        meta: find("meta")?,
        offsets: find("offsets")?,
        lengths: find("lengths")?,
    })
}

fn strip_compression(path: &str) -> (&str, u8) {
    if let Some(base) = path.strip_suffix(".zst") {
        (base, 0)
    } else if let Some(base) = path.strip_suffix(".gz") {
        (base, 1)
    } else {
        (path, 2)
    }
}

/// When every entry is a compression variant of one base path, pick
/// `.zst`, then `.gz`, then the plain file.
fn canonical_variant<'a>(entries: &[&'a Piece]) -> Option<&'a Piece> {
    let (base, _) = strip_compression(&entries.first()?.path);
    if !entries.iter().all(|e| strip_compression(&e.path).0 == base) {
        return None;
    }
    entries
        .iter()
        .copied()
        .min_by(|a, b| {
            strip_compression(&a.path)
                .1
                .cmp(&strip_compression(&b.path).1)
                .then_with(|| a.path.cmp(&b.path))
        })
}

/// Shard file name parsed as `<prefix>.part-<index><suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ShardName {
    prefix: String,
    index: u64,
    width: usize,
    suffix: String,
}

impl ShardName {
    fn parse(path: &str) -> Option<ShardName> {
        let file = path.rsplit('/').next()?;
        let at = file.rfind(".part-")?;
        let rest = &file[at + ".part-".len()..];
        let width = rest.bytes().take_while(u8::is_ascii_digit).count();
        if width == 0 {
            return None;
        }
        let suffix = &rest[width..];
        let (plain, _) = strip_compression(suffix);
        if plain != ".json" && plain != ".jsonl" {
            return None;
        }
        Some(ShardName {
            prefix: file[..at].to_string(),
            index: rest[..width].parse().ok()?,
            width,
            suffix: suffix.to_string(),
        })
    }

    fn file_name_for(&self, index: u64) -> String {
        format!(
            "{}.part-{:0width$}{}",
            self.prefix,
            index,
            self.suffix,
            width = self.width
        )
    }
}

/// Order jsonl entries by shard index, collapsing compression variants of the
/// same shard. Entries without a shard suffix sort by path after the shards.
fn order_shards(name: &str, entries: &[&Piece]) -> Result<Vec<String>> {
    let mut by_index: BTreeMap<u64, Vec<&Piece>> = BTreeMap::new();
    let mut plain: Vec<&str> = Vec::new();
    for entry in entries {
        match ShardName::parse(&entry.path) {
            Some(shard) => by_index.entry(shard.index).or_default().push(entry),
            None => plain.push(&entry.path),
        }
    }
    let mut paths = Vec::with_capacity(entries.len());
    for (index, variants) in by_index {
        let chosen = canonical_variant(&variants).ok_or_else(|| {
            ArtifactError::ManifestInvalid(format!(
                "conflicting manifest entries for {} shard {}",
                name, index
            ))
        })?;
        paths.push(chosen.path.clone());
    }
    plain.sort_unstable();
    paths.extend(plain.into_iter().map(str::to_string));
    Ok(paths)
}

/// Fail with [`ArtifactError::PartsMissing`] when shard indexes have gaps.
pub fn check_shard_sequence(name: &str, paths: &[String]) -> Result<()> {
    let shards: Vec<ShardName> = paths.iter().filter_map(|p| ShardName::parse(p)).collect();
    let Some(template) = shards.first() else {
        return Ok(());
    };
    let mut indexes: Vec<u64> = shards.iter().map(|s| s.index).collect();
    indexes.sort_unstable();
    indexes.dedup();
    let max = indexes.last().copied().unwrap_or(0);

    let mut missing = Vec::new();
    let mut present = indexes.iter().peekable();
    for index in 0..=max {
        if present.peek() == Some(&&index) {
            present.next();
        } else {
            missing.push(template.file_name_for(index));
            if missing.len() >= crate::error::MAX_MISSING_PARTS_LISTED {
                break;
            }
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ArtifactError::parts_missing(name, missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(pieces: Value) -> Manifest {
        let raw = serde_json::to_vec(&json!({ "compatibilityKey": "k1", "pieces": pieces })).unwrap();
        Manifest::parse(&raw, true, |_, _, _| {}).unwrap()
    }

    #[test]
    fn test_parse_wrapped_fields() {
        let raw = serde_json::to_vec(&json!({
            "fields": {
                "compatibilityKey": "  abc ",
                "reader": { "preferBinaryColumnar": true },
                "pieces": [{ "name": "chunk_meta", "path": "./chunk_meta.json", "format": "json" }]
            }
        }))
        .unwrap();
        let m = Manifest::parse(&raw, true, |_, _, _| {}).unwrap();
        assert_eq!(m.compatibility_key.as_deref(), Some("abc"));
        assert!(m.prefers_binary_columnar());
        assert_eq!(m.pieces[0].path, "chunk_meta.json");
    }

    #[test]
    fn test_parse_rejects_missing_pieces() {
        let err = Manifest::parse(b"{}", false, |_, _, _| {}).unwrap_err();
        assert_eq!(err.code(), "ERR_MANIFEST_INVALID");
        let err = Manifest::parse(b"not json", false, |_, _, _| {}).unwrap_err();
        assert_eq!(err.code(), "ERR_MANIFEST_INVALID");
    }

    #[test]
    fn test_unsafe_path_strict_vs_tolerant() {
        let raw = serde_json::to_vec(&json!({ "pieces": [
            { "name": "a", "path": "../a.json", "format": "json" },
            { "name": "b", "path": "b.json", "format": "json" }
        ]}))
        .unwrap();
        let err = Manifest::parse(&raw, true, |_, _, _| {}).unwrap_err();
        assert_eq!(err.code(), "ERR_MANIFEST_INVALID");

        let mut skipped = Vec::new();
        let m = Manifest::parse(&raw, false, |_, path, _| skipped.push(path.to_string())).unwrap();
        assert_eq!(m.pieces.len(), 1);
        assert_eq!(skipped, vec!["../a.json"]);
    }

    #[test]
    fn test_validate_relative_path() {
        assert_eq!(validate_relative_path("a/./b.bin").unwrap(), "a/b.bin");
        for bad in ["", "/etc/passwd", "../outside.bin", "a/../../b", "C:/x", "a\\b", "."] {
            let err = validate_relative_path(bad).unwrap_err();
            assert_eq!(err.code(), "ERR_ARTIFACT_INVALID", "{bad}");
        }
    }

    #[test]
    fn test_single_source() {
        let m = manifest(json!([{ "name": "file_meta", "path": "file_meta.json", "format": "json" }]));
        let sources = resolve_artifact_sources(&m, "file_meta", None, true).unwrap().unwrap();
        assert_eq!(sources.paths, vec!["file_meta.json"]);
        assert_eq!(sources.format, SourceFormat::Piece(PieceFormat::Json));
        assert!(resolve_artifact_sources(&m, "missing", None, true).unwrap().is_none());
    }

    #[test]
    fn test_ambiguous_single_valued() {
        let m = manifest(json!([
            { "name": "token_postings", "path": "a.packed.bin", "format": "packed" },
            { "name": "token_postings", "path": "b.packed.bin", "format": "packed" }
        ]));
        for strict in [true, false] {
            let err = resolve_artifact_sources(&m, "token_postings", None, strict).unwrap_err();
            assert_eq!(err.code(), "ERR_MANIFEST_INVALID");
        }
    }

    #[test]
    fn test_json_merge_only_non_strict() {
        let m = manifest(json!([
            { "name": "graph_relations", "path": "b.json", "format": "json" },
            { "name": "graph_relations", "path": "a.json", "format": "json" }
        ]));
        assert!(resolve_artifact_sources(&m, "graph_relations", None, true).is_err());
        let sources = resolve_artifact_sources(&m, "graph_relations", None, false)
            .unwrap()
            .unwrap();
        assert!(sources.merged);
        assert_eq!(sources.paths, vec!["b.json", "a.json"]);
    }

    #[test]
    fn test_compression_variant_selection() {
        let m = manifest(json!([
            { "name": "chunk_meta", "path": "chunk_meta.jsonl", "format": "jsonl" },
            { "name": "chunk_meta", "path": "chunk_meta.jsonl.gz", "format": "jsonl" },
            { "name": "chunk_meta", "path": "chunk_meta.jsonl.zst", "format": "jsonl" }
        ]));
        let sources = resolve_artifact_sources(&m, "chunk_meta", None, true).unwrap().unwrap();
        assert_eq!(sources.paths, vec!["chunk_meta.jsonl.zst"]);
    }

    #[test]
    fn test_shards_ordered_and_gap_detected() {
        let m = manifest(json!([
            { "name": "chunk_meta", "path": "chunk_meta.parts/chunk_meta.part-000001.jsonl", "format": "jsonl" },
            { "name": "chunk_meta", "path": "chunk_meta.parts/chunk_meta.part-000000.jsonl", "format": "jsonl" }
        ]));
        let sources = resolve_artifact_sources(&m, "chunk_meta", None, true).unwrap().unwrap();
        assert_eq!(
            sources.paths,
            vec![
                "chunk_meta.parts/chunk_meta.part-000000.jsonl",
                "chunk_meta.parts/chunk_meta.part-000001.jsonl"
            ]
        );

        let m = manifest(json!([
            { "name": "chunk_meta", "path": "chunk_meta.parts/chunk_meta.part-000000.jsonl", "format": "jsonl" },
            { "name": "chunk_meta", "path": "chunk_meta.parts/chunk_meta.part-000002.jsonl", "format": "jsonl" }
        ]));
        for strict in [true, false] {
            let err = resolve_artifact_sources(&m, "chunk_meta", None, strict).unwrap_err();
            assert_eq!(err.code(), "ERR_ARTIFACT_PARTS_MISSING");
            assert!(err.to_string().contains("chunk_meta.part-000001.jsonl"));
        }
    }

    #[test]
    fn test_meta_parts_must_be_declared_in_strict() {
        let m = manifest(json!([
            { "name": "chunk_meta_meta", "path": "chunk_meta.meta.json", "format": "json" },
            { "name": "chunk_meta", "path": "chunk_meta.parts/chunk_meta.part-000000.jsonl", "format": "jsonl" }
        ]));
        let meta = json!({ "fields": { "format": "jsonl-sharded", "parts": [
            "chunk_meta.parts/chunk_meta.part-000000.jsonl",
            "chunk_meta.parts/chunk_meta.part-000001.jsonl"
        ]}});
        let err = resolve_artifact_sources(&m, "chunk_meta", Some(&meta), true).unwrap_err();
        assert_eq!(err.code(), "ERR_MANIFEST_INCOMPLETE");

        let sources = resolve_artifact_sources(&m, "chunk_meta", Some(&meta), false)
            .unwrap()
            .unwrap();
        assert_eq!(sources.format, SourceFormat::Sharded);
        assert_eq!(sources.paths.len(), 2);
    }

    #[test]
    fn test_sharded_meta_without_parts() {
        let m = manifest(json!([
            { "name": "chunk_meta", "path": "chunk_meta.jsonl", "format": "jsonl" }
        ]));
        let meta = json!({ "fields": { "format": "sharded" } });
        let err = resolve_artifact_sources(&m, "chunk_meta", Some(&meta), true).unwrap_err();
        assert_eq!(err.code(), "ERR_MANIFEST_INVALID");
        let sources = resolve_artifact_sources(&m, "chunk_meta", Some(&meta), false)
            .unwrap()
            .unwrap();
        assert_eq!(sources.paths, vec!["chunk_meta.jsonl"]);
    }

    #[test]
    fn test_meta_offsets_length_mismatch() {
        let m = manifest(json!([
            { "name": "chunk_meta", "path": "p/chunk_meta.part-000000.jsonl", "format": "jsonl" }
        ]));
        let meta = json!({ "format": "jsonl", "parts": ["p/chunk_meta.part-000000.jsonl"], "offsets": ["a", "b"] });
        let err = resolve_artifact_sources(&m, "chunk_meta", Some(&meta), true).unwrap_err();
        assert_eq!(err.code(), "ERR_MANIFEST_INVALID");
    }

    #[test]
    fn test_meta_part_traversal() {
        let m = manifest(json!([]));
        let meta = json!({ "parts": ["../escape.jsonl"] });
        let err = resolve_artifact_sources(&m, "chunk_meta", Some(&meta), false).unwrap_err();
        assert_eq!(err.code(), "ERR_ARTIFACT_INVALID");
    }

    #[test]
    fn test_binary_columnar_sidecars() {
        let complete = manifest(json!([
            { "name": "chunk_meta", "path": "chunk_meta.binary-columnar.bin", "format": "binary-columnar" },
            { "name": "chunk_meta_binary_columnar_offsets", "path": "chunk_meta.binary-columnar.offsets.bin", "format": "binary" },
            { "name": "chunk_meta_binary_columnar_lengths", "path": "chunk_meta.binary-columnar.lengths.varint", "format": "varint" },
            { "name": "chunk_meta_meta", "path": "chunk_meta.binary-columnar.meta.json", "format": "json" }
        ]));
        let sources = resolve_artifact_sources(&complete, "chunk_meta", None, true)
            .unwrap()
            .unwrap();
        let sidecars = sources.sidecars.unwrap();
        assert_eq!(sidecars.meta.path, "chunk_meta.binary-columnar.meta.json");
        assert_eq!(sidecars.lengths.format, PieceFormat::Varint);

        let incomplete = manifest(json!([
            { "name": "chunk_meta", "path": "chunk_meta.binary-columnar.bin", "format": "binary-columnar" },
            { "name": "chunk_meta_meta", "path": "chunk_meta.binary-columnar.meta.json", "format": "json" }
        ]));
        for strict in [true, false] {
            let err = resolve_artifact_sources(&incomplete, "chunk_meta", None, strict).unwrap_err();
            assert_eq!(err.code(), "ERR_MANIFEST_INCOMPLETE");
        }
    }

    #[test]
    fn test_artifact_names_skip_sidecars() {
        let m = manifest(json!([
            { "name": "chunk_meta", "path": "chunk_meta.binary-columnar.bin", "format": "binary-columnar" },
            { "name": "chunk_meta_binary_columnar_offsets", "path": "o.bin", "format": "binary" },
            { "name": "chunk_meta_meta", "path": "m.json", "format": "json" },
            { "name": "minhash_signatures", "path": "minhash.bin", "format": "binary" }
        ]));
        assert_eq!(m.artifact_names(), vec!["chunk_meta", "minhash_signatures"]);
    }

    #[test]
    fn test_piece_by_path() {
        let m = manifest(json!([
            { "name": "a", "path": "dir/a.bin", "format": "binary", "checksum": "sha1:00" }
        ]));
        assert_eq!(m.checksum_for("./dir/a.bin"), Some("sha1:00"));
        assert!(m.piece_by_path("dir/b.bin").is_none());
        assert_eq!(m.checksum_for("dir/a.bin.bak"), Some("sha1:00"));
        assert_eq!(primary_path("x.jsonl.gz.bak"), "x.jsonl.gz");
    }

    #[tokio::test]
    async fn test_load_missing_manifest_both_modes() {
        let store = crate::object_store::memory();
        let session = LoaderSession::new();
        for strict in [true, false] {
            let err = load_pieces_manifest(&store, "idx", 1 << 20, strict, &session)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "ERR_MANIFEST_MISSING");
        }
    }

    #[tokio::test]
    async fn test_load_skips_unknown_format_non_strict() {
        let store = crate::object_store::memory();
        let body = json!({ "pieces": [
            { "name": "a", "path": "a.json", "format": "json" },
            { "name": "b", "path": "b.parquet", "format": "parquet" },
            { "name": "b", "path": "b2.parquet", "format": "parquet" },
            { "name": "c", "path": "../c.json", "format": "json" }
        ]});
        store
            .put("idx/pieces/manifest.json", bytes::Bytes::from(body.to_string()))
            .await
            .unwrap();
        let session = LoaderSession::new();
        let m = load_pieces_manifest(&store, "idx", 1 << 20, false, &session)
            .await
            .unwrap();
        assert_eq!(m.pieces.len(), 1);
        // one warning per skipped artifact, not per piece
        assert_eq!(session.warning_count(), 2);

        let err = load_pieces_manifest(&store, "idx", 1 << 20, true, &session)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERR_MANIFEST_INVALID");
    }
}
