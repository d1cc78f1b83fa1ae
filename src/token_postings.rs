//! token_postings loader.
//!
//! Accepts JSON, sharded JSON, packed and binary-columnar sources and always
//! checks that vocabulary and posting lists line up.

use crate::binary::{string_array, u64_array, BinaryColumnarSource};
use crate::checksum::PackedChecksumValidator;
use crate::error::{ArtifactError, Result};
use crate::frames::decode_u64_offsets;
use crate::loader::ArtifactLoader;
use crate::manifest::{
    primary_path, unwrap_fields, validate_relative_path, PieceFormat, SourceFormat,
};
use crate::packed::{packed_windows, unpack_tf_postings_window, DEFAULT_BLOCK_SIZE};
use crate::types::{DocId, PostingList, TokenPostings};
use crate::varint::decode_varint_list;
use serde_json::Value;

pub const TOKEN_POSTINGS: &str = "token_postings";

/// Check vocabulary, ids, posting lists and sidecar count against each other.
pub fn check_cardinality(postings: &TokenPostings, sidecar_count: Option<usize>) -> Result<()> {
    let vocab = postings.vocab.len();
    let mut violations = Vec::new();
    if postings.postings.len() != vocab {
        violations.push(format!(
            "postings.len() {} != vocab.len() {}",
            postings.postings.len(),
            vocab
        ));
    }
    if !postings.vocab_ids.is_empty() && postings.vocab_ids.len() != vocab {
        violations.push(format!(
            "vocab_ids.len() {} != vocab.len() {}",
            postings.vocab_ids.len(),
            vocab
        ));
    }
    if let Some(count) = sidecar_count.filter(|count| *count != vocab) {
        violations.push(format!("sidecar count {} != vocab.len() {}", count, vocab));
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ArtifactError::Invalid(format!(
            "token_postings cardinality invariant failed: {}",
            violations.join("; ")
        )))
    }
}

fn doc_id(value: u64) -> Result<DocId> {
    DocId::try_from(value)
        .map_err(|_| ArtifactError::Corrupt(format!("doc id {} exceeds u32 range", value)))
}

/// Parse `[[[doc, tf], ...], ...]`.
fn parse_json_postings(value: &Value) -> Result<Vec<PostingList>> {
    let Some(lists) = value.as_array() else {
        return Err(ArtifactError::Corrupt("postings is not an array".to_string()));
    };
    lists
        .iter()
        .enumerate()
        .map(|(token, list)| {
            let Some(list) = list.as_array() else {
                return Err(ArtifactError::Corrupt(format!(
                    "postings[{}] is not an array",
                    token
                )));
            };
            let mut out = PostingList::new();
            for pair in list {
                let (doc, tf) = match pair.as_array().map(Vec::as_slice) {
                    Some([doc, tf]) => (doc.as_u64(), tf.as_u64()),
                    _ => (None, None),
                };
                let (Some(doc), Some(tf)) = (doc, tf) else {
                    return Err(ArtifactError::Corrupt(format!(
                        "postings[{}] holds a malformed pair {}",
                        token, pair
                    )));
                };
                let tf = u32::try_from(tf).map_err(|_| {
                    ArtifactError::Corrupt(format!("term frequency {} exceeds u32 range", tf))
                })?;
                out.push(doc_id(doc)?, tf);
            }
            Ok(out)
        })
        .collect()
}

/// The object holding `vocab`/`postings`: top level, `arrays` or `fields`.
fn json_payload(value: &Value) -> &Value {
    if value.get("vocab").is_some() {
        value
    } else if let Some(arrays) = value.get("arrays").filter(|a| a.get("vocab").is_some()) {
        arrays
    } else {
        unwrap_fields(value)
    }
}

fn string_list(value: Option<&Value>, what: &str) -> Result<Vec<String>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let Some(items) = value.as_array() else {
        return Err(ArtifactError::Corrupt(format!("{} is not an array", what)));
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| ArtifactError::Corrupt(format!("{} holds a non-string", what)))
        })
        .collect()
}

fn u64_list(value: Option<&Value>, what: &str) -> Result<Vec<u64>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let Some(items) = value.as_array() else {
        return Err(ArtifactError::Corrupt(format!("{} is not an array", what)));
    };
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .ok_or_else(|| ArtifactError::Invalid(format!("{} holds a non-integer", what)))
        })
        .collect()
}

fn from_json(value: &Value) -> Result<TokenPostings> {
    let payload = json_payload(value);
    Ok(TokenPostings {
        vocab: string_list(payload.get("vocab"), "vocab")?,
        vocab_ids: string_list(payload.get("vocabIds"), "vocabIds")?,
        postings: match payload.get("postings") {
            Some(postings) => parse_json_postings(postings)?,
            None => Vec::new(),
        },
        doc_lengths: u64_list(payload.get("docLengths"), "docLengths")?,
        ..Default::default()
    })
}

/// Fill `avg_doc_len`/`total_docs` from sidecar fields or from `doc_lengths`.
fn fill_stats(postings: &mut TokenPostings, fields: Option<&Value>) -> Result<()> {
    let total = postings.doc_lengths.len() as u64;
    postings.total_docs = fields
        .and_then(|f| f.get("totalDocs"))
        .and_then(Value::as_u64)
        .unwrap_or(total);
    postings.avg_doc_len = match fields.and_then(|f| f.get("avgDocLen")).and_then(Value::as_f64) {
        Some(avg) => avg,
        None if total == 0 => 0.0,
        None => {
            let sum = postings
                .doc_lengths
                .iter()
                .try_fold(0u64, |sum, len| sum.checked_add(*len))
                .ok_or_else(|| {
                    ArtifactError::Invalid("token_postings docLengths sum overflows".to_string())
                })?;
            sum as f64 / total as f64
        }
    };
    Ok(())
}

/// Replace the `.bin` suffix of the packed file with `suffix`.
fn sibling(packed_rel: &str, suffix: &str) -> String {
    let packed_rel = primary_path(packed_rel);
    format!("{}{}", packed_rel.strip_suffix(".bin").unwrap_or(packed_rel), suffix)
}

async fn load_packed(loader: &ArtifactLoader, name: &str, packed_rel: &str) -> Result<TokenPostings> {
    let options = loader.options();
    let strict = options.strict;

    let mut meta_rel = None;
    for candidate in [format!("{}_packed_meta", name), format!("{}_meta", name)] {
        if let Some(piece) = loader.manifest().single_entry(&candidate, strict)? {
            meta_rel = Some(piece.path.clone());
            break;
        }
    }
    let meta_rel = meta_rel.unwrap_or_else(|| sibling(packed_rel, ".meta.json"));
    let meta = loader.read_meta(&meta_rel).await?;
    let fields = unwrap_fields(&meta);

    let block_size = match fields.get("blockSize") {
        None => DEFAULT_BLOCK_SIZE,
        Some(value) => value
            .as_u64()
            .filter(|size| *size > 0)
            .and_then(|size| usize::try_from(size).ok())
            .ok_or_else(|| {
                ArtifactError::Invalid(format!("{} blockSize {} is not a positive integer", name, value))
            })?,
    };
    let declared_offsets = loader
        .manifest()
        .single_entry(&format!("{}_offsets", name), strict)?
        .map(|piece| piece.path.clone());
    let offsets_rel = match (fields.get("offsets").and_then(Value::as_str), declared_offsets) {
        (Some(path), Some(declared)) => {
            let path = validate_relative_path(path)?;
            if path != declared {
                return Err(ArtifactError::ManifestIncomplete(format!(
                    "{} meta offsets {} is not the declared piece {}",
                    name, path, declared
                )));
            }
            declared
        }
        (Some(path), None) => validate_relative_path(path)?,
        (None, Some(declared)) => declared,
        (None, None) => sibling(packed_rel, ".offsets.bin"),
    };

    let offsets = decode_u64_offsets(
        &loader
            .read_verified(&offsets_rel, Some(options.max_bytes))
            .await?,
    )?;
    let packed_path = loader.path(packed_rel);
    let packed_len = loader.store().head(&packed_path).await?;
    if options.enforce_binary_data_budget && packed_len > options.max_bytes {
        return Err(ArtifactError::too_large(&packed_path, packed_len, options.max_bytes));
    }
    if offsets.first().copied().unwrap_or(0) != 0
        || offsets.last().copied().unwrap_or(0) != packed_len
    {
        return Err(ArtifactError::Corrupt(format!(
            "{} offsets do not span the {} byte packed buffer",
            name, packed_len
        )));
    }

    let mut validator = loader
        .checksum_for(packed_rel)
        .map(|checksum| PackedChecksumValidator::from_joined(&checksum, name))
        .transpose()?;
    let mut postings = Vec::with_capacity(offsets.len().saturating_sub(1));
    for window in packed_windows(
        &offsets,
        options.resolved_window_tokens(),
        options.resolved_window_bytes(),
    ) {
        let start = offsets[window.start];
        let end = offsets[window.end];
        if end < start {
            return Err(ArtifactError::Corrupt(format!(
                "{} offsets decrease at token {}",
                name, window.start
            )));
        }
        let bytes = loader.store().get_range(&packed_path, start..end).await?;
        if let Some(validator) = validator.as_mut() {
            validator.update_all(&bytes);
        }
        postings.extend(unpack_tf_postings_window(
            &bytes, start, &offsets, window, block_size,
        )?);
    }
    if let Some(validator) = validator {
        validator.verify()?;
    }

    let mut result = TokenPostings {
        vocab: string_array(&meta, "vocab")?.unwrap_or_default(),
        vocab_ids: string_array(&meta, "vocabIds")?.unwrap_or_default(),
        postings,
        doc_lengths: u64_array(&meta, "docLengths")?.unwrap_or_default(),
        block_size: Some(block_size),
        ..Default::default()
    };
    fill_stats(&mut result, Some(fields))?;
    let count = fields
        .get("count")
        .and_then(Value::as_u64)
        .map(|count| count as usize);
    check_cardinality(&result, count)?;
    Ok(result)
}

async fn load_binary_columnar(
    loader: &ArtifactLoader,
    sources: &crate::manifest::ArtifactSources,
) -> Result<TokenPostings> {
    let source = BinaryColumnarSource::open(loader, sources).await?;
    let mut postings = Vec::with_capacity(source.index.len());
    for (token, payload) in source.read_all_rows(loader).await?.iter().enumerate() {
        let values = decode_varint_list(payload)?;
        if values.len() % 2 != 0 {
            return Err(ArtifactError::Corrupt(format!(
                "{} row {} has an odd number of varints",
                sources.name, token
            )));
        }
        let mut list = PostingList::new();
        let mut doc: u64 = 0;
        for pair in values.chunks_exact(2) {
            doc = doc.checked_add(pair[0]).ok_or_else(|| {
                ArtifactError::Corrupt(format!("{} row {} doc id overflow", sources.name, token))
            })?;
            let tf = u32::try_from(pair[1]).map_err(|_| {
                ArtifactError::Corrupt(format!("term frequency {} exceeds u32 range", pair[1]))
            })?;
            list.push(doc_id(doc)?, tf);
        }
        postings.push(list);
    }

    let raw = &source.meta.raw;
    let mut result = TokenPostings {
        vocab: string_array(raw, "vocab")?.unwrap_or_default(),
        vocab_ids: string_array(raw, "vocabIds")?.unwrap_or_default(),
        postings,
        doc_lengths: u64_array(raw, "docLengths")?.unwrap_or_default(),
        ..Default::default()
    };
    fill_stats(&mut result, Some(unwrap_fields(raw)))?;
    check_cardinality(&result, Some(source.meta.count))?;
    Ok(result)
}

/// Load token postings from whichever source the manifest declares.
pub async fn load_token_postings(loader: &ArtifactLoader) -> Result<TokenPostings> {
    let sources = loader.resolve(TOKEN_POSTINGS).await?;
    let result = match sources.format {
        SourceFormat::Piece(PieceFormat::Packed) => {
            let Some(packed_rel) = sources.paths.first() else {
                return Err(ArtifactError::ManifestIncomplete(format!(
                    "no packed piece for {}",
                    sources.name
                )));
            };
            return load_packed(loader, &sources.name, packed_rel).await;
        }
        SourceFormat::Piece(PieceFormat::BinaryColumnar) => {
            return load_binary_columnar(loader, &sources).await
        }
        SourceFormat::Piece(PieceFormat::Json) if sources.paths.len() == 1 => {
            let value = loader.read_json_piece(&sources.paths[0]).await?;
            let mut result = from_json(&value)?;
            fill_stats(&mut result, Some(unwrap_fields(&value)))?;
            result
        }
        SourceFormat::Sharded | SourceFormat::Piece(PieceFormat::Json) => {
            let mut result = TokenPostings::default();
            for rel in &sources.paths {
                let shard = from_json(&loader.read_json_piece(rel).await?)?;
                result.vocab.extend(shard.vocab);
                result.vocab_ids.extend(shard.vocab_ids);
                result.postings.extend(shard.postings);
                result.doc_lengths.extend(shard.doc_lengths);
            }
            let meta = loader.named_meta(&sources.name).await?;
            if let Some(meta) = meta.as_deref() {
                if let Some(doc_lengths) = u64_array(meta, "docLengths")? {
                    result.doc_lengths = doc_lengths;
                }
            }
            fill_stats(&mut result, meta.as_deref().map(unwrap_fields))?;
            result
        }
        SourceFormat::Piece(other) => {
            return Err(ArtifactError::Unsupported(format!(
                "{} cannot be read from a {} source",
                sources.name,
                other.as_str()
            )))
        }
    };
    check_cardinality(&result, None)?;
    Ok(result)
}
