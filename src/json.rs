//! JSON, JSONL and columnar JSON sources.
//!
//! Raw bytes are read under the byte budget and checked against the declared
//! checksum before decompression. Compressed sources (`.gz`, `.zst`) are also
//! budgeted on their decompressed size.

use crate::checksum::{verify_stored, PackedChecksumValidator};
use crate::error::{ArtifactError, Result};
use crate::manifest::primary_path;
use crate::storage::BlobStore;
use crate::stream::RowReader;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::sync::Arc;

/// Range size for plain JSONL streaming reads.
pub const STREAM_CHUNK_BYTES: u64 = 64 * 1024;

/// Compression detected from a source path suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// A trailing `.bak` is ignored.
    pub fn from_path(path: &str) -> Self {
        let path = primary_path(path);
        if path.ends_with(".gz") {
            Compression::Gzip
        } else if path.ends_with(".zst") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

/// Read a whole object, refusing anything larger than `max_bytes`.
/// The size is checked before any byte is read.
pub async fn read_budgeted(store: &dyn BlobStore, path: &str, max_bytes: u64) -> Result<Bytes> {
    let size = store.head(path).await?;
    if size > max_bytes {
        return Err(ArtifactError::too_large(path, size, max_bytes));
    }
    let data = store.get(path).await?;
    if data.len() as u64 > max_bytes {
        return Err(ArtifactError::too_large(path, data.len() as u64, max_bytes));
    }
    Ok(data)
}

fn verify_raw(raw: &[u8], checksum: Option<&str>, label: &str) -> Result<()> {
    if let Some(checksum) = checksum {
        let mut validator = PackedChecksumValidator::from_joined(checksum, label)?;
        validator.update_all(raw);
        validator.verify()?;
    }
    Ok(())
}

fn decompress_error(path: &str, e: std::io::Error) -> ArtifactError {
    ArtifactError::Decompress {
        path: path.to_string(),
        message: e.to_string(),
    }
}

fn decoder(path: &str, raw: Bytes, compression: Compression) -> Result<Box<dyn BufRead + Send>> {
    let cursor = Cursor::new(raw);
    Ok(match compression {
        Compression::None => Box::new(cursor),
        Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(cursor))),
        Compression::Zstd => Box::new(BufReader::new(
            zstd::stream::read::Decoder::new(cursor).map_err(|e| decompress_error(path, e))?,
        )),
    })
}

/// Decompress a raw source according to its path suffix.
pub fn decompress(path: &str, raw: Bytes, max_bytes: u64) -> Result<Vec<u8>> {
    let compression = Compression::from_path(path);
    if compression == Compression::None {
        return Ok(raw.to_vec());
    }
    let mut out = Vec::new();
    decoder(path, raw, compression)?
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| decompress_error(path, e))?;
    if out.len() as u64 > max_bytes {
        return Err(ArtifactError::too_large(path, out.len() as u64, max_bytes));
    }
    Ok(out)
}

/// Read, verify and decompress a text source.
pub async fn read_text_source(
    store: &dyn BlobStore,
    path: &str,
    max_bytes: u64,
    checksum: Option<&str>,
) -> Result<Vec<u8>> {
    let raw = read_budgeted(store, path, max_bytes).await?;
    verify_raw(&raw, checksum, path)?;
    decompress(path, raw, max_bytes)
}

/// Parse a JSON document.
pub fn parse_json(path: &str, bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| ArtifactError::Corrupt(format!("{}: invalid JSON: {}", path, e)))
}

/// Read and parse a JSON document.
pub async fn read_json_value(
    store: &dyn BlobStore,
    path: &str,
    max_bytes: u64,
    checksum: Option<&str>,
) -> Result<Value> {
    let bytes = read_text_source(store, path, max_bytes, checksum).await?;
    parse_json(path, &bytes)
}

/// Rows of a JSON source: a top-level array, or the `rows` / `arrays.rows`
/// member of an object.
pub fn json_rows(path: &str, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut obj) => {
            if let Some(Value::Array(rows)) = obj.remove("rows") {
                return Ok(rows);
            }
            if let Some(Value::Object(mut arrays)) = obj.remove("arrays") {
                if let Some(Value::Array(rows)) = arrays.remove("rows") {
                    return Ok(rows);
                }
            }
            Err(ArtifactError::Corrupt(format!(
                "{}: JSON object has no rows array",
                path
            )))
        }
        _ => Err(ArtifactError::Corrupt(format!(
            "{}: expected a JSON array of rows",
            path
        ))),
    }
}

/// Expand a columnar JSON payload into row objects.
///
/// Shape: `{arrays: {col: [..]}, columns?, tables?, length?}`. An integer cell
/// in a column that has `tables[col]` is replaced by that table entry. Null
/// cells leave the field absent.
pub fn inflate_columnar(path: &str, value: &Value) -> Result<Vec<Value>> {
    let payload = match value.get("fields") {
        Some(fields) if fields.get("arrays").is_some() => fields,
        _ => value,
    };
    let Some(arrays) = payload.get("arrays").and_then(Value::as_object) else {
        return Err(ArtifactError::Corrupt(format!(
            "{}: columnar payload has no arrays",
            path
        )));
    };
    let columns: Vec<String> = match payload.get("columns").and_then(Value::as_array) {
        Some(columns) => columns
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        None => arrays.keys().cloned().collect(),
    };
    let tables = payload.get("tables").and_then(Value::as_object);

    let mut length = 0usize;
    let mut cols = Vec::with_capacity(columns.len());
    for name in &columns {
        let Some(values) = arrays.get(name).and_then(Value::as_array) else {
            return Err(ArtifactError::Corrupt(format!(
                "{}: columnar column {} is missing",
                path, name
            )));
        };
        length = length.max(values.len());
        let table = tables.and_then(|t| t.get(name)).and_then(Value::as_array);
        cols.push((name, values, table));
    }
    if let Some(declared) = payload.get("length") {
        let declared = declared.as_u64().ok_or_else(|| {
            ArtifactError::Invalid(format!("{}: columnar length is not an integer", path))
        })?;
        if cols.iter().any(|(_, values, _)| values.len() as u64 != declared) {
            return Err(ArtifactError::Corrupt(format!(
                "{}: columnar columns disagree with length {}",
                path, declared
            )));
        }
        length = declared as usize;
    }

    let mut rows = Vec::with_capacity(length);
    for i in 0..length {
        let mut row = Map::with_capacity(cols.len());
        for (name, values, table) in &cols {
            let cell = match values.get(i) {
                None | Some(Value::Null) => continue,
                Some(cell) => cell,
            };
            let cell = match (table, cell.as_u64()) {
                (Some(table), Some(idx)) => table.get(idx as usize).cloned().ok_or_else(|| {
                    ArtifactError::Corrupt(format!(
                        "{}: row {} {} table index {} out of range",
                        path, i, name, idx
                    ))
                })?,
                _ => cell.clone(),
            };
            row.insert((*name).clone(), cell);
        }
        rows.push(Value::Object(row));
    }
    Ok(rows)
}

/// Fail with [`ArtifactError::Invalid`] when a row lacks a required key.
pub fn check_required_keys(location: &str, row: &Value, required: &[String]) -> Result<()> {
    let Some(obj) = row.as_object() else {
        return Err(ArtifactError::Corrupt(format!(
            "{}: row is not a JSON object",
            location
        )));
    };
    for key in required {
        if !obj.contains_key(key) {
            return Err(ArtifactError::Invalid(format!(
                "{}: missing required key {}",
                location, key
            )));
        }
    }
    Ok(())
}

/// Parse one JSONL line. Blank lines yield `None`.
pub fn parse_jsonl_line(
    path: &str,
    line_no: usize,
    line: &[u8],
    required: &[String],
) -> Result<Option<Value>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(line)
        .map_err(|e| ArtifactError::Corrupt(format!("{}:{}: {}", path, line_no, e)))?;
    check_required_keys(&format!("{}:{}", path, line_no), &value, required)?;
    Ok(Some(value))
}

/// Parse a whole JSONL buffer.
pub fn parse_jsonl(path: &str, bytes: &[u8], required: &[String]) -> Result<Vec<Value>> {
    let mut rows = Vec::new();
    for (i, line) in bytes.split(|b| *b == b'\n').enumerate() {
        if let Some(row) = parse_jsonl_line(path, i + 1, line, required)? {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Line source over one JSONL file.
pub(crate) enum JsonlLines {
    Plain(PlainLines),
    Decoded(DecodedLines),
}

impl JsonlLines {
    /// Open `path`. Compressed files are fetched whole (budgeted) and decoded
    /// incrementally; plain files are read in ranges. A declared checksum is
    /// verified before the first line is returned.
    pub(crate) async fn open(
        store: Arc<dyn BlobStore>,
        path: &str,
        max_bytes: u64,
        checksum: Option<&str>,
    ) -> Result<Self> {
        match Compression::from_path(path) {
            Compression::None => {
                let size = store.head(path).await?;
                if let Some(checksum) = checksum {
                    verify_stored(store.as_ref(), path, size, checksum).await?;
                }
                Ok(JsonlLines::Plain(PlainLines {
                    store,
                    path: path.to_string(),
                    size,
                    pos: 0,
                    buf: Vec::new(),
                    max_bytes,
                }))
            }
            compression => {
                let raw = read_budgeted(store.as_ref(), path, max_bytes).await?;
                verify_raw(&raw, checksum, path)?;
                Ok(JsonlLines::Decoded(DecodedLines {
                    path: path.to_string(),
                    reader: decoder(path, raw, compression)?,
                    total: 0,
                    max_bytes,
                }))
            }
        }
    }

    pub(crate) async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            JsonlLines::Plain(lines) => lines.next_line().await,
            JsonlLines::Decoded(lines) => lines.next_line(),
        }
    }
}

pub(crate) struct PlainLines {
    store: Arc<dyn BlobStore>,
    path: String,
    size: u64,
    pos: u64,
    buf: Vec<u8>,
    max_bytes: u64,
}

impl PlainLines {
    async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(newline) = self.buf.iter().position(|b| *b == b'\n') {
                if newline as u64 > self.max_bytes {
                    return Err(ArtifactError::too_large(&self.path, newline as u64, self.max_bytes));
                }
                let mut line: Vec<u8> = self.buf.drain(..=newline).collect();
                line.pop();
                return Ok(Some(line));
            }
            if self.buf.len() as u64 > self.max_bytes {
                return Err(ArtifactError::too_large(
                    &self.path,
                    self.buf.len() as u64,
                    self.max_bytes,
                ));
            }
            if self.pos >= self.size {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.buf)));
            }

            let end = (self.pos + STREAM_CHUNK_BYTES).min(self.size);
            let chunk = self.store.get_range(&self.path, self.pos..end).await?;
            if chunk.is_empty() {
                return Err(ArtifactError::Corrupt(format!(
                    "{}: truncated at byte {} of {}",
                    self.path, self.pos, self.size
                )));
            }
            self.pos += chunk.len() as u64;
            self.buf.extend_from_slice(&chunk);
        }
    }
}

pub(crate) struct DecodedLines {
    path: String,
    reader: Box<dyn BufRead + Send>,
    total: u64,
    max_bytes: u64,
}

impl DecodedLines {
    fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let read = (&mut self.reader)
            .take(self.max_bytes.saturating_add(1))
            .read_until(b'\n', &mut line)
            .map_err(|e| decompress_error(&self.path, e))?;
        if read == 0 {
            return Ok(None);
        }
        self.total += read as u64;
        if self.total > self.max_bytes {
            return Err(ArtifactError::too_large(&self.path, self.total, self.max_bytes));
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        Ok(Some(line))
    }
}

/// One JSONL source queued for streaming: full path and declared checksum.
#[derive(Debug, Clone)]
pub(crate) struct JsonlSource {
    pub path: String,
    pub checksum: Option<String>,
}

/// Streams rows from a sequence of JSONL sources, one line at a time.
pub(crate) struct JsonlRowReader {
    store: Arc<dyn BlobStore>,
    pending: VecDeque<JsonlSource>,
    current: Option<(String, JsonlLines, usize)>,
    max_bytes: u64,
    required: Vec<String>,
}

impl JsonlRowReader {
    pub(crate) fn new(
        store: Arc<dyn BlobStore>,
        sources: Vec<JsonlSource>,
        max_bytes: u64,
        required: Vec<String>,
    ) -> Self {
        Self {
            store,
            pending: sources.into(),
            current: None,
            max_bytes,
            required,
        }
    }
}

#[async_trait]
impl RowReader for JsonlRowReader {
    type Row = Value;

    async fn next_row(&mut self) -> Result<Option<Value>> {
        loop {
            if self.current.is_none() {
                let Some(source) = self.pending.pop_front() else {
                    return Ok(None);
                };
                let lines = JsonlLines::open(
                    Arc::clone(&self.store),
                    &source.path,
                    self.max_bytes,
                    source.checksum.as_deref(),
                )
                .await?;
                self.current = Some((source.path, lines, 0));
            }
            let Some((path, lines, line_no)) = self.current.as_mut() else {
                continue;
            };
            match lines.next_line().await? {
                Some(line) => {
                    *line_no += 1;
                    if let Some(row) = parse_jsonl_line(path, *line_no, &line, &self.required)? {
                        return Ok(Some(row));
                    }
                }
                None => self.current = None,
            }
        }
    }
}
