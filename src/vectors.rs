//! Fixed-width matrix artifacts: minhash signatures and dense uint8 vectors.
//!
//! Both are row-major binary blobs whose `count` and `dims` are declared by
//! the manifest piece or the `<name>_meta` sidecar. Shapes are validated and
//! the byte size checked against the file before anything is allocated.

use crate::checksum::verify_stored;
use crate::error::{ArtifactError, Result};
use crate::loader::ArtifactLoader;
use crate::manifest::{unwrap_fields, ArtifactSources, PieceFormat, SourceFormat};
use crate::stream::{RowReader, RowStream};
use crate::types::{DenseVectors, SignatureMatrix};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::marker::PhantomData;

pub const MINHASH_SIGNATURES: &str = "minhash_signatures";
pub const DENSE_VECTORS_UINT8: &str = "dense_vectors_uint8";
pub const DENSE_VECTORS_DOC_UINT8: &str = "dense_vectors_doc_uint8";
pub const DENSE_VECTORS_CODE_UINT8: &str = "dense_vectors_code_uint8";

/// Dense vector artifact names.
pub const DENSE_VECTOR_ARTIFACTS: [&str; 3] = [
    DENSE_VECTORS_UINT8,
    DENSE_VECTORS_DOC_UINT8,
    DENSE_VECTORS_CODE_UINT8,
];

pub const UINT8_ROW_MAJOR: &str = "uint8-row-major";

/// Fixed-size little-endian matrix element.
pub trait MatrixElement: Copy + Send + 'static {
    const SIZE: usize;

    fn decode_all(bytes: &[u8]) -> Vec<Self>;
}

impl MatrixElement for u32 {
    const SIZE: usize = 4;

    fn decode_all(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

impl MatrixElement for u8 {
    const SIZE: usize = 1;

    fn decode_all(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }
}

/// Validated `count x dims` shape of a binary matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixShape {
    pub count: usize,
    pub dims: usize,
    /// Bytes in one row.
    pub row_bytes: u64,
    /// Bytes in the whole matrix.
    pub total_bytes: u64,
}

fn shape_integer(label: &str, field: &str, value: Option<&Value>) -> Result<u64> {
    let Some(value) = value else {
        return Err(ArtifactError::Invalid(format!("{} is missing {}", label, field)));
    };
    value.as_u64().ok_or_else(|| {
        ArtifactError::Invalid(format!(
            "{} {} must be a non-negative integer, got {}",
            label, field, value
        ))
    })
}

/// Validate `count`/`dims` and compute the matrix size with checked
/// arithmetic.
pub fn matrix_shape(
    label: &str,
    count: Option<&Value>,
    dims: Option<&Value>,
    element_size: usize,
) -> Result<MatrixShape> {
    let count = shape_integer(label, "count", count)?;
    let dims = shape_integer(label, "dims", dims)?;
    if count > 0 && dims == 0 {
        return Err(ArtifactError::Invalid(format!(
            "{} dims must be at least 1 for {} rows",
            label, count
        )));
    }
    let overflow = || ArtifactError::Invalid(format!("{} shape {}x{} overflows", label, count, dims));
    let row_bytes = dims.checked_mul(element_size as u64).ok_or_else(overflow)?;
    let total_bytes = row_bytes.checked_mul(count).ok_or_else(overflow)?;
    let count = usize::try_from(count).map_err(|_| overflow())?;
    let dims = usize::try_from(dims).map_err(|_| overflow())?;
    usize::try_from(total_bytes).map_err(|_| overflow())?;
    Ok(MatrixShape {
        count,
        dims,
        row_bytes,
        total_bytes,
    })
}

/// A binary matrix piece with a validated shape.
struct MatrixSource {
    path: String,
    checksum: Option<String>,
    shape: MatrixShape,
    model: Option<String>,
}

impl MatrixSource {
    /// Resolve shape from the piece, falling back to `<name>_meta` fields, and
    /// check the file size before any payload is read.
    async fn open(
        loader: &ArtifactLoader,
        sources: &ArtifactSources,
        element_size: usize,
        expected_format: Option<&str>,
    ) -> Result<Self> {
        let Some(rel) = sources.paths.first() else {
            return Err(ArtifactError::ManifestIncomplete(format!(
                "no binary piece for {}",
                sources.name
            )));
        };
        let piece = loader.manifest().piece_by_path(rel);
        let meta = loader.named_meta(&sources.name).await?;
        let fields = meta.as_deref().map(unwrap_fields);
        let field = |key: &str| fields.and_then(|f| f.get(key)).cloned();

        if let Some(expected) = expected_format {
            if let Some(format) = field("format") {
                if format.as_str() != Some(expected) {
                    return Err(ArtifactError::Unsupported(format!(
                        "{} format {} (expected {})",
                        sources.name, format, expected
                    )));
                }
            }
        }

        let count = piece
            .and_then(|p| p.count.clone())
            .map(Value::Number)
            .or_else(|| field("count"));
        let dims = piece
            .and_then(|p| p.dims.clone())
            .map(Value::Number)
            .or_else(|| field("dims"));
        let shape = matrix_shape(&sources.name, count.as_ref(), dims.as_ref(), element_size)?;

        let path = loader.path(rel);
        let size = loader.store().head(&path).await?;
        if size != shape.total_bytes {
            return Err(ArtifactError::Corrupt(format!(
                "{} is {} bytes, expected {} for {}x{}",
                path, size, shape.total_bytes, shape.count, shape.dims
            )));
        }
        Ok(Self {
            path,
            checksum: loader.checksum_for(rel),
            shape,
            model: field("model").and_then(|m| m.as_str().map(str::to_string)),
        })
    }

    async fn read_all<E: MatrixElement>(&self, loader: &ArtifactLoader) -> Result<Vec<E>> {
        let max_bytes = loader.options().max_bytes;
        if self.shape.total_bytes > max_bytes {
            return Err(ArtifactError::too_large(&self.path, self.shape.total_bytes, max_bytes));
        }
        if self.shape.total_bytes == 0 {
            return Ok(Vec::new());
        }
        let data = loader.store().get(&self.path).await?;
        if data.len() as u64 != self.shape.total_bytes {
            return Err(ArtifactError::Corrupt(format!(
                "{} read {} of {} bytes",
                self.path,
                data.len(),
                self.shape.total_bytes
            )));
        }
        if let Some(checksum) = &self.checksum {
            crate::checksum::verify_checksum(&data, checksum, &self.path)?;
        }
        Ok(E::decode_all(&data))
    }

    fn into_reader<E: MatrixElement>(self, loader: &ArtifactLoader) -> Result<MatrixRowReader<E>> {
        let max_bytes = loader.options().max_bytes;
        if self.shape.row_bytes > max_bytes {
            return Err(ArtifactError::too_large(&self.path, self.shape.row_bytes, max_bytes));
        }
        // whole batches must fit the budget too
        let batch_rows = if self.shape.row_bytes == 0 {
            1
        } else {
            (max_bytes / self.shape.row_bytes).max(1) as usize
        };
        Ok(MatrixRowReader {
            loader: loader.clone(),
            batch_rows: loader.options().resolved_batch_size().min(batch_rows),
            source: self,
            next: 0,
            pending: VecDeque::new(),
            verified: false,
            _element: PhantomData,
        })
    }
}

/// Streams matrix rows in bounded batches of range reads.
///
/// A declared checksum is verified by a chunked pre-pass before the first
/// batch is read.
struct MatrixRowReader<E> {
    loader: ArtifactLoader,
    source: MatrixSource,
    batch_rows: usize,
    next: usize,
    pending: VecDeque<Vec<E>>,
    verified: bool,
    _element: PhantomData<E>,
}

impl<E: MatrixElement> MatrixRowReader<E> {
    async fn fill(&mut self) -> Result<()> {
        let shape = self.source.shape;
        let rows = self.batch_rows.min(shape.count - self.next);
        let start = self.next as u64 * shape.row_bytes;
        let end = start + rows as u64 * shape.row_bytes;
        let data = self
            .loader
            .store()
            .get_range(&self.source.path, start..end)
            .await?;
        if data.len() as u64 != end - start {
            return Err(ArtifactError::Corrupt(format!(
                "{} read {} of {} bytes at offset {}",
                self.source.path,
                data.len(),
                end - start,
                start
            )));
        }
        self.next += rows;
        let values = E::decode_all(&data);
        self.pending
            .extend(values.chunks_exact(shape.dims).map(<[E]>::to_vec));
        Ok(())
    }
}

#[async_trait]
impl<E: MatrixElement> RowReader for MatrixRowReader<E> {
    type Row = Vec<E>;

    async fn next_row(&mut self) -> Result<Option<Vec<E>>> {
        if !self.verified {
            if let Some(checksum) = self.source.checksum.as_deref() {
                verify_stored(
                    self.loader.store().as_ref(),
                    &self.source.path,
                    self.source.shape.total_bytes,
                    checksum,
                )
                .await?;
            }
            self.verified = true;
        }
        if self.pending.is_empty() && self.next < self.source.shape.count {
            self.fill().await?;
        }
        Ok(self.pending.pop_front())
    }
}

/// `{signatures: [[..]]}` or `{arrays: {signatures}}`.
fn signatures_from_json(name: &str, value: &Value) -> Result<SignatureMatrix> {
    let signatures = value
        .get("signatures")
        .or_else(|| value.get("arrays").and_then(|a| a.get("signatures")));
    let Some(rows) = signatures.and_then(Value::as_array) else {
        return Err(ArtifactError::Corrupt(format!("{} has no signatures array", name)));
    };
    let mut matrix = SignatureMatrix {
        count: rows.len(),
        ..Default::default()
    };
    for (i, row) in rows.iter().enumerate() {
        let Some(row) = row.as_array() else {
            return Err(ArtifactError::Corrupt(format!("{} row {} is not an array", name, i)));
        };
        if i == 0 {
            matrix.dims = row.len();
            matrix.values.reserve(rows.len() * row.len());
        } else if row.len() != matrix.dims {
            return Err(ArtifactError::Corrupt(format!(
                "{} row {} has {} values, expected {}",
                name,
                i,
                row.len(),
                matrix.dims
            )));
        }
        for value in row {
            let value = value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    ArtifactError::Invalid(format!("{} row {} holds {} (not a u32)", name, i, value))
                })?;
            matrix.values.push(value);
        }
    }
    Ok(matrix)
}

fn is_json(sources: &ArtifactSources) -> bool {
    matches!(sources.format, SourceFormat::Piece(PieceFormat::Json))
}

fn require_binary(sources: &ArtifactSources) -> Result<()> {
    match sources.format {
        SourceFormat::Piece(PieceFormat::Binary) => Ok(()),
        ref other => Err(ArtifactError::Unsupported(format!(
            "{} cannot be read from a {} source",
            sources.name,
            other.as_str()
        ))),
    }
}

async fn json_signatures(loader: &ArtifactLoader, sources: &ArtifactSources) -> Result<SignatureMatrix> {
    let [rel] = sources.paths.as_slice() else {
        return Err(ArtifactError::ManifestInvalid(format!(
            "{} declares {} json pieces",
            sources.name,
            sources.paths.len()
        )));
    };
    signatures_from_json(&sources.name, &loader.read_json_piece(rel).await?)
}

/// Load the minhash signature matrix.
pub async fn load_minhash_signatures(loader: &ArtifactLoader) -> Result<SignatureMatrix> {
    let sources = loader.resolve(MINHASH_SIGNATURES).await?;
    if is_json(&sources) {
        return json_signatures(loader, &sources).await;
    }
    require_binary(&sources)?;
    let source = MatrixSource::open(loader, &sources, u32::SIZE, None).await?;
    Ok(SignatureMatrix {
        count: source.shape.count,
        dims: source.shape.dims,
        values: source.read_all::<u32>(loader).await?,
    })
}

/// Stream minhash signatures one row at a time.
pub async fn stream_minhash_signatures(loader: &ArtifactLoader) -> Result<RowStream<Vec<u32>>> {
    let sources = loader.resolve(MINHASH_SIGNATURES).await?;
    if is_json(&sources) {
        loader.warn_once(
            &sources.name,
            "materialized-stream",
            "json signatures cannot be streamed; materializing",
        );
        let matrix = json_signatures(loader, &sources).await?;
        return Ok(RowStream::from_rows(matrix.rows().map(<[u32]>::to_vec).collect()));
    }
    require_binary(&sources)?;
    let source = MatrixSource::open(loader, &sources, u32::SIZE, None).await?;
    Ok(RowStream::from_reader(source.into_reader::<u32>(loader)?))
}

fn check_dense_name(name: &str) -> Result<()> {
    if DENSE_VECTOR_ARTIFACTS.contains(&name) {
        Ok(())
    } else {
        Err(ArtifactError::Unsupported(format!("{} is not a dense vector artifact", name)))
    }
}

/// Load one of the dense uint8 vector artifacts.
pub async fn load_dense_vectors(loader: &ArtifactLoader, name: &str) -> Result<DenseVectors> {
    check_dense_name(name)?;
    let sources = loader.resolve(name).await?;
    require_binary(&sources)?;
    let source = MatrixSource::open(loader, &sources, u8::SIZE, Some(UINT8_ROW_MAJOR)).await?;
    let values = source.read_all::<u8>(loader).await?;
    Ok(DenseVectors {
        count: source.shape.count,
        dims: source.shape.dims,
        model: source.model,
        values,
    })
}

/// Stream one of the dense uint8 vector artifacts row by row.
pub async fn stream_dense_vectors(loader: &ArtifactLoader, name: &str) -> Result<RowStream<Vec<u8>>> {
    check_dense_name(name)?;
    let sources = loader.resolve(name).await?;
    require_binary(&sources)?;
    let source = MatrixSource::open(loader, &sources, u8::SIZE, Some(UINT8_ROW_MAJOR)).await?;
    Ok(RowStream::from_reader(source.into_reader::<u8>(loader)?))
}
