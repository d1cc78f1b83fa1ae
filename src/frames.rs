//! Binary row frames: a data blob plus u64 offsets and varint lengths.
//!
//! Row `i` spans `data[offsets[i]..offsets[i] + lengths[i]]`. Offsets carry
//! N+1 cumulative entries; lengths are redundant and used to cross-check the
//! offsets before any row is read.

use crate::error::{ArtifactError, Result};
use crate::varint::{decode_varint_list, encode_varint_list};
use std::ops::Range;

/// Output of [`encode_binary_row_frames`].
#[derive(Debug, Clone, Default)]
pub struct EncodedRowFrames {
    /// Concatenated row payloads.
    pub data: Vec<u8>,
    /// Cumulative offsets (N+1 entries).
    pub offsets: Vec<u64>,
    /// `offsets` as little-endian u64 values.
    pub offsets_buffer: Vec<u8>,
    /// Per-row lengths.
    pub lengths: Vec<u64>,
    /// `lengths` as a varint list.
    pub lengths_buffer: Vec<u8>,
}

impl EncodedRowFrames {
    /// Number of rows.
    pub fn count(&self) -> usize {
        self.lengths.len()
    }
}

/// Concatenate row payloads and build their offsets and lengths sidecars.
pub fn encode_binary_row_frames<B: AsRef<[u8]>>(rows: &[B]) -> Result<EncodedRowFrames> {
    let total: usize = rows.iter().map(|r| r.as_ref().len()).sum();
    let mut data = Vec::with_capacity(total);
    let mut offsets = Vec::with_capacity(rows.len() + 1);
    let mut lengths = Vec::with_capacity(rows.len());

    for (i, row) in rows.iter().enumerate() {
        let row = row.as_ref();
        if row.is_empty() {
            return Err(ArtifactError::Invalid(format!(
                "row {} has an empty payload",
                i
            )));
        }
        offsets.push(data.len() as u64);
        lengths.push(row.len() as u64);
        data.extend_from_slice(row);
    }
    offsets.push(data.len() as u64);

    let offsets_buffer = encode_u64_offsets(&offsets);
    let lengths_buffer = encode_varint_list(&lengths)?;
    Ok(EncodedRowFrames {
        data,
        offsets,
        offsets_buffer,
        lengths,
        lengths_buffer,
    })
}

/// Decode a lengths sidecar.
pub fn decode_binary_row_frame_lengths(buf: &[u8]) -> Result<Vec<u64>> {
    decode_varint_list(buf)
}

/// Encode offsets as little-endian u64 values.
pub fn encode_u64_offsets(offsets: &[u64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(offsets.len() * 8);
    for offset in offsets {
        buf.extend_from_slice(&offset.to_le_bytes());
    }
    buf
}

/// Decode a little-endian u64 offsets sidecar.
pub fn decode_u64_offsets(buf: &[u8]) -> Result<Vec<u64>> {
    if buf.len() % 8 != 0 {
        return Err(ArtifactError::Corrupt(format!(
            "offsets buffer length {} is not a multiple of 8",
            buf.len()
        )));
    }
    Ok(buf
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            u64::from_le_bytes(bytes)
        })
        .collect())
}

/// Validated index over a row-frame data blob.
#[derive(Debug, Clone)]
pub struct RowFrameIndex {
    offsets: Vec<u64>,
    lengths: Vec<u64>,
    count: usize,
}

impl RowFrameIndex {
    /// Validate every row range against the data blob size.
    pub fn new(offsets: Vec<u64>, lengths: Vec<u64>, count: usize, data_len: u64) -> Result<Self> {
        if lengths.len() < count {
            return Err(ArtifactError::Corrupt(format!(
                "lengths sidecar has {} entries, expected {}",
                lengths.len(),
                count
            )));
        }
        if offsets.len() < count || offsets.len() > count + 1 {
            return Err(ArtifactError::Corrupt(format!(
                "offsets sidecar has {} entries, expected {}",
                offsets.len(),
                count + 1
            )));
        }

        for i in 0..count {
            let start = offsets[i];
            let len = lengths[i];
            if len == 0 {
                return Err(ArtifactError::Corrupt(format!("row {} has zero length", i)));
            }
            let end = start
                .checked_add(len)
                .filter(|end| *end <= data_len)
                .ok_or_else(|| {
                    ArtifactError::Corrupt(format!(
                        "row {} ends past data length {}",
                        i, data_len
                    ))
                })?;
            if let Some(&next) = offsets.get(i + 1) {
                if next != end {
                    return Err(ArtifactError::Corrupt(format!(
                        "row {} length disagrees with offsets ({} + {} != {})",
                        i, start, len, next
                    )));
                }
            }
        }

        Ok(Self {
            offsets,
            lengths,
            count,
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Byte range of row `i` in the data blob.
    pub fn row_range(&self, i: usize) -> Option<Range<u64>> {
        if i >= self.count {
            return None;
        }
        let start = self.offsets[i];
        Some(start..start + self.lengths[i])
    }

    /// Largest single row.
    pub fn max_row_len(&self) -> u64 {
        self.lengths[..self.count].iter().copied().max().unwrap_or(0)
    }

    /// Slice every row out of a fully read data blob.
    pub fn split<'a>(&self, data: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        (0..self.count)
            .map(|i| {
                let range = self.offsets[i] as usize..(self.offsets[i] + self.lengths[i]) as usize;
                data.get(range).ok_or_else(|| {
                    ArtifactError::Corrupt(format!("row {} ends past data length {}", i, data.len()))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_encode_layout() {
        let frames = encode_binary_row_frames(&[b"ab".as_slice(), b"cde".as_slice()]).unwrap();
        assert_eq!(frames.data, b"abcde");
        assert_eq!(frames.offsets, vec![0, 2, 5]);
        assert_eq!(frames.offsets_buffer.len(), 24);
        assert_eq!(frames.lengths, vec![2, 3]);
        assert_eq!(frames.lengths_buffer, vec![2, 3]);
        assert_eq!(frames.count(), 2);
    }

    #[test]
    fn test_random_round_trip() {
        let mut rng = StdRng::seed_from_u64(42);
        for n in [0usize, 1, 7, 300] {
            let rows: Vec<Vec<u8>> = (0..n)
                .map(|_| {
                    let len = rng.gen_range(1..200);
                    (0..len).map(|_| rng.gen::<u8>()).collect()
                })
                .collect();
            let frames = encode_binary_row_frames(&rows).unwrap();

            let offsets = decode_u64_offsets(&frames.offsets_buffer).unwrap();
            let lengths = decode_binary_row_frame_lengths(&frames.lengths_buffer).unwrap();
            let index =
                RowFrameIndex::new(offsets, lengths, n, frames.data.len() as u64).unwrap();
            let decoded = index.split(&frames.data).unwrap();
            assert_eq!(decoded.len(), n);
            for (row, expected) in decoded.iter().zip(&rows) {
                assert_eq!(*row, expected.as_slice());
            }
        }
    }

    #[test]
    fn test_empty_row_rejected_on_encode() {
        let err = encode_binary_row_frames(&[b"".as_slice()]).unwrap_err();
        assert_eq!(err.code(), "ERR_ARTIFACT_INVALID");
    }

    #[test]
    fn test_zero_length_row_is_corrupt() {
        let err = RowFrameIndex::new(vec![0, 0], vec![0], 1, 4).unwrap_err();
        assert_eq!(err.code(), "ERR_ARTIFACT_CORRUPT");
    }

    #[test]
    fn test_row_past_end_is_corrupt() {
        let err = RowFrameIndex::new(vec![0, 10], vec![10], 1, 4).unwrap_err();
        assert_eq!(err.code(), "ERR_ARTIFACT_CORRUPT");
    }

    #[test]
    fn test_lengths_disagree_with_offsets() {
        let err = RowFrameIndex::new(vec![0, 3, 5], vec![2, 2], 2, 5).unwrap_err();
        assert!(err.to_string().contains("disagrees"));
    }

    #[test]
    fn test_short_sidecars() {
        assert!(RowFrameIndex::new(vec![0], vec![1], 2, 10).is_err());
        assert!(RowFrameIndex::new(vec![0, 1, 2], vec![1], 2, 10).is_err());
    }

    #[test]
    fn test_offsets_not_multiple_of_eight() {
        assert!(decode_u64_offsets(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_row_range() {
        let index = RowFrameIndex::new(vec![0, 2, 5], vec![2, 3], 2, 5).unwrap();
        assert_eq!(index.row_range(1), Some(2..5));
        assert_eq!(index.row_range(2), None);
        assert_eq!(index.max_row_len(), 3);
    }
}
