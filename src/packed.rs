//! Packed term-frequency postings.
//!
//! Each list is `varint(count)` followed by `count` pairs of
//! `varint(delta doc_id), varint(tf)`. The delta resets to the absolute doc id
//! at every multiple of `block_size`, so a reader never needs more than one
//! block of context. A parallel offsets array (N+1 entries) locates each
//! token's list in the packed buffer.

use crate::error::{ArtifactError, Result};
use crate::types::{DocId, Posting, PostingList};
use crate::varint::{decode_varint, encode_varint};
use std::ops::Range;

/// Default postings per delta block.
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Output of [`pack_tf_postings`].
#[derive(Debug, Clone, Default)]
pub struct PackedPostings {
    pub buffer: Vec<u8>,
    /// Byte offset of every list, plus the end sentinel.
    pub offsets: Vec<u64>,
    pub block_size: usize,
}

fn check_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 {
        return Err(ArtifactError::Invalid("block size must be at least 1".to_string()));
    }
    Ok(())
}

/// Encode posting lists into one packed buffer.
pub fn pack_tf_postings(lists: &[PostingList], block_size: usize) -> Result<PackedPostings> {
    check_block_size(block_size)?;
    let mut buffer = Vec::new();
    let mut offsets = Vec::with_capacity(lists.len() + 1);

    for (token, list) in lists.iter().enumerate() {
        offsets.push(buffer.len() as u64);
        encode_varint(list.postings.len() as u64, &mut buffer)?;
        let mut prev: DocId = 0;
        for (i, posting) in list.postings.iter().enumerate() {
            let delta = if i % block_size == 0 {
                posting.doc_id
            } else if posting.doc_id < prev {
                return Err(ArtifactError::Invalid(format!(
                    "posting list {} is not sorted by doc id at position {}",
                    token, i
                )));
            } else {
                posting.doc_id - prev
            };
            encode_varint(delta as u64, &mut buffer)?;
            encode_varint(posting.tf as u64, &mut buffer)?;
            prev = posting.doc_id;
        }
    }
    offsets.push(buffer.len() as u64);

    Ok(PackedPostings {
        buffer,
        offsets,
        block_size,
    })
}

fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ArtifactError::Corrupt(format!("{} {} exceeds u32 range", what, value)))
}

/// Decode a single list occupying exactly `slice`.
pub fn unpack_tf_posting_slice(slice: &[u8], block_size: usize) -> Result<PostingList> {
    check_block_size(block_size)?;
    if slice.is_empty() {
        return Ok(PostingList::new());
    }
    let mut pos = 0;
    let count = decode_varint(slice, &mut pos)?;
    // Every pair takes at least two bytes
    let remaining = (slice.len() - pos) as u64;
    if count.saturating_mul(2) > remaining {
        return Err(ArtifactError::Corrupt(format!(
            "posting count {} exceeds {} remaining bytes",
            count, remaining
        )));
    }

    let mut postings = Vec::with_capacity(count as usize);
    let mut prev: u64 = 0;
    for i in 0..count as usize {
        let delta = decode_varint(slice, &mut pos)?;
        let tf = decode_varint(slice, &mut pos)?;
        let doc_id = if i % block_size == 0 { delta } else { prev + delta };
        postings.push(Posting {
            doc_id: to_u32(doc_id, "doc id")?,
            tf: to_u32(tf, "term frequency")?,
        });
        prev = doc_id;
    }
    if pos != slice.len() {
        return Err(ArtifactError::Corrupt(format!(
            "posting list has {} trailing bytes",
            slice.len() - pos
        )));
    }
    Ok(PostingList { postings })
}

/// Decode every list of a packed buffer.
pub fn unpack_tf_postings(
    buffer: &[u8],
    offsets: &[u64],
    block_size: usize,
) -> Result<Vec<PostingList>> {
    let tokens = offsets.len().saturating_sub(1);
    unpack_tf_postings_window(buffer, 0, offsets, 0..tokens, block_size)
}

/// Decode the lists for `tokens` from a window of the packed buffer that
/// starts at byte `window_start`.
pub fn unpack_tf_postings_window(
    window: &[u8],
    window_start: u64,
    offsets: &[u64],
    tokens: Range<usize>,
    block_size: usize,
) -> Result<Vec<PostingList>> {
    if tokens.end >= offsets.len() && !tokens.is_empty() {
        return Err(ArtifactError::Corrupt(format!(
            "token window {:?} exceeds {} offsets",
            tokens,
            offsets.len()
        )));
    }
    let window_end = window_start + window.len() as u64;

    let mut lists = Vec::with_capacity(tokens.len());
    for token in tokens {
        let start = offsets[token];
        let end = offsets[token + 1];
        if start < window_start || end < start || end > window_end {
            return Err(ArtifactError::Corrupt(format!(
                "packed offsets {}..{} for token {} fall outside bytes {}..{}",
                start, end, token, window_start, window_end
            )));
        }
        let local = (start - window_start) as usize..(end - window_start) as usize;
        lists.push(unpack_tf_posting_slice(&window[local], block_size)?);
    }
    Ok(lists)
}

/// Split `0..offsets.len() - 1` into decode windows bounded by token count and
/// byte size. A single list larger than `max_bytes` gets a window of its own.
pub fn packed_windows(offsets: &[u64], max_tokens: usize, max_bytes: u64) -> Vec<Range<usize>> {
    let total = offsets.len().saturating_sub(1);
    let max_tokens = max_tokens.max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    while start < total {
        let mut end = start + 1;
        while end < total
            && end - start < max_tokens
            && offsets[end + 1].saturating_sub(offsets[start]) <= max_bytes
        {
            end += 1;
        }
        windows.push(start..end);
        start = end;
    }
    windows
}
