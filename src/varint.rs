//! LEB128 variable-length integers, delta sequences and varint lists.
//!
//! Two widths are supported. The default functions are bounded by
//! [`MAX_SAFE_INTEGER`] so counts, offsets and lengths interoperate with
//! readers that hold integers as doubles. The `*64` functions carry every bit
//! of a `u64` and are used for hashed token ids.

use crate::error::{ArtifactError, Result};

/// Largest integer a double represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Encode a safe unsigned integer as LEB128 into `buf`.
pub fn encode_varint(value: u64, buf: &mut Vec<u8>) -> Result<()> {
    if value > MAX_SAFE_INTEGER {
        return Err(ArtifactError::VarintDecode(format!(
            "value {} exceeds safe integer range",
            value
        )));
    }
    encode_varint64(value, buf);
    Ok(())
}

/// Encode any `u64` as LEB128 into `buf`.
pub fn encode_varint64(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a safe LEB128 integer from `buf` starting at `*pos`.
/// Advances `*pos` past the consumed bytes.
pub fn decode_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let Some(&byte) = buf.get(*pos) else {
            return Err(ArtifactError::VarintDecode(format!(
                "truncated varint at byte {}",
                *pos
            )));
        };
        *pos += 1;

        if shift > 49 {
            return Err(ArtifactError::VarintDecode(
                "varint exceeds safe integer range".to_string(),
            ));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            if result > MAX_SAFE_INTEGER {
                return Err(ArtifactError::VarintDecode(format!(
                    "decoded value {} exceeds safe integer range",
                    result
                )));
            }
            return Ok(result);
        }
        shift += 7;
    }
}

/// Decode a full-width LEB128 `u64` from `buf` starting at `*pos`.
pub fn decode_varint64(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let Some(&byte) = buf.get(*pos) else {
            return Err(ArtifactError::VarintDecode(format!(
                "truncated varint at byte {}",
                *pos
            )));
        };
        *pos += 1;

        let payload = (byte & 0x7F) as u64;
        // Prevent overflow: shift must be < 64, and the value must fit
        if shift > 63 || (shift == 63 && payload > 1) {
            return Err(ArtifactError::VarintDecode("varint overflows 64 bits".to_string()));
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Encode a list of safe integers back to back, without a count prefix.
pub fn encode_varint_list(values: &[u64]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(values.len());
    for &value in values {
        encode_varint(value, &mut buf)?;
    }
    Ok(buf)
}

/// Decode safe integers until the buffer is exhausted.
pub fn decode_varint_list(buf: &[u8]) -> Result<Vec<u64>> {
    let mut values = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        values.push(decode_varint(buf, &mut pos)?);
    }
    Ok(values)
}

/// Encode 64-bit values (token ids) without loss.
pub fn encode_varint64_list(values: &[u64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 2);
    for &value in values {
        encode_varint64(value, &mut buf);
    }
    buf
}

/// Decode 64-bit values until the buffer is exhausted.
pub fn decode_varint64_list(buf: &[u8]) -> Result<Vec<u64>> {
    let mut values = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        values.push(decode_varint64(buf, &mut pos)?);
    }
    Ok(values)
}

/// Delta-encode a non-decreasing sequence.
pub fn encode_delta_list(values: &[u64]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(values.len());
    let mut prev = 0u64;
    for (i, &value) in values.iter().enumerate() {
        if value < prev {
            return Err(ArtifactError::Invalid(format!(
                "delta sequence decreases at index {} ({} < {})",
                i, value, prev
            )));
        }
        encode_varint(value - prev, &mut buf)?;
        prev = value;
    }
    Ok(buf)
}

/// Rebuild absolute values from a delta-encoded buffer.
pub fn decode_delta_list(buf: &[u8]) -> Result<Vec<u64>> {
    let mut values = Vec::new();
    let mut pos = 0;
    let mut acc = 0u64;
    while pos < buf.len() {
        let delta = decode_varint(buf, &mut pos)?;
        acc = acc
            .checked_add(delta)
            .filter(|v| *v <= MAX_SAFE_INTEGER)
            .ok_or_else(|| {
                ArtifactError::VarintDecode("delta sum exceeds safe integer range".to_string())
            })?;
        values.push(acc);
    }
    Ok(values)
}
