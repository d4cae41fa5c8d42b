// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! LZ4-style back-referencing codec used for chunk compression.
//!
//! Wire format: a sequence of tokens. A literal token is `0x00` followed by
//! a little-endian `u16` length and that many raw bytes. A match token is
//! `0x01` followed by a little-endian `u16` backward offset and `u16` length
//! (minimum match length 4, enforced by the encoder). Matches never cross
//! the start of the buffer; offsets and lengths are always `<= u16::MAX`.

/// Errors produced while decoding a compressed chunk payload.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// The stream ended mid-token.
    #[error("compressed stream truncated")]
    Truncated,
    /// A match token's offset reached further back than any decoded output.
    #[error("match offset {0} exceeds decoded output so far")]
    InvalidOffset(usize),
    /// An opcode byte wasn't 0 (literal) or 1 (match).
    #[error("unrecognized opcode {0}")]
    InvalidOpcode(u8),
    /// The fully decoded length didn't match the caller's expected length.
    #[error("decoded length {actual} does not match expected length {expected}")]
    LengthMismatch {
        /// Length the caller expected (the pre-compression size).
        expected: usize,
        /// Length actually produced.
        actual: usize,
    },
}

const MIN_MATCH: usize = 4;
const MAX_LEN: usize = u16::MAX as usize;
/// Backward search window. Bounding it keeps compression roughly linear in
/// the chunk size instead of quadratic over the full 64 KiB chunk.
const SEARCH_WINDOW: usize = 4096;

/// Compresses `data` using the greedy back-referencing scheme described above.
#[must_use]
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    let mut literal_start = 0usize;

    while i < data.len() {
        let (best_len, best_off) = best_match(data, i);
        if best_len >= MIN_MATCH {
            flush_literals(&mut out, &data[literal_start..i]);
            out.push(1u8);
            #[allow(clippy::cast_possible_truncation)]
            {
                out.extend_from_slice(&(best_off as u16).to_le_bytes());
                out.extend_from_slice(&(best_len as u16).to_le_bytes());
            }
            i += best_len;
            literal_start = i;
        } else {
            i += 1;
        }
    }
    flush_literals(&mut out, &data[literal_start..]);
    out
}

fn best_match(data: &[u8], i: usize) -> (usize, usize) {
    let window_start = i.saturating_sub(SEARCH_WINDOW);
    let max_possible = (data.len() - i).min(MAX_LEN);
    let mut best_len = 0usize;
    let mut best_off = 0usize;

    for j in window_start..i {
        let mut len = 0usize;
        while len < max_possible && data[j + len] == data[i + len] {
            len += 1;
        }
        if len > best_len {
            best_len = len;
            best_off = i - j;
        }
    }
    (best_len, best_off)
}

fn flush_literals(out: &mut Vec<u8>, literals: &[u8]) {
    for run in literals.chunks(MAX_LEN) {
        out.push(0u8);
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(run.len() as u16).to_le_bytes());
        out.extend_from_slice(run);
    }
}

/// Decodes a stream produced by [`compress`], verifying it reproduces
/// exactly `expected_len` bytes.
pub fn decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(expected_len);
    let mut pos = 0usize;

    while pos < data.len() {
        let opcode = *data.get(pos).ok_or(CodecError::Truncated)?;
        pos += 1;
        match opcode {
            0 => {
                let len = read_u16(data, pos)? as usize;
                pos += 2;
                let bytes = data.get(pos..pos + len).ok_or(CodecError::Truncated)?;
                out.extend_from_slice(bytes);
                pos += len;
            }
            1 => {
                let offset = read_u16(data, pos)? as usize;
                pos += 2;
                let len = read_u16(data, pos)? as usize;
                pos += 2;
                let start = out
                    .len()
                    .checked_sub(offset)
                    .ok_or(CodecError::InvalidOffset(offset))?;
                for k in 0..len {
                    let byte = out[start + k];
                    out.push(byte);
                }
            }
            other => return Err(CodecError::InvalidOpcode(other)),
        }
    }

    if out.len() != expected_len {
        return Err(CodecError::LengthMismatch {
            expected: expected_len,
            actual: out.len(),
        });
    }
    Ok(out)
}

fn read_u16(data: &[u8], pos: usize) -> Result<u16, CodecError> {
    let bytes = data.get(pos..pos + 2).ok_or(CodecError::Truncated)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}
