// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! A single fixed-size, 64-B-aligned slice of a module's state slice.

use std::sync::atomic::{AtomicU64, Ordering};

use ember_core::ChunkId;

use crate::checksum::crc64;
use crate::codec;

/// A 64 KiB-aligned slice of a module's agents, the unit of checksum, diff,
/// and compression.
///
/// `payload` always holds exactly `capacity_bytes` bytes: the chunk's full
/// agent capacity, zero-padded beyond the live `agent_count`. When
/// `compressed` is `true`, `payload` instead holds the *compressed* encoding
/// of those same logical bytes; [`Chunk::ensure_decompressed`] restores the
/// raw form in place. `checksum` always refers to the logical (uncompressed)
/// content, so it never changes across a compress/decompress round trip.
#[derive(Debug)]
pub struct Chunk {
    id: ChunkId,
    agent_start: u32,
    agent_count: u32,
    capacity: u32,
    capacity_bytes: usize,
    data_size: usize,
    checksum: u64,
    timestamp: u64,
    dirty: bool,
    compressed: bool,
    compressed_size: Option<usize>,
    payload: Vec<u8>,
    access_count: AtomicU64,
}

impl Chunk {
    /// Allocates a new, zero-initialized chunk and computes its initial
    /// checksum over that zeroed payload.
    pub(crate) fn new_zeroed(
        id: ChunkId,
        agent_start: u32,
        capacity: u32,
        live_agent_count: u32,
        agent_size: u32,
        timestamp: u64,
    ) -> Self {
        let capacity_bytes = capacity as usize * agent_size as usize;
        let payload = vec![0u8; capacity_bytes];
        let checksum = crc64(&payload);
        Self {
            id,
            agent_start,
            agent_count: live_agent_count,
            capacity,
            capacity_bytes,
            data_size: live_agent_count as usize * agent_size as usize,
            checksum,
            timestamp,
            dirty: false,
            compressed: false,
            compressed_size: None,
            payload,
            access_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn id(&self) -> ChunkId {
        self.id
    }

    pub(crate) fn agent_start(&self) -> u32 {
        self.agent_start
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    pub(crate) fn agent_count(&self) -> u32 {
        self.agent_count
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub(crate) fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub(crate) fn stored_size(&self) -> usize {
        self.compressed_size.unwrap_or(self.capacity_bytes)
    }

    pub(crate) fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub(crate) fn checksum(&self) -> u64 {
        self.checksum
    }

    pub(crate) fn bump_access(&self) -> u64 {
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Returns the logical (uncompressed) bytes of this chunk, decompressing
    /// into an owned buffer without mutating stored state if currently
    /// compressed.
    pub(crate) fn logical_bytes(&self) -> Result<std::borrow::Cow<'_, [u8]>, codec::CodecError> {
        if self.compressed {
            codec::decompress(&self.payload, self.capacity_bytes).map(std::borrow::Cow::Owned)
        } else {
            Ok(std::borrow::Cow::Borrowed(&self.payload))
        }
    }

    /// Decompresses this chunk's payload in place, if it is currently
    /// compressed. Leaves `checksum` untouched (the logical content didn't
    /// change).
    pub(crate) fn ensure_decompressed(&mut self) -> Result<(), codec::CodecError> {
        if !self.compressed {
            return Ok(());
        }
        let raw = codec::decompress(&self.payload, self.capacity_bytes)?;
        self.payload = raw;
        self.compressed = false;
        self.compressed_size = None;
        Ok(())
    }

    /// Raw bytes, after ensuring this chunk is decompressed.
    pub(crate) fn bytes_mut(&mut self) -> Result<&mut [u8], codec::CodecError> {
        self.ensure_decompressed()?;
        Ok(&mut self.payload)
    }

    /// Raw bytes without decompressing (caller already knows it's raw).
    pub(crate) fn raw_bytes(&self) -> &[u8] {
        debug_assert!(!self.compressed);
        &self.payload
    }

    pub(crate) fn mark_dirty(&mut self, now: u64) {
        self.dirty = true;
        self.timestamp = now;
    }

    pub(crate) fn recompute_checksum(&mut self) {
        debug_assert!(!self.compressed);
        self.checksum = crc64(&self.payload);
        self.dirty = false;
    }

    /// Sets the chunk's live agent count (used by both growth and snapshot
    /// restore). The backing buffer is already capacity-sized, so this only
    /// updates header fields; it never touches `checksum`, since the
    /// checksum already covers the full capacity-sized buffer regardless of
    /// how many of its agents are currently "live".
    pub(crate) fn set_agent_count(&mut self, live_count: u32, agent_size: u32) {
        debug_assert!(live_count <= self.capacity);
        self.agent_count = live_count;
        self.data_size = live_count as usize * agent_size as usize;
    }

    /// Attempts to replace this chunk's storage with a compressed encoding.
    /// Returns `true` if compression was kept (>= 10% size reduction and a
    /// verified round trip), `false` if the reduction didn't clear the
    /// threshold (payload left untouched). A verified-but-failing round trip
    /// is an internal invariant violation and is reported to the caller via
    /// `Err`.
    pub(crate) fn try_compress(&mut self) -> Result<bool, codec::CodecError> {
        if self.compressed || self.dirty {
            return Ok(false);
        }
        let encoded = codec::compress(&self.payload);
        #[allow(clippy::cast_precision_loss)]
        let kept_too_little = encoded.len() as f64 > self.capacity_bytes as f64 * 0.9;
        if kept_too_little {
            return Ok(false);
        }
        let decoded = codec::decompress(&encoded, self.capacity_bytes)?;
        if decoded != self.payload || crc64(&decoded) != self.checksum {
            return Err(codec::CodecError::LengthMismatch {
                expected: self.capacity_bytes,
                actual: decoded.len(),
            });
        }
        self.compressed_size = Some(encoded.len());
        self.payload = encoded;
        self.compressed = true;
        Ok(true)
    }

    /// Deep-copies the logical (uncompressed) payload, for checkpointing.
    pub(crate) fn snapshot_payload(&self) -> Result<Vec<u8>, codec::CodecError> {
        Ok(self.logical_bytes()?.into_owned())
    }

    /// Overwrites this chunk's live payload from a previously-snapshotted
    /// buffer (must be exactly `capacity_bytes` long) and recomputes the
    /// checksum.
    pub(crate) fn restore_payload(&mut self, payload: Vec<u8>, now: u64) {
        debug_assert_eq!(payload.len(), self.capacity_bytes);
        self.payload = payload;
        self.compressed = false;
        self.compressed_size = None;
        self.checksum = crc64(&self.payload);
        self.dirty = false;
        self.timestamp = now;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_chunk_checksum_matches_zeroed_payload() {
        let chunk = Chunk::new_zeroed(ChunkId(0), 0, 4, 2, 16, 0);
        assert_eq!(chunk.checksum(), crc64(&vec![0u8; 64]));
    }

    #[test]
    fn compress_then_decompress_round_trips() {
        let mut chunk = Chunk::new_zeroed(ChunkId(0), 0, 256, 256, 64, 0);
        let compressed = chunk.try_compress().unwrap();
        assert!(compressed, "all-zero payload should compress well past 10%");
        assert!(chunk.is_compressed());
        let before = chunk.checksum();
        chunk.ensure_decompressed().unwrap();
        assert_eq!(chunk.checksum(), before);
        assert_eq!(chunk.raw_bytes(), vec![0u8; 256 * 64].as_slice());
    }

    #[test]
    fn dirty_chunk_is_never_compressed() {
        let mut chunk = Chunk::new_zeroed(ChunkId(0), 0, 4, 4, 16, 0);
        chunk.mark_dirty(1);
        assert!(!chunk.try_compress().unwrap());
    }
}
