// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deep-copy snapshots of a module's chunks, used as the checkpoint and
//! rollback primitive. Naming, retention, and persistence of snapshots by
//! name belongs to the swap coordinator's checkpoint store; this crate only
//! produces and consumes the byte-identical copies.

use ember_core::{ChunkId, ModuleId};

/// A deep copy of one chunk's logical payload at snapshot time.
#[derive(Clone, Debug)]
pub struct ChunkSnapshot {
    /// Chunk this snapshot was taken from.
    pub chunk_id: ChunkId,
    /// Live agent count at snapshot time.
    pub agent_count: u32,
    /// Logical (uncompressed) payload bytes.
    pub payload: Vec<u8>,
}

/// A deep copy of every chunk owned by one module.
#[derive(Clone, Debug)]
pub struct ModuleSnapshot {
    /// Module the snapshot was taken from.
    pub module: ModuleId,
    /// Live agent count at snapshot time.
    pub agent_count: u32,
    /// Per-chunk payload copies, in chunk order.
    pub chunks: Vec<ChunkSnapshot>,
}
