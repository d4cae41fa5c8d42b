// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-module bookkeeping held inside the [`crate::StateManager`].

use std::collections::BTreeMap;

use ember_core::ChunkId;

use crate::chunk::Chunk;

/// Everything the state manager tracks for one registered module.
pub(crate) struct ModuleState {
    pub(crate) name: String,
    pub(crate) agent_size: u32,
    pub(crate) agent_count: u32,
    pub(crate) max_agents: u32,
    pub(crate) agents_per_chunk: u32,
    pub(crate) chunks: Vec<Chunk>,
    pub(crate) window_open: bool,
    /// Lazily-populated per-chunk backups taken the first time a chunk is
    /// touched inside the current (or most recently closed) update window.
    pub(crate) backups: BTreeMap<ChunkId, Vec<u8>>,
}

impl ModuleState {
    pub(crate) fn chunk_index_for_agent(&self, agent: u32) -> usize {
        (agent / self.agents_per_chunk) as usize
    }
}
