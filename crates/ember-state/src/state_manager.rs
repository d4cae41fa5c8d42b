// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The module registry and state manager (spec components C4+C5), merged
//! into one owning object since every C5 operation is keyed by a module
//! that C4 must already know about.

use std::collections::BTreeMap;

use ember_core::{AgentId, ChunkId, ModuleId};
use parking_lot::Mutex;

use crate::checksum::crc64;
use crate::chunk::Chunk;
use crate::diff::{scan_diffs, DiffOutput};
use crate::error::StateError;
use crate::module::ModuleState;
use crate::snapshot::{ChunkSnapshot, ModuleSnapshot};
use crate::validate::ValidationReport;

/// A chunk holds at most 64 KiB of agent data.
const CHUNK_BYTES: usize = 64 * 1024;

/// Upper bound on a single module's state slice, to turn pathological
/// `max_agents * agent_size` products into `OutOfMemory` instead of an
/// attempted multi-terabyte allocation.
const MAX_STATE_SLICE_BYTES: usize = 1 << 34;

/// Outcome of one [`StateManager::run_compression_maintenance`] tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressionSummary {
    /// Chunks that were old enough and large enough to attempt compressing.
    pub chunks_considered: u32,
    /// Chunks where compression was kept (>= 10% reduction, verified round trip).
    pub chunks_compressed: u32,
}

/// Owns every registered module's state slice: chunked storage, checksums,
/// incremental-update diffing, checkpointing primitives, and background
/// compression. All mutation happens under a single lock; see module docs
/// for the concurrency rationale.
#[derive(Default)]
pub struct StateManager {
    modules: Mutex<BTreeMap<ModuleId, ModuleState>>,
}

impl StateManager {
    /// Creates an empty state manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modules: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers a new module, allocating its `max_agents * agent_size`
    /// state slice and partitioning it into `floor(64 KiB / agent_size)`-
    /// agent chunks.
    pub fn register(
        &self,
        module: ModuleId,
        name: impl Into<String>,
        agent_size: u32,
        initial_count: u32,
        max_agents: u32,
    ) -> Result<(), StateError> {
        let mut modules = self.modules.lock();
        if modules.contains_key(&module) {
            return Err(StateError::AlreadyRegistered(module));
        }
        if agent_size == 0 {
            return Err(StateError::OutOfMemory {
                module,
                requested_bytes: 0,
            });
        }
        (max_agents as usize)
            .checked_mul(agent_size as usize)
            .filter(|bytes| *bytes <= MAX_STATE_SLICE_BYTES)
            .ok_or(StateError::OutOfMemory {
                module,
                requested_bytes: max_agents as usize * agent_size as usize,
            })?;

        #[allow(clippy::cast_possible_truncation)]
        let agents_per_chunk = ((CHUNK_BYTES / agent_size as usize).max(1)) as u32;
        let mut chunks = Vec::new();
        let mut agent_start = 0u32;
        let mut chunk_id = 0u32;
        while agent_start < max_agents {
            let capacity = agents_per_chunk.min(max_agents - agent_start);
            let live = initial_count.saturating_sub(agent_start).min(capacity);
            chunks.push(Chunk::new_zeroed(
                ChunkId(chunk_id),
                agent_start,
                capacity,
                live,
                agent_size,
                0,
            ));
            agent_start += capacity;
            chunk_id += 1;
        }

        modules.insert(
            module,
            ModuleState {
                name: name.into(),
                agent_size,
                agent_count: initial_count.min(max_agents),
                max_agents,
                agents_per_chunk,
                chunks,
                window_open: false,
                backups: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Opens an incremental update window: subsequent `update_agent` calls
    /// will lazily back up each chunk the first time it's touched.
    pub fn begin_incremental_update(&self, module: ModuleId) -> Result<(), StateError> {
        let mut modules = self.modules.lock();
        let state = modules
            .get_mut(&module)
            .ok_or(StateError::UnknownModule(module))?;
        state.window_open = true;
        state.backups.clear();
        Ok(())
    }

    /// Overwrites one agent's bytes. A no-op (no backup, no dirty bit, no
    /// checksum work) if `new_bytes` is already identical to the live bytes.
    pub fn update_agent(
        &self,
        module: ModuleId,
        agent: AgentId,
        new_bytes: &[u8],
        now: u64,
    ) -> Result<(), StateError> {
        let mut modules = self.modules.lock();
        let state = modules
            .get_mut(&module)
            .ok_or(StateError::UnknownModule(module))?;
        if !state.window_open {
            return Err(StateError::NoOpenUpdateWindow(module));
        }
        if agent.0 >= state.agent_count {
            return Err(StateError::AgentOutOfRange {
                module,
                agent: agent.0,
                agent_count: state.agent_count,
            });
        }
        if new_bytes.len() != state.agent_size as usize {
            return Err(StateError::PayloadSizeMismatch {
                module,
                expected: state.agent_size as usize,
                actual: new_bytes.len(),
            });
        }

        let agent_size = state.agent_size as usize;
        let chunk_idx = state.chunk_index_for_agent(agent.0);
        let (chunk_id, local_agent) = {
            let chunk = state
                .chunks
                .get(chunk_idx)
                .ok_or(StateError::UnknownModule(module))?;
            (chunk.id(), agent.0 - chunk.agent_start())
        };

        if !state.backups.contains_key(&chunk_id) {
            let chunk = &state.chunks[chunk_idx];
            let backup = chunk
                .logical_bytes()
                .map_err(|_| StateError::ChecksumMismatch {
                    module,
                    chunk: chunk_id.0,
                })?
                .into_owned();
            state.backups.insert(chunk_id, backup);
        }

        let byte_offset = local_agent as usize * agent_size;
        let chunk = &mut state.chunks[chunk_idx];
        let buf = chunk.bytes_mut().map_err(|_| StateError::ChecksumMismatch {
            module,
            chunk: chunk_id.0,
        })?;
        let existing = &buf[byte_offset..byte_offset + agent_size];
        if crate::simd::equal_16_wide(existing, new_bytes) {
            return Ok(());
        }
        buf[byte_offset..byte_offset + agent_size].copy_from_slice(new_bytes);
        chunk.mark_dirty(now);
        chunk.bump_access();
        Ok(())
    }

    /// Closes the update window: every dirty chunk's checksum is recomputed
    /// and its dirty bit cleared. Backups from this window remain available
    /// as the baseline for [`StateManager::generate_diff`].
    pub fn commit_incremental_update(&self, module: ModuleId) -> Result<(), StateError> {
        let mut modules = self.modules.lock();
        let state = modules
            .get_mut(&module)
            .ok_or(StateError::UnknownModule(module))?;
        for chunk in &mut state.chunks {
            if chunk.is_dirty() {
                chunk.recompute_checksum();
            }
        }
        state.window_open = false;
        Ok(())
    }

    /// Compares each backed-up chunk against its current content, producing
    /// reversible diff records capped at `max_diffs`.
    pub fn generate_diff(
        &self,
        module: ModuleId,
        max_diffs: usize,
    ) -> Result<DiffOutput, StateError> {
        let mut modules = self.modules.lock();
        let state = modules
            .get_mut(&module)
            .ok_or(StateError::UnknownModule(module))?;
        let agent_size = state.agent_size;
        let mut diffs = Vec::new();
        let mut truncated = false;

        for (chunk_id, backup) in &state.backups {
            if truncated {
                break;
            }
            let Some(chunk) = state.chunks.get(chunk_id.0 as usize) else {
                continue;
            };
            let Ok(live) = chunk.logical_bytes() else {
                continue;
            };
            if live.len() != backup.len() {
                continue;
            }
            let hit_cap =
                scan_diffs(backup, &live, chunk.agent_start(), agent_size, max_diffs, &mut diffs);
            truncated = truncated || hit_cap;
        }

        if truncated {
            tracing::warn!(module = %module, "diff buffer overflowed; output truncated");
        }
        Ok(DiffOutput { diffs, truncated })
    }

    /// Reverses a set of diff records, restoring each run's `old_bytes`.
    pub fn apply_diff(
        &self,
        module: ModuleId,
        diffs: &[crate::diff::DiffRecord],
        now: u64,
    ) -> Result<(), StateError> {
        let mut modules = self.modules.lock();
        let state = modules
            .get_mut(&module)
            .ok_or(StateError::UnknownModule(module))?;
        let agents_per_chunk = state.agents_per_chunk;
        let agent_size = state.agent_size as usize;
        let mut touched = std::collections::BTreeSet::new();

        for diff in diffs {
            let chunk_idx = (diff.agent_id.0 / agents_per_chunk) as usize;
            let chunk_id = state
                .chunks
                .get(chunk_idx)
                .ok_or(StateError::UnknownModule(module))?
                .id();
            let chunk = &mut state.chunks[chunk_idx];
            let local_agent = diff.agent_id.0 - chunk.agent_start();
            let byte_offset = local_agent as usize * agent_size + diff.offset_in_agent as usize;
            let buf = chunk.bytes_mut().map_err(|_| StateError::ChecksumMismatch {
                module,
                chunk: chunk_id.0,
            })?;
            let end = byte_offset + diff.length as usize;
            buf[byte_offset..end].copy_from_slice(&diff.old_bytes);
            touched.insert(chunk_idx);
        }

        for idx in touched {
            state.chunks[idx].mark_dirty(now);
            state.chunks[idx].recompute_checksum();
        }
        Ok(())
    }

    /// Deep-copies every chunk's logical payload for checkpointing.
    pub fn snapshot(&self, module: ModuleId) -> Result<ModuleSnapshot, StateError> {
        let modules = self.modules.lock();
        let state = modules.get(&module).ok_or(StateError::UnknownModule(module))?;
        let mut chunks = Vec::with_capacity(state.chunks.len());
        for chunk in &state.chunks {
            let payload = chunk
                .snapshot_payload()
                .map_err(|_| StateError::ChecksumMismatch {
                    module,
                    chunk: chunk.id().0,
                })?;
            chunks.push(ChunkSnapshot {
                chunk_id: chunk.id(),
                agent_count: chunk.agent_count(),
                payload,
            });
        }
        Ok(ModuleSnapshot {
            module,
            agent_count: state.agent_count,
            chunks,
        })
    }

    /// Restores a module's chunks from a snapshot, two-phase: every chunk is
    /// validated and copied into a scratch buffer first, then every chunk's
    /// live payload is swapped in. Either every chunk is restored or (on a
    /// shape mismatch) none are.
    pub fn restore_snapshot(&self, snapshot: &ModuleSnapshot, now: u64) -> Result<(), StateError> {
        let module = snapshot.module;
        let mut modules = self.modules.lock();
        let state = modules
            .get_mut(&module)
            .ok_or(StateError::UnknownModule(module))?;
        if snapshot.chunks.len() != state.chunks.len() {
            return Err(StateError::NoSnapshot(module));
        }
        let agent_size = state.agent_size;

        let mut scratch: Vec<(u32, Vec<u8>)> = Vec::with_capacity(snapshot.chunks.len());
        for (chunk, snap) in state.chunks.iter().zip(snapshot.chunks.iter()) {
            if chunk.id() != snap.chunk_id || snap.payload.len() != chunk.capacity_bytes() {
                return Err(StateError::NoSnapshot(module));
            }
            scratch.push((snap.agent_count, snap.payload.clone()));
        }

        for (chunk, (agent_count, payload)) in state.chunks.iter_mut().zip(scratch.into_iter()) {
            chunk.restore_payload(payload, now);
            chunk.set_agent_count(agent_count, agent_size);
        }
        state.agent_count = snapshot.agent_count;
        Ok(())
    }

    /// Recomputes every chunk's checksum and compares it to the stored
    /// value, counting mismatches as corrupted agents.
    pub fn validate_module(&self, module: ModuleId) -> Result<ValidationReport, StateError> {
        let modules = self.modules.lock();
        let state = modules.get(&module).ok_or(StateError::UnknownModule(module))?;
        Ok(validate_one(module, state))
    }

    /// Validates every registered module, in ascending `ModuleId` order.
    pub fn validate_all(&self) -> Vec<ValidationReport> {
        let modules = self.modules.lock();
        modules
            .iter()
            .map(|(module, state)| validate_one(*module, state))
            .collect()
    }

    /// Grows a module's live agent count by `n`, zero-initializing the new
    /// slots (already zeroed since each chunk's buffer is capacity-sized).
    pub fn add_agents(&self, module: ModuleId, n: u32) -> Result<(), StateError> {
        let mut modules = self.modules.lock();
        let state = modules
            .get_mut(&module)
            .ok_or(StateError::UnknownModule(module))?;
        let new_count = state
            .agent_count
            .checked_add(n)
            .filter(|count| *count <= state.max_agents)
            .ok_or(StateError::GrowthExceedsCapacity {
                module,
                requested: n,
                max_agents: state.max_agents,
            })?;

        state.agent_count = new_count;
        let agent_size = state.agent_size;
        for chunk in &mut state.chunks {
            let live_in_chunk = new_count
                .saturating_sub(chunk.agent_start())
                .min(chunk.capacity());
            if live_in_chunk > chunk.agent_count() {
                chunk.set_agent_count(live_in_chunk, agent_size);
            }
        }
        Ok(())
    }

    /// Compresses chunks above `size_threshold_bytes` that haven't been
    /// written within `recent_write_window` ticks, keeping the compressed
    /// form only when it's at least 10% smaller and its round trip is exact.
    pub fn run_compression_maintenance(
        &self,
        now: u64,
        size_threshold_bytes: usize,
        recent_write_window: u64,
    ) -> Result<CompressionSummary, StateError> {
        let mut modules = self.modules.lock();
        let mut considered = 0u32;
        let mut compressed = 0u32;

        for (module, state) in modules.iter_mut() {
            for chunk in &mut state.chunks {
                if chunk.is_compressed() || chunk.is_dirty() {
                    continue;
                }
                if chunk.capacity_bytes() < size_threshold_bytes {
                    continue;
                }
                if now.saturating_sub(chunk.timestamp()) < recent_write_window {
                    continue;
                }
                considered += 1;
                let chunk_id = chunk.id();
                match chunk.try_compress() {
                    Ok(true) => compressed += 1,
                    Ok(false) => {}
                    Err(_) => {
                        return Err(StateError::CompressionRoundTripFailed {
                            module: *module,
                            chunk: chunk_id.0,
                        })
                    }
                }
            }
        }
        Ok(CompressionSummary {
            chunks_considered: considered,
            chunks_compressed: compressed,
        })
    }

    /// Current live agent count for a registered module.
    pub fn agent_count(&self, module: ModuleId) -> Result<u32, StateError> {
        let modules = self.modules.lock();
        modules
            .get(&module)
            .map(|state| state.agent_count)
            .ok_or(StateError::UnknownModule(module))
    }

    /// Number of chunks partitioning a registered module's state slice.
    pub fn chunk_count(&self, module: ModuleId) -> Result<usize, StateError> {
        let modules = self.modules.lock();
        modules
            .get(&module)
            .map(|state| state.chunks.len())
            .ok_or(StateError::UnknownModule(module))
    }
}

fn validate_one(module: ModuleId, state: &ModuleState) -> ValidationReport {
    let mut report = ValidationReport {
        module,
        chunks_checked: 0,
        chunks_corrupted: 0,
        corrupted_agents: 0,
    };
    for chunk in &state.chunks {
        report.chunks_checked += 1;
        let corrupted = match chunk.logical_bytes() {
            Ok(bytes) => crc64(&bytes) != chunk.checksum(),
            Err(_) => true,
        };
        if corrupted {
            report.chunks_corrupted += 1;
            report.corrupted_agents += chunk.agent_count();
        }
    }
    report
}
