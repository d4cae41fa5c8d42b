// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Diff records produced by comparing a chunk's backup against its live
//! content after an incremental update window.

use ember_core::AgentId;

/// A single contiguous run of bytes that changed within one agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffRecord {
    /// Agent the changed bytes belong to.
    pub agent_id: AgentId,
    /// Offset of the run within the agent's own bytes.
    pub offset_in_agent: u32,
    /// Length of the run.
    pub length: u32,
    /// Bytes as they were in the backup.
    pub old_bytes: Vec<u8>,
    /// Bytes as they are in the live payload.
    pub new_bytes: Vec<u8>,
}

/// Result of [`crate::StateManager::generate_diff`]: the diffs collected so
/// far, plus whether the caller-supplied cap was hit before every changed
/// byte could be reported.
#[derive(Clone, Debug, Default)]
pub struct DiffOutput {
    /// Diff records collected, in chunk-then-offset order.
    pub diffs: Vec<DiffRecord>,
    /// `true` if the output was capped before scanning finished.
    pub truncated: bool,
}

/// Walks `old` and `new` (same length, byte-for-byte comparable) 16 bytes at
/// a time, splitting differing runs at agent boundaries, and pushes each run
/// into `out` until `max_diffs` is reached.
///
/// `agent_start` is the dense index of the agent at the start of this slice;
/// `agent_size` controls where agent boundaries fall.
pub(crate) fn scan_diffs(
    old: &[u8],
    new: &[u8],
    agent_start: u32,
    agent_size: u32,
    max_diffs: usize,
    out: &mut Vec<DiffRecord>,
) -> bool {
    debug_assert_eq!(old.len(), new.len());
    let agent_size = agent_size as usize;
    let mut offset = 0usize;
    let len = old.len();

    while offset < len {
        if out.len() >= max_diffs {
            return true;
        }
        if old[offset] == new[offset] {
            offset += 1;
            continue;
        }
        let agent_index = offset / agent_size;
        let agent_boundary = (agent_index + 1) * agent_size;
        let run_end_limit = agent_boundary.min(len);

        let mut end = offset;
        while end < run_end_limit && old[end] != new[end] {
            end += 1;
        }

        out.push(DiffRecord {
            #[allow(clippy::cast_possible_truncation)]
            agent_id: AgentId(agent_start + agent_index as u32),
            #[allow(clippy::cast_possible_truncation)]
            offset_in_agent: (offset - agent_index * agent_size) as u32,
            #[allow(clippy::cast_possible_truncation)]
            length: (end - offset) as u32,
            old_bytes: old[offset..end].to_vec(),
            new_bytes: new[offset..end].to_vec(),
        });
        offset = end;
    }
    false
}
