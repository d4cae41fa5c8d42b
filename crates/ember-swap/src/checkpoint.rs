// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Named checkpoints over a [`ModuleSnapshot`], persisted as content-addressed
//! chunk blobs in a backing [`BlobStore`].
//!
//! Each chunk payload is stored as its own blob and pinned for the lifetime
//! of the checkpoint, so two checkpoints that happen to share identical
//! chunk content (a module swapped back to a prior version, say) dedupe for
//! free. [`CheckpointStore`] itself only tracks the per-checkpoint list of
//! blob hashes plus bookkeeping; [`RetentionPolicy`] governs which
//! historical (already-committed) checkpoints survive pruning.

use std::collections::BTreeMap;

use ember_cas::{blob_hash, BlobHash, BlobStore};
use ember_core::{ChunkId, ModuleId};
use ember_state::{ChunkSnapshot, ModuleSnapshot};

use crate::error::SwapError;
use crate::retention::RetentionPolicy;

/// One chunk's persisted location within a checkpoint.
#[derive(Clone, Debug)]
struct CheckpointChunk {
    chunk_id: ChunkId,
    agent_count: u32,
    blob: BlobHash,
}

/// A named, persisted checkpoint for one module.
#[derive(Clone, Debug)]
struct CheckpointRecord {
    agent_count: u32,
    chunks: Vec<CheckpointChunk>,
    /// Position in commit order, assigned when the checkpoint is created.
    /// Used by [`RetentionPolicy::keeps`]; `None` for the always-kept
    /// in-flight "pre-swap" checkpoint until it's promoted to historical.
    commit_index: Option<u64>,
}

/// Persists named checkpoints over a content-addressed blob store, and
/// prunes historical (post-commit) checkpoints per a [`RetentionPolicy`].
///
/// Generic over `S: BlobStore` the same way `ember-cache`'s `BuildCache<S>`
/// is: the store is owned directly and mutating operations take `&mut
/// self`, so callers that need shared access wrap the whole coordinator in
/// their own lock rather than this type hiding one internally.
pub struct CheckpointStore<S> {
    blobs: S,
    records: BTreeMap<(ModuleId, String), CheckpointRecord>,
    commits_per_module: BTreeMap<ModuleId, u64>,
    policy: RetentionPolicy,
}

impl<S: BlobStore> CheckpointStore<S> {
    /// Creates a checkpoint store backed by `blobs`, pruning historical
    /// checkpoints per `policy` on every [`CheckpointStore::promote`] call.
    pub fn new(blobs: S, policy: RetentionPolicy) -> Self {
        Self {
            blobs,
            records: BTreeMap::new(),
            commits_per_module: BTreeMap::new(),
            policy,
        }
    }

    /// Deep-copies every chunk of `snapshot` into the blob store and records
    /// it under `name`, pinning each chunk blob so it survives until the
    /// checkpoint is explicitly released.
    pub fn create(
        &mut self,
        name: impl Into<String>,
        snapshot: &ModuleSnapshot,
    ) -> Result<(), SwapError> {
        let name = name.into();
        let mut chunks = Vec::with_capacity(snapshot.chunks.len());
        for chunk in &snapshot.chunks {
            let hash = self.blobs.put(&chunk.payload);
            self.blobs.pin(&hash);
            chunks.push(CheckpointChunk {
                chunk_id: chunk.chunk_id,
                agent_count: chunk.agent_count,
                blob: hash,
            });
        }
        self.records.insert(
            (snapshot.module, name),
            CheckpointRecord {
                agent_count: snapshot.agent_count,
                chunks,
                commit_index: None,
            },
        );
        Ok(())
    }

    /// Reconstructs the [`ModuleSnapshot`] stored under `name`, verifying
    /// every chunk blob is present and its content still matches its hash.
    pub fn restore(&self, module: ModuleId, name: &str) -> Result<ModuleSnapshot, SwapError> {
        let record = self.lookup(module, name)?;
        let mut chunks = Vec::with_capacity(record.chunks.len());
        for chunk in &record.chunks {
            let bytes = self.blobs.get(&chunk.blob).ok_or_else(|| SwapError::CheckpointCorrupt {
                module,
                name: name.to_string(),
            })?;
            if blob_hash(&bytes) != chunk.blob {
                return Err(SwapError::CheckpointCorrupt {
                    module,
                    name: name.to_string(),
                });
            }
            chunks.push(ChunkSnapshot {
                chunk_id: chunk.chunk_id,
                agent_count: chunk.agent_count,
                payload: bytes.to_vec(),
            });
        }
        Ok(ModuleSnapshot {
            module,
            agent_count: record.agent_count,
            chunks,
        })
    }

    /// Unpins and drops a checkpoint's bookkeeping, e.g. after an aborted
    /// swap tears down its "pre-swap" checkpoint, or after the grace period
    /// following a commit.
    pub fn release(&mut self, module: ModuleId, name: &str) {
        if let Some(record) = self.records.remove(&(module, name.to_string())) {
            for chunk in &record.chunks {
                if !self.blob_still_referenced(module, &chunk.blob, name) {
                    self.blobs.unpin(&chunk.blob);
                }
            }
        }
    }

    /// Marks `name` as a historical (post-commit) checkpoint, assigning it
    /// the next commit-order position for this module, then prunes any
    /// checkpoint the configured [`RetentionPolicy`] no longer keeps.
    pub fn promote(&mut self, module: ModuleId, name: &str) -> Result<(), SwapError> {
        let total = {
            let counter = self.commits_per_module.entry(module).or_insert(0);
            let commit_index = *counter;
            *counter += 1;
            let record = self
                .records
                .get_mut(&(module, name.to_string()))
                .ok_or_else(|| SwapError::CheckpointNotFound {
                    module,
                    name: name.to_string(),
                })?;
            record.commit_index = Some(commit_index);
            *counter
        };
        self.prune(module, total);
        Ok(())
    }

    fn prune(&mut self, module: ModuleId, total_commits: u64) {
        let stale: Vec<String> = self
            .records
            .iter()
            .filter(|((m, _), record)| {
                *m == module
                    && record
                        .commit_index
                        .is_some_and(|idx| !self.policy.keeps(idx, total_commits))
            })
            .map(|((_, name), _)| name.clone())
            .collect();
        for name in stale {
            self.release(module, &name);
        }
    }

    fn lookup(&self, module: ModuleId, name: &str) -> Result<&CheckpointRecord, SwapError> {
        self.records
            .get(&(module, name.to_string()))
            .ok_or_else(|| SwapError::CheckpointNotFound {
                module,
                name: name.to_string(),
            })
    }

    fn blob_still_referenced(&self, module: ModuleId, blob: &BlobHash, excluding: &str) -> bool {
        self.records.iter().any(|((m, name), record)| {
            *m == module && name != excluding && record.chunks.iter().any(|c| c.blob == *blob)
        })
    }

    /// Number of checkpoints currently retained for `module`.
    #[must_use]
    pub fn checkpoint_count(&self, module: ModuleId) -> usize {
        self.records.keys().filter(|(m, _)| *m == module).count()
    }

    /// `true` if a checkpoint named `name` exists for `module`.
    #[must_use]
    pub fn contains(&self, module: ModuleId, name: &str) -> bool {
        self.records.contains_key(&(module, name.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ember_cas::MemoryTier;

    fn snapshot(module: ModuleId, fill: u8) -> ModuleSnapshot {
        ModuleSnapshot {
            module,
            agent_count: 4,
            chunks: vec![ChunkSnapshot {
                chunk_id: ChunkId(0),
                agent_count: 4,
                payload: vec![fill; 64],
            }],
        }
    }

    #[test]
    fn create_then_restore_round_trips() {
        let mut store = CheckpointStore::new(MemoryTier::default(), RetentionPolicy::KeepAll);
        let snap = snapshot(ModuleId(1), 7);
        store.create("pre-swap-0", &snap).unwrap();
        let restored = store.restore(ModuleId(1), "pre-swap-0").unwrap();
        assert_eq!(restored.chunks[0].payload, snap.chunks[0].payload);
    }

    #[test]
    fn restore_missing_checkpoint_errors() {
        let store = CheckpointStore::new(MemoryTier::default(), RetentionPolicy::KeepAll);
        let err = store.restore(ModuleId(1), "nope").unwrap_err();
        assert!(matches!(err, SwapError::CheckpointNotFound { .. }));
    }

    #[test]
    fn release_drops_the_checkpoint() {
        let mut store = CheckpointStore::new(MemoryTier::default(), RetentionPolicy::KeepAll);
        let snap = snapshot(ModuleId(1), 1);
        store.create("c", &snap).unwrap();
        assert!(store.contains(ModuleId(1), "c"));
        store.release(ModuleId(1), "c");
        assert!(!store.contains(ModuleId(1), "c"));
    }

    #[test]
    fn keep_recent_prunes_old_checkpoints_on_promote() {
        let mut store = CheckpointStore::new(
            MemoryTier::default(),
            RetentionPolicy::KeepRecent {
                window: 1,
                checkpoint_every: 1000,
            },
        );
        for i in 0..3u8 {
            let snap = snapshot(ModuleId(1), i);
            let name = format!("checkpoint-{i}");
            store.create(&name, &snap).unwrap();
            store.promote(ModuleId(1), &name).unwrap();
        }
        // window=1 keeps only the most recent commit.
        assert_eq!(store.checkpoint_count(ModuleId(1)), 1);
        assert!(store.contains(ModuleId(1), "checkpoint-2"));
    }
}
