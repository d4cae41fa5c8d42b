// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Build cache.
//!
//! Maps `(content_hash, dependency_hash)` to a cached [`ArtifactRecord`].
//! A lookup validates the stored artifact's content hash still matches the
//! blob in [`ember_cas`] (guarding against external mutation); a mismatch or
//! missing blob is reported as a plain cache miss, never an error. Eviction
//! is LRU by last-hit timestamp once the configured byte budget is exceeded.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions
)]

use std::collections::HashMap;
use std::path::PathBuf;

use ember_cas::{blob_hash, BlobHash, BlobStore};
use ember_core::Hash32;

/// What the build actually produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// A compiled binary module image.
    ModuleImage,
    /// A compiled shader binary.
    Shader,
    /// Anything else the build pipeline produces.
    Other,
}

/// Cache key: content hash of the source plus hash of its dependency set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Hash of the source unit's own content.
    pub content_hash: Hash32,
    /// Hash of the source unit's transitive dependency set.
    pub dependency_hash: Hash32,
}

/// A cached build result.
#[derive(Clone, Debug)]
pub struct ArtifactRecord {
    /// Where the source lives on disk.
    pub source_path: PathBuf,
    /// Where the artifact was written.
    pub output_path: PathBuf,
    /// CAS hash of the artifact bytes, used to detect external mutation.
    pub artifact_hash: BlobHash,
    /// What kind of artifact this is.
    pub kind: ArtifactKind,
    /// Wall-clock build time in nanoseconds.
    pub build_time_ns: u64,
    /// Monotonic tick of the entry's last cache hit (for LRU eviction).
    last_hit: u64,
    /// Byte size of the cached artifact, for budget accounting.
    size_bytes: usize,
}

/// Outcome of a [`BuildCache::lookup`].
#[derive(Debug)]
pub enum Lookup {
    /// Cache hit: the stored artifact is still byte-identical.
    Hit(ArtifactRecord),
    /// No entry, or the stored entry no longer matches what's on disk —
    /// both are reported identically: a miss, never an error.
    Miss,
}

/// Errors specific to cache storage, distinct from ordinary misses.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The artifact directory could not be read or written.
    #[error("cache artifact I/O error: {0}")]
    Io(String),
}

/// An in-memory build cache over a backing [`BlobStore`].
///
/// `tick` is a caller-supplied monotonic counter (e.g. a build sequence
/// number) rather than a wall clock, so eviction ordering is deterministic
/// and testable without timing.
pub struct BuildCache<S> {
    blobs: S,
    entries: HashMap<CacheKey, ArtifactRecord>,
    by_source: HashMap<PathBuf, Vec<CacheKey>>,
    max_bytes: usize,
    total_bytes: usize,
    tick: u64,
}

impl<S: BlobStore> BuildCache<S> {
    /// Creates a cache backed by `blobs`, evicting once `max_bytes` is exceeded.
    #[must_use]
    pub fn new(blobs: S, max_bytes: usize) -> Self {
        Self {
            blobs,
            entries: HashMap::new(),
            by_source: HashMap::new(),
            max_bytes,
            total_bytes: 0,
            tick: 0,
        }
    }

    /// Looks up `key`. A hit requires both a stored entry for `key` and that
    /// the backing blob's recomputed hash still equals the stored hash.
    pub fn lookup(&mut self, key: CacheKey) -> Lookup {
        let Some(artifact_hash) = self.entries.get(&key).map(|entry| entry.artifact_hash) else {
            return Lookup::Miss;
        };
        let Some(bytes) = self.blobs.get(&artifact_hash) else {
            // Blob evicted or never landed: corrupted-as-miss, invalidate.
            self.invalidate(key);
            return Lookup::Miss;
        };
        if blob_hash(&bytes) != artifact_hash {
            self.invalidate(key);
            return Lookup::Miss;
        }

        self.tick += 1;
        let tick = self.tick;
        let Some(record) = self.entries.get_mut(&key) else {
            return Lookup::Miss;
        };
        record.last_hit = tick;
        Lookup::Hit(record.clone())
    }

    /// Inserts or overwrites the entry for `key` with fresh build output,
    /// evicting LRU entries afterward if the byte budget is exceeded.
    pub fn insert(
        &mut self,
        key: CacheKey,
        source_path: PathBuf,
        output_path: PathBuf,
        artifact_bytes: &[u8],
        kind: ArtifactKind,
        build_time_ns: u64,
    ) {
        let artifact_hash = self.blobs.put(artifact_bytes);
        self.tick += 1;

        if let Some(old) = self.entries.remove(&key) {
            self.total_bytes -= old.size_bytes;
        }

        let size_bytes = artifact_bytes.len();
        self.total_bytes += size_bytes;
        self.entries.insert(
            key,
            ArtifactRecord {
                source_path: source_path.clone(),
                output_path,
                artifact_hash,
                kind,
                build_time_ns,
                last_hit: self.tick,
                size_bytes,
            },
        );
        self.by_source.entry(source_path).or_default().push(key);

        self.evict_over_budget();
    }

    /// Invalidates every cache entry whose source path equals `source_path`.
    pub fn invalidate_source(&mut self, source_path: &std::path::Path) {
        if let Some(keys) = self.by_source.remove(source_path) {
            for key in keys {
                self.invalidate(key);
            }
        }
    }

    fn invalidate(&mut self, key: CacheKey) {
        if let Some(entry) = self.entries.remove(&key) {
            self.total_bytes -= entry.size_bytes;
        }
    }

    fn evict_over_budget(&mut self) {
        if self.total_bytes <= self.max_bytes {
            return;
        }
        let mut by_age: Vec<(CacheKey, u64)> =
            self.entries.iter().map(|(k, v)| (*k, v.last_hit)).collect();
        by_age.sort_unstable_by_key(|(_, last_hit)| *last_hit);

        for (key, _) in by_age {
            if self.total_bytes <= self.max_bytes {
                break;
            }
            self.invalidate(key);
        }
    }

    /// Current total bytes tracked by the cache (sum of artifact sizes).
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Number of entries currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ember_cas::MemoryTier;

    fn key(n: u8) -> CacheKey {
        let mut bytes = [0u8; 32];
        bytes[0] = n;
        CacheKey {
            content_hash: Hash32(bytes),
            dependency_hash: Hash32::ZERO,
        }
    }

    #[test]
    fn miss_on_empty_cache() {
        let mut cache = BuildCache::new(MemoryTier::new(), 1_000_000);
        assert!(matches!(cache.lookup(key(1)), Lookup::Miss));
    }

    #[test]
    fn hit_after_insert_with_matching_bytes() {
        let mut cache = BuildCache::new(MemoryTier::new(), 1_000_000);
        cache.insert(
            key(1),
            PathBuf::from("src/a.rs"),
            PathBuf::from("out/a.so"),
            b"artifact bytes",
            ArtifactKind::ModuleImage,
            1_000,
        );
        let Lookup::Hit(record) = cache.lookup(key(1)) else {
            unreachable!("insert just populated this key");
        };
        assert_eq!(record.build_time_ns, 1_000);
    }

    #[test]
    fn corrupted_blob_reports_as_miss_and_invalidates() {
        let mut store = MemoryTier::new();
        let bytes = b"artifact bytes";
        let real_hash = blob_hash(bytes);
        store.put(bytes);

        let mut cache = BuildCache::new(store, 1_000_000);
        // Manually insert an entry whose stored hash doesn't match the blob
        // store's content (simulating external mutation of the on-disk blob).
        cache.entries.insert(
            key(9),
            ArtifactRecord {
                source_path: PathBuf::from("src/x.rs"),
                output_path: PathBuf::from("out/x.so"),
                artifact_hash: real_hash,
                kind: ArtifactKind::Other,
                build_time_ns: 0,
                last_hit: 0,
                size_bytes: bytes.len(),
            },
        );
        cache.total_bytes = bytes.len();
        // Mutate the backing store's blob contents out from under the hash.
        cache.blobs = MemoryTier::new();
        cache.blobs.put(b"different bytes entirely");

        assert!(matches!(cache.lookup(key(9)), Lookup::Miss));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn eviction_drops_least_recently_hit_entry() {
        let mut cache = BuildCache::new(MemoryTier::new(), 10);
        cache.insert(
            key(1),
            PathBuf::from("a.rs"),
            PathBuf::from("a.so"),
            b"aaaaa",
            ArtifactKind::ModuleImage,
            0,
        );
        cache.insert(
            key(2),
            PathBuf::from("b.rs"),
            PathBuf::from("b.so"),
            b"bbbbb",
            ArtifactKind::ModuleImage,
            0,
        );
        // Touch key(1) so key(2) becomes the older (LRU) entry.
        let _ = cache.lookup(key(1));

        cache.insert(
            key(3),
            PathBuf::from("c.rs"),
            PathBuf::from("c.so"),
            b"ccccc",
            ArtifactKind::ModuleImage,
            0,
        );

        assert!(matches!(cache.lookup(key(2)), Lookup::Miss), "LRU entry should be evicted");
        assert!(matches!(cache.lookup(key(1)), Lookup::Hit(_)));
        assert!(matches!(cache.lookup(key(3)), Lookup::Hit(_)));
    }

    #[test]
    fn invalidate_source_removes_all_its_keys() {
        let mut cache = BuildCache::new(MemoryTier::new(), 1_000_000);
        cache.insert(
            key(1),
            PathBuf::from("shared.rs"),
            PathBuf::from("a.so"),
            b"aaaaa",
            ArtifactKind::ModuleImage,
            0,
        );
        cache.invalidate_source(&PathBuf::from("shared.rs"));
        assert!(matches!(cache.lookup(key(1)), Lookup::Miss));
    }
}
