// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! File content hashing with an mtime cache, so unchanged files on disk are
//! not re-read and re-hashed on every rebuild-set computation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ember_core::Hash32;

/// Errors produced while hashing a file on disk.
#[derive(Debug, thiserror::Error)]
pub enum HashFileError {
    /// The file could not be read or its metadata could not be queried.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Hashes the contents of `path`, returning a [`Hash32`].
///
/// This is the stateless entry point; it always reads the file. Prefer
/// [`FileHasher`] when hashing the same paths repeatedly across rebuild
/// cycles, since it skips the read when mtime is unchanged.
///
/// # Errors
///
/// Returns [`HashFileError::Io`] if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> Result<Hash32, HashFileError> {
    let bytes = std::fs::read(path).map_err(|source| HashFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Hash32::of(&bytes))
}

#[derive(Clone, Copy)]
struct CacheEntry {
    mtime: SystemTime,
    hash: Hash32,
}

/// Caches file content hashes keyed by path, invalidated on mtime change.
///
/// Grounded on the canonical-serialize-then-hash idiom this crate already
/// uses elsewhere: the cache never trusts stale bytes, it trusts stale
/// *metadata* and re-reads whenever that assumption is violated.
#[derive(Default)]
pub struct FileHasher {
    cache: HashMap<PathBuf, CacheEntry>,
}

impl FileHasher {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Returns the content hash of `path`, reusing the cached value when the
    /// file's mtime has not changed since the last call.
    ///
    /// # Errors
    ///
    /// Returns [`HashFileError::Io`] if the file's metadata or bytes cannot
    /// be read.
    pub fn hash(&mut self, path: &Path) -> Result<Hash32, HashFileError> {
        let metadata = std::fs::metadata(path).map_err(|source| HashFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mtime = metadata.modified().map_err(|source| HashFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(entry) = self.cache.get(path) {
            if entry.mtime == mtime {
                return Ok(entry.hash);
            }
        }

        let hash = hash_file(path)?;
        self.cache.insert(
            path.to_path_buf(),
            CacheEntry { mtime, hash },
        );
        Ok(hash)
    }

    /// Number of paths currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns `true` if no paths are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_file_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let h1 = hash_file(&path).unwrap();
        let h2 = hash_file(&path).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_file_differs_on_different_content() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.txt");
        let path_b = dir.path().join("b.txt");
        std::fs::write(&path_a, b"hello").unwrap();
        std::fs::write(&path_b, b"world").unwrap();

        assert_ne!(hash_file(&path_a).unwrap(), hash_file(&path_b).unwrap());
    }

    #[test]
    fn hash_file_missing_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        assert!(hash_file(&path).is_err());
    }

    #[test]
    fn file_hasher_caches_until_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cached.txt");
        std::fs::write(&path, b"v1").unwrap();

        let mut hasher = FileHasher::new();
        let first = hasher.hash(&path).unwrap();
        assert_eq!(hasher.len(), 1);

        // Re-hashing without modification returns the same value from cache.
        let second = hasher.hash(&path).unwrap();
        assert_eq!(first, second);

        // Bump mtime forward and change content; cache must invalidate.
        let new_mtime = SystemTime::now() + std::time::Duration::from_secs(2);
        {
            let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            f.write_all(b"v2-longer").unwrap();
        }
        let file = std::fs::File::open(&path).unwrap();
        file.set_modified(new_mtime).unwrap();

        let third = hasher.hash(&path).unwrap();
        assert_ne!(first, third);
    }
}
