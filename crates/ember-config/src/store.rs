// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Byte-level config persistence seam, plus the filesystem-backed adapter.

use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::ConfigError;

/// Loads and saves raw config bytes by key. Parsing/typing is the service's
/// job; the store only moves bytes.
pub trait ConfigStore {
    /// Loads the raw bytes stored for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if nothing is stored, or
    /// [`ConfigError::Io`] on a lower-level failure.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;

    /// Persists `data` under `key`, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] on a lower-level failure.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Stores configs as JSON files under the platform config directory.
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Creates a store rooted at the user config directory (e.g. `~/.config/ember`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Other`] if the platform config directory cannot
    /// be resolved, or [`ConfigError::Io`] if it cannot be created.
    pub fn new() -> Result<Self, ConfigError> {
        let proj = ProjectDirs::from("dev", "flyingrobots", "Ember")
            .ok_or_else(|| ConfigError::Other("could not resolve config dir".into()))?;
        Self::at(proj.config_dir().to_path_buf())
    }

    /// Creates a store rooted at an explicit directory. Useful for tests and
    /// for deployments that don't want the platform default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if `base` cannot be created.
    pub fn at(base: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{key}.json"))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let path = self.path_for(key);
        match fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ConfigError::NotFound(key.to_string()))
            }
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::at(dir.path().to_path_buf()).unwrap();
        store.save_raw("renderer", b"{\"tier\":2}").unwrap();
        assert_eq!(store.load_raw("renderer").unwrap(), b"{\"tier\":2}");
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::at(dir.path().to_path_buf()).unwrap();
        assert!(matches!(
            store.load_raw("absent"),
            Err(ConfigError::NotFound(_))
        ));
    }
}
