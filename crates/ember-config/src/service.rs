// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed config tree with one-slot rollback.

use std::sync::Arc;

use crate::error::ConfigError;
use crate::parser::{ConfigParser, JsonParser};
use crate::schema::Schema;
use crate::store::ConfigStore;
use crate::value::ConfigValue;

/// Reloads and validates a parsed config tree, keeping a one-slot backup for
/// rollback.
///
/// On `reload`: the new bytes are parsed; a parse failure leaves the current
/// tree untouched and returns [`ConfigError::ConfigParseError`]. On parse
/// success, an optional schema is checked; a violation likewise leaves the
/// current tree untouched. Only on both successes does the previous tree
/// move to the backup slot and the new tree become current — rollback is
/// then a pointer swap, not a re-parse.
pub struct ConfigService<S, P = JsonParser> {
    store: S,
    parser: P,
    schema: Option<Schema>,
    current: Arc<ConfigValue>,
    backup: Option<Arc<ConfigValue>>,
    on_change: Option<Box<dyn FnMut(&ConfigValue) + Send>>,
}

impl<S: ConfigStore> ConfigService<S, JsonParser> {
    /// Creates a service with the default JSON parser and no schema.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_parser(store, JsonParser)
    }
}

impl<S: ConfigStore, P: ConfigParser> ConfigService<S, P> {
    /// Creates a service with an explicit parser.
    #[must_use]
    pub fn with_parser(store: S, parser: P) -> Self {
        Self {
            store,
            parser,
            schema: None,
            current: Arc::new(ConfigValue::Null),
            backup: None,
            on_change: None,
        }
    }

    /// Attaches a schema; subsequent reloads validate against it.
    #[must_use]
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Registers a callback invoked after a successful reload or rollback.
    pub fn set_on_change(&mut self, callback: impl FnMut(&ConfigValue) + Send + 'static) {
        self.on_change = Some(Box::new(callback));
    }

    /// Returns the currently active tree.
    #[must_use]
    pub fn current(&self) -> &ConfigValue {
        &self.current
    }

    /// Loads `key` from the store and installs it as the current tree,
    /// bypassing the backup/rollback machinery (first load has no prior
    /// tree to preserve).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`]/[`ConfigError::Io`] from the store,
    /// [`ConfigError::ConfigParseError`] on malformed content, or
    /// [`ConfigError::SchemaViolation`] if a schema is attached and fails.
    pub fn load(&mut self, key: &str) -> Result<(), ConfigError> {
        let bytes = self.store.load_raw(key)?;
        let tree = self.parser.parse(&bytes)?;
        self.check_schema(&tree)?;
        self.current = Arc::new(tree);
        self.fire_change();
        Ok(())
    }

    /// Reacts to a file-change event: parses `new_bytes` and, on success,
    /// moves the current tree to backup before installing the new one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConfigParseError`] if `new_bytes` does not
    /// parse, or [`ConfigError::SchemaViolation`] if a schema is attached
    /// and the parsed tree fails it. In both cases the current tree (and
    /// backup slot) are left untouched.
    pub fn reload(&mut self, new_bytes: &[u8]) -> Result<(), ConfigError> {
        let tree = self.parser.parse(new_bytes)?;
        self.check_schema(&tree)?;
        self.backup = Some(Arc::clone(&self.current));
        self.current = Arc::new(tree);
        self.fire_change();
        Ok(())
    }

    /// Restores the previous tree from the backup slot via pointer swap.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoBackup`] if no prior tree was backed up
    /// (e.g. no successful `reload` has happened yet).
    pub fn rollback(&mut self, key_for_error: &str) -> Result<(), ConfigError> {
        let Some(backup) = self.backup.take() else {
            return Err(ConfigError::NoBackup(key_for_error.to_string()));
        };
        self.current = backup;
        self.fire_change();
        Ok(())
    }

    /// Persists `key`'s current tree's raw bytes via the underlying store.
    ///
    /// This is a convenience for callers that mutate config out-of-band
    /// (e.g. a CLI `SET` command) and want to flush it back to disk; the
    /// live-reload path never calls this itself.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] on a lower-level store failure.
    pub fn persist_raw(&self, key: &str, raw: &[u8]) -> Result<(), ConfigError> {
        self.store.save_raw(key, raw)
    }

    fn check_schema(&self, tree: &ConfigValue) -> Result<(), ConfigError> {
        match &self.schema {
            Some(schema) => schema.validate(tree).map_err(ConfigError::SchemaViolation),
            None => Ok(()),
        }
    }

    fn fire_change(&mut self) {
        if let Some(callback) = self.on_change.as_mut() {
            callback(&self.current);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::{Bounds, FieldSchema};
    use crate::store::FsConfigStore;

    fn service() -> ConfigService<FsConfigStore> {
        let dir = tempfile::tempdir().unwrap();
        ConfigService::new(FsConfigStore::at(dir.path().to_path_buf()).unwrap())
    }

    #[test]
    fn reload_moves_current_to_backup() {
        let mut svc = service();
        svc.reload(br#"{"tier": 1}"#).unwrap();
        assert_eq!(svc.current().get("tier").and_then(ConfigValue::as_int), Some(1));
        svc.reload(br#"{"tier": 2}"#).unwrap();
        assert_eq!(svc.current().get("tier").and_then(ConfigValue::as_int), Some(2));
    }

    #[test]
    fn malformed_reload_keeps_previous_tree() {
        let mut svc = service();
        svc.reload(br#"{"tier": 1}"#).unwrap();
        let err = svc.reload(b"{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::ConfigParseError(_)));
        assert_eq!(svc.current().get("tier").and_then(ConfigValue::as_int), Some(1));
    }

    #[test]
    fn rollback_restores_prior_tree() {
        let mut svc = service();
        svc.reload(br#"{"tier": 1}"#).unwrap();
        svc.reload(br#"{"tier": 2}"#).unwrap();
        svc.rollback("renderer").unwrap();
        assert_eq!(svc.current().get("tier").and_then(ConfigValue::as_int), Some(1));
    }

    #[test]
    fn rollback_without_backup_errors() {
        let mut svc = service();
        assert!(matches!(
            svc.rollback("renderer"),
            Err(ConfigError::NoBackup(_))
        ));
    }

    #[test]
    fn schema_violation_keeps_previous_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = ConfigService::new(FsConfigStore::at(dir.path().to_path_buf()).unwrap())
            .with_schema(Schema::new().with_field(FieldSchema {
                key: "tier".to_string(),
                required: true,
                bounds: Some(Bounds { min: 0.0, max: 3.0 }),
            }));
        svc.reload(br#"{"tier": 1}"#).unwrap();
        let err = svc.reload(br#"{"tier": 99}"#).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaViolation(_)));
        assert_eq!(svc.current().get("tier").and_then(ConfigValue::as_int), Some(1));
    }

    #[test]
    fn on_change_callback_fires_on_reload_and_rollback() {
        let mut svc = service();
        let calls = Arc::new(std::sync::Mutex::new(0usize));
        let calls_clone = Arc::clone(&calls);
        svc.set_on_change(move |_tree| {
            *calls_clone.lock().unwrap() += 1;
        });
        svc.reload(br#"{"tier": 1}"#).unwrap();
        svc.reload(br#"{"tier": 2}"#).unwrap();
        svc.rollback("renderer").unwrap();
        assert_eq!(*calls.lock().unwrap(), 3);
    }
}
