// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Maps the CLI's string module names onto the typed [`ModuleId`]s every
//! other component addresses modules by.

use std::collections::BTreeMap;

use ember_core::ModuleId;

/// Bookkeeping the registry keeps per loaded module, independent of the
/// state manager's own per-module data.
#[derive(Clone, Debug)]
pub struct ModuleEntry {
    /// Stable id other components key their own state by.
    pub id: ModuleId,
    /// Name this module was loaded under.
    pub name: String,
    /// Whether the module currently accepts calls (set `false` by
    /// `UNLOAD_MODULE`).
    pub active: bool,
    /// Whether the module is tagged hot-swappable.
    pub hot_swappable: bool,
    /// Version last installed by a successful swap; `0` until the first one.
    pub version: u32,
}

/// Assigns a fresh [`ModuleId`] to every newly loaded name and remembers the
/// mapping both ways.
#[derive(Default)]
pub struct ModuleRegistry {
    by_name: BTreeMap<String, ModuleId>,
    entries: BTreeMap<ModuleId, ModuleEntry>,
    next_id: u32,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` under a freshly assigned id, hot-swappable by
    /// default. Returns `None` if `name` is already registered.
    pub fn load(&mut self, name: impl Into<String>) -> Option<ModuleId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return None;
        }
        let id = ModuleId(self.next_id);
        self.next_id += 1;
        self.by_name.insert(name.clone(), id);
        self.entries.insert(
            id,
            ModuleEntry {
                id,
                name,
                active: true,
                hot_swappable: true,
                version: 0,
            },
        );
        Some(id)
    }

    /// Id registered for `name`, if any.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    /// Entry for `id`, if registered.
    #[must_use]
    pub fn entry(&self, id: ModuleId) -> Option<&ModuleEntry> {
        self.entries.get(&id)
    }

    /// Marks `name`'s module inactive. The state manager keeps no removal
    /// API, so "unload" means "no longer callable", not "state freed".
    pub fn deactivate(&mut self, name: &str) -> Option<ModuleId> {
        let id = *self.by_name.get(name)?;
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.active = false;
        }
        Some(id)
    }

    /// Records the version a successful swap installed for `id`.
    pub fn set_version(&mut self, id: ModuleId, version: u32) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.version = version;
        }
    }

    /// Number of modules ever loaded, active or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no module has ever been loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of every currently active module.
    pub fn active_names(&self) -> impl Iterator<Item = &str> {
        self.entries.values().filter(|e| e.active).map(|e| e.name.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn load_assigns_distinct_ids() {
        let mut registry = ModuleRegistry::new();
        let a = registry.load("renderer").unwrap();
        let b = registry.load("physics").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn loading_the_same_name_twice_fails() {
        let mut registry = ModuleRegistry::new();
        registry.load("renderer").unwrap();
        assert!(registry.load("renderer").is_none());
    }

    #[test]
    fn deactivate_marks_inactive_without_forgetting() {
        let mut registry = ModuleRegistry::new();
        let id = registry.load("renderer").unwrap();
        registry.deactivate("renderer");
        assert!(!registry.entry(id).unwrap().active);
        assert_eq!(registry.active_names().count(), 0);
    }

    #[test]
    fn unknown_name_resolves_to_none() {
        let registry = ModuleRegistry::new();
        assert_eq!(registry.id_of("never-loaded"), None);
    }
}
