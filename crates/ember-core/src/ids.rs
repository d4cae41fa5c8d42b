// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifiers shared by the module registry, state manager, and swap
//! coordinator.
//!
//! Following the newtype-over-raw-bits pattern used throughout the corpus
//! (`BlobHash` over `[u8; 32]`, `NodeId`/`EdgeId` over hash bytes): each id
//! here is a thin wrapper with public inner bits for zero-cost access and a
//! `Display` impl suited to logging.

use serde::{Deserialize, Serialize};

/// Stable identifier for a registered, replaceable module.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Dense index of an agent record within a module's state slice.
///
/// `0 <= AgentId.0 < agent_count`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

/// Identifier of a fixed-size chunk within a module's state slice.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ChunkId(pub u32);

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chunk#{}", self.0)
    }
}

/// A 32-byte content/dependency digest, following `echo-cas`'s `BlobHash`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// A digest of all zero bytes, used as the initial/empty-input hash.
    pub const ZERO: Self = Self([0u8; 32]);

    /// View the digest as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// BLAKE3 digest of `bytes`.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash32_of_is_deterministic() {
        assert_eq!(Hash32::of(b"hello"), Hash32::of(b"hello"));
        assert_ne!(Hash32::of(b"hello"), Hash32::of(b"world"));
    }

    #[test]
    fn display_formats_are_stable() {
        assert_eq!(ModuleId(7).to_string(), "module#7");
        assert_eq!(AgentId(3).to_string(), "agent#3");
        assert_eq!(ChunkId(1).to_string(), "chunk#1");
    }
}
