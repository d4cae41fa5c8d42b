// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! A typed JSON-like tree: the parsed shape a live-config file lands in.

use std::collections::BTreeMap;

/// A node in a parsed configuration tree.
///
/// Mirrors the value space spec'd for live-config: string, integer, float,
/// boolean, null, array, object. Objects use `BTreeMap` so key order is
/// stable across reloads, which keeps diffs and logs deterministic.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Absence of a value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered list of values.
    Array(Vec<ConfigValue>),
    /// A key-ordered map of values.
    Object(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    /// Looks up `key` if this value is an object, `None` otherwise.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Returns the string value if this is a `String`, `None` otherwise.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the integer value if this is an `Int`, `None` otherwise.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the float value if this is a `Float` or `Int`, `None` otherwise.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Returns the bool value if this is a `Bool`, `None` otherwise.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}
