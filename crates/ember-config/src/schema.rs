// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Optional schema validation: required keys and simple bounds checks.
//!
//! Schema validation is opt-in: a [`ConfigService`](crate::service::ConfigService)
//! constructed without a schema accepts any parsed tree.

use crate::value::ConfigValue;

/// A bound on a numeric field.
#[derive(Clone, Copy, Debug)]
pub struct Bounds {
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
}

/// One field constraint within a [`Schema`].
#[derive(Clone, Debug)]
pub struct FieldSchema {
    /// Dotted-free key name within the top-level object.
    pub key: String,
    /// Whether the key must be present.
    pub required: bool,
    /// Numeric bounds, checked only if the field is present and numeric.
    pub bounds: Option<Bounds>,
}

/// A flat schema over a top-level config object: required keys plus optional
/// numeric bounds. Deliberately not a general JSON-schema implementation;
/// callers that need bounds and required keys get them without the rest.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    fields: Vec<FieldSchema>,
}

impl Schema {
    /// Creates an empty schema (nothing required, no bounds).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field constraint, builder-style.
    #[must_use]
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Validates `tree` against this schema.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation found.
    pub fn validate(&self, tree: &ConfigValue) -> Result<(), String> {
        for field in &self.fields {
            let value = tree.get(&field.key);
            match value {
                None if field.required => {
                    return Err(format!("required key '{}' is missing", field.key));
                }
                None => continue,
                Some(v) => {
                    if let Some(bounds) = field.bounds {
                        let Some(n) = v.as_float() else {
                            return Err(format!("key '{}' must be numeric", field.key));
                        };
                        if n < bounds.min || n > bounds.max {
                            return Err(format!(
                                "key '{}' value {n} out of bounds [{}, {}]",
                                field.key, bounds.min, bounds.max
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
