//! Input validation helpers.
//!
//! Validates a [`PropertyMap`] against an [`ObjectTypeSpec`] taken from the
//! package schema, producing the [`CheckFailure`]s the engine expects in
//! `InvokeResponse.failures` and `CheckResponse.failures`.
//!
//! # Example
//!
//! ```
//! use pulumi_package::property::{property_map_from_json, PropertyValue};
//! use pulumi_package::schema::{ObjectTypeSpec, PropertySpec};
//! use pulumi_package::validation::validate;
//! use serde_json::json;
//!
//! let shape = ObjectTypeSpec::new()
//!     .with_required_property("name", PropertySpec::string())
//!     .with_property("language", PropertySpec::string());
//!
//! let args = property_map_from_json(json!({"name": "demo"}));
//! assert!(validate(&shape, &args).is_empty());
//!
//! let args = property_map_from_json(json!({"language": 42}));
//! let failures = validate(&shape, &args);
//! assert_eq!(failures.len(), 2);
//! assert_eq!(failures[0].property, "language");
//! assert_eq!(failures[1].property, "name");
//! ```

use crate::property::{PropertyMap, PropertyValue};
use crate::schema::{ObjectTypeSpec, TypeSpec};

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    /// Path of the offending property.
    pub property: String,
    /// Why it failed.
    pub reason: String,
}

impl CheckFailure {
    /// Create a failure for the given property.
    pub fn new(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.property, self.reason)
    }
}

impl From<CheckFailure> for crate::generated::CheckFailure {
    fn from(failure: CheckFailure) -> Self {
        Self {
            property: failure.property,
            reason: failure.reason,
        }
    }
}

/// Validate a property map against an object shape.
///
/// Returns failures in property order: type errors for present properties
/// first, then missing required properties. An empty list means the map is
/// valid.
///
/// # Validation Rules
///
/// - Required properties must be present and non-null
/// - Unknown values pass (they cannot be checked until they resolve)
/// - Secrets and output values are checked by their underlying value
/// - Properties not named in the shape are ignored
pub fn validate(shape: &ObjectTypeSpec, props: &PropertyMap) -> Vec<CheckFailure> {
    let mut failures = Vec::new();

    for (name, spec) in &shape.properties {
        if let Some(value) = props.get(name) {
            validate_type(&spec.type_spec, value, name, &mut failures);
        }
    }

    for name in &shape.required {
        match props.get(name) {
            None | Some(PropertyValue::Null) => {
                failures.push(CheckFailure::new(
                    name.clone(),
                    format!("missing required property '{}'", name),
                ));
            },
            Some(_) => {},
        }
    }

    failures
}

/// Validate a property map, returning `Err` with the failures if any.
pub fn validate_result(shape: &ObjectTypeSpec, props: &PropertyMap) -> Result<(), Vec<CheckFailure>> {
    let failures = validate(shape, props);
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

/// Check if a property map is valid against an object shape.
pub fn is_valid(shape: &ObjectTypeSpec, props: &PropertyMap) -> bool {
    validate(shape, props).is_empty()
}

fn validate_type(spec: &TypeSpec, value: &PropertyValue, path: &str, failures: &mut Vec<CheckFailure>) {
    let Some(value) = value.resolved() else {
        return;
    };
    if value.is_null() {
        return;
    }
    let Some(kind) = spec.kind.as_deref() else {
        // References and `Any` accept everything.
        return;
    };

    match (kind, value) {
        ("string", PropertyValue::String(_)) => {},
        ("boolean", PropertyValue::Bool(_)) => {},
        ("number", PropertyValue::Number(_)) => {},
        ("integer", PropertyValue::Number(n)) if n.fract() == 0.0 => {},
        ("array", PropertyValue::Array(items)) => {
            if let Some(item_spec) = &spec.items {
                for (i, item) in items.iter().enumerate() {
                    validate_type(item_spec, item, &format!("{}[{}]", path, i), failures);
                }
            }
        },
        ("object", PropertyValue::Object(map)) => {
            if let Some(value_spec) = &spec.additional_properties {
                for (key, item) in map {
                    validate_type(value_spec, item, &format!("{}.{}", path, key), failures);
                }
            }
        },
        // Resource references travel as strings once downgraded.
        ("string", PropertyValue::ResourceReference(_)) => {},
        (expected, actual) => failures.push(CheckFailure::new(
            path,
            format!("expected {}, got {}", expected, actual.type_name()),
        )),
    }
}
