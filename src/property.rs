//! Property values and their wire encoding.
//!
//! The engine exchanges resource inputs, outputs and invoke arguments as
//! `google.protobuf.Struct` values. Values that JSON cannot express directly
//! (secrets, unknowns, resource references, output values) are encoded as
//! objects tagged with a well-known signature key, or as a sentinel string in
//! the case of unknowns.
//!
//! [`unmarshal_properties`] and [`marshal_properties`] translate between that
//! encoding and [`PropertyMap`], with [`MarshalOptions`] deciding which of the
//! special values survive the translation.
//!
//! # Example
//!
//! ```
//! use pulumi_package::property::{
//!     marshal_properties, unmarshal_properties, MarshalOptions, PropertyMap, PropertyValue,
//! };
//!
//! let mut props = PropertyMap::new();
//! props.insert("name".to_string(), PropertyValue::from("demo"));
//! props.insert("bucket".to_string(), PropertyValue::Computed);
//!
//! let opts = MarshalOptions::new("example").keep_unknowns();
//! let wire = marshal_properties(&props, &opts).unwrap();
//! let back = unmarshal_properties(Some(&wire), &opts).unwrap();
//! assert_eq!(back, props);
//! ```

use std::collections::BTreeMap;

use prost_types::value::Kind;
use prost_types::{ListValue, Struct, Value};

use crate::error::ProviderError;

/// Key under which special values carry their signature.
pub const SIG_KEY: &str = "4dabf18193072939515e22adb298388d";
/// Signature of a secret value.
pub const SECRET_SIG: &str = "1b47061264138c4ac30d75fd1eb44270";
/// Signature of a resource reference.
pub const RESOURCE_REFERENCE_SIG: &str = "5cf8f73096256a8f31e491e813e4eb8e";
/// Signature of an output value.
pub const OUTPUT_VALUE_SIG: &str = "d0e6a833031e9bbcd3f4e8bde6ca49a4";
/// Signature of an asset.
pub const ASSET_SIG: &str = "c44067f5952c0a294b673a41bacd8c17";
/// Signature of an archive.
pub const ARCHIVE_SIG: &str = "0def7320c3a5731c473e5ecbe6d01bc7";
/// Sentinel string standing in for a value that is not known yet.
pub const UNKNOWN_STRING_VALUE: &str = "04da6b54-80e4-46f7-96ec-b56ff0331ba9";

/// A bag of named property values, ordered by key.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A single property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// An explicit null.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number. The wire format has no integers.
    Number(f64),
    /// A string.
    String(String),
    /// An ordered list of values.
    Array(Vec<PropertyValue>),
    /// A nested property map.
    Object(PropertyMap),
    /// A value that must not be displayed or persisted in plaintext.
    Secret(Box<PropertyValue>),
    /// A value that will only be known after the deployment runs.
    Computed,
    /// A reference to another resource.
    ResourceReference(ResourceReference),
    /// A value annotated with its secretness, knownness and dependencies.
    Output(OutputValue),
}

/// A strongly typed reference to a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    /// URN of the referenced resource.
    pub urn: String,
    /// ID of a custom resource. `Some("")` means the ID is unknown.
    pub id: Option<String>,
    /// Version of the package that defines the resource, if any.
    pub package_version: String,
}

/// An output value carried across the provider boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputValue {
    /// The underlying value. `None` when not known.
    pub element: Option<Box<PropertyValue>>,
    /// Whether the value is known.
    pub known: bool,
    /// Whether the value is secret.
    pub secret: bool,
    /// URNs of resources the value depends on.
    pub dependencies: Vec<String>,
}

impl PropertyValue {
    /// Wrap a value as a secret.
    pub fn secret(value: impl Into<PropertyValue>) -> Self {
        Self::Secret(Box::new(value.into()))
    }

    /// Returns the string if this is a plain string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the elements if this is an array value.
    pub fn as_array(&self) -> Option<&[PropertyValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the map if this is an object value.
    pub fn as_object(&self) -> Option<&PropertyMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Whether this is an explicit null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the value is unknown at this level.
    pub fn is_computed(&self) -> bool {
        match self {
            Self::Computed => true,
            Self::Output(output) => !output.known,
            Self::Secret(inner) => inner.is_computed(),
            _ => false,
        }
    }

    /// Peel secret and output wrappers off a value.
    ///
    /// Returns `None` when the value, or the value it wraps, is unknown.
    pub fn resolved(&self) -> Option<&PropertyValue> {
        match self {
            Self::Computed => None,
            Self::Secret(inner) => inner.resolved(),
            Self::Output(output) if output.known => {
                output.element.as_deref().and_then(PropertyValue::resolved)
            },
            Self::Output(_) => None,
            other => Some(other),
        }
    }

    /// A short name for the kind of value, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Secret(_) => "secret",
            Self::Computed => "unknown",
            Self::ResourceReference(_) => "resource reference",
            Self::Output(_) => "output",
        }
    }

    /// Convert to plain JSON, dropping secretness.
    ///
    /// Unknowns become `null`; resource references become their ID when one
    /// is known and their URN otherwise.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null | Self::Computed => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(PropertyValue::to_json).collect())
            },
            Self::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::Secret(inner) => inner.to_json(),
            Self::ResourceReference(reference) => match &reference.id {
                Some(id) if !id.is_empty() => serde_json::Value::String(id.clone()),
                _ => serde_json::Value::String(reference.urn.clone()),
            },
            Self::Output(output) => output
                .element
                .as_ref()
                .map(|v| v.to_json())
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(PropertyValue::from).collect())
            },
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, PropertyValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(value: Vec<PropertyValue>) -> Self {
        Self::Array(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        Self::Array(value.into_iter().map(PropertyValue::String).collect())
    }
}

impl From<PropertyMap> for PropertyValue {
    fn from(value: PropertyMap) -> Self {
        Self::Object(value)
    }
}

/// Build a property map from a JSON object. Non-objects yield an empty map.
pub fn property_map_from_json(value: serde_json::Value) -> PropertyMap {
    match PropertyValue::from(value) {
        PropertyValue::Object(map) => map,
        _ => PropertyMap::new(),
    }
}

/// Convert a property map to a JSON object.
pub fn property_map_to_json(map: &PropertyMap) -> serde_json::Value {
    PropertyValue::Object(map.clone()).to_json()
}

/// Controls which special values survive marshaling.
///
/// All flags default to `false`: unknowns are dropped, secrets unwrapped,
/// resource references and output values downgraded to plain values, and
/// nulls kept.
#[derive(Debug, Clone, Default)]
pub struct MarshalOptions {
    /// Prefix for error messages, e.g. `pulumi-package.Invoke(tok).args`.
    pub label: String,
    /// Keep unknown values instead of dropping them.
    pub keep_unknowns: bool,
    /// Drop null entries from maps.
    pub skip_nulls: bool,
    /// Keep secrets strongly typed instead of unwrapping them.
    pub keep_secrets: bool,
    /// Keep resource references instead of downgrading them to IDs or URNs.
    pub keep_resources: bool,
    /// Keep output values instead of downgrading them to their element.
    pub keep_output_values: bool,
}

impl MarshalOptions {
    /// Create options with the given error label and every flag off.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Keep unknown values.
    pub fn keep_unknowns(mut self) -> Self {
        self.keep_unknowns = true;
        self
    }

    /// Drop null entries from maps.
    pub fn skip_nulls(mut self) -> Self {
        self.skip_nulls = true;
        self
    }

    /// Keep secrets strongly typed.
    pub fn keep_secrets(mut self) -> Self {
        self.keep_secrets = true;
        self
    }

    /// Keep resource references strongly typed.
    pub fn keep_resources(mut self) -> Self {
        self.keep_resources = true;
        self
    }

    /// Keep output values strongly typed.
    pub fn keep_output_values(mut self) -> Self {
        self.keep_output_values = true;
        self
    }

    fn error(&self, path: &str, msg: impl std::fmt::Display) -> ProviderError {
        if self.label.is_empty() {
            ProviderError::Property(format!("{}: {}", path, msg))
        } else {
            ProviderError::Property(format!("{}.{}: {}", self.label, path, msg))
        }
    }
}

// =========================================================================
// Unmarshaling
// =========================================================================

/// Decode a wire struct into a property map.
///
/// A missing struct decodes to an empty map.
pub fn unmarshal_properties(
    props: Option<&Struct>,
    opts: &MarshalOptions,
) -> Result<PropertyMap, ProviderError> {
    let mut result = PropertyMap::new();
    if let Some(props) = props {
        unmarshal_fields(&props.fields, "", opts, &mut result)?;
    }
    Ok(result)
}

fn unmarshal_fields(
    fields: &BTreeMap<String, Value>,
    path: &str,
    opts: &MarshalOptions,
    out: &mut PropertyMap,
) -> Result<(), ProviderError> {
    for (key, value) in fields {
        let key_path = join_path(path, key);
        if let Some(v) = unmarshal_value(value, &key_path, opts)? {
            if opts.skip_nulls && v.is_null() {
                continue;
            }
            out.insert(key.clone(), v);
        }
    }
    Ok(())
}

/// Decode a single wire value. `Ok(None)` means the value was dropped.
pub fn unmarshal_value(
    value: &Value,
    path: &str,
    opts: &MarshalOptions,
) -> Result<Option<PropertyValue>, ProviderError> {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => Ok(Some(PropertyValue::Null)),
        Some(Kind::BoolValue(b)) => Ok(Some(PropertyValue::Bool(*b))),
        Some(Kind::NumberValue(n)) => Ok(Some(PropertyValue::Number(*n))),
        Some(Kind::StringValue(s)) if s == UNKNOWN_STRING_VALUE => Ok(computed(opts)),
        Some(Kind::StringValue(s)) => Ok(Some(PropertyValue::String(s.clone()))),
        Some(Kind::ListValue(list)) => {
            let mut items = Vec::with_capacity(list.values.len());
            for (i, item) in list.values.iter().enumerate() {
                let item_path = format!("{}[{}]", path, i);
                items.push(unmarshal_value(item, &item_path, opts)?.unwrap_or(PropertyValue::Null));
            }
            Ok(Some(PropertyValue::Array(items)))
        },
        Some(Kind::StructValue(obj)) => unmarshal_object(obj, path, opts),
    }
}

fn unmarshal_object(
    obj: &Struct,
    path: &str,
    opts: &MarshalOptions,
) -> Result<Option<PropertyValue>, ProviderError> {
    let sig = match obj.fields.get(SIG_KEY).map(|v| &v.kind) {
        None => {
            let mut map = PropertyMap::new();
            unmarshal_fields(&obj.fields, path, opts, &mut map)?;
            return Ok(Some(PropertyValue::Object(map)));
        },
        Some(Some(Kind::StringValue(sig))) => sig.as_str(),
        Some(_) => return Err(opts.error(path, "signature key must be a string")),
    };

    match sig {
        SECRET_SIG => {
            let inner = obj
                .fields
                .get("value")
                .ok_or_else(|| opts.error(path, "malformed secret value: missing 'value'"))?;
            let Some(inner) = unmarshal_value(inner, path, opts)? else {
                return Ok(None);
            };
            if opts.keep_secrets {
                Ok(Some(PropertyValue::Secret(Box::new(inner))))
            } else {
                Ok(Some(inner))
            }
        },
        RESOURCE_REFERENCE_SIG => {
            let urn = string_field(obj, "urn")
                .ok_or_else(|| opts.error(path, "malformed resource reference: missing 'urn'"))?;
            let id = match obj.fields.get("id").map(|v| &v.kind) {
                None => None,
                Some(Some(Kind::StringValue(id))) if id == UNKNOWN_STRING_VALUE => {
                    Some(String::new())
                },
                Some(Some(Kind::StringValue(id))) => Some(id.clone()),
                Some(_) => {
                    return Err(opts.error(path, "malformed resource reference: 'id' must be a string"))
                },
            };
            let reference = ResourceReference {
                urn: urn.to_string(),
                id,
                package_version: string_field(obj, "packageVersion")
                    .unwrap_or_default()
                    .to_string(),
            };
            if opts.keep_resources {
                return Ok(Some(PropertyValue::ResourceReference(reference)));
            }
            Ok(downgrade_reference(reference, opts))
        },
        OUTPUT_VALUE_SIG => {
            let element = match obj.fields.get("value") {
                Some(v) => unmarshal_value(v, path, opts)?,
                None => None,
            };
            let known = obj.fields.contains_key("value")
                && !matches!(element, None | Some(PropertyValue::Computed));
            let secret = matches!(
                obj.fields.get("secret").map(|v| &v.kind),
                Some(Some(Kind::BoolValue(true)))
            );
            let dependencies = match obj.fields.get("dependencies").map(|v| &v.kind) {
                Some(Some(Kind::ListValue(list))) => list
                    .values
                    .iter()
                    .filter_map(|v| match &v.kind {
                        Some(Kind::StringValue(s)) => Some(s.clone()),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            };

            if opts.keep_output_values {
                return Ok(Some(PropertyValue::Output(OutputValue {
                    element: if known { element.map(Box::new) } else { None },
                    known,
                    secret,
                    dependencies,
                })));
            }

            let value = if known { element } else { computed(opts) };
            Ok(value.map(|v| {
                if secret && opts.keep_secrets {
                    PropertyValue::Secret(Box::new(v))
                } else {
                    v
                }
            }))
        },
        ASSET_SIG | ARCHIVE_SIG => Err(opts.error(path, "assets and archives are not supported")),
        other => Err(opts.error(path, format!("unrecognized signature '{}'", other))),
    }
}

fn downgrade_reference(reference: ResourceReference, opts: &MarshalOptions) -> Option<PropertyValue> {
    match reference.id {
        Some(id) if id.is_empty() => computed(opts),
        Some(id) => Some(PropertyValue::String(id)),
        None => Some(PropertyValue::String(reference.urn)),
    }
}

fn computed(opts: &MarshalOptions) -> Option<PropertyValue> {
    if opts.keep_unknowns {
        Some(PropertyValue::Computed)
    } else {
        None
    }
}

fn string_field<'a>(obj: &'a Struct, key: &str) -> Option<&'a str> {
    match obj.fields.get(key).map(|v| &v.kind) {
        Some(Some(Kind::StringValue(s))) => Some(s),
        _ => None,
    }
}

// =========================================================================
// Marshaling
// =========================================================================

/// Encode a property map into a wire struct.
pub fn marshal_properties(props: &PropertyMap, opts: &MarshalOptions) -> Result<Struct, ProviderError> {
    let mut fields = BTreeMap::new();
    for (key, value) in props {
        if opts.skip_nulls && value.is_null() {
            continue;
        }
        if let Some(v) = marshal_value(value, key, opts)? {
            fields.insert(key.clone(), v);
        }
    }
    Ok(Struct { fields })
}

/// Encode a single value. `Ok(None)` means the value was dropped.
pub fn marshal_value(
    value: &PropertyValue,
    path: &str,
    opts: &MarshalOptions,
) -> Result<Option<Value>, ProviderError> {
    let kind = match value {
        PropertyValue::Null => Kind::NullValue(0),
        PropertyValue::Bool(b) => Kind::BoolValue(*b),
        PropertyValue::Number(n) => {
            if !n.is_finite() {
                return Err(opts.error(path, format!("cannot marshal non-finite number {}", n)));
            }
            Kind::NumberValue(*n)
        },
        PropertyValue::String(s) => Kind::StringValue(s.clone()),
        PropertyValue::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}[{}]", path, i);
                values.push(marshal_value(item, &item_path, opts)?.unwrap_or_else(null_value));
            }
            Kind::ListValue(ListValue { values })
        },
        PropertyValue::Object(map) => {
            let mut fields = BTreeMap::new();
            for (key, item) in map {
                if opts.skip_nulls && item.is_null() {
                    continue;
                }
                if let Some(v) = marshal_value(item, &join_path(path, key), opts)? {
                    fields.insert(key.clone(), v);
                }
            }
            Kind::StructValue(Struct { fields })
        },
        PropertyValue::Computed => {
            if !opts.keep_unknowns {
                return Ok(None);
            }
            Kind::StringValue(UNKNOWN_STRING_VALUE.to_string())
        },
        PropertyValue::Secret(inner) => {
            let Some(inner) = marshal_value(inner, path, opts)? else {
                return Ok(None);
            };
            if !opts.keep_secrets {
                return Ok(Some(inner));
            }
            signed(SECRET_SIG, [("value", inner)])
        },
        PropertyValue::ResourceReference(reference) => {
            if !opts.keep_resources {
                return match downgrade_reference(reference.clone(), opts) {
                    Some(v) => marshal_value(&v, path, opts),
                    None => Ok(None),
                };
            }
            let mut entries = vec![("urn", string_value(&reference.urn))];
            if let Some(id) = &reference.id {
                let id = if id.is_empty() { UNKNOWN_STRING_VALUE } else { id.as_str() };
                entries.push(("id", string_value(id)));
            }
            if !reference.package_version.is_empty() {
                entries.push(("packageVersion", string_value(&reference.package_version)));
            }
            signed(RESOURCE_REFERENCE_SIG, entries)
        },
        PropertyValue::Output(output) => {
            if !opts.keep_output_values {
                let downgraded = match (&output.element, output.known) {
                    (Some(element), true) if output.secret => {
                        PropertyValue::Secret(element.clone())
                    },
                    (Some(element), true) => (**element).clone(),
                    _ => PropertyValue::Computed,
                };
                return marshal_value(&downgraded, path, opts);
            }
            let mut entries = Vec::new();
            if let (Some(element), true) = (&output.element, output.known) {
                if let Some(v) = marshal_value(element, path, opts)? {
                    entries.push(("value", v));
                }
            }
            if output.secret {
                entries.push((
                    "secret",
                    Value {
                        kind: Some(Kind::BoolValue(true)),
                    },
                ));
            }
            if !output.dependencies.is_empty() {
                entries.push((
                    "dependencies",
                    Value {
                        kind: Some(Kind::ListValue(ListValue {
                            values: output.dependencies.iter().map(|d| string_value(d)).collect(),
                        })),
                    },
                ));
            }
            signed(OUTPUT_VALUE_SIG, entries)
        },
    };
    Ok(Some(Value { kind: Some(kind) }))
}

fn signed<'a>(sig: &str, entries: impl IntoIterator<Item = (&'a str, Value)>) -> Kind {
    let mut fields: BTreeMap<String, Value> = entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    fields.insert(SIG_KEY.to_string(), string_value(sig));
    Kind::StructValue(Struct { fields })
}

fn string_value(s: &str) -> Value {
    Value {
        kind: Some(Kind::StringValue(s.to_string())),
    }
}

fn null_value() -> Value {
    Value {
        kind: Some(Kind::NullValue(0)),
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => null_value(),
            serde_json::Value::Bool(b) => Value {
                kind: Some(Kind::BoolValue(b)),
            },
            serde_json::Value::Number(n) => Value {
                kind: Some(Kind::NumberValue(n.as_f64().unwrap())),
            },
            serde_json::Value::String(s) => string_value(&s),
            serde_json::Value::Array(items) => Value {
                kind: Some(Kind::ListValue(ListValue {
                    values: items.into_iter().map(wire).collect(),
                })),
            },
            serde_json::Value::Object(map) => Value {
                kind: Some(Kind::StructValue(Struct {
                    fields: map.into_iter().map(|(k, v)| (k, wire(v))).collect(),
                })),
            },
        }
    }

    fn wire_struct(value: serde_json::Value) -> Struct {
        match wire(value).kind {
            Some(Kind::StructValue(s)) => s,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_unmarshal_plain_values() {
        let props = wire_struct(json!({
            "language": "go",
            "count": 3,
            "enabled": true,
            "tags": ["a", "b"],
            "nested": {"key": "value"}
        }));

        let map = unmarshal_properties(Some(&props), &MarshalOptions::default()).unwrap();
        assert_eq!(map["language"], PropertyValue::from("go"));
        assert_eq!(map["count"], PropertyValue::Number(3.0));
        assert_eq!(map["enabled"], PropertyValue::Bool(true));
        assert_eq!(map["tags"].as_array().map(|a| a.len()), Some(2));
        assert_eq!(
            map["nested"].as_object().and_then(|o| o["key"].as_str()),
            Some("value")
        );
    }

    #[test]
    fn test_unmarshal_missing_struct_is_empty() {
        let map = unmarshal_properties(None, &MarshalOptions::default()).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_unknowns_dropped_unless_kept() {
        let props = wire_struct(json!({"bucket": UNKNOWN_STRING_VALUE, "name": "pkg"}));

        let dropped = unmarshal_properties(Some(&props), &MarshalOptions::default()).unwrap();
        assert!(!dropped.contains_key("bucket"));
        assert_eq!(dropped.len(), 1);

        let kept = unmarshal_properties(Some(&props), &MarshalOptions::default().keep_unknowns())
            .unwrap();
        assert_eq!(kept["bucket"], PropertyValue::Computed);
    }

    #[test]
    fn test_skip_nulls() {
        let props = wire_struct(json!({"a": null, "b": "x"}));

        let kept = unmarshal_properties(Some(&props), &MarshalOptions::default()).unwrap();
        assert_eq!(kept["a"], PropertyValue::Null);

        let skipped =
            unmarshal_properties(Some(&props), &MarshalOptions::default().skip_nulls()).unwrap();
        assert!(!skipped.contains_key("a"));

        let mut map = PropertyMap::new();
        map.insert("a".to_string(), PropertyValue::Null);
        let out = marshal_properties(&map, &MarshalOptions::default().skip_nulls()).unwrap();
        assert!(out.fields.is_empty());
    }

    #[test]
    fn test_secret_unwrapped_unless_kept() {
        let props = wire_struct(json!({
            "token": {SIG_KEY: SECRET_SIG, "value": "hunter2"}
        }));

        let plain = unmarshal_properties(Some(&props), &MarshalOptions::default()).unwrap();
        assert_eq!(plain["token"], PropertyValue::from("hunter2"));

        let kept = unmarshal_properties(Some(&props), &MarshalOptions::default().keep_secrets())
            .unwrap();
        assert_eq!(kept["token"], PropertyValue::secret("hunter2"));
        assert_eq!(kept["token"].resolved(), Some(&PropertyValue::from("hunter2")));
    }

    #[test]
    fn test_marshal_secret_and_unknown() {
        let mut map = PropertyMap::new();
        map.insert("token".to_string(), PropertyValue::secret("hunter2"));
        map.insert("later".to_string(), PropertyValue::Computed);

        let opts = MarshalOptions::new("test").keep_secrets().keep_unknowns();
        let out = marshal_properties(&map, &opts).unwrap();

        let Some(Kind::StructValue(secret)) = &out.fields["token"].kind else {
            panic!("secret should marshal to an object");
        };
        assert_eq!(string_field(secret, SIG_KEY), Some(SECRET_SIG));
        assert_eq!(string_field(secret, "value"), Some("hunter2"));
        assert_eq!(
            out.fields["later"].kind,
            Some(Kind::StringValue(UNKNOWN_STRING_VALUE.to_string()))
        );

        let plain = marshal_properties(&map, &MarshalOptions::default()).unwrap();
        assert!(!plain.fields.contains_key("later"));
        assert_eq!(
            plain.fields["token"].kind,
            Some(Kind::StringValue("hunter2".to_string()))
        );
    }

    #[test]
    fn test_resource_reference_downgrade() {
        let props = wire_struct(json!({
            "custom": {SIG_KEY: RESOURCE_REFERENCE_SIG, "urn": "urn:a", "id": "bucket-1"},
            "component": {SIG_KEY: RESOURCE_REFERENCE_SIG, "urn": "urn:b"},
            "pending": {SIG_KEY: RESOURCE_REFERENCE_SIG, "urn": "urn:c", "id": UNKNOWN_STRING_VALUE}
        }));

        let map = unmarshal_properties(Some(&props), &MarshalOptions::default().keep_unknowns())
            .unwrap();
        assert_eq!(map["custom"], PropertyValue::from("bucket-1"));
        assert_eq!(map["component"], PropertyValue::from("urn:b"));
        assert_eq!(map["pending"], PropertyValue::Computed);

        let kept = unmarshal_properties(Some(&props), &MarshalOptions::default().keep_resources())
            .unwrap();
        match &kept["custom"] {
            PropertyValue::ResourceReference(r) => {
                assert_eq!(r.urn, "urn:a");
                assert_eq!(r.id.as_deref(), Some("bucket-1"));
            },
            other => panic!("expected resource reference, got {:?}", other),
        }
    }

    #[test]
    fn test_output_values() {
        let props = wire_struct(json!({
            "known": {SIG_KEY: OUTPUT_VALUE_SIG, "value": "site.example.com", "dependencies": ["urn:bucket"]},
            "unknown": {SIG_KEY: OUTPUT_VALUE_SIG, "dependencies": ["urn:bucket"]},
            "secret": {SIG_KEY: OUTPUT_VALUE_SIG, "value": "s3cr3t", "secret": true}
        }));

        let kept = unmarshal_properties(
            Some(&props),
            &MarshalOptions::default().keep_output_values(),
        )
        .unwrap();
        match &kept["known"] {
            PropertyValue::Output(o) => {
                assert!(o.known);
                assert_eq!(o.dependencies, vec!["urn:bucket".to_string()]);
            },
            other => panic!("expected output value, got {:?}", other),
        }
        assert!(kept["unknown"].is_computed());
        assert_eq!(kept["known"].resolved(), Some(&PropertyValue::from("site.example.com")));
        assert_eq!(kept["unknown"].resolved(), None);

        let downgraded = unmarshal_properties(
            Some(&props),
            &MarshalOptions::default().keep_unknowns().keep_secrets(),
        )
        .unwrap();
        assert_eq!(downgraded["known"], PropertyValue::from("site.example.com"));
        assert_eq!(downgraded["unknown"], PropertyValue::Computed);
        assert_eq!(downgraded["secret"], PropertyValue::secret("s3cr3t"));
    }

    #[test]
    fn test_assets_rejected() {
        let props = wire_struct(json!({
            "file": {SIG_KEY: ASSET_SIG, "path": "index.html"}
        }));
        let err = unmarshal_properties(Some(&props), &MarshalOptions::new("pkg.args")).unwrap_err();
        assert!(err.to_string().contains("pkg.args.file"));
        assert!(err.to_string().contains("assets and archives"));
    }

    #[test]
    fn test_marshal_rejects_non_finite_numbers() {
        let mut map = PropertyMap::new();
        map.insert("ratio".to_string(), PropertyValue::Number(f64::NAN));
        let err = marshal_properties(&map, &MarshalOptions::new("result")).unwrap_err();
        assert!(err.to_string().contains("result.ratio"));
    }

    #[test]
    fn test_marshal_output_value_round_trip() {
        let mut map = PropertyMap::new();
        map.insert(
            "endpoint".to_string(),
            PropertyValue::Output(OutputValue {
                element: Some(Box::new(PropertyValue::from("site.example.com"))),
                known: true,
                secret: false,
                dependencies: vec!["urn:bucket".to_string()],
            }),
        );
        let opts = MarshalOptions::default().keep_output_values();
        let wire = marshal_properties(&map, &opts).unwrap();
        let back = unmarshal_properties(Some(&wire), &opts).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_json_conversion() {
        let map = property_map_from_json(json!({"name": "pkg", "releases": ["a", "b"]}));
        assert_eq!(map["name"].as_str(), Some("pkg"));
        assert_eq!(
            property_map_to_json(&map),
            json!({"name": "pkg", "releases": ["a", "b"]})
        );
        assert!(property_map_from_json(json!("not an object")).is_empty());
    }
}
