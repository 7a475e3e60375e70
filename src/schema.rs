//! Package schema types.
//!
//! The engine asks the provider for a JSON package schema through
//! `GetSchema`. The schema names every resource and function the package
//! exposes together with the shape of their inputs and outputs, and is what
//! SDK generators consume. These types mirror the subset of the schema format
//! the provider needs and serialize with the engine's camelCase field names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The type of a property.
///
/// Primitive types set `type`; arrays and maps additionally carry the element
/// type in `items` or `additionalProperties`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TypeSpec {
    /// The primitive type name: `string`, `number`, `integer`, `boolean`,
    /// `array` or `object`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Element type of an array.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<TypeSpec>>,
    /// Value type of a map.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<Box<TypeSpec>>,
    /// Reference to a named type, e.g. `pulumi.json#/Any`.
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Whether the value must be passed as a plain (non-output) value.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub plain: bool,
}

impl TypeSpec {
    fn primitive(kind: &str) -> Self {
        Self {
            kind: Some(kind.to_string()),
            ..Default::default()
        }
    }

    /// A string.
    pub fn string() -> Self {
        Self::primitive("string")
    }

    /// A number.
    pub fn number() -> Self {
        Self::primitive("number")
    }

    /// An integer.
    pub fn integer() -> Self {
        Self::primitive("integer")
    }

    /// A boolean.
    pub fn boolean() -> Self {
        Self::primitive("boolean")
    }

    /// An array of `items`.
    pub fn array(items: TypeSpec) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::primitive("array")
        }
    }

    /// A map from strings to `values`.
    pub fn map(values: TypeSpec) -> Self {
        Self {
            additional_properties: Some(Box::new(values)),
            ..Self::primitive("object")
        }
    }

    /// Any value.
    pub fn any() -> Self {
        Self {
            reference: Some("pulumi.json#/Any".to_string()),
            ..Default::default()
        }
    }

    /// Mark the type as plain.
    pub fn plain(mut self) -> Self {
        self.plain = true;
        self
    }
}

/// Describes a single property of an object, resource or function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PropertySpec {
    /// The property's type.
    #[serde(flatten)]
    pub type_spec: TypeSpec,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the value is always treated as a secret.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub secret: bool,
    /// Default value when the property is omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl PropertySpec {
    /// Create a property of the given type.
    pub fn new(type_spec: TypeSpec) -> Self {
        Self {
            type_spec,
            ..Default::default()
        }
    }

    /// A string property.
    pub fn string() -> Self {
        Self::new(TypeSpec::string())
    }

    /// A boolean property.
    pub fn boolean() -> Self {
        Self::new(TypeSpec::boolean())
    }

    /// An array-of-strings property.
    pub fn string_array() -> Self {
        Self::new(TypeSpec::array(TypeSpec::string()))
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark the property as secret.
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Mark the property's type as plain.
    pub fn plain(mut self) -> Self {
        self.type_spec.plain = true;
        self
    }
}

/// An object shape: a set of properties, some of them required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTypeSpec {
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The object's properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertySpec>,
    /// Names of the properties that must be present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ObjectTypeSpec {
    /// Create an empty object shape.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an optional property.
    pub fn with_property(mut self, name: impl Into<String>, property: PropertySpec) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    /// Add a required property.
    pub fn with_required_property(mut self, name: impl Into<String>, property: PropertySpec) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, property);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether the named property is required.
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

/// Schema for a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Output properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertySpec>,
    /// Output properties that are always present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Input properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_properties: BTreeMap<String, PropertySpec>,
    /// Input properties that must be supplied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_inputs: Vec<String>,
    /// Whether the resource is a component constructed by the provider.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_component: bool,
}

impl ResourceSpec {
    /// Create a resource schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a component resource schema.
    pub fn component() -> Self {
        Self {
            is_component: true,
            ..Default::default()
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add an optional input.
    pub fn with_input(mut self, name: impl Into<String>, property: PropertySpec) -> Self {
        self.input_properties.insert(name.into(), property);
        self
    }

    /// Add a required input.
    pub fn with_required_input(mut self, name: impl Into<String>, property: PropertySpec) -> Self {
        let name = name.into();
        self.required_inputs.push(name.clone());
        self.input_properties.insert(name, property);
        self
    }

    /// Add an output that is always present.
    pub fn with_output(mut self, name: impl Into<String>, property: PropertySpec) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, property);
        self
    }

    /// The inputs as an object shape, for validation.
    pub fn inputs(&self) -> ObjectTypeSpec {
        ObjectTypeSpec {
            description: None,
            properties: self.input_properties.clone(),
            required: self.required_inputs.clone(),
        }
    }
}

/// Schema for a function exposed through `Invoke`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Arguments accepted by the function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<ObjectTypeSpec>,
    /// Values returned by the function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<ObjectTypeSpec>,
}

impl FunctionSpec {
    /// Create a function schema with no inputs or outputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the inputs.
    pub fn with_inputs(mut self, inputs: ObjectTypeSpec) -> Self {
        self.inputs = Some(inputs);
        self
    }

    /// Set the outputs.
    pub fn with_outputs(mut self, outputs: ObjectTypeSpec) -> Self {
        self.outputs = Some(outputs);
        self
    }
}

/// Provider configuration variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConfigSpec {
    /// The configuration variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, PropertySpec>,
    /// Names of required variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ConfigSpec {
    fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.required.is_empty()
    }

    /// The variables as an object shape, for validation.
    pub fn as_object(&self) -> ObjectTypeSpec {
        ObjectTypeSpec {
            description: None,
            properties: self.variables.clone(),
            required: self.required.clone(),
        }
    }
}

/// The complete package schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    /// Package name; the first segment of every token.
    pub name: String,
    /// Package version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Display name for documentation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Package keywords.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// License identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Source repository URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Provider configuration variables.
    #[serde(default, skip_serializing_if = "ConfigSpec::is_empty")]
    pub config: ConfigSpec,
    /// Resources keyed by type token.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceSpec>,
    /// Functions keyed by token.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<String, FunctionSpec>,
    /// Per-language code generation settings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub language: BTreeMap<String, serde_json::Value>,
}

impl PackageSpec {
    /// Create a schema for the named package.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a provider configuration variable.
    pub fn with_config_variable(mut self, name: impl Into<String>, property: PropertySpec) -> Self {
        self.config.variables.insert(name.into(), property);
        self
    }

    /// Add a resource.
    pub fn with_resource(mut self, token: impl Into<String>, resource: ResourceSpec) -> Self {
        self.resources.insert(token.into(), resource);
        self
    }

    /// Add a function.
    pub fn with_function(mut self, token: impl Into<String>, function: FunctionSpec) -> Self {
        self.functions.insert(token.into(), function);
        self
    }

    /// Add per-language settings.
    pub fn with_language(mut self, language: impl Into<String>, settings: serde_json::Value) -> Self {
        self.language.insert(language.into(), settings);
        self
    }

    /// Serialize to the JSON document returned by `GetSchema`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
