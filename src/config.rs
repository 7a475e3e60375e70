//! Provider and stack configuration.
//!
//! Two kinds of configuration reach the provider:
//!
//! - [`ProviderConfig`] arrives through `Configure` and controls how external
//!   commands are run (working directory, code generator, release platform).
//! - [`StackConfig`] arrives with every `Construct` request and carries the
//!   stack's `pulumi-package:*` settings, most importantly `action`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ProviderError;
use crate::property::{PropertyMap, PropertyValue};
use crate::schema::PropertySpec;

/// The package name; the namespace of every token and config key.
pub const PACKAGE_NAME: &str = "pulumi-package";

/// Default code generation CLI used by `New`.
pub const DEFAULT_CODEGEN_COMMAND: &str = "platypack";

/// Default platform suffix of published plugin archives.
pub const DEFAULT_PLATFORM: &str = "darwin-amd64";

/// Default directory holding the built plugin binary.
pub const DEFAULT_BIN_DIR: &str = "bin";

/// Settings accepted through `Configure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Directory commands run in. `None` means the provider's own directory.
    pub work_dir: Option<PathBuf>,
    /// Code generation CLI invoked by `New`.
    pub codegen_command: String,
    /// Platform suffix used when naming release archives.
    pub platform: String,
    /// Directory, relative to `work_dir`, holding the plugin binary.
    pub bin_dir: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            codegen_command: DEFAULT_CODEGEN_COMMAND.to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
            bin_dir: DEFAULT_BIN_DIR.to_string(),
        }
    }
}

impl ProviderConfig {
    /// Schema entries for the provider configuration variables.
    pub fn variables() -> Vec<(&'static str, PropertySpec)> {
        vec![
            (
                "workDir",
                PropertySpec::string()
                    .with_description("Directory external commands run in. Defaults to the provider's working directory."),
            ),
            (
                "codegenCommand",
                PropertySpec::string()
                    .with_description("Code generation CLI used to scaffold new packages.")
                    .with_default(serde_json::json!(DEFAULT_CODEGEN_COMMAND)),
            ),
            (
                "platform",
                PropertySpec::string()
                    .with_description("Platform suffix of published plugin archives.")
                    .with_default(serde_json::json!(DEFAULT_PLATFORM)),
            ),
            (
                "binDir",
                PropertySpec::string()
                    .with_description("Directory holding the built plugin binary.")
                    .with_default(serde_json::json!(DEFAULT_BIN_DIR)),
            ),
        ]
    }

    /// Build from the `variables` map of a `ConfigureRequest`.
    ///
    /// Keys are `pulumi-package:config:<name>`; the bare `pulumi-package:<name>`
    /// form is accepted as well. Unrelated keys are ignored.
    pub fn from_variables(variables: &HashMap<String, String>) -> Self {
        let mut config = Self::default();
        for (key, value) in variables {
            if let Some(name) = config_key_name(key) {
                config.set(name, value.clone());
            }
        }
        config
    }

    /// Build from the `args` struct of a `ConfigureRequest`.
    ///
    /// Non-string values are ignored.
    pub fn from_args(args: &PropertyMap) -> Self {
        let mut config = Self::default();
        config.merge_args(args);
        config
    }

    /// Apply string entries from an `args` struct on top of this config.
    pub fn merge_args(&mut self, args: &PropertyMap) {
        for (name, value) in args {
            if let Some(PropertyValue::String(s)) = value.resolved() {
                self.set(name, s.clone());
            }
        }
    }

    fn set(&mut self, name: &str, value: String) {
        match name {
            "workDir" if !value.is_empty() => self.work_dir = Some(PathBuf::from(value)),
            "codegenCommand" if !value.is_empty() => self.codegen_command = value,
            "platform" if !value.is_empty() => self.platform = value,
            "binDir" if !value.is_empty() => self.bin_dir = value,
            _ => {},
        }
    }
}

fn config_key_name(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(PACKAGE_NAME)?.strip_prefix(':')?;
    Some(rest.strip_prefix("config:").unwrap_or(rest))
}

/// The stack configuration attached to a `Construct` request.
///
/// Lookups are namespaced by package: `require("action")` reads
/// `pulumi-package:action`.
#[derive(Debug, Clone, Default)]
pub struct StackConfig {
    namespace: String,
    values: BTreeMap<String, String>,
    secret_keys: Vec<String>,
}

impl StackConfig {
    /// Wrap a raw config map for the given namespace.
    pub fn new(namespace: impl Into<String>, values: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            namespace: namespace.into(),
            values: values.into_iter().collect(),
            secret_keys: Vec::new(),
        }
    }

    /// Record which full keys hold secret values.
    pub fn with_secret_keys(mut self, keys: Vec<String>) -> Self {
        self.secret_keys = keys;
        self
    }

    fn full_key(&self, key: &str) -> String {
        if key.contains(':') {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }

    /// Look up a value, returning `None` if unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        let full = self.full_key(key);
        self.values
            .get(&full)
            .or_else(|| self.values.get(&config_namespaced(&self.namespace, key)))
            .map(String::as_str)
    }

    /// Look up a value that must be set.
    pub fn require(&self, key: &str) -> Result<&str, ProviderError> {
        self.get(key).ok_or_else(|| {
            let full = self.full_key(key);
            ProviderError::Configuration(format!(
                "missing required configuration variable '{}'; run `pulumi config set {} <value>` to set it",
                full, full
            ))
        })
    }

    /// Whether the value stored under `key` is secret.
    pub fn is_secret(&self, key: &str) -> bool {
        let full = self.full_key(key);
        self.secret_keys.iter().any(|k| *k == full)
    }
}

// Older engines send keys in the `<pkg>:config:<key>` form.
fn config_namespaced(namespace: &str, key: &str) -> String {
    format!("{}:config:{}", namespace, key)
}

/// What a `Package` component does when constructed, selected by the
/// `pulumi-package:action` config value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Scaffold a new package.
    New,
    /// Regenerate SDKs from the schema.
    Generate,
    /// Build the provider.
    Build,
    /// Install the provider and SDKs locally.
    Install,
    /// Archive the plugin and upload it as a release.
    Publish,
}

impl Action {
    /// Every action, in lifecycle order.
    pub const ALL: [Action; 5] = [
        Action::New,
        Action::Generate,
        Action::Build,
        Action::Install,
        Action::Publish,
    ];

    /// The config value naming this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::New => "new",
            Action::Generate => "generate",
            Action::Build => "build",
            Action::Install => "install",
            Action::Publish => "publish",
        }
    }

    /// The invoke token run for this action.
    pub fn token(&self) -> &'static str {
        match self {
            Action::New => crate::invoke::NEW_TOKEN,
            Action::Generate => crate::invoke::GENERATE_TOKEN,
            Action::Build => crate::invoke::BUILD_TOKEN,
            Action::Install => crate::invoke::INSTALL_TOKEN,
            Action::Publish => crate::invoke::PUBLISH_TOKEN,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = Action::ALL.iter().map(Action::as_str).collect();
                ProviderError::Configuration(format!(
                    "unknown action '{}'; expected one of: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}
