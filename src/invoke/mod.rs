//! Invoke functions.
//!
//! Each function is an [`InvokeHandler`] registered with the provider under
//! its token. The engine calls them through `Invoke`; the `Package`
//! component calls them through the resource monitor.

mod build;
mod generate;
mod install;
mod new;
mod publish;

use std::sync::Arc;

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::property::{PropertyMap, PropertyValue};
use crate::schema::FunctionSpec;

pub use build::Build;
pub use generate::Generate;
pub use install::Install;
pub use new::New;
pub use publish::{plugin_archive_name, plugin_binary_name, release_url, Publish};

/// Token of the `New` function.
pub const NEW_TOKEN: &str = "pulumi-package:index:New";
/// Token of the `Generate` function.
pub const GENERATE_TOKEN: &str = "pulumi-package:index:Generate";
/// Token of the `Build` function.
pub const BUILD_TOKEN: &str = "pulumi-package:index:Build";
/// Token of the `Install` function.
pub const INSTALL_TOKEN: &str = "pulumi-package:index:Install";
/// Token of the `Publish` function.
pub const PUBLISH_TOKEN: &str = "pulumi-package:index:Publish";

/// A function exposed through `Invoke`.
#[async_trait::async_trait]
pub trait InvokeHandler: Send + Sync + 'static {
    /// The token the function is registered under.
    fn token(&self) -> &str;

    /// Schema of the function's arguments and result.
    fn spec(&self) -> FunctionSpec;

    /// Run the function.
    ///
    /// `args` have already been validated against [`InvokeHandler::spec`].
    async fn invoke(&self, ctx: &InvokeContext, args: PropertyMap) -> Result<PropertyMap, ProviderError>;
}

/// Everything an invoke needs besides its arguments.
#[derive(Clone)]
pub struct InvokeContext {
    runner: Arc<dyn CommandRunner>,
    config: ProviderConfig,
}

impl InvokeContext {
    /// Create a context.
    pub fn new(runner: Arc<dyn CommandRunner>, config: ProviderConfig) -> Self {
        Self { runner, config }
    }

    /// The provider configuration at the time of the call.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Run a command in the configured working directory.
    pub async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, ProviderError> {
        let spec = if spec.current_dir.is_none() {
            let dir = self.config.work_dir.clone();
            spec.current_dir(dir)
        } else {
            spec
        };
        self.runner.run(&spec).await
    }
}

impl std::fmt::Debug for InvokeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Every invoke the package provides.
pub fn all() -> Vec<Arc<dyn InvokeHandler>> {
    vec![
        Arc::new(New),
        Arc::new(Generate),
        Arc::new(Build),
        Arc::new(Install),
        Arc::new(Publish),
    ]
}

/// Read a string argument that must be present and known.
pub fn require_string(args: &PropertyMap, key: &str) -> Result<String, ProviderError> {
    match args.get(key) {
        None | Some(PropertyValue::Null) => Err(ProviderError::InvalidArgument(format!(
            "missing required argument '{}'",
            key
        ))),
        Some(value) => match value.resolved() {
            Some(PropertyValue::String(s)) => Ok(s.clone()),
            Some(other) => Err(ProviderError::InvalidArgument(format!(
                "argument '{}' must be a string, got {}",
                key,
                other.type_name()
            ))),
            None => Err(ProviderError::InvalidArgument(format!(
                "argument '{}' is not known yet",
                key
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::property_map_from_json;
    use crate::testing::RecordingRunner;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn test_all_tokens_are_unique() {
        let handlers = all();
        let mut tokens: Vec<_> = handlers.iter().map(|h| h.token().to_string()).collect();
        tokens.sort();
        tokens.dedup();
        assert_eq!(tokens.len(), 5);
        assert!(tokens.iter().all(|t| t.starts_with("pulumi-package:index:")));
    }

    #[test]
    fn test_require_string() {
        let mut args = property_map_from_json(json!({"name": "pkg", "count": 3, "gone": null}));
        args.insert("later".to_string(), PropertyValue::Computed);
        args.insert("hidden".to_string(), PropertyValue::secret("s3cret"));

        assert_eq!(require_string(&args, "name").unwrap(), "pkg");
        assert_eq!(require_string(&args, "hidden").unwrap(), "s3cret");
        assert!(require_string(&args, "missing")
            .unwrap_err()
            .to_string()
            .contains("missing required argument 'missing'"));
        assert!(require_string(&args, "gone").is_err());
        assert!(require_string(&args, "count")
            .unwrap_err()
            .to_string()
            .contains("must be a string, got number"));
        assert!(require_string(&args, "later")
            .unwrap_err()
            .to_string()
            .contains("not known yet"));
    }

    #[tokio::test]
    async fn test_context_applies_work_dir() {
        let runner = Arc::new(RecordingRunner::new());
        let config = ProviderConfig {
            work_dir: Some(PathBuf::from("/work")),
            ..Default::default()
        };
        let ctx = InvokeContext::new(runner.clone(), config);

        ctx.run(CommandSpec::new("make").arg("generate")).await.unwrap();
        ctx.run(CommandSpec::new("ls").current_dir(Some(PathBuf::from("/elsewhere"))))
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0].current_dir, Some(PathBuf::from("/work")));
        assert_eq!(calls[1].current_dir, Some(PathBuf::from("/elsewhere")));
    }
}
