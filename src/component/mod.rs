//! Component resources constructed by the provider.
//!
//! A component is built inside `Construct`: it registers itself with the
//! engine's resource monitor, does its work (here, calling invokes), and
//! reports its outputs back before returning.

mod package;

use std::sync::Arc;

use tracing::debug;

use crate::config::StackConfig;
use crate::error::ProviderError;
use crate::monitor::{RegisterResource, ResourceMonitor, ResourceOptions};
use crate::property::PropertyMap;
use crate::schema::ResourceSpec;

pub use package::{Package, PACKAGE_TOKEN};

/// A component resource the provider knows how to construct.
#[async_trait::async_trait]
pub trait Component: Send + Sync + 'static {
    /// The resource type token.
    fn token(&self) -> &str;

    /// Schema of the component's inputs and outputs.
    fn spec(&self) -> ResourceSpec;

    /// Build the component.
    async fn construct(
        &self,
        ctx: &ConstructContext,
        name: &str,
        inputs: PropertyMap,
    ) -> Result<ConstructResult, ProviderError>;
}

/// What a finished construction reports back to the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstructResult {
    /// URN of the component resource.
    pub urn: String,
    /// The component's outputs.
    pub state: PropertyMap,
}

/// The environment of a single `Construct` call.
#[derive(Clone)]
pub struct ConstructContext {
    monitor: Arc<dyn ResourceMonitor>,
    project: String,
    stack: String,
    config: StackConfig,
    dry_run: bool,
    options: ResourceOptions,
}

impl ConstructContext {
    /// Create a context around a monitor connection.
    pub fn new(
        monitor: Arc<dyn ResourceMonitor>,
        project: impl Into<String>,
        stack: impl Into<String>,
        config: StackConfig,
    ) -> Self {
        Self {
            monitor,
            project: project.into(),
            stack: stack.into(),
            config,
            dry_run: false,
            options: ResourceOptions::default(),
        }
    }

    /// Mark the construction as part of a preview.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Options the engine asked the component to be registered with.
    pub fn with_options(mut self, options: ResourceOptions) -> Self {
        self.options = options;
        self
    }

    /// The project name.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The stack name.
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// The stack configuration.
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Whether this is a preview.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// The registration options.
    pub fn options(&self) -> &ResourceOptions {
        &self.options
    }

    /// Register the component resource itself and return its URN.
    pub async fn register_component_resource(&self, type_token: &str, name: &str) -> Result<String, ProviderError> {
        let registered = self
            .monitor
            .register_resource(RegisterResource {
                type_token: type_token.to_string(),
                name: name.to_string(),
                custom: false,
                object: PropertyMap::new(),
                options: self.options.clone(),
            })
            .await?;
        debug!(urn = %registered.urn, "Registered component");
        Ok(registered.urn)
    }

    /// Call a function through the monitor.
    pub async fn invoke(&self, token: &str, args: PropertyMap) -> Result<PropertyMap, ProviderError> {
        debug!(token, "Invoking through monitor");
        self.monitor.invoke(token, args).await
    }

    /// Report the component's final outputs.
    pub async fn register_resource_outputs(&self, urn: &str, outputs: PropertyMap) -> Result<(), ProviderError> {
        self.monitor.register_resource_outputs(urn, outputs).await
    }
}

impl std::fmt::Debug for ConstructContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructContext")
            .field("project", &self.project)
            .field("stack", &self.stack)
            .field("dry_run", &self.dry_run)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Every component the package provides.
pub fn all() -> Vec<Arc<dyn Component>> {
    vec![Arc::new(Package)]
}
