//! The gRPC provider server.
//!
//! [`PackageProvider`] holds the registered invokes and components and the
//! provider configuration. [`serve`] exposes it to the engine as a
//! `pulumirpc.ResourceProvider` service and performs the plugin handshake:
//! the chosen port is printed on stdout, after which the engine connects.
//!
//! # Signal Handling
//!
//! The server handles SIGTERM and SIGINT for graceful shutdown.
//! When a signal is received, the server:
//! 1. Stops accepting new connections
//! 2. Cancels running commands
//! 3. Waits for in-flight requests to complete (with configurable timeout)
//! 4. Exits cleanly

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};
use tokio_stream::Stream;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::command::{CommandRunner, SystemRunner};
use crate::component::{Component, ConstructContext, ConstructResult};
use crate::config::{ProviderConfig, StackConfig, PACKAGE_NAME};
use crate::error::ProviderError;
use crate::generated::resource_provider_server::{ResourceProvider, ResourceProviderServer};
use crate::generated::LogSeverity;
use crate::host::HostClient;
use crate::invoke::{InvokeContext, InvokeHandler};
use crate::monitor::{GrpcResourceMonitor, ResourceOptions};
use crate::property::{marshal_properties, unmarshal_properties, MarshalOptions, PropertyMap, PropertyValue};
use crate::schema::{ObjectTypeSpec, PackageSpec};
use crate::validation::{validate, CheckFailure};

/// Largest gRPC message the provider sends or accepts.
pub const MAX_RPC_MESSAGE_SIZE: usize = 400 * 1024 * 1024;

/// Result of dispatching an invoke.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeOutcome {
    /// The function ran and returned these values.
    Return(PropertyMap),
    /// The arguments did not match the function's inputs; it did not run.
    Failures(Vec<CheckFailure>),
}

/// The package provider.
pub struct PackageProvider {
    name: String,
    version: String,
    invokes: BTreeMap<String, Arc<dyn InvokeHandler>>,
    components: BTreeMap<String, Arc<dyn Component>>,
    runner: Arc<dyn CommandRunner>,
    host: Option<HostClient>,
    config: RwLock<ProviderConfig>,
}

/// Builder for [`PackageProvider`].
pub struct PackageProviderBuilder {
    name: String,
    version: String,
    invokes: Vec<Arc<dyn InvokeHandler>>,
    components: Vec<Arc<dyn Component>>,
    runner: Option<Arc<dyn CommandRunner>>,
    host: Option<HostClient>,
}

impl PackageProviderBuilder {
    /// Set the version reported by `GetPluginInfo` and the schema.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Register an invoke.
    pub fn with_invoke(mut self, handler: Arc<dyn InvokeHandler>) -> Self {
        self.invokes.push(handler);
        self
    }

    /// Register several invokes.
    pub fn with_invokes(mut self, handlers: impl IntoIterator<Item = Arc<dyn InvokeHandler>>) -> Self {
        self.invokes.extend(handlers);
        self
    }

    /// Register a component.
    pub fn with_component(mut self, component: Arc<dyn Component>) -> Self {
        self.components.push(component);
        self
    }

    /// Register several components.
    pub fn with_components(mut self, components: impl IntoIterator<Item = Arc<dyn Component>>) -> Self {
        self.components.extend(components);
        self
    }

    /// Run commands through `runner` instead of spawning processes.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Forward user-facing messages to the engine.
    pub fn with_host(mut self, host: HostClient) -> Self {
        self.host = Some(host);
        self
    }

    /// Build the provider. Later registrations replace earlier ones with the
    /// same token.
    pub fn build(self) -> PackageProvider {
        PackageProvider {
            name: self.name,
            version: self.version,
            invokes: self
                .invokes
                .into_iter()
                .map(|h| (h.token().to_string(), h))
                .collect(),
            components: self
                .components
                .into_iter()
                .map(|c| (c.token().to_string(), c))
                .collect(),
            runner: self.runner.unwrap_or_else(|| Arc::new(SystemRunner::new())),
            host: self.host,
            config: RwLock::new(ProviderConfig::default()),
        }
    }
}

impl Default for PackageProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageProvider {
    /// A provider with every invoke and component of the package.
    pub fn new() -> Self {
        Self::builder(PACKAGE_NAME)
            .with_invokes(crate::invoke::all())
            .with_components(crate::component::all())
            .build()
    }

    /// Start building an empty provider.
    pub fn builder(name: impl Into<String>) -> PackageProviderBuilder {
        PackageProviderBuilder {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            invokes: Vec::new(),
            components: Vec::new(),
            runner: None,
            host: None,
        }
    }

    /// The package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The provider version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The package schema derived from the registered invokes and components.
    pub fn schema(&self) -> PackageSpec {
        let mut spec = PackageSpec::new(&self.name)
            .with_version(&self.version)
            .with_description("Scaffold, build and publish Pulumi packages from a Pulumi program.");
        for (name, property) in ProviderConfig::variables() {
            spec = spec.with_config_variable(name, property);
        }
        for (token, handler) in &self.invokes {
            spec = spec.with_function(token, handler.spec());
        }
        for (token, component) in &self.components {
            spec = spec.with_resource(token, component.spec());
        }
        spec
    }

    /// The shape of the provider configuration, for `CheckConfig`.
    pub fn config_schema(&self) -> ObjectTypeSpec {
        self.schema().config.as_object()
    }

    /// The current provider configuration.
    pub async fn config(&self) -> ProviderConfig {
        self.config.read().await.clone()
    }

    /// Replace the provider configuration.
    pub async fn configure(&self, config: ProviderConfig) {
        info!(?config, "Provider configured");
        *self.config.write().await = config;
    }

    /// Whether a component is registered for the type token.
    pub fn has_component(&self, type_token: &str) -> bool {
        self.components.contains_key(type_token)
    }

    /// Validate and run an invoke.
    ///
    /// Unknown tokens fail with [`ProviderError::UnknownInvoke`]; handler
    /// errors are wrapped in [`ProviderError::InvokeFailed`].
    pub async fn call(&self, token: &str, args: PropertyMap) -> Result<InvokeOutcome, ProviderError> {
        let handler = self
            .invokes
            .get(token)
            .ok_or_else(|| ProviderError::UnknownInvoke(token.to_string()))?;

        if let Some(inputs) = handler.spec().inputs {
            let failures = validate(&inputs, &args);
            if !failures.is_empty() {
                return Ok(InvokeOutcome::Failures(failures));
            }
        }

        let ctx = InvokeContext::new(self.runner.clone(), self.config().await);
        handler
            .invoke(&ctx, args)
            .await
            .map(InvokeOutcome::Return)
            .map_err(|e| ProviderError::invoke_failed(token, e))
    }

    /// Validate inputs and construct a component.
    pub async fn construct_component(
        &self,
        ctx: &ConstructContext,
        type_token: &str,
        name: &str,
        inputs: PropertyMap,
    ) -> Result<ConstructResult, ProviderError> {
        let component = self
            .components
            .get(type_token)
            .ok_or_else(|| ProviderError::UnknownComponent(type_token.to_string()))?;

        let failures = validate(&component.spec().inputs(), &inputs);
        if !failures.is_empty() {
            let reasons: Vec<String> = failures.iter().map(ToString::to_string).collect();
            return Err(ProviderError::InvalidArgument(reasons.join("; ")));
        }

        component.construct(ctx, name, inputs).await
    }

    /// Abort running commands.
    pub fn cancel(&self) {
        self.runner.cancel();
    }

    async fn log_to_host(&self, severity: LogSeverity, message: String, urn: Option<&str>) {
        if let Some(host) = &self.host {
            if let Err(e) = host.log(severity, message, urn).await {
                warn!(error = %e, "Failed to forward log message to engine");
            }
        }
    }

    /// Wrap the provider in the generated gRPC service.
    pub fn into_service(self) -> ResourceProviderServer<ProviderGrpcService> {
        ProviderGrpcService::new(Arc::new(self)).into_server()
    }
}

/// Property keys whose values differ between two maps, in key order.
pub fn changed_keys(olds: &PropertyMap, news: &PropertyMap) -> Vec<String> {
    let mut keys: Vec<&String> = olds.keys().chain(news.keys()).collect();
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .filter(|k| olds.get(*k) != news.get(*k))
        .cloned()
        .collect()
}

/// Dependencies of the output values in a component's state, by property.
pub fn state_dependencies(
    state: &PropertyMap,
) -> HashMap<String, crate::generated::construct_response::PropertyDependencies> {
    state
        .iter()
        .filter_map(|(key, value)| match value {
            PropertyValue::Output(output) if !output.dependencies.is_empty() => Some((
                key.clone(),
                crate::generated::construct_response::PropertyDependencies {
                    urns: output.dependencies.clone(),
                },
            )),
            _ => None,
        })
        .collect()
}

/// Wrapper that implements the generated gRPC trait.
#[derive(Clone)]
pub struct ProviderGrpcService {
    provider: Arc<PackageProvider>,
}

impl ProviderGrpcService {
    /// Wrap a shared provider.
    pub fn new(provider: Arc<PackageProvider>) -> Self {
        Self { provider }
    }

    /// The generated server with the engine's message size limits.
    pub fn into_server(self) -> ResourceProviderServer<Self> {
        ResourceProviderServer::new(self)
            .max_decoding_message_size(MAX_RPC_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_RPC_MESSAGE_SIZE)
    }

    fn label(&self, what: String) -> String {
        format!("{}.{}", self.provider.name(), what)
    }
}

type ResponseStream = Pin<Box<dyn Stream<Item = Result<crate::generated::InvokeResponse, tonic::Status>> + Send>>;

#[tonic::async_trait]
impl ResourceProvider for ProviderGrpcService {
    #[instrument(skip(self, _request), name = "grpc.get_plugin_info")]
    async fn get_plugin_info(
        &self,
        _request: tonic::Request<()>,
    ) -> Result<tonic::Response<crate::generated::PluginInfo>, tonic::Status> {
        debug!("GetPluginInfo called");
        Ok(tonic::Response::new(crate::generated::PluginInfo {
            version: self.provider.version().to_string(),
        }))
    }

    #[instrument(skip(self, request), name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        request: tonic::Request<crate::generated::GetSchemaRequest>,
    ) -> Result<tonic::Response<crate::generated::GetSchemaResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(version = req.version, "GetSchema called");
        if req.version != 0 {
            return Err(ProviderError::InvalidArgument(format!(
                "unsupported schema version {}",
                req.version
            ))
            .into());
        }

        let schema = self.provider.schema();
        info!(
            functions = schema.functions.len(),
            resources = schema.resources.len(),
            "GetSchema completed"
        );
        Ok(tonic::Response::new(crate::generated::GetSchemaResponse {
            schema: schema.to_json().map_err(ProviderError::from)?,
        }))
    }

    #[instrument(skip(self, request), name = "grpc.check_config")]
    async fn check_config(
        &self,
        request: tonic::Request<crate::generated::CheckRequest>,
    ) -> Result<tonic::Response<crate::generated::CheckResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(urn = %req.urn, "CheckConfig called");
        let opts = MarshalOptions::new(self.label("CheckConfig.news".to_string()))
            .keep_unknowns()
            .keep_secrets();
        let news = unmarshal_properties(req.news.as_ref(), &opts)?;

        let failures = validate(&self.provider.config_schema(), &news);
        if failures.is_empty() {
            info!("CheckConfig completed successfully");
        } else {
            warn!(failures = failures.len(), "CheckConfig completed with failures");
        }
        Ok(tonic::Response::new(crate::generated::CheckResponse {
            inputs: req.news,
            failures: failures.into_iter().map(Into::into).collect(),
        }))
    }

    #[instrument(skip(self, request), name = "grpc.diff_config")]
    async fn diff_config(
        &self,
        request: tonic::Request<crate::generated::DiffRequest>,
    ) -> Result<tonic::Response<crate::generated::DiffResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(urn = %req.urn, "DiffConfig called");
        let olds_opts = MarshalOptions::new(self.label("DiffConfig.olds".to_string()))
            .keep_unknowns()
            .keep_secrets();
        let news_opts = MarshalOptions::new(self.label("DiffConfig.news".to_string()))
            .keep_unknowns()
            .keep_secrets();
        let olds = unmarshal_properties(req.olds.as_ref(), &olds_opts)?;
        let news = unmarshal_properties(req.news.as_ref(), &news_opts)?;

        let diffs = changed_keys(&olds, &news);
        let changes = if diffs.is_empty() {
            crate::generated::diff_response::DiffChanges::DiffNone
        } else {
            crate::generated::diff_response::DiffChanges::DiffSome
        };
        info!(changed = diffs.len(), "DiffConfig completed");
        Ok(tonic::Response::new(crate::generated::DiffResponse {
            changes: changes as i32,
            diffs,
            ..Default::default()
        }))
    }

    #[instrument(skip(self, request), name = "grpc.configure")]
    async fn configure(
        &self,
        request: tonic::Request<crate::generated::ConfigureRequest>,
    ) -> Result<tonic::Response<crate::generated::ConfigureResponse>, tonic::Status> {
        debug!("Configure called");
        let req = request.into_inner();
        let mut config = ProviderConfig::from_variables(&req.variables);
        let opts = MarshalOptions::new(self.label("Configure.args".to_string())).skip_nulls();
        let args = unmarshal_properties(req.args.as_ref(), &opts)?;
        config.merge_args(&args);

        self.provider.configure(config).await;
        Ok(tonic::Response::new(crate::generated::ConfigureResponse {
            accept_secrets: true,
            supports_preview: true,
            accept_resources: true,
            accept_outputs: false,
        }))
    }

    #[instrument(skip(self, request), name = "grpc.invoke")]
    async fn invoke(
        &self,
        request: tonic::Request<crate::generated::InvokeRequest>,
    ) -> Result<tonic::Response<crate::generated::InvokeResponse>, tonic::Status> {
        let req = request.into_inner();
        let token = req.tok;
        debug!(token = %token, "Invoke called");

        let args_opts = MarshalOptions::new(self.label(format!("Invoke({}).args", token)))
            .keep_unknowns()
            .skip_nulls()
            .keep_secrets();
        let args = unmarshal_properties(req.args.as_ref(), &args_opts)?;

        match self.provider.call(&token, args).await {
            Ok(InvokeOutcome::Return(result)) => {
                let ret_opts = MarshalOptions::new(self.label(format!("Invoke({}).returns", token)))
                    .keep_unknowns()
                    .skip_nulls();
                let ret = marshal_properties(&result, &ret_opts)?;
                info!(token = %token, "Invoke completed successfully");
                Ok(tonic::Response::new(crate::generated::InvokeResponse {
                    r#return: Some(ret),
                    failures: vec![],
                }))
            },
            Ok(InvokeOutcome::Failures(failures)) => {
                warn!(token = %token, failures = failures.len(), "Invoke arguments failed validation");
                Ok(tonic::Response::new(crate::generated::InvokeResponse {
                    r#return: None,
                    failures: failures.into_iter().map(Into::into).collect(),
                }))
            },
            Err(e) => {
                error!(token = %token, error = %e, "Invoke failed");
                self.provider
                    .log_to_host(LogSeverity::Error, e.to_string(), None)
                    .await;
                Err(e.into())
            },
        }
    }

    type StreamInvokeStream = ResponseStream;

    async fn stream_invoke(
        &self,
        _request: tonic::Request<crate::generated::InvokeRequest>,
    ) -> Result<tonic::Response<Self::StreamInvokeStream>, tonic::Status> {
        Err(ProviderError::Unimplemented("StreamInvoke".to_string()).into())
    }

    async fn check(
        &self,
        _request: tonic::Request<crate::generated::CheckRequest>,
    ) -> Result<tonic::Response<crate::generated::CheckResponse>, tonic::Status> {
        Err(ProviderError::Unimplemented("Check".to_string()).into())
    }

    async fn diff(
        &self,
        _request: tonic::Request<crate::generated::DiffRequest>,
    ) -> Result<tonic::Response<crate::generated::DiffResponse>, tonic::Status> {
        Err(ProviderError::Unimplemented("Diff".to_string()).into())
    }

    async fn create(
        &self,
        _request: tonic::Request<crate::generated::CreateRequest>,
    ) -> Result<tonic::Response<crate::generated::CreateResponse>, tonic::Status> {
        Err(ProviderError::Unimplemented("Create".to_string()).into())
    }

    async fn read(
        &self,
        _request: tonic::Request<crate::generated::ReadRequest>,
    ) -> Result<tonic::Response<crate::generated::ReadResponse>, tonic::Status> {
        Err(ProviderError::Unimplemented("Read".to_string()).into())
    }

    async fn update(
        &self,
        _request: tonic::Request<crate::generated::UpdateRequest>,
    ) -> Result<tonic::Response<crate::generated::UpdateResponse>, tonic::Status> {
        Err(ProviderError::Unimplemented("Update".to_string()).into())
    }

    async fn delete(
        &self,
        _request: tonic::Request<crate::generated::DeleteRequest>,
    ) -> Result<tonic::Response<()>, tonic::Status> {
        Err(ProviderError::Unimplemented("Delete".to_string()).into())
    }

    #[instrument(skip(self, request), name = "grpc.construct")]
    async fn construct(
        &self,
        request: tonic::Request<crate::generated::ConstructRequest>,
    ) -> Result<tonic::Response<crate::generated::ConstructResponse>, tonic::Status> {
        let req = request.into_inner();
        let type_token = req.r#type;
        info!(type_token = %type_token, name = %req.name, dry_run = req.dry_run, "Construct called");

        if !self.provider.has_component(&type_token) {
            return Err(ProviderError::UnknownComponent(type_token).into());
        }

        let monitor = GrpcResourceMonitor::connect(&req.monitor_endpoint).await?;
        let config = StackConfig::new(self.provider.name(), req.config).with_secret_keys(req.config_secret_keys);
        let options = ResourceOptions {
            parent: Some(req.parent).filter(|p| !p.is_empty()),
            protect: req.protect,
            dependencies: req.dependencies,
            providers: req.providers,
            aliases: req.aliases,
        };
        let ctx = ConstructContext::new(Arc::new(monitor), req.project, req.stack, config)
            .with_dry_run(req.dry_run)
            .with_options(options);

        let inputs_opts = MarshalOptions::new(self.label(format!("{}.inputs", type_token)))
            .keep_unknowns()
            .keep_secrets()
            .keep_resources()
            .keep_output_values();
        let inputs = unmarshal_properties(req.inputs.as_ref(), &inputs_opts)?;

        match self
            .provider
            .construct_component(&ctx, &type_token, &req.name, inputs)
            .await
        {
            Ok(result) => {
                let state_opts = MarshalOptions::new(self.label(format!("{}.state", type_token)))
                    .keep_unknowns()
                    .keep_secrets()
                    .keep_resources();
                let state = marshal_properties(&result.state, &state_opts)?;
                info!(urn = %result.urn, "Construct completed successfully");
                Ok(tonic::Response::new(crate::generated::ConstructResponse {
                    state_dependencies: state_dependencies(&result.state),
                    urn: result.urn,
                    state: Some(state),
                }))
            },
            Err(e) => {
                error!(type_token = %type_token, name = %req.name, error = %e, "Construct failed");
                self.provider
                    .log_to_host(LogSeverity::Error, e.to_string(), None)
                    .await;
                Err(e.into())
            },
        }
    }

    #[instrument(skip(self, _request), name = "grpc.cancel")]
    async fn cancel(&self, _request: tonic::Request<()>) -> Result<tonic::Response<()>, tonic::Status> {
        info!("Cancel called");
        self.provider.cancel();
        Ok(tonic::Response::new(()))
    }
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Port to listen on. `None` picks a free port.
    pub port: Option<u16>,
    /// Timeout for graceful shutdown. After receiving a shutdown signal,
    /// the server will wait this long for in-flight requests to complete.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            port: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on a fixed port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to install signal handlers");
                    return std::future::pending().await;
                },
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler");
            return std::future::pending().await;
        }
        info!("Received CTRL+C, initiating graceful shutdown");
    }
}

/// Serve the provider until a shutdown signal arrives.
///
/// Binds a free port on the loopback interface and prints the port number
/// on stdout, which is how the engine learns where to connect.
pub async fn serve(provider: PackageProvider) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve the provider with custom options.
pub async fn serve_with_options(
    provider: PackageProvider,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([127, 0, 0, 1], options.port.unwrap_or(0)));
    let listener = TcpListener::bind(addr).await?;
    serve_on_listener(provider, listener, options, wait_for_shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` completes.
pub async fn serve_on_listener<F>(
    provider: PackageProvider,
    listener: TcpListener,
    options: ServeOptions,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()>,
{
    let addr = listener.local_addr()?;

    // The engine reads the port from the first line of stdout.
    println!("{}", addr.port());

    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let service = ProviderGrpcService::new(Arc::clone(&provider)).into_server();

    let (signalled_tx, signalled_rx) = oneshot::channel();
    let server = Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(tokio_stream::wrappers::TcpListenerStream::new(listener), async move {
            shutdown.await;
            let _ = signalled_tx.send(());
        });
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                error!(error = %e, "Server error");
                return Err(e.into());
            }
        }
        _ = signalled_rx => {
            provider.cancel();
            match tokio::time::timeout(options.shutdown_timeout, &mut server).await {
                Ok(Ok(())) => info!("Server shutdown complete"),
                Ok(Err(e)) => {
                    error!(error = %e, "Server error during shutdown");
                    return Err(e.into());
                },
                Err(_) => warn!(
                    timeout = ?options.shutdown_timeout,
                    "Shutdown timeout exceeded, forcing shutdown"
                ),
            }
        }
    }

    provider.cancel();
    info!("Provider shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::PACKAGE_TOKEN;
    use crate::generated::resource_monitor_server::{ResourceMonitor, ResourceMonitorServer};
    use crate::generated::resource_provider_client::ResourceProviderClient;
    use crate::property::{property_map_from_json, property_map_to_json};
    use crate::testing::RecordingRunner;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::transport::Channel;

    fn to_struct(value: serde_json::Value) -> prost_types::Struct {
        marshal_properties(&property_map_from_json(value), &MarshalOptions::new("test")).unwrap()
    }

    fn from_struct(s: Option<&prost_types::Struct>) -> serde_json::Value {
        property_map_to_json(&unmarshal_properties(s, &MarshalOptions::new("test").keep_unknowns()).unwrap())
    }

    async fn start(provider: PackageProvider) -> ResourceProviderClient<Channel> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(
            Server::builder()
                .add_service(provider.into_service())
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );
        ResourceProviderClient::connect(format!("http://{}", addr))
            .await
            .unwrap()
    }

    fn provider_with(runner: Arc<RecordingRunner>) -> PackageProvider {
        PackageProvider::builder(PACKAGE_NAME)
            .with_version("0.4.0")
            .with_invokes(crate::invoke::all())
            .with_components(crate::component::all())
            .with_runner(runner)
            .build()
    }

    #[test]
    fn test_schema_lists_invokes_and_components() {
        let provider = PackageProvider::new();
        let schema = provider.schema();
        assert_eq!(schema.name, "pulumi-package");
        assert_eq!(schema.functions.len(), 5);
        assert!(schema.functions.contains_key("pulumi-package:index:Publish"));
        assert!(schema.resources[PACKAGE_TOKEN].is_component);
        assert!(schema.config.variables.contains_key("workDir"));
    }

    #[test]
    fn test_changed_keys() {
        let olds = property_map_from_json(json!({"a": 1, "b": "x", "c": true}));
        let news = property_map_from_json(json!({"a": 1, "b": "y", "d": null}));
        assert_eq!(changed_keys(&olds, &news), vec!["b", "c", "d"]);
        assert!(changed_keys(&olds, &olds).is_empty());
    }

    #[test]
    fn test_state_dependencies() {
        let mut state = PropertyMap::new();
        state.insert(
            "releases".to_string(),
            PropertyValue::Output(crate::property::OutputValue {
                element: Some(Box::new(PropertyValue::Array(vec![]))),
                known: true,
                secret: true,
                dependencies: vec!["urn:pulumi:dev::site::aws:s3/bucket:Bucket::releases".to_string()],
            }),
        );
        state.insert("plain".to_string(), PropertyValue::from("x"));

        let deps = state_dependencies(&state);
        assert_eq!(deps.len(), 1);
        assert_eq!(
            deps["releases"].urns,
            vec!["urn:pulumi:dev::site::aws:s3/bucket:Bucket::releases".to_string()]
        );
    }

    #[tokio::test]
    async fn test_call_unknown_token() {
        let provider = PackageProvider::new();
        let err = provider.call("pulumi-package:index:Clean", PropertyMap::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown invoke request for token: pulumi-package:index:Clean");
    }

    #[tokio::test]
    async fn test_plugin_info_and_schema() {
        let mut client = start(provider_with(Arc::new(RecordingRunner::new()))).await;

        let info = client.get_plugin_info(()).await.unwrap().into_inner();
        assert_eq!(info.version, "0.4.0");

        let schema = client
            .get_schema(crate::generated::GetSchemaRequest { version: 0 })
            .await
            .unwrap()
            .into_inner();
        let doc: serde_json::Value = serde_json::from_str(&schema.schema).unwrap();
        assert_eq!(doc["name"], "pulumi-package");
        assert_eq!(doc["version"], "0.4.0");
        assert_eq!(
            doc["resources"][PACKAGE_TOKEN]["properties"]["releases"]["type"],
            "array"
        );

        let status = client
            .get_schema(crate::generated::GetSchemaRequest { version: 2 })
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("unsupported schema version 2"));
    }

    #[tokio::test]
    async fn test_invoke_round_trip() {
        let runner = Arc::new(RecordingRunner::new());
        let mut client = start(provider_with(runner.clone())).await;

        let resp = client
            .invoke(crate::generated::InvokeRequest {
                tok: "pulumi-package:index:New".to_string(),
                args: Some(to_struct(json!({"language": "go", "name": "widgets"}))),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_inner();
        assert!(resp.failures.is_empty());
        assert_eq!(from_struct(resp.r#return.as_ref()), json!({}));
        assert_eq!(runner.command_lines(), vec!["platypack new go widgets"]);
    }

    #[tokio::test]
    async fn test_invoke_returns_validation_failures() {
        let runner = Arc::new(RecordingRunner::new());
        let mut client = start(provider_with(runner.clone())).await;

        let resp = client
            .invoke(crate::generated::InvokeRequest {
                tok: "pulumi-package:index:New".to_string(),
                args: Some(to_struct(json!({"language": "go"}))),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_inner();
        assert!(resp.r#return.is_none());
        assert_eq!(resp.failures.len(), 1);
        assert_eq!(resp.failures[0].property, "name");
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_errors() {
        let runner = Arc::new(RecordingRunner::new().fail_on("make generate", "exit status 2"));
        let mut client = start(provider_with(runner)).await;

        let status = client
            .invoke(crate::generated::InvokeRequest {
                tok: "pulumi-package:index:Nope".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert_eq!(status.message(), "unknown invoke request for token: pulumi-package:index:Nope");

        let status = client
            .invoke(crate::generated::InvokeRequest {
                tok: "pulumi-package:index:Generate".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert_eq!(
            status.message(),
            "invoke failed for token: pulumi-package:index:Generate: \
             command `make generate` failed: exit status 2"
        );
    }

    #[tokio::test]
    async fn test_configure_applies_to_invokes() {
        let runner = Arc::new(RecordingRunner::new());
        let mut client = start(provider_with(runner.clone())).await;

        let resp = client
            .configure(crate::generated::ConfigureRequest {
                variables: [("pulumi-package:config:platform".to_string(), "linux-amd64".to_string())]
                    .into_iter()
                    .collect(),
                args: Some(to_struct(json!({"workDir": "/src/widgets"}))),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_inner();
        assert!(resp.accept_secrets);
        assert!(resp.supports_preview);
        assert!(resp.accept_resources);

        let resp = client
            .invoke(crate::generated::InvokeRequest {
                tok: "pulumi-package:index:Publish".to_string(),
                args: Some(to_struct(json!({
                    "name": "widgets",
                    "version": "2.0.0",
                    "serverBucketName": "bucket",
                    "serverBucketWebsiteEndpoint": "https://dl.example.com"
                }))),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            from_struct(resp.r#return.as_ref()),
            json!({"url": "https://dl.example.com/pulumi-resource-widgets-2.0.0-linux-amd64.tar.gz"})
        );

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls
            .iter()
            .all(|c| c.current_dir.as_deref() == Some(std::path::Path::new("/src/widgets"))));
    }

    #[tokio::test]
    async fn test_check_and_diff_config() {
        let mut client = start(provider_with(Arc::new(RecordingRunner::new()))).await;

        let news = to_struct(json!({"platform": 7, "binDir": "out"}));
        let resp = client
            .check_config(crate::generated::CheckRequest {
                news: Some(news.clone()),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.inputs, Some(news));
        assert_eq!(resp.failures.len(), 1);
        assert_eq!(resp.failures[0].property, "platform");

        let resp = client
            .diff_config(crate::generated::DiffRequest {
                olds: Some(to_struct(json!({"binDir": "bin", "platform": "darwin-amd64"}))),
                news: Some(to_struct(json!({"binDir": "out", "platform": "darwin-amd64"}))),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            resp.changes,
            crate::generated::diff_response::DiffChanges::DiffSome as i32
        );
        assert_eq!(resp.diffs, vec!["binDir".to_string()]);

        let same = to_struct(json!({"binDir": "bin"}));
        let resp = client
            .diff_config(crate::generated::DiffRequest {
                olds: Some(same.clone()),
                news: Some(same),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            resp.changes,
            crate::generated::diff_response::DiffChanges::DiffNone as i32
        );
    }

    #[tokio::test]
    async fn test_crud_is_unimplemented() {
        let mut client = start(PackageProvider::new()).await;

        let status = client
            .check(crate::generated::CheckRequest::default())
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
        assert_eq!(status.message(), "Check is not yet implemented");

        let status = client
            .create(crate::generated::CreateRequest::default())
            .await
            .unwrap_err();
        assert_eq!(status.message(), "Create is not yet implemented");

        let status = client
            .delete(crate::generated::DeleteRequest::default())
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);

        let Err(status) = client
            .stream_invoke(crate::generated::InvokeRequest::default())
            .await
        else {
            panic!("StreamInvoke should be unimplemented");
        };
        assert_eq!(status.message(), "StreamInvoke is not yet implemented");
    }

    #[tokio::test]
    async fn test_cancel_reaches_runner() {
        let runner = Arc::new(RecordingRunner::new());
        let mut client = start(provider_with(runner.clone())).await;

        client.cancel(()).await.unwrap();
        assert!(runner.is_cancelled());
    }

    #[tokio::test]
    async fn test_construct_unknown_type() {
        let mut client = start(PackageProvider::new()).await;
        let status = client
            .construct(crate::generated::ConstructRequest {
                r#type: "pulumi-package:index:Website".to_string(),
                name: "site".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert_eq!(
            status.message(),
            "unknown construct request for type: pulumi-package:index:Website"
        );
    }

    /// A resource monitor that sends invokes back into a provider, the way
    /// the engine routes them.
    struct LoopbackMonitor {
        provider: Arc<PackageProvider>,
        outputs: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    }

    #[tonic::async_trait]
    impl ResourceMonitor for LoopbackMonitor {
        async fn supports_feature(
            &self,
            _request: tonic::Request<crate::generated::SupportsFeatureRequest>,
        ) -> Result<tonic::Response<crate::generated::SupportsFeatureResponse>, tonic::Status> {
            Ok(tonic::Response::new(crate::generated::SupportsFeatureResponse { has_support: false }))
        }

        async fn invoke(
            &self,
            request: tonic::Request<crate::generated::InvokeRequest>,
        ) -> Result<tonic::Response<crate::generated::InvokeResponse>, tonic::Status> {
            let req = request.into_inner();
            if req.tok == "pulumi:pulumi:getResource" {
                return Ok(tonic::Response::new(crate::generated::InvokeResponse {
                    r#return: Some(to_struct(json!({
                        "urn": "",
                        "state": {"releases": ["https://dl.example.com/old.tar.gz"]}
                    }))),
                    failures: vec![],
                }));
            }
            let args = unmarshal_properties(req.args.as_ref(), &MarshalOptions::new("args")).unwrap();
            match self.provider.call(&req.tok, args).await? {
                InvokeOutcome::Return(ret) => Ok(tonic::Response::new(crate::generated::InvokeResponse {
                    r#return: Some(marshal_properties(&ret, &MarshalOptions::new("ret")).unwrap()),
                    failures: vec![],
                })),
                InvokeOutcome::Failures(failures) => Ok(tonic::Response::new(crate::generated::InvokeResponse {
                    r#return: None,
                    failures: failures.into_iter().map(Into::into).collect(),
                })),
            }
        }

        async fn register_resource(
            &self,
            request: tonic::Request<crate::generated::RegisterResourceRequest>,
        ) -> Result<tonic::Response<crate::generated::RegisterResourceResponse>, tonic::Status> {
            let req = request.into_inner();
            Ok(tonic::Response::new(crate::generated::RegisterResourceResponse {
                urn: format!("urn:pulumi:dev::site::{}::{}", req.r#type, req.name),
                ..Default::default()
            }))
        }

        async fn register_resource_outputs(
            &self,
            request: tonic::Request<crate::generated::RegisterResourceOutputsRequest>,
        ) -> Result<tonic::Response<()>, tonic::Status> {
            let req = request.into_inner();
            self.outputs
                .lock()
                .unwrap()
                .push((req.urn, from_struct(req.outputs.as_ref())));
            Ok(tonic::Response::new(()))
        }
    }

    #[tokio::test]
    async fn test_construct_through_monitor() {
        let runner = Arc::new(RecordingRunner::new());
        let outputs = Arc::new(Mutex::new(Vec::new()));

        let monitor_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let monitor_addr = monitor_listener.local_addr().unwrap();
        tokio::spawn(
            Server::builder()
                .add_service(ResourceMonitorServer::new(LoopbackMonitor {
                    provider: Arc::new(provider_with(runner.clone())),
                    outputs: outputs.clone(),
                }))
                .serve_with_incoming(TcpListenerStream::new(monitor_listener)),
        );

        let mut client = start(provider_with(runner.clone())).await;
        let resp = client
            .construct(crate::generated::ConstructRequest {
                project: "site".to_string(),
                stack: "dev".to_string(),
                config: [
                    ("pulumi-package:action".to_string(), "publish".to_string()),
                    ("pulumi-package:version".to_string(), "0.5.0".to_string()),
                ]
                .into_iter()
                .collect(),
                monitor_endpoint: monitor_addr.to_string(),
                r#type: PACKAGE_TOKEN.to_string(),
                name: "widgets".to_string(),
                inputs: Some(to_struct(json!({
                    "language": "go",
                    "name": "widgets",
                    "serverBucketName": "bucket",
                    "serverBucketWebsiteEndpoint": "https://dl.example.com"
                }))),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_inner();

        let urn = format!("urn:pulumi:dev::site::{}::widgets", PACKAGE_TOKEN);
        let expected = json!({"releases": [
            "https://dl.example.com/old.tar.gz",
            "https://dl.example.com/pulumi-resource-widgets-0.5.0-darwin-amd64.tar.gz"
        ]});
        assert_eq!(resp.urn, urn);
        assert_eq!(from_struct(resp.state.as_ref()), expected);
        assert_eq!(outputs.lock().unwrap().clone(), vec![(urn, expected)]);
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_serve_prints_port_and_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            serve_on_listener(
                PackageProvider::new(),
                listener,
                ServeOptions::new().with_shutdown_timeout(Duration::from_secs(1)),
                async {
                    let _ = stop_rx.await;
                },
            )
            .await
            .map_err(|e| e.to_string())
        });

        stop_tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
