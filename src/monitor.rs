//! Client side of the engine's resource monitor.
//!
//! Components register themselves and call functions through the monitor
//! whose address arrives in each `ConstructRequest`.

use std::collections::HashMap;

use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::error::ProviderError;
use crate::generated::resource_monitor_client::ResourceMonitorClient;
use crate::property::{marshal_properties, unmarshal_properties, MarshalOptions, PropertyMap};
use crate::server::MAX_RPC_MESSAGE_SIZE;
use crate::validation::CheckFailure;

/// Options that apply to a registered resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceOptions {
    /// URN of the parent resource.
    pub parent: Option<String>,
    /// Whether the resource is protected from deletion.
    pub protect: bool,
    /// URNs the resource depends on.
    pub dependencies: Vec<String>,
    /// Provider references by package, for children.
    pub providers: HashMap<String, String>,
    /// Prior URNs that identify the same resource.
    pub aliases: Vec<String>,
}

/// A request to register a resource.
#[derive(Debug, Clone)]
pub struct RegisterResource {
    /// The resource type token.
    pub type_token: String,
    /// The resource name.
    pub name: String,
    /// `false` for component resources.
    pub custom: bool,
    /// Initial input properties.
    pub object: PropertyMap,
    /// Parent, dependencies and the like.
    pub options: ResourceOptions,
}

/// The monitor's answer to a registration.
#[derive(Debug, Clone, Default)]
pub struct RegisteredResource {
    /// The URN assigned to the resource.
    pub urn: String,
    /// Resource state known so far.
    pub object: PropertyMap,
}

/// Operations a component performs against the resource monitor.
#[async_trait::async_trait]
pub trait ResourceMonitor: Send + Sync {
    /// Register a resource and return its URN.
    async fn register_resource(&self, request: RegisterResource) -> Result<RegisteredResource, ProviderError>;

    /// Attach final outputs to a registered resource.
    async fn register_resource_outputs(&self, urn: &str, outputs: PropertyMap) -> Result<(), ProviderError>;

    /// Call a function by token.
    ///
    /// Argument check failures reported by the function are returned as
    /// [`ProviderError::InvalidArgument`].
    async fn invoke(&self, token: &str, args: PropertyMap) -> Result<PropertyMap, ProviderError>;
}

/// Turn check failures returned by an invoke into an error.
pub fn failures_to_error(token: &str, failures: &[CheckFailure]) -> ProviderError {
    let reasons: Vec<String> = failures.iter().map(ToString::to_string).collect();
    ProviderError::InvalidArgument(format!(
        "{} rejected its arguments: {}",
        token,
        reasons.join("; ")
    ))
}

/// A [`ResourceMonitor`] reached over gRPC.
#[derive(Debug, Clone)]
pub struct GrpcResourceMonitor {
    client: ResourceMonitorClient<Channel>,
}

impl GrpcResourceMonitor {
    /// Connect to a monitor at `host:port`.
    pub async fn connect(endpoint: &str) -> Result<Self, ProviderError> {
        debug!(endpoint, "Connecting to resource monitor");
        let channel = Endpoint::from_shared(format!("http://{}", endpoint))?
            .connect()
            .await?;
        let client = ResourceMonitorClient::new(channel)
            .max_decoding_message_size(MAX_RPC_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_RPC_MESSAGE_SIZE);
        Ok(Self { client })
    }

    fn wire_options(label: &str) -> MarshalOptions {
        MarshalOptions::new(label)
            .keep_unknowns()
            .keep_secrets()
            .keep_resources()
    }
}

#[async_trait::async_trait]
impl ResourceMonitor for GrpcResourceMonitor {
    async fn register_resource(&self, request: RegisterResource) -> Result<RegisteredResource, ProviderError> {
        let object = marshal_properties(&request.object, &Self::wire_options("object"))?;
        let options = request.options;
        let req = crate::generated::RegisterResourceRequest {
            r#type: request.type_token.clone(),
            name: request.name.clone(),
            parent: options.parent.unwrap_or_default(),
            custom: request.custom,
            object: Some(object),
            protect: options.protect,
            dependencies: options.dependencies,
            accept_secrets: true,
            accept_resources: true,
            aliases: options.aliases,
            providers: options.providers,
            ..Default::default()
        };

        let resp = self
            .client
            .clone()
            .register_resource(req)
            .await
            .map_err(|status| ProviderError::rpc(format!("RegisterResource({})", request.type_token), status))?
            .into_inner();

        debug!(urn = %resp.urn, "Registered resource");
        Ok(RegisteredResource {
            object: unmarshal_properties(resp.object.as_ref(), &Self::wire_options("object"))?,
            urn: resp.urn,
        })
    }

    async fn register_resource_outputs(&self, urn: &str, outputs: PropertyMap) -> Result<(), ProviderError> {
        let outputs = marshal_properties(&outputs, &Self::wire_options("outputs"))?;
        self.client
            .clone()
            .register_resource_outputs(crate::generated::RegisterResourceOutputsRequest {
                urn: urn.to_string(),
                outputs: Some(outputs),
            })
            .await
            .map_err(|status| ProviderError::rpc("RegisterResourceOutputs", status))?;
        Ok(())
    }

    async fn invoke(&self, token: &str, args: PropertyMap) -> Result<PropertyMap, ProviderError> {
        let args = marshal_properties(&args, &Self::wire_options("args"))?;
        let resp = self
            .client
            .clone()
            .invoke(crate::generated::InvokeRequest {
                tok: token.to_string(),
                args: Some(args),
                accept_resources: true,
                ..Default::default()
            })
            .await
            .map_err(|status| ProviderError::rpc(format!("Invoke({})", token), status))?
            .into_inner();

        if !resp.failures.is_empty() {
            let failures: Vec<CheckFailure> = resp
                .failures
                .into_iter()
                .map(|f| CheckFailure::new(f.property, f.reason))
                .collect();
            return Err(failures_to_error(token, &failures));
        }

        unmarshal_properties(resp.r#return.as_ref(), &Self::wire_options("return"))
    }
}
