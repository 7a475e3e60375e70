//! Pulumi Package Provider
//!
//! A Pulumi resource provider plugin that drives the lifecycle of another
//! Pulumi package from inside a Pulumi program: scaffolding it with the code
//! generation CLI, generating and building its SDKs, installing it locally
//! and publishing release archives to an S3 bucket.
//!
//! # Overview
//!
//! The provider exposes:
//!
//! - **Invokes** ([`invoke`]): `pulumi-package:index:New`, `Generate`,
//!   `Build`, `Install` and `Publish`, each running one external command
//!   sequence
//! - **A component** ([`component::Package`]): `pulumi-package:index:Package`,
//!   which runs the step selected by the stack's `pulumi-package:action`
//!   config and accumulates published release URLs in its `releases` output
//! - **Server helpers** ([`server`]): the `pulumirpc.ResourceProvider`
//!   service and the port handshake
//!
//! # Handshake Protocol
//!
//! The engine launches the provider binary with the address of its own
//! `Engine` service as the last argument. The provider binds a free port on
//! the loopback interface and prints the port number on stdout:
//!
//! ```text
//! 51234
//! ```
//!
//! The engine then connects and drives the provider over gRPC.
//!
//! # Provider Protocol
//!
//! - **GetPluginInfo**: Reports the provider version
//! - **GetSchema**: Returns the package schema as JSON
//! - **CheckConfig / DiffConfig / Configure**: Provider configuration
//! - **Invoke**: Runs one of the lifecycle functions
//! - **Construct**: Builds a `Package` component
//! - **Cancel**: Aborts running commands
//!
//! Custom-resource CRUD and `StreamInvoke` answer `UNIMPLEMENTED`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod component;
pub mod config;
pub mod error;
pub mod host;
pub mod invoke;
pub mod logging;
pub mod monitor;
pub mod property;
pub mod schema;
pub mod server;
pub mod testing;
pub mod validation;

/// Types generated from the Pulumi engine protocol definitions.
#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated {
    tonic::include_proto!("pulumirpc");
}

// Re-export main types at crate root
pub use command::{CommandRunner, CommandSpec, SystemRunner};
pub use component::{Component, ConstructContext, ConstructResult, Package};
pub use config::{Action, ProviderConfig, StackConfig};
pub use error::ProviderError;
pub use host::HostClient;
pub use invoke::{InvokeContext, InvokeHandler};
pub use logging::{filter_for_verbosity, init_logging, init_logging_with_default, try_init_logging};
pub use property::{PropertyMap, PropertyValue};
pub use schema::PackageSpec;
pub use server::{
    serve, serve_on_listener, serve_with_options, InvokeOutcome, PackageProvider, ServeOptions,
    MAX_RPC_MESSAGE_SIZE,
};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;
