use std::process::ExitCode;

use clap::Parser;
use pulumi_package::config::PACKAGE_NAME;
use pulumi_package::{serve_with_options, try_init_logging, HostClient, PackageProvider, ServeOptions};
use tracing::{error, info};

/// Pulumi resource provider for scaffolding, building and publishing packages.
///
/// Launched by the Pulumi engine, which passes the address of its own RPC
/// endpoint as the last argument.
#[derive(Clone, Debug, Parser)]
#[command(version, ignore_errors = true)]
struct Options {
    /// Engine log verbosity.
    #[arg(short = 'v', default_value_t = 0)]
    verbosity: u8,

    /// Accepted for compatibility; logs always go to stderr.
    #[arg(long)]
    logtostderr: bool,

    /// Accepted for compatibility with the engine's plugin flags.
    #[arg(long)]
    logflow: bool,

    /// Tracing endpoint passed by the engine. Not used.
    #[arg(long)]
    tracing: Option<String>,

    /// Port to listen on instead of a free one.
    #[arg(long, env = "PULUMI_PACKAGE_PORT")]
    port: Option<u16>,

    /// Address of the engine's RPC endpoint.
    engine_address: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let opt = Options::parse();
    try_init_logging(opt.verbosity);

    let Some(address) = opt.engine_address else {
        eprintln!("fatal: could not connect to host RPC; missing argument");
        return ExitCode::FAILURE;
    };

    let host = match HostClient::connect(&address).await {
        Ok(host) => host,
        Err(e) => {
            eprintln!("fatal: could not connect to host RPC: {}", e);
            return ExitCode::FAILURE;
        },
    };

    let provider = PackageProvider::builder(PACKAGE_NAME)
        .with_invokes(pulumi_package::invoke::all())
        .with_components(pulumi_package::component::all())
        .with_host(host)
        .build();

    let mut options = ServeOptions::new();
    if let Some(port) = opt.port {
        options = options.with_port(port);
    }

    info!(version = provider.version(), "Starting provider");
    match serve_with_options(provider, options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Provider exited with an error");
            ExitCode::FAILURE
        },
    }
}
