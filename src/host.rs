//! Connection back to the engine that launched the provider.

use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::error::ProviderError;
use crate::generated::engine_client::EngineClient;
use crate::generated::{LogRequest, LogSeverity};

/// Client for the engine's `Engine` service.
///
/// Messages logged here show up in the user's `pulumi up` output, unlike
/// `tracing` events, which only reach the provider's stderr.
#[derive(Debug, Clone)]
pub struct HostClient {
    client: EngineClient<Channel>,
}

impl HostClient {
    /// Connect to the engine at `host:port`.
    pub async fn connect(address: &str) -> Result<Self, ProviderError> {
        debug!(address, "Connecting to engine");
        let channel = Endpoint::from_shared(format!("http://{}", address))?
            .connect()
            .await?;
        Ok(Self {
            client: EngineClient::new(channel),
        })
    }

    /// Send a log message, optionally attached to a resource.
    pub async fn log(&self, severity: LogSeverity, message: impl Into<String>, urn: Option<&str>) -> Result<(), ProviderError> {
        self.client
            .clone()
            .log(LogRequest {
                severity: severity as i32,
                message: message.into(),
                urn: urn.unwrap_or_default().to_string(),
                stream_id: 0,
                ephemeral: false,
            })
            .await
            .map_err(|status| ProviderError::rpc("Log", status))?;
        Ok(())
    }

    /// Log at info severity.
    pub async fn info(&self, message: impl Into<String>, urn: Option<&str>) -> Result<(), ProviderError> {
        self.log(LogSeverity::Info, message, urn).await
    }

    /// Log at warning severity.
    pub async fn warn(&self, message: impl Into<String>, urn: Option<&str>) -> Result<(), ProviderError> {
        self.log(LogSeverity::Warning, message, urn).await
    }

    /// Log at error severity.
    pub async fn error(&self, message: impl Into<String>, urn: Option<&str>) -> Result<(), ProviderError> {
        self.log(LogSeverity::Error, message, urn).await
    }
}
