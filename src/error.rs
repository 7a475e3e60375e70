//! Error types for the package provider.

use thiserror::Error;

/// Errors that can occur while serving the provider protocol.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No invoke handler is registered for the token.
    #[error("unknown invoke request for token: {0}")]
    UnknownInvoke(String),

    /// No component is registered for the type token.
    #[error("unknown construct request for type: {0}")]
    UnknownComponent(String),

    /// An argument was missing or had the wrong shape.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A property value could not be marshaled or unmarshaled.
    #[error("property error: {0}")]
    Property(String),

    /// A required configuration value was missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external command could not be started or exited unsuccessfully.
    #[error("command `{command}` failed: {reason}")]
    Command {
        /// The command line that was run.
        command: String,
        /// Exit status or spawn failure, plus any captured stderr.
        reason: String,
    },

    /// The operation was aborted by a `Cancel` request.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// An invoke handler failed.
    #[error("invoke failed for token: {token}: {source}")]
    InvokeFailed {
        /// The invoke token that failed.
        token: String,
        /// The underlying failure.
        #[source]
        source: Box<ProviderError>,
    },

    /// The resource monitor or engine rejected a request.
    #[error("{operation} failed: {}", status.message())]
    Rpc {
        /// The RPC that failed, for context.
        operation: String,
        /// The status returned by the engine.
        status: tonic::Status,
    },

    /// Operation not implemented.
    #[error("{0} is not yet implemented")]
    Unimplemented(String),

    /// A JSON serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Get the error message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::UnknownInvoke(msg)
            | Self::UnknownComponent(msg)
            | Self::InvalidArgument(msg)
            | Self::Property(msg)
            | Self::Configuration(msg)
            | Self::Cancelled(msg)
            | Self::Unimplemented(msg) => msg.clone(),
            Self::Command { reason, .. } => reason.clone(),
            Self::InvokeFailed { source, .. } => source.to_string(),
            Self::Rpc { status, .. } => status.message().to_string(),
            Self::Serialization(err) => err.to_string(),
            Self::Transport(err) => err.to_string(),
            Self::Io(err) => err.to_string(),
        }
    }

    /// Wrap a handler failure with the invoke token it came from.
    pub fn invoke_failed(token: impl Into<String>, source: ProviderError) -> Self {
        Self::InvokeFailed {
            token: token.into(),
            source: Box::new(source),
        }
    }

    /// The gRPC status code reported to the engine for this error.
    ///
    /// Invoke failures report the code of the error they wrap.
    pub fn code(&self) -> tonic::Code {
        match self {
            Self::UnknownInvoke(_) | Self::UnknownComponent(_) => tonic::Code::NotFound,
            Self::InvalidArgument(_) | Self::Property(_) | Self::Serialization(_) => {
                tonic::Code::InvalidArgument
            },
            Self::Configuration(_) => tonic::Code::FailedPrecondition,
            Self::Command { .. } | Self::Io(_) => tonic::Code::Internal,
            Self::Cancelled(_) => tonic::Code::Cancelled,
            Self::InvokeFailed { source, .. } => source.code(),
            Self::Rpc { status, .. } => status.code(),
            Self::Unimplemented(_) => tonic::Code::Unimplemented,
            Self::Transport(_) => tonic::Code::Unavailable,
        }
    }

    /// Attach the name of the engine RPC to a failed status.
    pub fn rpc(operation: impl Into<String>, status: tonic::Status) -> Self {
        Self::Rpc {
            operation: operation.into(),
            status,
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        tonic::Status::new(err.code(), err.to_string())
    }
}
