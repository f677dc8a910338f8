use std::io;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request, rejected before any adapter call
    #[error("Validation error: {0}")]
    Validation(String),

    /// CA backend refused or failed the operation
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// No adapter registered under the requested id
    #[error("Adapter not found: {0}")]
    AdapterNotFound(String),

    /// CA backend did not answer in time
    #[error("Adapter timed out after {0:?}")]
    AdapterTimeout(Duration),

    /// Target agent is not online
    #[error("Agent offline: {0}")]
    AgentOffline(String),

    /// Target agent did not answer in time
    #[error("Agent timed out: {0}")]
    AgentTimeout(String),

    /// A pending install already exists for the (certificate, agent) pair
    #[error("Install already in progress for certificate {certificate_id} on agent {agent_id}")]
    InstallInProgress {
        /// Certificate id
        certificate_id: String,
        /// Agent id
        agent_id: String,
    },

    /// Unknown certificate, agent or request id
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// State transition not valid from the current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Certificate encoding or generation error
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Agent transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable kind, used for audit details and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Adapter(_) => "adapter",
            Error::AdapterNotFound(_) => "adapter_not_found",
            Error::AdapterTimeout(_) => "adapter_timeout",
            Error::AgentOffline(_) => "agent_offline",
            Error::AgentTimeout(_) => "agent_timeout",
            Error::InstallInProgress { .. } => "install_in_progress",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Certificate(_) => "certificate",
            Error::Transport(_) => "transport",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON error: {}", err))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::AgentTimeout(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<rcgen::RcgenError> for Error {
    fn from(err: rcgen::RcgenError) -> Self {
        Error::Certificate(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Internal(format!("Metrics error: {}", err))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Certificate(format!("Invalid PEM body: {}", err))
    }
}
