use http::StatusCode;
use thiserror::Error;

use crate::models::Response;

/// Failure reported by the HTTP client capability.
///
/// `status` is present whenever some HTTP layer answered (origin or proxy);
/// it is absent for DNS, connect and timeout failures. `response` holds the
/// origin's reply when one was received.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<StatusCode>,
    pub message: String,
    pub response: Option<Response>,
}

impl TransportError {
    /// Failure with no usable status
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            response: None,
        }
    }

    /// Failure carrying only a status, e.g. a refused CONNECT
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            response: None,
        }
    }

    /// Non-2xx reply from the origin
    pub fn from_response(response: Response) -> Self {
        Self {
            status: Some(response.status),
            message: format!("Request failed with status code {}", response.status.as_u16()),
            response: Some(response),
        }
    }
}

impl From<RotaError> for TransportError {
    fn from(err: RotaError) -> Self {
        match err {
            RotaError::Transport(inner) => inner,
            RotaError::ConnectRejected { status, reason } => {
                match StatusCode::from_u16(status) {
                    Ok(code) => TransportError::with_status(code, format!("CONNECT failed: {}", reason)),
                    Err(_) => TransportError::network(format!("CONNECT failed: {}", reason)),
                }
            }
            other => TransportError::network(other.to_string()),
        }
    }
}

/// Unified error type for the rotating client
#[derive(Error, Debug)]
pub enum RotaError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Retry loop outcomes
    #[error("Maximum consecutive failures reached after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Exit node {hostname} could not be resolved: {reason}")]
    ExitNodeUnresolved { hostname: String, reason: String },

    // Proxy errors
    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Proxy refused CONNECT with status {status}: {reason}")]
    ConnectRejected { status: u16, reason: String },

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("DNS lookup failed for {hostname}: {reason}")]
    DnsLookup { hostname: String, reason: String },

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for rotating client operations
pub type Result<T> = std::result::Result<T, RotaError>;

impl RotaError {
    /// Status code attached to this error, if any HTTP layer produced one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RotaError::Transport(err) => err.status,
            RotaError::ConnectRejected { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }

    /// Origin or proxy response propagated with this error
    pub fn response(&self) -> Option<&Response> {
        match self {
            RotaError::Transport(err) => err.response.as_ref(),
            _ => None,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| s.is_client_error())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| s.is_server_error())
    }

    /// Check if this error was caused by static configuration
    pub fn is_config_error(&self) -> bool {
        matches!(self, RotaError::InvalidConfig(_) | RotaError::MissingEnvVar(_))
    }
}

// Convert from hyper errors
impl From<hyper::Error> for RotaError {
    fn from(err: hyper::Error) -> Self {
        RotaError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RotaError {
    fn from(err: url::ParseError) -> Self {
        RotaError::InvalidRequest(format!("invalid URL: {}", err))
    }
}
