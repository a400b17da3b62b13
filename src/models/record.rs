use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Country;

/// How a failed send attempt is treated by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Proxy-layer status in the retry-trigger set: rotate and retry
    RetryableProxyFailure,
    /// Origin answered with some other status: surface to the caller
    OriginFailure,
    /// No status available at all: surface to the caller
    NonTransportFailure,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::RetryableProxyFailure => "retryable_proxy_failure",
            FailureClass::OriginFailure => "origin_failure",
            FailureClass::NonTransportFailure => "non_transport_failure",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::RetryableProxyFailure)
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One send attempt, published to attempt subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub session_id: u64,
    pub country: Option<Country>,
    pub proxy_address: String,
    pub requested_url: String,
    pub method: String,
    pub success: bool,
    pub response_time: u64,
    pub status_code: Option<u16>,
    pub failure: Option<FailureClass>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}
