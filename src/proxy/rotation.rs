//! Rotation policy
//!
//! Decides whether the current identity must be replaced before the next
//! send. The decision is pure; counters are only mutated by the client.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RotaError};
use crate::models::{parse_country_list, Country, FailureClass};
use crate::provider::check_countries;

/// Declared rotation strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Rotate only on `set_ip`, on retryable failures or when the
    /// per-identity quota is used up
    Manual { countries: Option<Vec<Country>> },
    /// Rotate before every send
    EveryRequest { countries: Option<Vec<Country>> },
}

impl RotationStrategy {
    pub fn manual() -> Self {
        Self::Manual { countries: None }
    }

    pub fn every_request() -> Self {
        Self::EveryRequest { countries: None }
    }

    pub fn with_countries(self, countries: Vec<Country>) -> Self {
        match self {
            Self::Manual { .. } => Self::Manual {
                countries: Some(countries),
            },
            Self::EveryRequest { .. } => Self::EveryRequest {
                countries: Some(countries),
            },
        }
    }

    /// Parse a strategy name with an optional comma-separated country list
    pub fn parse(name: &str, countries: Option<&str>) -> Result<Self> {
        let strategy = match name.trim().to_lowercase().as_str() {
            "manual" => Self::manual(),
            "every_request" | "everyrequest" | "every-request" => Self::every_request(),
            other => {
                return Err(RotaError::InvalidConfig(format!(
                    "unknown rotation strategy: {}",
                    other
                )))
            }
        };

        match countries {
            Some(raw) => Ok(strategy.with_countries(parse_country_list(raw)?)),
            None => Ok(strategy),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual { .. } => "manual",
            Self::EveryRequest { .. } => "every_request",
        }
    }

    pub fn countries(&self) -> Option<&[Country]> {
        match self {
            Self::Manual { countries } | Self::EveryRequest { countries } => countries.as_deref(),
        }
    }

    /// An explicit country set must not be empty
    pub fn validate(&self) -> Result<()> {
        check_countries(self.countries())
    }
}

/// Per-client counters driving rotation and the failure cap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequestCounters {
    pub requests_since_rotation: u32,
    pub consecutive_identity_failures: u32,
    pub consecutive_request_failures: u32,
}

impl RequestCounters {
    pub fn record_success(&mut self) {
        self.consecutive_identity_failures = 0;
        self.consecutive_request_failures = 0;
        self.requests_since_rotation = self.requests_since_rotation.saturating_add(1);
    }

    pub fn record_failure(&mut self, class: FailureClass) {
        self.consecutive_request_failures = self.consecutive_request_failures.saturating_add(1);

        if class.is_retryable() {
            self.consecutive_identity_failures =
                self.consecutive_identity_failures.saturating_add(1);
        } else {
            // The identity was not at fault; the request still counts against it.
            self.requests_since_rotation = self.requests_since_rotation.saturating_add(1);
        }
    }

    pub fn record_rotation(&mut self) {
        self.requests_since_rotation = 0;
    }

    pub fn reset_failures(&mut self) {
        self.consecutive_identity_failures = 0;
        self.consecutive_request_failures = 0;
    }
}

/// Whether a new identity has to be built before the next send.
///
/// `None` as strategy behaves like `Manual`. The quota is checked before
/// sending: with a quota of `n`, the `n + 1`-th request rotates first.
pub fn should_rotate_before_send(
    counters: &RequestCounters,
    strategy: Option<&RotationStrategy>,
    requests_per_identity: Option<u32>,
    has_identity: bool,
) -> bool {
    if !has_identity {
        return true;
    }

    match strategy {
        Some(RotationStrategy::EveryRequest { .. }) => true,
        _ => requests_per_identity.is_some_and(|quota| counters.requests_since_rotation >= quota),
    }
}
