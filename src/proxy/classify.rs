use std::collections::BTreeSet;

use crate::error::TransportError;
use crate::models::FailureClass;

/// Statuses that point at the proxy layer rather than the origin
pub const DEFAULT_RETRY_STATUSES: [u16; 4] = [403, 429, 502, 503];

/// Classify a failed send.
///
/// No status means nothing answered at the HTTP layer; a status in
/// `retry_statuses` is blamed on the exit node; anything else came from
/// the origin.
pub fn classify(error: &TransportError, retry_statuses: &BTreeSet<u16>) -> FailureClass {
    match error.status {
        None => FailureClass::NonTransportFailure,
        Some(status) if retry_statuses.contains(&status.as_u16()) => {
            FailureClass::RetryableProxyFailure
        }
        Some(_) => FailureClass::OriginFailure,
    }
}
