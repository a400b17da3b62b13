//! Proxied request execution
//!
//! This module provides:
//! - The session/retry state machine ([`RotatingClient`])
//! - Rotation policy and request counters
//! - Failure classification
//! - HTTP CONNECT and SOCKS5 tunnels to the upstream proxy
//! - The hyper-based HTTP client running over those tunnels
//! - Exit node DNS resolution

pub mod classify;
pub mod client;
pub mod dns;
pub mod rotation;
pub mod shared;
pub mod transport;
pub mod tunnel;

#[cfg(test)]
pub(crate) mod mock;

pub use classify::{classify, DEFAULT_RETRY_STATUSES};
pub use client::{RotatingClient, SetIpParams};
pub use dns::{Resolver, SystemResolver};
pub use rotation::{should_rotate_before_send, RequestCounters, RotationStrategy};
pub use shared::SharedClient;
pub use transport::{HttpClient, HyperClient, OutboundRequest};
pub use tunnel::{
    ProxyConnection, ProxyTunnel, TunnelBuilder, TunnelHandle, UpstreamTunnel,
    UpstreamTunnelBuilder,
};
