//! Hostname resolution for DNS-routed exit nodes

use std::net::IpAddr;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::{Result, RotaError};

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `hostname` to a single address
    async fn lookup(&self, hostname: &str) -> Result<IpAddr>;
}

/// Resolver backed by the operating system (`getaddrinfo`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    #[instrument(skip(self))]
    async fn lookup(&self, hostname: &str) -> Result<IpAddr> {
        let mut addrs = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| RotaError::DnsLookup {
                hostname: hostname.to_string(),
                reason: e.to_string(),
            })?;

        let addr = addrs.next().ok_or_else(|| RotaError::DnsLookup {
            hostname: hostname.to_string(),
            reason: "no addresses returned".to_string(),
        })?;

        debug!(address = %addr.ip(), "Resolved exit node");
        Ok(addr.ip())
    }
}
