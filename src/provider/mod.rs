//! Proxy identity builders
//!
//! Each upstream proxy vendor routes exit nodes differently. A provider turns
//! a (country restriction, session id) pair into a concrete [`ProxyIdentity`]:
//!
//! - [`SuperProxyProvider`]: one gateway, routing encoded in the auth string
//!   (optionally with a DNS-resolved exit host)
//! - [`PortMappingProvider`]: one host, a distinct port per country / exit IP
//! - [`BackendListProvider`]: a flat list of `host:port` backends

mod backend_list;
mod port_mapping;
mod session;
mod superproxy;
pub mod template;

pub use backend_list::{Backend, BackendListConfig, BackendListProvider};
pub use port_mapping::{PortMappingConfig, PortMappingProvider};
pub use session::{RandomSessionIds, SequentialSessionIds, SessionIdSource};
pub use superproxy::{ExitNodeConfig, SuperProxyConfig, SuperProxyProvider};
pub use template::Template;

use rand::seq::SliceRandom;
use rand::RngCore;

use crate::error::{Result, RotaError};
use crate::models::{Country, ProxyIdentity};

/// Inputs for a single identity build
#[derive(Debug, Clone, Copy)]
pub struct IdentityParams<'a> {
    /// Restrict the exit country to this set; `None` means any supported
    pub countries: Option<&'a [Country]>,
    pub session_id: u64,
}

/// Provider variant, selected explicitly at construction time
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    SuperProxy(SuperProxyConfig),
    PortMapping(PortMappingConfig),
    BackendList(BackendListConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderConfig::SuperProxy(_) => "super_proxy",
            ProviderConfig::PortMapping(_) => "port_mapping",
            ProviderConfig::BackendList(_) => "backend_list",
        }
    }
}

/// Trait for identity builders
///
/// Implementations are pure: they never perform I/O. DNS-based exit-node
/// resolution is requested through [`ProxyProvider::exit_node_hostname`] and
/// carried out by the caller.
pub trait ProxyProvider: Send + Sync {
    /// Build a fresh identity for the given session and country restriction
    fn build_identity(
        &self,
        params: &IdentityParams<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<ProxyIdentity>;

    /// Hostname whose address should replace the identity's endpoint host
    fn exit_node_hostname(&self, _identity: &ProxyIdentity) -> Option<String> {
        None
    }

    /// Countries this provider can target (empty when it has no geo routing)
    fn countries(&self) -> Vec<Country>;

    /// Get the provider name
    fn provider_name(&self) -> &'static str;
}

/// Create a provider based on the configured variant
pub fn create_provider(config: &ProviderConfig) -> Result<Box<dyn ProxyProvider>> {
    Ok(match config {
        ProviderConfig::SuperProxy(cfg) => Box::new(SuperProxyProvider::new(cfg.clone())?),
        ProviderConfig::PortMapping(cfg) => Box::new(PortMappingProvider::new(cfg.clone())?),
        ProviderConfig::BackendList(cfg) => Box::new(BackendListProvider::new(cfg.clone())?),
    })
}

/// Reject an explicitly empty country restriction
pub fn check_countries(countries: Option<&[Country]>) -> Result<()> {
    match countries {
        Some(list) if list.is_empty() => Err(RotaError::InvalidConfig(
            "\"countries\" cannot be empty".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Draw a country uniformly from `catalog`, restricted to `allowed`.
///
/// Returns `None` when the catalog is empty (no geo routing).
pub(crate) fn pick_country(
    catalog: &[Country],
    allowed: Option<&[Country]>,
    rng: &mut dyn RngCore,
) -> Result<Option<Country>> {
    check_countries(allowed)?;

    if catalog.is_empty() {
        return Ok(None);
    }

    let candidates: Vec<Country> = match allowed {
        Some(allowed) => catalog
            .iter()
            .copied()
            .filter(|c| allowed.contains(c))
            .collect(),
        None => catalog.to_vec(),
    };

    candidates.choose(rng).copied().map(Some).ok_or_else(|| {
        RotaError::InvalidConfig(
            "none of the requested countries is supported by this provider".to_string(),
        )
    })
}
