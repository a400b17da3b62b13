//! Backend-list provider: a flat pool of `host:port` proxies, each one its
//! own exit IP. No geo or session routing is available.

use rand::seq::SliceRandom;
use rand::RngCore;

use super::{check_countries, IdentityParams, ProxyProvider};
use crate::error::{Result, RotaError};
use crate::models::{Country, ProxyEndpoint, ProxyIdentity, ProxyProtocol};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub host: String,
    pub port: u16,
}

impl Backend {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, accepting bracketed IPv6 hosts
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (host, port) = raw.rsplit_once(':').ok_or_else(|| {
            RotaError::InvalidProxyAddress(format!("backend must be host:port, got {}", raw))
        })?;
        let port = port
            .parse::<u16>()
            .map_err(|_| RotaError::InvalidProxyAddress(format!("invalid port in {}", raw)))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(RotaError::InvalidProxyAddress(format!(
                "missing host in {}",
                raw
            )));
        }

        Ok(Self::new(host, port))
    }
}

#[derive(Debug, Clone)]
pub struct BackendListConfig {
    pub protocol: ProxyProtocol,
    pub backends: Vec<Backend>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BackendListConfig {
    pub fn new(backends: Vec<Backend>) -> Self {
        Self {
            protocol: ProxyProtocol::Http,
            backends,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Parse a comma-separated `host:port` list
    pub fn parse_backends(raw: &str) -> Result<Vec<Backend>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Backend::parse)
            .collect()
    }
}

pub struct BackendListProvider {
    config: BackendListConfig,
}

impl BackendListProvider {
    pub fn new(config: BackendListConfig) -> Result<Self> {
        if config.backends.is_empty() {
            return Err(RotaError::InvalidConfig(
                "a {host}:{port} backend list has to be provided".to_string(),
            ));
        }
        Ok(Self { config })
    }
}

impl ProxyProvider for BackendListProvider {
    fn build_identity(
        &self,
        params: &IdentityParams<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<ProxyIdentity> {
        // Backends carry no country; a restriction is validated but unused.
        check_countries(params.countries)?;

        let backend = self
            .config
            .backends
            .choose(rng)
            .ok_or_else(|| RotaError::InvalidConfig("backend list is empty".to_string()))?;

        let mut endpoint =
            ProxyEndpoint::new(backend.host.clone(), backend.port).with_protocol(self.config.protocol);
        endpoint.username = self.config.username.clone();
        endpoint.password = self.config.password.clone();

        Ok(ProxyIdentity {
            session_id: params.session_id,
            country: None,
            endpoint,
        })
    }

    fn countries(&self) -> Vec<Country> {
        Vec::new()
    }

    fn provider_name(&self) -> &'static str {
        "backend_list"
    }
}
