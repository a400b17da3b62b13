//! Port-mapping provider: one gateway host where every port pins a distinct
//! exit IP in a known country.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::RngCore;

use super::{pick_country, IdentityParams, ProxyProvider};
use crate::error::{Result, RotaError};
use crate::models::{Country, ProxyEndpoint, ProxyIdentity, ProxyProtocol};

#[derive(Debug, Clone)]
pub struct PortMappingConfig {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub mapping: BTreeMap<Country, Vec<u16>>,
}

impl PortMappingConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            protocol: ProxyProtocol::Http,
            host: host.into(),
            username: None,
            password: None,
            mapping: BTreeMap::new(),
        }
    }

    pub fn with_ports(mut self, country: Country, ports: Vec<u16>) -> Self {
        self.mapping.entry(country).or_default().extend(ports);
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Parse `fr:12356|12359,be:12357` into a mapping
    pub fn parse_mapping(raw: &str) -> Result<BTreeMap<Country, Vec<u16>>> {
        let mut mapping: BTreeMap<Country, Vec<u16>> = BTreeMap::new();

        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (code, ports) = entry.split_once(':').ok_or_else(|| {
                RotaError::InvalidConfig(format!("port mapping entry must be country:ports, got {}", entry))
            })?;
            let country: Country = code.parse()?;

            for port in ports.split('|').map(str::trim).filter(|s| !s.is_empty()) {
                let port = port.parse::<u16>().map_err(|_| {
                    RotaError::InvalidConfig(format!("invalid port in mapping: {}", port))
                })?;
                mapping.entry(country).or_default().push(port);
            }
        }

        Ok(mapping)
    }
}

pub struct PortMappingProvider {
    config: PortMappingConfig,
    countries: Vec<Country>,
}

impl PortMappingProvider {
    pub fn new(config: PortMappingConfig) -> Result<Self> {
        // Countries whose port list is empty cannot be routed to.
        let countries: Vec<Country> = config
            .mapping
            .iter()
            .filter(|(_, ports)| !ports.is_empty())
            .map(|(country, _)| *country)
            .collect();

        if countries.is_empty() {
            return Err(RotaError::InvalidConfig(
                "a port-to-country mapping has to be provided".to_string(),
            ));
        }

        Ok(Self { config, countries })
    }
}

impl ProxyProvider for PortMappingProvider {
    fn build_identity(
        &self,
        params: &IdentityParams<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<ProxyIdentity> {
        let country = pick_country(&self.countries, params.countries, rng)?.ok_or_else(|| {
            RotaError::InvalidConfig("port mapping has no routable country".to_string())
        })?;

        let port = self
            .config
            .mapping
            .get(&country)
            .and_then(|ports| ports.choose(rng))
            .copied()
            .ok_or_else(|| {
                RotaError::InvalidConfig(format!("no ports mapped for country {}", country))
            })?;

        let mut endpoint =
            ProxyEndpoint::new(self.config.host.clone(), port).with_protocol(self.config.protocol);
        endpoint.username = self.config.username.clone();
        endpoint.password = self.config.password.clone();

        Ok(ProxyIdentity {
            session_id: params.session_id,
            country: Some(country),
            endpoint,
        })
    }

    fn countries(&self) -> Vec<Country> {
        self.countries.clone()
    }

    fn provider_name(&self) -> &'static str {
        "port_mapping"
    }
}
