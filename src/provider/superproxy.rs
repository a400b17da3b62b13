//! Super-proxy provider: a single gateway whose exit node is selected by the
//! session and country tokens embedded in the proxy username.

use rand::RngCore;

use super::{pick_country, IdentityParams, ProxyProvider, Template};
use crate::error::{Result, RotaError};
use crate::models::{Country, ProxyEndpoint, ProxyIdentity, ProxyProtocol, SUPERPROXY_COUNTRIES};

pub const DEFAULT_AUTH_TEMPLATE: &str = "{zone}{session}{country}:{password}";
pub const BRIGHT_DATA_HOST: &str = "brd.superproxy.io";
pub const LUMINATI_HOST: &str = "zproxy.lum-superproxy.io";
pub const SUPERPROXY_PORT: u16 = 22225;
pub const LUMINATI_EXIT_NODE_TEMPLATE: &str =
    "session-{session}-servercountry-{server_country}.zproxy.lum-superproxy.io";

/// DNS-resolved exit node settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitNodeConfig {
    /// Hostname template; `{session}`, `{country}` and `{server_country}` are
    /// substituted
    pub hostname_template: Template,
    /// Region of the super-proxy server itself (e.g. `NL`)
    pub server_country: String,
}

#[derive(Debug, Clone)]
pub struct SuperProxyConfig {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    /// Zone or account username
    pub username: String,
    pub password: String,
    pub auth_template: Template,
    /// Countries the gateway can route to; empty disables geo routing
    pub countries: Vec<Country>,
    pub exit_node: Option<ExitNodeConfig>,
}

impl SuperProxyConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            protocol: ProxyProtocol::Http,
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            auth_template: Template::new(DEFAULT_AUTH_TEMPLATE),
            countries: SUPERPROXY_COUNTRIES.to_vec(),
            exit_node: None,
        }
    }

    pub fn bright_data(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(BRIGHT_DATA_HOST, SUPERPROXY_PORT, username, password)
    }

    pub fn luminati(zone: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(LUMINATI_HOST, SUPERPROXY_PORT, zone, password)
    }

    /// Luminati gateway reached through a per-session DNS-resolved exit host
    pub fn luminati_resolved(
        zone: impl Into<String>,
        password: impl Into<String>,
        server_country: impl Into<String>,
    ) -> Self {
        Self::luminati(zone, password).with_exit_node(ExitNodeConfig {
            hostname_template: Template::new(LUMINATI_EXIT_NODE_TEMPLATE),
            server_country: server_country.into(),
        })
    }

    /// Rotating gateway with fixed credentials and no session/geo routing.
    ///
    /// The gateway rotates on its own, so there is nothing for `set_ip` to
    /// choose. Pair it with
    /// [`RotationStrategy::manual`](crate::proxy::RotationStrategy::manual) to
    /// let the first `fetch` build the identity; without a strategy, `fetch`
    /// fails until `set_ip` has been called once.
    pub fn proxyrack(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, port, username, password)
            .with_auth_template("{zone}:{password}")
            .with_countries(Vec::new())
    }

    pub fn with_auth_template(mut self, template: impl Into<String>) -> Self {
        self.auth_template = Template::new(template);
        self
    }

    pub fn with_countries(mut self, countries: Vec<Country>) -> Self {
        self.countries = countries;
        self
    }

    pub fn with_exit_node(mut self, exit_node: ExitNodeConfig) -> Self {
        self.exit_node = Some(exit_node);
        self
    }

    pub fn with_protocol(mut self, protocol: ProxyProtocol) -> Self {
        self.protocol = protocol;
        self
    }
}

pub struct SuperProxyProvider {
    config: SuperProxyConfig,
}

impl SuperProxyProvider {
    pub fn new(config: SuperProxyConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(RotaError::InvalidConfig(
                "super-proxy host cannot be empty".to_string(),
            ));
        }
        if config.port == 0 {
            return Err(RotaError::InvalidConfig(
                "super-proxy port cannot be 0".to_string(),
            ));
        }
        Ok(Self { config })
    }

    fn render_auth(&self, session_id: u64, country: Option<Country>) -> String {
        let session = format!("-session-{}", session_id);
        let country = country
            .map(|c| format!("-country-{}", c))
            .unwrap_or_default();

        self.config.auth_template.render(&[
            ("zone", self.config.username.as_str()),
            ("session", session.as_str()),
            ("country", country.as_str()),
            ("password", self.config.password.as_str()),
        ])
    }
}

impl ProxyProvider for SuperProxyProvider {
    fn build_identity(
        &self,
        params: &IdentityParams<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<ProxyIdentity> {
        let country = pick_country(&self.config.countries, params.countries, rng)?;
        let auth = self.render_auth(params.session_id, country);

        let endpoint = ProxyEndpoint::new(self.config.host.clone(), self.config.port)
            .with_protocol(self.config.protocol)
            .with_auth(&auth);

        Ok(ProxyIdentity {
            session_id: params.session_id,
            country,
            endpoint,
        })
    }

    fn exit_node_hostname(&self, identity: &ProxyIdentity) -> Option<String> {
        let exit_node = self.config.exit_node.as_ref()?;
        let session = identity.session_id.to_string();
        let country = identity
            .country
            .map(|c| c.as_str())
            .unwrap_or_default();

        Some(exit_node.hostname_template.render(&[
            ("session", session.as_str()),
            ("country", country),
            ("server_country", exit_node.server_country.as_str()),
        ]))
    }

    fn countries(&self) -> Vec<Country> {
        self.config.countries.clone()
    }

    fn provider_name(&self) -> &'static str {
        "super_proxy"
    }
}
