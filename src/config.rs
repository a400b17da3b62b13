use std::collections::BTreeSet;
use std::env;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::{Result, RotaError};
use crate::models::ProxyProtocol;
use crate::provider::{BackendListConfig, PortMappingConfig, ProviderConfig, SuperProxyConfig};
use crate::proxy::{RotationStrategy, DEFAULT_RETRY_STATUSES};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/41.0.2228.0 Safari/537.36";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_FAILURES: u32 = 4;
pub const DEFAULT_SESSION_ID_MAX: u64 = 99_999_999;

/// Immutable settings for one rotating client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upstream proxy vendor and credentials
    pub provider: ProviderConfig,
    /// Rotation strategy; without one, `set_ip` must run before the first fetch
    pub strategy: Option<RotationStrategy>,
    /// Rotate after this many requests on one identity
    pub requests_per_identity: Option<u32>,
    /// Statuses that rotate the identity and retry
    pub retry_statuses: BTreeSet<u16>,
    /// Consecutive failed attempts before giving up
    pub max_failures: u32,
    /// Per-request timeout unless the request sets its own
    pub request_timeout: Duration,
    /// Timeout for reaching the proxy and opening the tunnel
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Headers sent with every request; request headers win on conflict
    pub default_headers: HeaderMap,
    /// Range session ids are drawn from
    pub session_id_range: RangeInclusive<u64>,
    /// Reuse a DNS-resolved exit node until this many consecutive identity
    /// failures; `None` resolves on every rotation
    pub exit_node_refresh_failures: Option<u32>,
    /// Base for relative request URLs
    pub base_url: Option<String>,
}

impl ClientConfig {
    /// Defaults for everything but the provider
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            strategy: None,
            requests_per_identity: None,
            retry_statuses: DEFAULT_RETRY_STATUSES.into_iter().collect(),
            max_failures: DEFAULT_MAX_FAILURES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_headers: HeaderMap::new(),
            session_id_range: 0..=DEFAULT_SESSION_ID_MAX,
            exit_node_refresh_failures: None,
            base_url: None,
        }
    }

    pub fn with_strategy(mut self, strategy: RotationStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_requests_per_identity(mut self, quota: u32) -> Self {
        self.requests_per_identity = Some(quota);
        self
    }

    pub fn with_retry_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn with_session_id_range(mut self, range: RangeInclusive<u64>) -> Self {
        self.session_id_range = range;
        self
    }

    pub fn with_exit_node_refresh_failures(mut self, failures: u32) -> Self {
        self.exit_node_refresh_failures = Some(failures);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Reject settings the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if let Some(strategy) = &self.strategy {
            strategy.validate()?;
        }
        if self.requests_per_identity == Some(0) {
            return Err(RotaError::InvalidConfig(
                "requests_per_identity must be at least 1".into(),
            ));
        }
        if self.max_failures == 0 {
            return Err(RotaError::InvalidConfig("max_failures must be at least 1".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(RotaError::InvalidConfig("request_timeout cannot be zero".into()));
        }
        if self.session_id_range.is_empty() {
            return Err(RotaError::InvalidConfig(format!(
                "session id range {}..={} is empty",
                self.session_id_range.start(),
                self.session_id_range.end()
            )));
        }
        if let Some(code) = self.retry_statuses.iter().find(|c| !(100..=599).contains(*c)) {
            return Err(RotaError::InvalidConfig(format!(
                "retry status {} is not an HTTP status code",
                code
            )));
        }
        Ok(())
    }

    /// Parsed base URL, if one is configured
    pub fn parsed_base_url(&self) -> Result<Option<Url>> {
        self.base_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|e| {
                    RotaError::InvalidConfig(format!("base_url must be a valid URL: {}", e))
                })
            })
            .transpose()
    }
}

/// Settings for the `rota-fetch` binary, loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub client: ClientConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let strategy = match env::var("ROTA_STRATEGY") {
            Ok(name) if !name.trim().is_empty() => Some(RotationStrategy::parse(
                &name,
                env::var("ROTA_COUNTRIES").ok().as_deref(),
            )?),
            _ => None,
        };

        let mut client = ClientConfig::new(provider_from_env()?);
        client.strategy = strategy;
        client.requests_per_identity = parse_optional_env("ROTA_REQUESTS_PER_IDENTITY")?;
        client.max_failures = parse_env("ROTA_MAX_FAILURES", DEFAULT_MAX_FAILURES)?;
        client.request_timeout = Duration::from_secs(parse_env(
            "ROTA_REQUEST_TIMEOUT",
            DEFAULT_REQUEST_TIMEOUT.as_secs(),
        )?);
        client.connect_timeout = Duration::from_secs(parse_env(
            "ROTA_CONNECT_TIMEOUT",
            DEFAULT_CONNECT_TIMEOUT.as_secs(),
        )?);
        client.user_agent = get_env_or("ROTA_USER_AGENT", DEFAULT_USER_AGENT);
        client.session_id_range = parse_env("ROTA_SESSION_ID_MIN", 0u64)?
            ..=parse_env("ROTA_SESSION_ID_MAX", DEFAULT_SESSION_ID_MAX)?;
        client.exit_node_refresh_failures = parse_optional_env("ROTA_EXIT_NODE_REFRESH_FAILURES")?;
        client.base_url = env::var("ROTA_BASE_URL").ok().filter(|s| !s.trim().is_empty());

        if let Ok(raw) = env::var("ROTA_RETRY_STATUSES") {
            client.retry_statuses = parse_list(&raw, "ROTA_RETRY_STATUSES")?
                .into_iter()
                .collect();
        }

        client.validate()?;
        client.parsed_base_url()?;

        Ok(Config {
            client,
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

fn provider_from_env() -> Result<ProviderConfig> {
    let kind = get_env_or("ROTA_PROVIDER", "bright_data").trim().to_lowercase();
    let protocol = parse_protocol()?;

    let provider = match kind.as_str() {
        "bright_data" | "luminati" | "luminati_resolved" => {
            let username = require_env("ROTA_PROXY_USERNAME")?;
            let password = require_env("ROTA_PROXY_PASSWORD")?;
            let mut config = match kind.as_str() {
                "bright_data" => SuperProxyConfig::bright_data(username, password),
                "luminati" => SuperProxyConfig::luminati(username, password),
                _ => SuperProxyConfig::luminati_resolved(
                    username,
                    password,
                    get_env_or("ROTA_SUPERPROXY_COUNTRY", "NL"),
                ),
            };
            if let Ok(host) = env::var("ROTA_PROXY_HOST") {
                config.host = host;
            }
            if let Some(port) = parse_optional_env("ROTA_PROXY_PORT")? {
                config.port = port;
            }
            ProviderConfig::SuperProxy(config.with_protocol(protocol))
        }
        "proxyrack" => ProviderConfig::SuperProxy(
            SuperProxyConfig::proxyrack(
                require_env("ROTA_PROXY_HOST")?,
                parse_required_env("ROTA_PROXY_PORT")?,
                require_env("ROTA_PROXY_USERNAME")?,
                require_env("ROTA_PROXY_PASSWORD")?,
            )
            .with_protocol(protocol),
        ),
        "port_mapping" => {
            let mut config = PortMappingConfig::new(require_env("ROTA_PROXY_HOST")?);
            config.mapping = PortMappingConfig::parse_mapping(&require_env("ROTA_PORT_MAPPING")?)?;
            config.protocol = protocol;
            config.username = env::var("ROTA_PROXY_USERNAME").ok();
            config.password = env::var("ROTA_PROXY_PASSWORD").ok();
            ProviderConfig::PortMapping(config)
        }
        "backend_list" => {
            let mut config = BackendListConfig::new(BackendListConfig::parse_backends(
                &require_env("ROTA_BACKENDS")?,
            )?);
            config.protocol = protocol;
            config.username = env::var("ROTA_PROXY_USERNAME").ok();
            config.password = env::var("ROTA_PROXY_PASSWORD").ok();
            ProviderConfig::BackendList(config)
        }
        other => {
            return Err(RotaError::InvalidConfig(format!(
                "ROTA_PROVIDER has unsupported value: {}",
                other
            )))
        }
    };

    Ok(provider)
}

fn parse_protocol() -> Result<ProxyProtocol> {
    let raw = get_env_or("ROTA_PROXY_PROTOCOL", "http");
    ProxyProtocol::from_str(&raw).ok_or_else(|| {
        RotaError::InvalidConfig(format!("ROTA_PROXY_PROTOCOL has unsupported value: {}", raw))
    })
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require_env(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(RotaError::MissingEnvVar(key.to_string())),
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    Ok(parse_optional_env(key)?.unwrap_or(default))
}

fn parse_required_env<T: FromStr>(key: &str) -> Result<T> {
    parse_optional_env(key)?.ok_or_else(|| RotaError::MissingEnvVar(key.to_string()))
}

fn parse_optional_env<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RotaError::InvalidConfig(format!("{} has an invalid value: {}", key, raw))),
        _ => Ok(None),
    }
}

fn parse_list<T: FromStr>(raw: &str, key: &str) -> Result<Vec<T>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| RotaError::InvalidConfig(format!("{} has an invalid entry: {}", key, s)))
        })
        .collect()
}
