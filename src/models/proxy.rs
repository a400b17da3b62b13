use serde::{Deserialize, Serialize};

use super::Country;

/// Protocol spoken by the upstream proxy endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" | "https" => Some(ProxyProtocol::Http),
            "socks5" | "socks5h" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ProxyProtocol::Http => 80,
            ProxyProtocol::Socks5 => 1080,
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Concrete upstream proxy endpoint handed to the tunnel builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: ProxyProtocol::Http,
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Attach credentials from a rendered `user:password` auth string.
    ///
    /// Only the first `:` separates the two halves, so passwords may contain
    /// colons. An auth string without `:` is treated as a bare username.
    pub fn with_auth(mut self, auth: &str) -> Self {
        match auth.split_once(':') {
            Some((user, pass)) => {
                self.username = Some(user.to_string());
                self.password = Some(pass.to_string());
            }
            None if !auth.is_empty() => {
                self.username = Some(auth.to_string());
                self.password = None;
            }
            None => {}
        }
        self
    }

    pub fn with_protocol(mut self, protocol: ProxyProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// `host:port`, bracketing bare IPv6 hosts
    pub fn address(&self) -> String {
        if self.host.contains(':') && !(self.host.starts_with('[') && self.host.ends_with(']')) {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Proxy URL with optional authentication
    pub fn url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                format!("{}://{}:{}@{}", self.protocol, user, pass, self.address())
            }
            (Some(user), None) => format!("{}://{}@{}", self.protocol, user, self.address()),
            _ => format!("{}://{}", self.protocol, self.address()),
        }
    }
}

/// One exit-node identity: a session token, the targeted country and the
/// endpoint that routes to it.
///
/// Identities are never mutated; a rotation replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyIdentity {
    pub session_id: u64,
    pub country: Option<Country>,
    pub endpoint: ProxyEndpoint,
}
