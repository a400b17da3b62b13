//! Rota Client - Rotating-proxy HTTP client
//!
//! Sends HTTP requests through a commercial proxy provider, pinning each
//! request to a session-scoped exit identity and rotating that identity on
//! demand, by policy, or after proxy-layer failures.
//!
//! ## Features
//!
//! - Super-proxy (session/country in the proxy username), port-to-country
//!   mapping and plain backend list providers
//! - Manual and every-request rotation with an optional per-identity quota
//! - Transparent retry on proxy failures with a consecutive failure cap
//! - DNS-resolved exit nodes
//! - HTTP CONNECT and SOCKS5 upstream proxies, TLS to https origins

pub mod config;
pub mod error;
pub mod models;
pub mod provider;
pub mod proxy;

pub use config::{ClientConfig, Config, LogConfig};
pub use error::{Result, RotaError, TransportError};
pub use models::{AttemptRecord, Country, FailureClass, ProxyIdentity, RequestSpec, Response};
pub use provider::ProviderConfig;
pub use proxy::{RotatingClient, RotationStrategy, SetIpParams, SharedClient};
