//! Upstream proxy tunnels
//!
//! A tunnel handle is built once per identity and opened once per request.
//! HTTP proxies are always driven through `CONNECT`, SOCKS5 proxies through
//! a regular SOCKS handshake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument};

use crate::error::{Result, RotaError};
use crate::models::{ProxyEndpoint, ProxyProtocol};

/// Upper bound for a CONNECT reply head
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Byte stream to the origin, relayed by the upstream proxy
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ProxyConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

#[async_trait]
pub trait ProxyTunnel: Send + Sync {
    /// Open a stream to `host:port` through the proxy
    async fn open(&self, host: &str, port: u16) -> Result<Box<dyn ProxyConnection>>;

    /// Endpoint this tunnel was built from
    fn endpoint(&self) -> &ProxyEndpoint;
}

pub type TunnelHandle = Arc<dyn ProxyTunnel>;

/// Turns a proxy endpoint into a tunnel handle
pub trait TunnelBuilder: Send + Sync {
    fn build(&self, endpoint: &ProxyEndpoint) -> Result<TunnelHandle>;
}

/// Builds [`UpstreamTunnel`]s
#[derive(Debug, Clone)]
pub struct UpstreamTunnelBuilder {
    connect_timeout: Duration,
}

impl UpstreamTunnelBuilder {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl TunnelBuilder for UpstreamTunnelBuilder {
    fn build(&self, endpoint: &ProxyEndpoint) -> Result<TunnelHandle> {
        if endpoint.host.trim().is_empty() {
            return Err(RotaError::InvalidProxyAddress(
                "proxy host cannot be empty".to_string(),
            ));
        }
        if endpoint.port == 0 {
            return Err(RotaError::InvalidProxyAddress(format!(
                "invalid proxy port in {}",
                endpoint.address()
            )));
        }

        Ok(Arc::new(UpstreamTunnel {
            endpoint: endpoint.clone(),
            connect_timeout: self.connect_timeout,
        }))
    }
}

/// Tunnel through an HTTP CONNECT or SOCKS5 proxy
#[derive(Debug, Clone)]
pub struct UpstreamTunnel {
    endpoint: ProxyEndpoint,
    connect_timeout: Duration,
}

impl UpstreamTunnel {
    async fn dial(&self) -> Result<TcpStream> {
        let addr = self.endpoint.address();
        TcpStream::connect(&addr)
            .await
            .map_err(|e| RotaError::ProxyConnectionFailed(format!("TCP connect to {} failed: {}", addr, e)))
    }

    async fn connect_http(&self, target_host: &str, target_port: u16) -> Result<TcpStream> {
        let mut stream = self.dial().await?;

        let request = build_connect_request(&self.endpoint, target_host, target_port);
        stream.write_all(request.as_bytes()).await.map_err(|e| {
            RotaError::ProxyConnectionFailed(format!("Failed to send CONNECT: {}", e))
        })?;

        let head = read_response_head(&mut stream).await?;
        let status_line = head.lines().next().unwrap_or_default().to_string();
        let status = parse_status_code(&status_line).ok_or_else(|| {
            RotaError::ProxyConnectionFailed(format!("malformed CONNECT response: {}", status_line))
        })?;

        if status != 200 {
            return Err(RotaError::ConnectRejected {
                status,
                reason: status_line,
            });
        }

        debug!("HTTP CONNECT tunnel established");
        Ok(stream)
    }

    async fn connect_socks5(&self, target_host: &str, target_port: u16) -> Result<TcpStream> {
        let socket = self.dial().await?;

        let stream = match (&self.endpoint.username, &self.endpoint.password) {
            (Some(username), Some(password)) => {
                Socks5Stream::connect_with_password_and_socket(
                    socket,
                    (target_host, target_port),
                    username,
                    password,
                )
                .await
            }
            _ => Socks5Stream::connect_with_socket(socket, (target_host, target_port)).await,
        }
        .map_err(|e| RotaError::ProxyConnectionFailed(format!("SOCKS5 connect failed: {}", e)))?;

        debug!("SOCKS5 connection established");
        Ok(stream.into_inner())
    }
}

#[async_trait]
impl ProxyTunnel for UpstreamTunnel {
    #[instrument(skip(self), fields(proxy = %self.endpoint.address()))]
    async fn open(&self, host: &str, port: u16) -> Result<Box<dyn ProxyConnection>> {
        let connect = async {
            match self.endpoint.protocol {
                ProxyProtocol::Http => self.connect_http(host, port).await,
                ProxyProtocol::Socks5 => self.connect_socks5(host, port).await,
            }
        };

        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| RotaError::Timeout)??;

        Ok(Box::new(stream))
    }

    fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }
}

fn build_connect_request(endpoint: &ProxyEndpoint, target_host: &str, target_port: u16) -> String {
    let authority = format_authority(target_host, target_port);
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

    if let Some(username) = &endpoint.username {
        let password = endpoint.password.as_deref().unwrap_or("");
        let credentials = format!("{}:{}", username, password);
        request.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            BASE64.encode(credentials.as_bytes())
        ));
    }

    request.push_str("\r\n");
    request
}

/// Read until the blank line ending the response head
async fn read_response_head(stream: &mut TcpStream) -> Result<String> {
    let mut head = Vec::with_capacity(256);
    let mut buf = [0u8; 512];

    loop {
        let n = stream.read(&mut buf).await.map_err(|e| {
            RotaError::ProxyConnectionFailed(format!("Failed to read CONNECT response: {}", e))
        })?;
        if n == 0 {
            return Err(RotaError::ProxyConnectionFailed(
                "proxy closed the connection during CONNECT".to_string(),
            ));
        }

        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(String::from_utf8_lossy(&head).into_owned());
        }
        if head.len() > MAX_CONNECT_RESPONSE {
            return Err(RotaError::ProxyConnectionFailed(
                "CONNECT response head too large".to_string(),
            ));
        }
    }
}

/// Status code of an `HTTP/1.x NNN reason` line
fn parse_status_code(status_line: &str) -> Option<u16> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

fn format_authority(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
