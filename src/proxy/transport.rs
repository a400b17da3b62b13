//! HTTP client capability
//!
//! Sends one request over a stream opened through the current tunnel. Any
//! status outside 2xx/3xx is reported as a [`TransportError`] carrying both
//! the status and the buffered response.
//!
//! Plain `http` origins are tunnelled too (`CONNECT host:80`) rather than
//! sent in absolute form to the proxy. Gateways that only allow `CONNECT`
//! to port 443 will refuse them with a status the retry loop classifies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, HOST};
use http::Method;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{Result, RotaError, TransportError};
use crate::models::Response;
use crate::proxy::tunnel::{ProxyConnection, TunnelHandle};

/// Fully merged request handed to the HTTP client
#[derive(Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Duration,
    pub tunnel: TunnelHandle,
}

impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("timeout", &self.timeout)
            .field("proxy", &self.tunnel.endpoint().address())
            .finish()
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> std::result::Result<Response, TransportError>;
}

/// HTTP/1.1 client over hyper, with rustls for `https` origins
#[derive(Clone)]
pub struct HyperClient {
    tls: TlsConnector,
}

impl HyperClient {
    pub fn new() -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| RotaError::Tls(format!("failed to configure TLS: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }

    async fn execute(&self, request: OutboundRequest) -> std::result::Result<Response, TransportError> {
        let (host, port) = target_of(&request.url)?;
        let stream = request.tunnel.open(&host, port).await?;

        let io: Box<dyn ProxyConnection> = if request.url.scheme() == "https" {
            let server_name = ServerName::try_from(host.clone()).map_err(|e| {
                TransportError::network(format!("invalid TLS server name {}: {}", host, e))
            })?;
            let tls = self.tls.connect(server_name, stream).await.map_err(|e| {
                TransportError::network(format!("TLS handshake with {} failed: {}", host, e))
            })?;
            Box::new(tls)
        } else {
            stream
        };

        let (mut sender, conn) = http1::handshake(TokioIo::new(io))
            .await
            .map_err(|e| TransportError::network(format!("HTTP handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Origin connection closed: {}", e);
            }
        });

        let mut outbound = hyper::Request::builder()
            .method(request.method)
            .uri(origin_form(&request.url))
            .body(Full::new(request.body))
            .map_err(|e| TransportError::network(format!("invalid request: {}", e)))?;
        *outbound.headers_mut() = request.headers;

        if !outbound.headers().contains_key(HOST) {
            let value = HeaderValue::from_str(&host_header(&request.url, &host, port))
                .map_err(|e| TransportError::network(format!("invalid Host header: {}", e)))?;
            outbound.headers_mut().insert(HOST, value);
        }

        let response = sender
            .send_request(outbound)
            .await
            .map_err(|e| TransportError::network(format!("request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| TransportError::network(format!("failed to read response body: {}", e)))?
            .to_bytes();

        let response = Response {
            status: parts.status,
            headers: parts.headers,
            body,
        };

        if response.status.is_success() || response.status.is_redirection() {
            Ok(response)
        } else {
            Err(TransportError::from_response(response))
        }
    }
}

#[async_trait]
impl HttpClient for HyperClient {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: OutboundRequest) -> std::result::Result<Response, TransportError> {
        let timeout = request.timeout;

        match tokio::time::timeout(timeout, self.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::network(format!(
                "timeout of {}ms exceeded",
                timeout.as_millis()
            ))),
        }
    }
}

/// Host (unbracketed) and port the tunnel must reach
fn target_of(url: &Url) -> std::result::Result<(String, u16), TransportError> {
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::network(format!("missing host in {}", url)))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let port = url
        .port_or_known_default()
        .ok_or_else(|| TransportError::network(format!("missing port in {}", url)))?;

    Ok((host.to_string(), port))
}

fn origin_form(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn host_header(url: &Url, host: &str, port: u16) -> String {
    let host = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };

    match url.port() {
        Some(_) => format!("{}:{}", host, port),
        None => host,
    }
}
