//! Scripted collaborators for exercising the state machine without I/O

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;
use url::Url;

use crate::error::{Result, RotaError, TransportError};
use crate::models::{ProxyEndpoint, Response};
use crate::proxy::dns::Resolver;
use crate::proxy::transport::{HttpClient, OutboundRequest};
use crate::proxy::tunnel::{ProxyConnection, ProxyTunnel, TunnelBuilder, TunnelHandle};

type Reply = std::result::Result<Response, TransportError>;

/// Canned reply for `status`: 2xx succeeds, anything else fails with the
/// response attached
pub fn reply(status: u16) -> Reply {
    let status = StatusCode::from_u16(status).unwrap();
    let response = Response::new(status, format!("status {}", status.as_u16()));
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransportError::from_response(response))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub timeout: Duration,
    pub proxy: ProxyEndpoint,
}

/// Replays a script of replies, then the fallback status forever
pub struct ScriptedHttp {
    script: Mutex<VecDeque<Reply>>,
    fallback: u16,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedHttp {
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Self::with_fallback(script, 200)
    }

    pub fn always(status: u16) -> Arc<Self> {
        Self::with_fallback(Vec::new(), status)
    }

    pub fn with_fallback(script: Vec<Reply>, fallback: u16) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn send(&self, request: OutboundRequest) -> Reply {
        self.calls.lock().push(RecordedCall {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            timeout: request.timeout,
            proxy: request.tunnel.endpoint().clone(),
        });

        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| reply(self.fallback))
    }
}

/// Never answers
pub struct PendingHttp;

#[async_trait]
impl HttpClient for PendingHttp {
    async fn send(&self, _request: OutboundRequest) -> Reply {
        std::future::pending().await
    }
}

pub struct MockTunnel {
    endpoint: ProxyEndpoint,
}

#[async_trait]
impl ProxyTunnel for MockTunnel {
    async fn open(&self, _host: &str, _port: u16) -> Result<Box<dyn ProxyConnection>> {
        Err(RotaError::ProxyConnectionFailed(
            "mock tunnel does not carry traffic".to_string(),
        ))
    }

    fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }
}

/// Records every endpoint a tunnel was built for
#[derive(Default)]
pub struct CountingTunnels {
    built: Mutex<Vec<ProxyEndpoint>>,
}

impl CountingTunnels {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn built(&self) -> Vec<ProxyEndpoint> {
        self.built.lock().clone()
    }
}

impl TunnelBuilder for CountingTunnels {
    fn build(&self, endpoint: &ProxyEndpoint) -> Result<TunnelHandle> {
        self.built.lock().push(endpoint.clone());
        Ok(Arc::new(MockTunnel {
            endpoint: endpoint.clone(),
        }))
    }
}

/// Never resolves
pub struct PendingResolver;

#[async_trait]
impl Resolver for PendingResolver {
    async fn lookup(&self, _hostname: &str) -> Result<IpAddr> {
        std::future::pending().await
    }
}

/// Replays lookup results, failing once the script runs out
#[derive(Default)]
pub struct ScriptedResolver {
    script: Mutex<VecDeque<Option<IpAddr>>>,
    lookups: Mutex<Vec<String>>,
}

impl ScriptedResolver {
    pub fn new(script: Vec<Option<IpAddr>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            lookups: Mutex::new(Vec::new()),
        })
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl Resolver for ScriptedResolver {
    async fn lookup(&self, hostname: &str) -> Result<IpAddr> {
        self.lookups.lock().push(hostname.to_string());
        let next = self.script.lock().pop_front().flatten();
        next.ok_or_else(|| RotaError::DnsLookup {
            hostname: hostname.to_string(),
            reason: "NXDOMAIN".to_string(),
        })
    }
}
