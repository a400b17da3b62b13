//! Session/retry state machine
//!
//! [`RotatingClient`] owns the current proxy identity and the request
//! counters, and runs each logical request as a bounded loop:
//!
//! 1. give up with [`RotaError::MaxRetriesExceeded`] once the consecutive
//!    failure cap is reached (failure counters are reset so the client stays
//!    usable);
//! 2. rotate the identity if forced by the previous attempt or required by
//!    the rotation policy;
//! 3. send through the HTTP client capability;
//! 4. on a retryable proxy failure, force a rotation and go back to 1;
//!    any other failure is returned unchanged.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use http::header::{HeaderMap, HeaderValue, USER_AGENT};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Result, RotaError, TransportError};
use crate::models::{AttemptRecord, Country, FailureClass, ProxyIdentity, RequestSpec, Response};
use crate::provider::{
    check_countries, create_provider, IdentityParams, ProxyProvider, RandomSessionIds,
    SessionIdSource,
};
use crate::proxy::classify::classify;
use crate::proxy::dns::{Resolver, SystemResolver};
use crate::proxy::rotation::{should_rotate_before_send, RequestCounters};
use crate::proxy::transport::{HttpClient, HyperClient, OutboundRequest};
use crate::proxy::tunnel::{TunnelBuilder, TunnelHandle, UpstreamTunnelBuilder};

/// Capacity of the attempt record channel created by [`RotatingClient::subscribe`]
const ATTEMPT_CHANNEL_CAPACITY: usize = 1024;

/// Manual rotation parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetIpParams {
    /// Restrict the new exit country; also used by later automatic rotations
    pub countries: Option<Vec<Country>>,
    /// Pin the session id instead of drawing one
    pub session_id: Option<u64>,
}

impl SetIpParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_countries(mut self, countries: Vec<Country>) -> Self {
        self.countries = Some(countries);
        self
    }

    pub fn with_session_id(mut self, session_id: u64) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Rotating-proxy HTTP client.
///
/// One instance runs one logical request at a time; `fetch` takes
/// `&mut self`. Wrap it in a [`SharedClient`](crate::proxy::SharedClient) to
/// share it between tasks.
pub struct RotatingClient {
    config: ClientConfig,
    base_url: Option<Url>,
    base_headers: HeaderMap,
    provider: Box<dyn ProxyProvider>,
    http: Arc<dyn HttpClient>,
    tunnels: Arc<dyn TunnelBuilder>,
    resolver: Arc<dyn Resolver>,
    session_ids: Box<dyn SessionIdSource>,
    rng: StdRng,
    identity: Option<ProxyIdentity>,
    tunnel: Option<TunnelHandle>,
    exit_node: Option<IpAddr>,
    manual_countries: Option<Vec<Country>>,
    counters: RequestCounters,
    rotations: u64,
    events: Option<broadcast::Sender<AttemptRecord>>,
}

impl RotatingClient {
    /// Build a client; all static configuration is validated here
    pub fn new(
        config: ClientConfig,
        http: Arc<dyn HttpClient>,
        tunnels: Arc<dyn TunnelBuilder>,
        resolver: Arc<dyn Resolver>,
    ) -> Result<Self> {
        config.validate()?;
        let provider = create_provider(&config.provider)?;
        let base_url = config.parsed_base_url()?;

        let mut base_headers = config.default_headers.clone();
        if !base_headers.contains_key(USER_AGENT) {
            let user_agent = HeaderValue::from_str(&config.user_agent).map_err(|e| {
                RotaError::InvalidConfig(format!("invalid user agent: {}", e))
            })?;
            base_headers.insert(USER_AGENT, user_agent);
        }

        info!(
            provider = provider.provider_name(),
            strategy = config.strategy.as_ref().map(|s| s.as_str()).unwrap_or("none"),
            max_failures = config.max_failures,
            "Rotating client created"
        );

        Ok(Self {
            config,
            base_url,
            base_headers,
            provider,
            http,
            tunnels,
            resolver,
            session_ids: Box::new(RandomSessionIds::new()),
            rng: StdRng::from_entropy(),
            identity: None,
            tunnel: None,
            exit_node: None,
            manual_countries: None,
            counters: RequestCounters::default(),
            rotations: 0,
            events: None,
        })
    }

    /// Client wired to hyper, HTTP CONNECT/SOCKS5 tunnels and system DNS
    pub fn with_defaults(config: ClientConfig) -> Result<Self> {
        let tunnels = UpstreamTunnelBuilder::new(config.connect_timeout);
        Self::new(
            config,
            Arc::new(HyperClient::new()?),
            Arc::new(tunnels),
            Arc::new(SystemResolver),
        )
    }

    pub fn with_session_ids(mut self, source: Box<dyn SessionIdSource>) -> Self {
        self.session_ids = source;
        self
    }

    /// Seed the country/endpoint draws for reproducible runs
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_event_sender(mut self, sender: broadcast::Sender<AttemptRecord>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Receive an [`AttemptRecord`] after every send attempt
    pub fn subscribe(&mut self) -> broadcast::Receiver<AttemptRecord> {
        match &self.events {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(ATTEMPT_CHANNEL_CAPACITY);
                self.events = Some(sender);
                receiver
            }
        }
    }

    pub fn session_id(&self) -> Option<u64> {
        self.identity.as_ref().map(|identity| identity.session_id)
    }

    pub fn country(&self) -> Option<Country> {
        self.identity.as_ref().and_then(|identity| identity.country)
    }

    pub fn identity(&self) -> Option<&ProxyIdentity> {
        self.identity.as_ref()
    }

    pub fn counters(&self) -> RequestCounters {
        self.counters
    }

    /// Completed rotations since construction
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Rotate to a fresh identity now
    #[instrument(skip(self))]
    pub async fn set_ip(&mut self, params: Option<SetIpParams>) -> Result<&mut Self> {
        let params = params.unwrap_or_default();
        check_countries(params.countries.as_deref())?;

        let countries = params
            .countries
            .clone()
            .or_else(|| self.rotation_countries());
        self.rotate(countries, params.session_id).await?;

        // Only a restriction the provider accepted carries over to later rotations.
        if params.countries.is_some() {
            self.manual_countries = params.countries;
        }
        Ok(self)
    }

    /// Alias of [`set_ip`](Self::set_ip)
    pub async fn change_ip(&mut self, params: Option<SetIpParams>) -> Result<&mut Self> {
        self.set_ip(params).await
    }

    /// Send a request, rotating and retrying on proxy-layer failures
    #[instrument(skip(self, spec), fields(method = %spec.method, url = %spec.url))]
    pub async fn fetch(&mut self, spec: RequestSpec) -> Result<Response> {
        self.run(spec).await
    }

    /// Like [`fetch`](Self::fetch), aborting with [`RotaError::Cancelled`]
    /// once `cancel` turns `true`
    #[instrument(skip(self, spec, cancel), fields(method = %spec.method, url = %spec.url))]
    pub async fn fetch_with_cancel(
        &mut self,
        spec: RequestSpec,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<Response> {
        tokio::select! {
            result = self.run(spec) => result,
            _ = cancelled(&mut cancel) => {
                debug!("Fetch cancelled");
                Err(RotaError::Cancelled)
            }
        }
    }

    async fn run(&mut self, spec: RequestSpec) -> Result<Response> {
        if self.identity.is_none() && self.config.strategy.is_none() {
            return Err(RotaError::InvalidConfig(
                "must call set_ip() or configure a rotation strategy before fetching".to_string(),
            ));
        }

        let url = self.resolve_url(&spec.url)?;
        let mut force_rotation = false;

        loop {
            let failures = self.counters.consecutive_request_failures;
            if failures >= self.config.max_failures {
                self.counters.reset_failures();
                warn!(attempts = failures, "Giving up after consecutive failures");
                return Err(RotaError::MaxRetriesExceeded { attempts: failures });
            }

            if force_rotation
                || should_rotate_before_send(
                    &self.counters,
                    self.config.strategy.as_ref(),
                    self.config.requests_per_identity,
                    self.identity.is_some(),
                )
            {
                let countries = self.rotation_countries();
                self.rotate(countries, None).await?;
                force_rotation = false;
            }

            let tunnel = self.tunnel.clone().ok_or_else(|| {
                RotaError::InvalidConfig("no proxy identity available".to_string())
            })?;
            let request = self.outbound_request(&spec, url.clone(), tunnel);

            let started = Instant::now();
            let result = self.http.send(request).await;
            let elapsed = started.elapsed();

            match result {
                Ok(response) => {
                    self.counters.record_success();
                    self.publish(&spec, &url, elapsed, Some(response.status.as_u16()), None);
                    debug!(status = response.status.as_u16(), "Request succeeded");
                    return Ok(response);
                }
                Err(err) => {
                    let class = classify(&err, &self.config.retry_statuses);
                    self.counters.record_failure(class);
                    self.publish(
                        &spec,
                        &url,
                        elapsed,
                        err.status.map(|s| s.as_u16()),
                        Some((class, &err)),
                    );

                    if class.is_retryable() {
                        warn!(
                            status = err.status.map(|s| s.as_u16()),
                            failures = self.counters.consecutive_request_failures,
                            session_id = self.session_id(),
                            "Proxy failure, rotating identity"
                        );
                        force_rotation = true;
                        continue;
                    }

                    debug!(class = %class, error = %err, "Request failed");
                    return Err(RotaError::Transport(err));
                }
            }
        }
    }

    /// Country pool for rotations: the strategy's, else the last `set_ip`'s
    fn rotation_countries(&self) -> Option<Vec<Country>> {
        self.config
            .strategy
            .as_ref()
            .and_then(|strategy| strategy.countries())
            .map(<[Country]>::to_vec)
            .or_else(|| self.manual_countries.clone())
    }

    #[instrument(skip(self))]
    async fn rotate(&mut self, countries: Option<Vec<Country>>, session_id: Option<u64>) -> Result<()> {
        check_countries(countries.as_deref())?;

        let session_id =
            session_id.unwrap_or_else(|| self.session_ids.next_id(&self.config.session_id_range));
        let params = IdentityParams {
            countries: countries.as_deref(),
            session_id,
        };
        let mut identity = self.provider.build_identity(&params, &mut self.rng)?;

        if let Some(hostname) = self.provider.exit_node_hostname(&identity) {
            match self.exit_node_address(&hostname).await {
                Ok(address) => identity.endpoint.host = address.to_string(),
                Err(err) => {
                    warn!(hostname = %hostname, error = %err, "Exit node resolution failed");
                    if self.identity.is_some() {
                        // Keep the previous identity; the next attempt reuses it.
                        return Ok(());
                    }
                    return Err(RotaError::ExitNodeUnresolved {
                        hostname,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let tunnel = self.tunnels.build(&identity.endpoint)?;

        info!(
            session_id = identity.session_id,
            country = identity.country.map(|c| c.as_str()),
            proxy = %identity.endpoint.address(),
            "Rotated proxy identity"
        );

        self.identity = Some(identity);
        self.tunnel = Some(tunnel);
        self.counters.record_rotation();
        self.rotations += 1;
        Ok(())
    }

    /// Resolve the exit node, reusing the last address while the identity
    /// failure count stays under the refresh threshold
    async fn exit_node_address(&mut self, hostname: &str) -> Result<IpAddr> {
        if let (Some(threshold), Some(address)) =
            (self.config.exit_node_refresh_failures, self.exit_node)
        {
            if self.counters.consecutive_identity_failures < threshold {
                debug!(address = %address, "Reusing resolved exit node");
                return Ok(address);
            }
        }

        let address = self.resolver.lookup(hostname).await?;
        self.exit_node = Some(address);
        Ok(address)
    }

    fn resolve_url(&self, raw: &str) -> Result<Url> {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => base.join(raw)?,
                None => {
                    return Err(RotaError::InvalidRequest(format!(
                        "relative URL {} requires a base_url",
                        raw
                    )))
                }
            },
            Err(e) => return Err(e.into()),
        };

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(RotaError::InvalidRequest(format!(
                "unsupported URL scheme: {}",
                other
            ))),
        }
    }

    fn outbound_request(&self, spec: &RequestSpec, url: Url, tunnel: TunnelHandle) -> OutboundRequest {
        let mut headers = self.base_headers.clone();
        headers.extend(spec.headers.clone());

        OutboundRequest {
            method: spec.method.clone(),
            url,
            headers,
            body: spec.body.clone().unwrap_or_default(),
            timeout: spec.timeout.unwrap_or(self.config.request_timeout),
            tunnel,
        }
    }

    fn publish(
        &self,
        spec: &RequestSpec,
        url: &Url,
        elapsed: Duration,
        status: Option<u16>,
        failure: Option<(FailureClass, &TransportError)>,
    ) {
        let Some(events) = &self.events else {
            return;
        };

        let record = AttemptRecord {
            session_id: self.session_id().unwrap_or_default(),
            country: self.country(),
            proxy_address: self
                .identity
                .as_ref()
                .map(|identity| identity.endpoint.address())
                .unwrap_or_default(),
            requested_url: url.to_string(),
            method: spec.method.to_string(),
            success: failure.is_none(),
            response_time: elapsed.as_millis() as u64,
            status_code: status,
            failure: failure.map(|(class, _)| class),
            error_message: failure.map(|(_, err)| err.message.clone()),
            timestamp: Utc::now(),
        };

        // No subscribers is fine.
        let _ = events.send(record);
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender gone: cancellation can no longer happen.
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyEndpoint;
    use crate::provider::{
        PortMappingConfig, ProviderConfig, SequentialSessionIds, SuperProxyConfig,
    };
    use crate::proxy::mock::{
        reply, CountingTunnels, PendingHttp, PendingResolver, ScriptedHttp, ScriptedResolver,
    };
    use crate::proxy::RotationStrategy;
    use http::header::HeaderName;
    use http::StatusCode;
    use std::net::Ipv4Addr;

    fn luminati() -> ClientConfig {
        ClientConfig::new(ProviderConfig::SuperProxy(SuperProxyConfig::luminati("zone", "pw")))
    }

    fn build(
        config: ClientConfig,
        http: Arc<dyn HttpClient>,
        tunnels: Arc<CountingTunnels>,
        resolver: Arc<ScriptedResolver>,
    ) -> RotatingClient {
        RotatingClient::new(config, http, tunnels, resolver)
            .unwrap()
            .with_session_ids(Box::new(SequentialSessionIds::starting_at(100)))
            .with_rng_seed(7)
    }

    fn client(config: ClientConfig, http: Arc<ScriptedHttp>) -> (RotatingClient, Arc<CountingTunnels>) {
        let tunnels = CountingTunnels::new();
        let client = build(config, http, tunnels.clone(), ScriptedResolver::new(vec![]));
        (client, tunnels)
    }

    fn get() -> RequestSpec {
        RequestSpec::get("http://lumtest.com/myip.json")
    }

    fn username(endpoint: &ProxyEndpoint) -> String {
        endpoint.username.clone().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_every_request_with_countries() {
        let http = ScriptedHttp::new(vec![]);
        let config = luminati().with_strategy(
            RotationStrategy::every_request().with_countries(vec![Country::France, Country::Spain]),
        );
        let (mut client, tunnels) = client(config, http.clone());

        client.fetch(get()).await.unwrap();
        let first = client.identity().unwrap().clone();
        client.fetch(get()).await.unwrap();
        let second = client.identity().unwrap().clone();

        for identity in [&first, &second] {
            assert!([Country::France, Country::Spain].contains(&identity.country.unwrap()));
        }
        assert_ne!(first.session_id, second.session_id);
        assert_eq!(client.rotations(), 2);
        assert_eq!(tunnels.built().len(), 2);

        let calls = http.calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(username(&calls[0].proxy), username(&calls[1].proxy));
    }

    #[tokio::test]
    async fn test_fetch_without_strategy_or_identity_fails_before_io() {
        let http = ScriptedHttp::new(vec![]);
        let (mut client, tunnels) = client(luminati(), http.clone());

        let err = client.fetch(get()).await.unwrap_err();

        assert!(matches!(err, RotaError::InvalidConfig(ref msg) if msg.contains("set_ip")));
        assert_eq!(http.call_count(), 0);
        assert!(tunnels.built().is_empty());
        assert_eq!(client.rotations(), 0);
    }

    #[tokio::test]
    async fn test_always_retryable_hits_cap() {
        let http = ScriptedHttp::always(429);
        let config = luminati()
            .with_strategy(RotationStrategy::manual())
            .with_max_failures(7);
        let (mut client, _) = client(config, http.clone());

        let err = client.fetch(get()).await.unwrap_err();

        assert!(matches!(err, RotaError::MaxRetriesExceeded { attempts: 7 }));
        assert_eq!(client.rotations(), 7);
        assert_eq!(http.call_count(), 7);
        assert_eq!(client.counters().consecutive_request_failures, 0);
        assert_eq!(client.counters().consecutive_identity_failures, 0);
    }

    #[tokio::test]
    async fn test_single_403_rotates_once_and_retries() {
        let http = ScriptedHttp::new(vec![reply(403)]);
        let (mut client, _) = client(luminati(), http.clone());
        client.set_ip(None).await.unwrap();
        let before = client.session_id();

        let response = client.fetch(get()).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(client.rotations(), 2);
        assert_eq!(http.call_count(), 2);
        assert_ne!(client.session_id(), before);
        assert_eq!(client.counters(), RequestCounters {
            requests_since_rotation: 1,
            consecutive_identity_failures: 0,
            consecutive_request_failures: 0,
        });
    }

    #[tokio::test]
    async fn test_404_propagates_without_rotation() {
        let http = ScriptedHttp::new(vec![reply(404)]);
        let (mut client, _) = client(luminati(), http.clone());
        client.set_ip(None).await.unwrap();

        let err = client.fetch(get()).await.unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.response().unwrap().text(), "status 404");
        assert_eq!(client.rotations(), 1);
        assert_eq!(http.call_count(), 1);
        assert_eq!(client.counters().requests_since_rotation, 1);
        assert_eq!(client.counters().consecutive_request_failures, 1);
        assert_eq!(client.counters().consecutive_identity_failures, 0);
    }

    #[tokio::test]
    async fn test_network_failure_propagates_without_retry() {
        let http = ScriptedHttp::new(vec![Err(TransportError::network("connection reset"))]);
        let (mut client, _) = client(luminati(), http.clone());
        client.set_ip(None).await.unwrap();

        let err = client.fetch(get()).await.unwrap_err();

        assert!(matches!(err, RotaError::Transport(ref e) if e.status.is_none()));
        assert_eq!(http.call_count(), 1);
        assert_eq!(client.rotations(), 1);
    }

    #[tokio::test]
    async fn test_cap_is_a_rolling_window() {
        let http = ScriptedHttp::new(vec![reply(503), reply(503), reply(503), reply(503)]);
        let config = luminati().with_strategy(RotationStrategy::manual());
        let (mut client, _) = client(config, http.clone());

        let err = client.fetch(get()).await.unwrap_err();
        assert!(matches!(err, RotaError::MaxRetriesExceeded { attempts: 4 }));
        assert_eq!(http.call_count(), 4);

        let response = client.fetch(get()).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(http.call_count(), 5);
    }

    #[tokio::test]
    async fn test_origin_failures_count_towards_cap() {
        let http = ScriptedHttp::new(vec![reply(500), reply(429), reply(429)]);
        let config = luminati().with_max_failures(3);
        let (mut client, _) = client(config, http.clone());
        client.set_ip(None).await.unwrap();

        assert!(client.fetch(get()).await.is_err());
        let err = client.fetch(get()).await.unwrap_err();

        assert!(matches!(err, RotaError::MaxRetriesExceeded { attempts: 3 }));
        assert_eq!(http.call_count(), 3);
    }

    #[tokio::test]
    async fn test_manual_quota_rotates_on_third_request() {
        let http = ScriptedHttp::new(vec![]);
        let config = luminati()
            .with_strategy(RotationStrategy::manual())
            .with_requests_per_identity(2);
        let (mut client, _) = client(config, http.clone());
        client.set_ip(None).await.unwrap();

        client.fetch(get()).await.unwrap();
        client.fetch(get()).await.unwrap();
        assert_eq!(client.rotations(), 1);

        client.fetch(get()).await.unwrap();
        assert_eq!(client.rotations(), 2);

        let calls = http.calls();
        assert_eq!(username(&calls[0].proxy), username(&calls[1].proxy));
        assert_ne!(username(&calls[1].proxy), username(&calls[2].proxy));
    }

    #[tokio::test]
    async fn test_explicit_strategy_rotates_on_first_fetch() {
        let http = ScriptedHttp::new(vec![]);
        let config = luminati().with_strategy(RotationStrategy::manual());
        let (mut client, _) = client(config, http.clone());

        client.fetch(get()).await.unwrap();
        client.fetch(get()).await.unwrap();

        assert_eq!(client.rotations(), 1);
        assert_eq!(client.session_id(), Some(100));
    }

    #[tokio::test]
    async fn test_set_ip_pins_session_and_country() {
        let http = ScriptedHttp::new(vec![]);
        let (mut client, _) = client(luminati(), http.clone());

        client
            .set_ip(Some(
                SetIpParams::new()
                    .with_countries(vec![Country::Germany])
                    .with_session_id(4242),
            ))
            .await
            .unwrap();

        assert_eq!(client.session_id(), Some(4242));
        assert_eq!(client.country(), Some(Country::Germany));
        assert_eq!(
            client.identity().unwrap().endpoint.username.as_deref(),
            Some("zone-session-4242-country-de")
        );

        // Later forced rotations keep the country restriction.
        let http = ScriptedHttp::new(vec![reply(502)]);
        let (mut client, _) = self::client(luminati(), http);
        client
            .change_ip(Some(SetIpParams::new().with_countries(vec![Country::Japan])))
            .await
            .unwrap();
        client.fetch(get()).await.unwrap();
        assert_eq!(client.rotations(), 2);
        assert_eq!(client.country(), Some(Country::Japan));
    }

    #[tokio::test]
    async fn test_empty_countries_rejected_before_io() {
        let http = ScriptedHttp::new(vec![]);
        let tunnels = CountingTunnels::new();
        let resolver = ScriptedResolver::new(vec![]);
        let config = ClientConfig::new(ProviderConfig::SuperProxy(
            SuperProxyConfig::luminati_resolved("zone", "pw", "NL"),
        ));
        let mut client = build(config, http.clone(), tunnels.clone(), resolver.clone());

        let err = match client
            .set_ip(Some(SetIpParams::new().with_countries(vec![])))
            .await
        {
            Ok(_) => panic!("empty country set must be rejected"),
            Err(err) => err,
        };

        assert!(matches!(err, RotaError::InvalidConfig(_)));
        assert!(tunnels.built().is_empty());
        assert!(resolver.lookups().is_empty());
        assert_eq!(http.call_count(), 0);

        let config = luminati().with_strategy(RotationStrategy::every_request().with_countries(vec![]));
        let result = RotatingClient::new(config, http, tunnels, resolver);
        assert!(matches!(result, Err(RotaError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_construction_rejects_empty_mapping() {
        let config = ClientConfig::new(ProviderConfig::PortMapping(PortMappingConfig::new("h")));
        let result = RotatingClient::new(
            config,
            ScriptedHttp::new(vec![]),
            CountingTunnels::new(),
            ScriptedResolver::new(vec![]),
        );
        assert!(matches!(result, Err(RotaError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_request_merges_defaults() {
        let http = ScriptedHttp::new(vec![]);
        let config = luminati()
            .with_base_url("https://lumtest.com/api/")
            .with_default_header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            );
        let (mut client, _) = client(config, http.clone());
        client.set_ip(None).await.unwrap();

        client.fetch(RequestSpec::get("myip.json")).await.unwrap();
        client
            .fetch(
                RequestSpec::get("https://example.com/")
                    .header("user-agent", "custom/1.0")
                    .unwrap()
                    .timeout(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        let calls = http.calls();
        assert_eq!(calls[0].url.as_str(), "https://lumtest.com/api/myip.json");
        assert_eq!(calls[0].timeout, Duration::from_secs(60));
        assert_eq!(
            calls[0].headers.get(USER_AGENT).unwrap(),
            crate::config::DEFAULT_USER_AGENT
        );
        assert_eq!(calls[0].headers.get("accept").unwrap(), "application/json");

        assert_eq!(calls[1].timeout, Duration::from_secs(5));
        assert_eq!(calls[1].headers.get(USER_AGENT).unwrap(), "custom/1.0");
        assert_eq!(calls[1].headers.get_all(USER_AGENT).iter().count(), 1);
        assert_eq!(calls[1].headers.get("accept").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_relative_url_without_base_is_rejected() {
        let http = ScriptedHttp::new(vec![]);
        let (mut client, _) = client(luminati(), http.clone());
        client.set_ip(None).await.unwrap();

        let err = tokio_test::assert_err!(client.fetch(RequestSpec::get("/myip.json")).await);
        assert!(matches!(err, RotaError::InvalidRequest(_)));

        let err = client.fetch(RequestSpec::get("ftp://lumtest.com/")).await.unwrap_err();
        assert!(matches!(err, RotaError::InvalidRequest(_)));
        assert_eq!(http.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exit_node_resolution() {
        let exit = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let http = ScriptedHttp::new(vec![]);
        let tunnels = CountingTunnels::new();
        let resolver = ScriptedResolver::new(vec![Some(exit)]);
        let config = ClientConfig::new(ProviderConfig::SuperProxy(
            SuperProxyConfig::luminati_resolved("zone", "pw", "NL"),
        ));
        let mut client = build(config, http.clone(), tunnels.clone(), resolver.clone());

        client.set_ip(Some(SetIpParams::new().with_session_id(555))).await.unwrap();

        assert_eq!(
            resolver.lookups(),
            vec!["session-555-servercountry-NL.zproxy.lum-superproxy.io".to_string()]
        );
        assert_eq!(client.identity().unwrap().endpoint.host, "10.0.0.1");
        assert_eq!(tunnels.built()[0].host, "10.0.0.1");

        // Resolution now fails: the previous identity stays in place.
        client.set_ip(None).await.unwrap();
        assert_eq!(client.session_id(), Some(555));
        assert_eq!(client.rotations(), 1);
        assert_eq!(resolver.lookups().len(), 2);

        client.fetch(get()).await.unwrap();
        assert_eq!(http.calls()[0].proxy.host, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_exit_node_unresolved_without_identity() {
        let http = ScriptedHttp::new(vec![]);
        let config = ClientConfig::new(ProviderConfig::SuperProxy(
            SuperProxyConfig::luminati_resolved("zone", "pw", "NL"),
        ))
        .with_strategy(RotationStrategy::manual());
        let mut client = build(
            config,
            http.clone(),
            CountingTunnels::new(),
            ScriptedResolver::new(vec![]),
        );

        let err = client.fetch(get()).await.unwrap_err();

        assert!(matches!(err, RotaError::ExitNodeUnresolved { .. }));
        assert_eq!(http.call_count(), 0);
        assert!(client.identity().is_none());
    }

    #[tokio::test]
    async fn test_exit_node_reused_until_refresh_threshold() {
        let first = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let second = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let http = ScriptedHttp::new(vec![reply(429), reply(429)]);
        let resolver = ScriptedResolver::new(vec![Some(first), Some(second)]);
        let config = ClientConfig::new(ProviderConfig::SuperProxy(
            SuperProxyConfig::luminati_resolved("zone", "pw", "NL"),
        ))
        .with_strategy(RotationStrategy::manual())
        .with_exit_node_refresh_failures(2);
        let mut client = build(config, http.clone(), CountingTunnels::new(), resolver.clone());

        client.fetch(get()).await.unwrap();

        let hosts: Vec<String> = http.calls().iter().map(|c| c.proxy.host.clone()).collect();
        assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.1", "10.0.0.2"]);
        assert_eq!(resolver.lookups().len(), 2);
        assert_eq!(client.rotations(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_fetch() {
        let (tx, rx) = watch::channel(false);
        let config = luminati().with_strategy(RotationStrategy::manual());
        let mut client = build(
            config,
            Arc::new(PendingHttp),
            CountingTunnels::new(),
            ScriptedResolver::new(vec![]),
        );

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
            tx
        });

        let err = client.fetch_with_cancel(get(), rx).await.unwrap_err();
        assert!(matches!(err, RotaError::Cancelled));
        assert_eq!(client.counters().consecutive_request_failures, 0);
        cancel.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_aborts_exit_node_lookup() {
        let (tx, rx) = watch::channel(false);
        let http = ScriptedHttp::new(vec![]);
        let tunnels = CountingTunnels::new();
        let config = ClientConfig::new(ProviderConfig::SuperProxy(
            SuperProxyConfig::luminati_resolved("zone", "pw", "NL"),
        ))
        .with_strategy(RotationStrategy::manual());
        let mut client = RotatingClient::new(
            config,
            http.clone(),
            tunnels.clone(),
            Arc::new(PendingResolver),
        )
        .unwrap();

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
            tx
        });

        let err = client.fetch_with_cancel(get(), rx).await.unwrap_err();

        assert!(matches!(err, RotaError::Cancelled));
        assert_eq!(http.call_count(), 0);
        assert!(tunnels.built().is_empty());
        assert!(client.identity().is_none());
        assert_eq!(client.rotations(), 0);
        assert_eq!(client.counters(), RequestCounters::default());
        cancel.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_set_ip_countries_are_not_kept() {
        let http = ScriptedHttp::new(vec![]);
        let config = ClientConfig::new(ProviderConfig::PortMapping(
            PortMappingConfig::new("ports.example").with_ports(Country::France, vec![10001]),
        ))
        .with_strategy(RotationStrategy::manual());
        let (mut client, _) = client(config, http.clone());

        let err = match client
            .set_ip(Some(SetIpParams::new().with_countries(vec![Country::Japan])))
            .await
        {
            Ok(_) => panic!("unmapped country must be rejected"),
            Err(err) => err,
        };
        assert!(matches!(err, RotaError::InvalidConfig(_)));
        assert!(client.identity().is_none());

        tokio_test::assert_ok!(client.fetch(get()).await);
        assert_eq!(client.country(), Some(Country::France));

        client.set_ip(None).await.unwrap();
        assert_eq!(client.country(), Some(Country::France));
        assert_eq!(client.rotations(), 2);
        assert_eq!(http.call_count(), 1);
    }

    #[tokio::test]
    async fn test_proxyrack_with_manual_strategy_needs_no_set_ip() {
        let http = ScriptedHttp::new(vec![]);
        let gateway = SuperProxyConfig::proxyrack("megaproxy.rotating.proxyrack.net", 222, "user", "pw");
        let (mut client, _) = client(
            ClientConfig::new(ProviderConfig::SuperProxy(gateway.clone())),
            http.clone(),
        );
        let err = client.fetch(get()).await.unwrap_err();
        assert!(matches!(err, RotaError::InvalidConfig(_)));

        let config = ClientConfig::new(ProviderConfig::SuperProxy(gateway))
            .with_strategy(RotationStrategy::manual());
        let (mut client, _) = self::client(config, http.clone());

        tokio_test::assert_ok!(client.fetch(get()).await);
        assert_eq!(client.country(), None);
        let proxy = &http.calls()[0].proxy;
        assert_eq!(proxy.username.as_deref(), Some("user"));
        assert_eq!(proxy.password.as_deref(), Some("pw"));
    }

    #[tokio::test]
    async fn test_dropped_cancel_sender_does_not_cancel() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let http = ScriptedHttp::new(vec![]);
        let (mut client, _) = client(luminati().with_strategy(RotationStrategy::manual()), http);

        let response = client.fetch_with_cancel(get(), rx).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_attempt_records_published() {
        let http = ScriptedHttp::new(vec![reply(429)]);
        let (mut client, _) = client(luminati().with_strategy(RotationStrategy::manual()), http);
        let mut records = client.subscribe();

        client.fetch(get()).await.unwrap();

        let failed = records.recv().await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.status_code, Some(429));
        assert_eq!(failed.failure, Some(FailureClass::RetryableProxyFailure));
        assert_eq!(failed.session_id, 100);
        assert_eq!(failed.requested_url, "http://lumtest.com/myip.json");

        let ok = records.recv().await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.status_code, Some(200));
        assert_eq!(ok.failure, None);
        assert_eq!(ok.session_id, 101);
        assert_eq!(ok.proxy_address, "zproxy.lum-superproxy.io:22225");
    }
}
