use std::{fmt, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use futures::{
    Stream, StreamExt, TryStreamExt,
    future::ready,
    stream::BoxStream,
};
use reqwest::{
    Client, Method, Response,
    header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER},
    redirect::Policy,
};
use rustls::{ClientConfig, crypto::ring};
use rustls_platform_verifier::BuilderVerifierExt;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{
    config::{FetchConfig, RedirectPolicy},
    error::FetchError,
};
use crate::gateway::{BlockList, GatewayRequest, GatewayScope, ProxyGateway};

fn platform_tls_config() -> Result<ClientConfig, rustls::Error> {
    let provider = Arc::new(ring::default_provider());
    Ok(ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_platform_verifier()?
        .with_no_client_auth())
}

/// Builds the shared reqwest client. Falls back to the bundled root store
/// when the platform verifier cannot be initialised.
pub fn create_client(config: &FetchConfig) -> Result<Client, FetchError> {
    let redirect = match config.redirect {
        RedirectPolicy::Follow(max) => Policy::limited(max),
        RedirectPolicy::None => Policy::none(),
    };

    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(config.headers.clone())
        .connect_timeout(config.connect_timeout)
        .redirect(redirect);

    match platform_tls_config() {
        Ok(tls_config) => builder = builder.use_preconfigured_tls(tls_config),
        Err(e) => warn!(error = %e, "platform verifier unavailable, using bundled roots"),
    }

    builder
        .build()
        .map_err(|e| FetchError::InvalidRequest(e.without_url().to_string()))
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    /// Gateway route used when the request is relayed.
    pub scope: GatewayScope,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            referer: None,
            origin: None,
            body: None,
            timeout: None,
            scope: GatewayScope::Page,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::new(Method::POST, url)
        }
    }

    pub fn referer(mut self, referer: Option<&str>) -> Self {
        self.referer = referer.filter(|r| !r.is_empty()).map(str::to_string);
        self
    }

    pub fn origin(mut self, origin: Option<&str>) -> Self {
        self.origin = origin.filter(|o| !o.is_empty()).map(str::to_string);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn scope(mut self, scope: GatewayScope) -> Self {
        self.scope = scope;
        self
    }

    /// Only plain GETs can be re-issued by the gateway.
    fn is_relayable(&self) -> bool {
        self.method == Method::GET && self.body.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Final URL after redirects; the requested URL for relayed fetches.
    pub url: String,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub via_gateway: bool,
}

impl FetchResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// Error bodies are read only this far when looking for a block signature.
const ERROR_BODY_LIMIT: u64 = 64 * 1024;

/// Passes chunks through until their total exceeds `limit`, then yields
/// [`FetchError::TooLarge`] and ends.
pub fn limit_body<S>(body: S, limit: u64) -> BoxStream<'static, Result<Bytes, FetchError>>
where
    S: Stream<Item = Result<Bytes, FetchError>> + Send + 'static,
{
    body.scan(Some(0u64), move |state, chunk| {
        let Some(total) = *state else {
            return ready(None);
        };
        let item = match chunk {
            Ok(bytes) if total + bytes.len() as u64 > limit => {
                *state = None;
                Err(FetchError::TooLarge { limit })
            }
            Ok(bytes) => {
                *state = Some(total + bytes.len() as u64);
                Ok(bytes)
            }
            Err(e) => {
                *state = None;
                Err(e)
            }
        };
        ready(Some(item))
    })
    .boxed()
}

/// A response whose body has not been read yet. The body stream is capped
/// and still bounded by the request timeout.
pub struct FetchStream {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub via_gateway: bool,
    pub body: BoxStream<'static, Result<Bytes, FetchError>>,
}

impl fmt::Debug for FetchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchStream")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("via_gateway", &self.via_gateway)
            .finish()
    }
}

impl FetchStream {
    /// Rejects bodies whose declared length is already over `limit`.
    fn from_response(
        response: Response,
        via_gateway: bool,
        limit: u64,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let content_length = response.content_length();
        if content_length.is_some_and(|len| len > limit) {
            return Err(FetchError::TooLarge { limit });
        }
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes_stream()
            .map_err(move |e| FetchError::from_reqwest(e, timeout));
        Ok(Self {
            status,
            content_type,
            content_length,
            via_gateway,
            body: limit_body(body, limit),
        })
    }

    /// Reads the whole body, still subject to the cap.
    pub async fn collect(mut self) -> Result<Bytes, FetchError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

/// HTTP client used by every adapter. Every call is bounded by a timeout and
/// blocked hosts are routed through the gateway when one is configured.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    config: Arc<FetchConfig>,
    gateway: Option<ProxyGateway>,
    blocklist: Arc<BlockList>,
}

impl FetchClient {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = create_client(&config)?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: FetchConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
            gateway: None,
            blocklist: Arc::new(BlockList::default()),
        }
    }

    pub fn with_gateway(mut self, gateway: Option<ProxyGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_blocklist(mut self, blocklist: Arc<BlockList>) -> Self {
        self.blocklist = blocklist;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn gateway(&self) -> Option<&ProxyGateway> {
        self.gateway.as_ref()
    }

    pub fn blocklist(&self) -> &Arc<BlockList> {
        &self.blocklist
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub async fn get_text(&self, url: &str, referer: Option<&str>) -> Result<String, FetchError> {
        self.fetch(FetchRequest::get(url).referer(referer))
            .await
            .map(|response| response.text())
    }

    /// Sends the request, returning any 2xx or 3xx response. 4xx and 5xx are
    /// classified; block pages are retried through the gateway.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        if let Some(gateway) = &self.gateway
            && request.is_relayable()
            && self.blocklist.matches_url(&request.url)
        {
            debug!(scope = %request.scope, "host is on the block list, relaying");
            return Self::relay(gateway, &request).await;
        }

        let response = self.direct(&request).await?;

        if self
            .blocklist
            .is_block_signature(response.status, &response.body)
        {
            return match &self.gateway {
                Some(gateway) if request.is_relayable() => {
                    warn!(status = response.status, "block page detected, retrying via gateway");
                    Self::relay(gateway, &request).await
                }
                _ => Err(FetchError::Blocked {
                    status: response.status,
                }),
            };
        }

        match FetchError::from_status(response.status) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    /// Like [`fetch`](Self::fetch), but hands back the body as a stream of at
    /// most `limit` bytes. Error responses are still read and classified.
    pub async fn open(&self, request: FetchRequest, limit: u64) -> Result<FetchStream, FetchError> {
        let timeout = self.config.effective_timeout(request.timeout);
        if let Some(gateway) = &self.gateway
            && request.is_relayable()
            && self.blocklist.matches_url(&request.url)
        {
            debug!(scope = %request.scope, "host is on the block list, relaying");
            return Self::open_relay(gateway, &request, limit, timeout).await;
        }

        let response = self.send(&request, timeout).await?;
        let status = response.status().as_u16();
        if status < 400 {
            return FetchStream::from_response(response, false, limit, timeout);
        }

        let body = match FetchStream::from_response(response, false, ERROR_BODY_LIMIT, timeout) {
            Ok(stream) => stream.collect().await,
            Err(e) => Err(e),
        };
        let body = match body {
            Ok(body) => body,
            Err(FetchError::TooLarge { .. }) => Bytes::new(),
            Err(e) => return Err(e),
        };

        if self.blocklist.is_block_signature(status, &body) {
            return match &self.gateway {
                Some(gateway) if request.is_relayable() => {
                    warn!(status, scope = %request.scope, "block page detected, retrying via gateway");
                    Self::open_relay(gateway, &request, limit, timeout).await
                }
                _ => Err(FetchError::Blocked { status }),
            };
        }
        Err(FetchError::from_status(status)
            .unwrap_or_else(|| FetchError::Network(format!("unexpected status {status}"))))
    }

    async fn send(&self, request: &FetchRequest, timeout: Duration) -> Result<Response, FetchError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .timeout(timeout);
        if let Some(referer) = &request.referer {
            builder = builder.header(REFERER, referer);
        }
        if let Some(origin) = &request.origin {
            builder = builder.header(ORIGIN, origin);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, timeout))
    }

    async fn direct(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let timeout = self.config.effective_timeout(request.timeout);
        let response = self.send(request, timeout).await?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(e, timeout))?;

        debug!(status, len = body.len(), "fetched");
        Ok(FetchResponse {
            status,
            url,
            content_type,
            body,
            via_gateway: false,
        })
    }

    async fn relay(
        gateway: &ProxyGateway,
        request: &FetchRequest,
    ) -> Result<FetchResponse, FetchError> {
        let relayed = gateway
            .fetch(
                GatewayRequest::new(request.scope, &request.url)
                    .with_referer(request.referer.as_deref()),
            )
            .await?;
        Ok(FetchResponse {
            status: relayed.status,
            url: request.url.clone(),
            content_type: relayed.content_type,
            body: relayed.body,
            via_gateway: true,
        })
    }

    async fn open_relay(
        gateway: &ProxyGateway,
        request: &FetchRequest,
        limit: u64,
        timeout: Duration,
    ) -> Result<FetchStream, FetchError> {
        let response = gateway
            .open(
                GatewayRequest::new(request.scope, &request.url)
                    .with_referer(request.referer.as_deref()),
            )
            .await?;
        FetchStream::from_response(response, true, limit, timeout)
    }
}
