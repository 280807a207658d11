use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::{Client, Response, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::error::GatewayError;

const REDACTED: &str = "***";

/// Where the relay lives and the key it expects. Built once at startup and
/// shared read-only.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCredential {
    pub endpoint: String,
    pub auth_key: String,
}

impl ProxyCredential {
    pub fn new(endpoint: impl Into<String>, auth_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_key: auth_key.into(),
        }
    }
}

impl fmt::Debug for ProxyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredential")
            .field("endpoint", &self.endpoint)
            .field("auth_key", &REDACTED)
            .finish()
    }
}

/// Relay path segment. Each scope is served by its own gateway route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayScope {
    Page,
    Segment,
    Key,
    Subtitle,
}

impl GatewayScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayScope::Page => "fetch",
            GatewayScope::Segment => "segment",
            GatewayScope::Key => "key",
            GatewayScope::Subtitle => "subtitle",
        }
    }
}

impl fmt::Display for GatewayScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One relayed fetch. Either `target` or `channel` must be set.
#[derive(Debug, Clone, Copy)]
pub struct GatewayRequest<'a> {
    pub scope: GatewayScope,
    pub target: Option<&'a str>,
    pub referer: Option<&'a str>,
    pub channel: Option<&'a str>,
}

impl<'a> GatewayRequest<'a> {
    pub fn new(scope: GatewayScope, target: &'a str) -> Self {
        Self {
            scope,
            target: Some(target),
            referer: None,
            channel: None,
        }
    }

    pub fn channel(scope: GatewayScope, channel: &'a str) -> Self {
        Self {
            scope,
            target: None,
            referer: None,
            channel: Some(channel),
        }
    }

    pub fn with_referer(mut self, referer: Option<&'a str>) -> Self {
        self.referer = referer.filter(|r| !r.is_empty());
        self
    }
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Deserialize)]
struct GatewayErrorBody {
    error: String,
}

/// Client for the relay that re-issues fetches from a permitted network.
#[derive(Clone)]
pub struct ProxyGateway {
    credential: Arc<ProxyCredential>,
    client: Client,
    timeout: Duration,
}

impl fmt::Debug for ProxyGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyGateway")
            .field("credential", &self.credential)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProxyGateway {
    pub fn new(credential: Arc<ProxyCredential>, client: Client, timeout: Duration) -> Self {
        Self {
            credential,
            client,
            timeout,
        }
    }

    pub fn credential(&self) -> &Arc<ProxyCredential> {
        &self.credential
    }

    /// `{endpoint}/{scope}?key=..&url=..[&referer=..][&channel=..]`
    pub fn relay_url(&self, request: &GatewayRequest<'_>) -> Result<Url, GatewayError> {
        if request.target.is_none() && request.channel.is_none() {
            return Err(GatewayError::InvalidRequest(
                "either url or channel is required".to_string(),
            ));
        }
        let mut url = Url::parse(&self.credential.endpoint)
            .map_err(|e| GatewayError::InvalidRequest(format!("gateway endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidRequest("gateway endpoint cannot be a base".into()))?
            .pop_if_empty()
            .push(request.scope.as_str());
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", &self.credential.auth_key);
            if let Some(target) = request.target {
                query.append_pair("url", target);
            }
            if let Some(referer) = request.referer {
                query.append_pair("referer", referer);
            }
            if let Some(channel) = request.channel {
                query.append_pair("channel", channel);
            }
        }
        Ok(url)
    }

    /// Removes the auth key from text that may echo the relay URL.
    pub fn redact(&self, text: &str) -> String {
        let key = &self.credential.auth_key;
        if key.is_empty() {
            return text.to_string();
        }
        let encoded = urlencoding::encode(key);
        text.replace(key.as_str(), REDACTED)
            .replace(encoded.as_ref(), REDACTED)
    }

    /// Sends the relay request and hands back the response once it is known
    /// to be a success, leaving the body unread. Rejections are parsed.
    pub async fn open(&self, request: GatewayRequest<'_>) -> Result<Response, GatewayError> {
        let url = self.relay_url(&request)?;
        debug!(scope = %request.scope, "relaying through proxy gateway");

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
            return Err(GatewayError::Rejected {
                status,
                message: self.error_message(&body),
            });
        }
        Ok(response)
    }

    pub async fn fetch(&self, request: GatewayRequest<'_>) -> Result<GatewayResponse, GatewayError> {
        let response = self.open(request).await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;

        Ok(GatewayResponse {
            status,
            content_type,
            body,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            return GatewayError::Timeout;
        }
        GatewayError::Unreachable(self.redact(&err.without_url().to_string()))
    }

    fn error_message(&self, body: &[u8]) -> String {
        let message = match serde_json::from_slice::<GatewayErrorBody>(body) {
            Ok(parsed) => parsed.error,
            Err(_) => {
                let text = String::from_utf8_lossy(body);
                let text = text.trim();
                if text.is_empty() {
                    "empty response".to_string()
                } else {
                    text.chars().take(200).collect()
                }
            }
        };
        self.redact(&message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(endpoint: &str) -> ProxyGateway {
        ProxyGateway::new(
            Arc::new(ProxyCredential::new(endpoint, "s3cr3t-key")),
            Client::new(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn builds_relay_url_with_scope_and_params() {
        let gw = gateway("https://relay.example/api/");
        let request = GatewayRequest::new(GatewayScope::Segment, "https://cdn.example/a b.ts")
            .with_referer(Some("https://embed.example/"));
        let url = gw.relay_url(&request).unwrap();
        assert_eq!(url.path(), "/api/segment");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("key".to_string(), "s3cr3t-key".to_string()),
                ("url".to_string(), "https://cdn.example/a b.ts".to_string()),
                ("referer".to_string(), "https://embed.example/".to_string()),
            ]
        );
    }

    #[test]
    fn relay_url_needs_target_or_channel() {
        let gw = gateway("https://relay.example");
        let request = GatewayRequest {
            scope: GatewayScope::Key,
            target: None,
            referer: None,
            channel: None,
        };
        assert!(matches!(
            gw.relay_url(&request),
            Err(GatewayError::InvalidRequest(_))
        ));
        let url = gw
            .relay_url(&GatewayRequest::channel(GatewayScope::Key, "premium51"))
            .unwrap();
        assert_eq!(url.path(), "/key");
        assert!(url.query().unwrap().contains("channel=premium51"));
    }

    #[test]
    fn debug_output_hides_key() {
        let gw = gateway("https://relay.example");
        let rendered = format!("{gw:?}");
        assert!(!rendered.contains("s3cr3t-key"));
        assert!(gw.redact("?key=s3cr3t-key&url=x").contains("key=***"));
    }

    #[tokio::test]
    async fn returns_body_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subtitle"))
            .and(query_param("key", "s3cr3t-key"))
            .and(query_param("url", "https://subs.example/en.vtt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/vtt")
                    .set_body_string("WEBVTT\n"),
            )
            .mount(&server)
            .await;

        let response = gateway(&server.uri())
            .fetch(GatewayRequest::new(
                GatewayScope::Subtitle,
                "https://subs.example/en.vtt",
            ))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type.as_deref(), Some("text/vtt"));
        assert_eq!(&response.body[..], b"WEBVTT\n");
    }

    #[tokio::test]
    async fn parses_structured_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/segment"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": "Upstream returned 403 for key=s3cr3t-key",
                "status": 403,
            })))
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .fetch(GatewayRequest::new(GatewayScope::Segment, "https://cdn.example/1.ts"))
            .await
            .unwrap_err();
        match err {
            GatewayError::Rejected { status, message } => {
                assert_eq!(status, 403);
                assert!(message.starts_with("Upstream returned 403"));
                assert!(!message.contains("s3cr3t-key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
