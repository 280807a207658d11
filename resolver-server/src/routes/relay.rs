//! Relays media fetches for clients whose CDN rejects them directly.

use std::net::IpAddr;
use std::sync::LazyLock;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use embed_resolver::fetch::{FetchRequest, FetchStream};
use embed_resolver::gateway::{GatewayRequest, GatewayScope};
use embed_resolver::hls::validate_key;
use regex::Regex;
use serde::Deserialize;
use tokio::net::lookup_host;
use tracing::debug;
use url::{Host, Url};

use crate::config::RelayConfig;
use crate::error::ApiError;
use crate::state::AppState;

const SEGMENT_CACHE: &str = "public, max-age=300";
const SUBTITLE_CACHE: &str = "public, max-age=86400";

static SRT_TIMESTAMP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2}:\d{2}:\d{2}),(\d{3})").unwrap());

#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    pub url: Option<String>,
    pub referer: Option<String>,
    pub channel: Option<String>,
}

/// False for loopback, private, link-local, shared and unspecified
/// addresses, including their IPv4-mapped IPv6 forms.
fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || a == 0
                || (a == 100 && (b & 0xc0) == 64))
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_public(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80)
        }
    }
}

fn parse_target(url: Option<&str>) -> Result<(&str, Url), ApiError> {
    let url = url
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("url is required".to_string()))?;
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some() => {
            Ok((url, parsed))
        }
        _ => Err(ApiError::InvalidRequest(
            "url must be an absolute http(s) url".to_string(),
        )),
    }
}

/// Validates a relay target. Unless private targets are allowed, every
/// address the host resolves to must be public. Names that do not resolve
/// are left for the fetch to fail on.
async fn target<'a>(url: Option<&'a str>, relay: &RelayConfig) -> Result<&'a str, ApiError> {
    let (url, parsed) = parse_target(url)?;
    if relay.allow_private_targets {
        return Ok(url);
    }

    let addrs: Vec<IpAddr> = match parsed.host() {
        Some(Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
        Some(Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
        Some(Host::Domain(domain)) => {
            let port = parsed.port_or_known_default().unwrap_or(80);
            match lookup_host((domain, port)).await {
                Ok(resolved) => resolved.map(|addr| addr.ip()).collect(),
                Err(e) => {
                    debug!(host = domain, error = %e, "relay target did not resolve");
                    Vec::new()
                }
            }
        }
        None => Vec::new(),
    };

    if addrs.into_iter().all(is_public) {
        Ok(url)
    } else {
        Err(ApiError::InvalidRequest(
            "url must point at a public host".to_string(),
        ))
    }
}

/// Opens `url` with the body capped at `limit`. The fetch client sends
/// block-listed hosts through the gateway and retries block pages there,
/// both under `scope`.
async fn relay(
    state: &AppState,
    scope: GatewayScope,
    url: &str,
    referer: Option<&str>,
    limit: u64,
) -> Result<FetchStream, ApiError> {
    debug!(%scope, "relaying");
    let request = FetchRequest::get(url).referer(referer).scope(scope);
    Ok(state.fetch.open(request, limit).await?)
}

fn with_headers(body: impl IntoResponse, content_type: &str, cache: &'static str) -> Response {
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache));
    response
}

/// `GET /segment?url=`
pub async fn segment(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
) -> Result<Response, ApiError> {
    let url = target(query.url.as_deref(), &state.relay).await?;
    let upstream = relay(
        &state,
        GatewayScope::Segment,
        url,
        query.referer.as_deref(),
        state.relay.max_body_bytes,
    )
    .await?;

    let content_type = upstream
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let mut response = with_headers(Body::from_stream(upstream.body), &content_type, SEGMENT_CACHE);
    if let Some(len) = upstream.content_length {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    Ok(response)
}

/// `GET /key?url=` or `GET /key?channel=`. Answers with exactly 16 bytes.
pub async fn key(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
) -> Result<Response, ApiError> {
    let key = match query.channel.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(channel) => {
            let gateway = state.fetch.gateway().ok_or(ApiError::NotConfigured)?;
            let response = gateway
                .fetch(GatewayRequest::channel(GatewayScope::Key, channel))
                .await?;
            validate_key(&response.body)?
        }
        None => {
            let url = target(query.url.as_deref(), &state.relay).await?;
            state.keys.fetch_key(url, query.referer.as_deref()).await?
        }
    };

    let mut response = Bytes::copy_from_slice(&key).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

/// Turns an SRT body into WebVTT. WebVTT passes through unchanged.
pub fn to_webvtt(text: &str) -> String {
    let text = text.trim_start_matches('\u{feff}');
    if text.trim_start().starts_with("WEBVTT") {
        return text.to_string();
    }
    let body = SRT_TIMESTAMP_REGEX.replace_all(text, "$1.$2");
    format!("WEBVTT\n\n{}", body.replace("\r\n", "\n"))
}

/// `GET /subtitle?url=`
pub async fn subtitle(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
) -> Result<Response, ApiError> {
    let url = target(query.url.as_deref(), &state.relay).await?;
    let body = relay(
        &state,
        GatewayScope::Subtitle,
        url,
        query.referer.as_deref(),
        state.relay.max_subtitle_bytes,
    )
    .await?
    .collect()
    .await?;
    let vtt = to_webvtt(&String::from_utf8_lossy(&body));
    Ok(with_headers(vtt, "text/vtt; charset=utf-8", SUBTITLE_CACHE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srt_becomes_webvtt() {
        let srt = "1\r\n00:00:01,000 --> 00:00:02,500\r\nHello\r\n";
        assert_eq!(
            to_webvtt(srt),
            "WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.500\nHello\n"
        );
        assert_eq!(to_webvtt("WEBVTT\n\nx"), "WEBVTT\n\nx");
    }

    #[test]
    fn target_requires_http_url() {
        assert!(parse_target(None).is_err());
        assert!(parse_target(Some("file:///etc/passwd")).is_err());
        assert!(parse_target(Some("https://cdn.example/a.ts")).is_ok());
    }

    #[test]
    fn private_addresses_are_not_public() {
        for ip in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.9",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "0.0.0.0",
            "::1",
            "fd00::1",
            "fe80::1",
            "::ffff:127.0.0.1",
        ] {
            assert!(!is_public(ip.parse().unwrap()), "{ip} should be refused");
        }
        for ip in ["93.184.216.34", "1.1.1.1", "2606:4700::1111"] {
            assert!(is_public(ip.parse().unwrap()), "{ip} should be allowed");
        }
    }

    #[tokio::test]
    async fn literal_loopback_target_is_refused() {
        let relay = RelayConfig::default();
        let err = target(Some("http://127.0.0.1:8080/seg.ts"), &relay)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
        assert!(target(Some("http://[::1]/seg.ts"), &relay).await.is_err());

        let open = RelayConfig {
            allow_private_targets: true,
            ..RelayConfig::default()
        };
        assert!(target(Some("http://127.0.0.1:8080/seg.ts"), &open).await.is_ok());
    }
}
