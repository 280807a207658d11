use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    profile::{EmbedSettings, HeadlessSpec},
    validate::{finish_sources, manifest_urls, validate_output},
};
use crate::decode::{DecodeError, run_chain};
use crate::extractor::provider_adapter::{
    AdapterContext, AtStage, Extraction, ProviderAdapter, Stage, StageError,
};
use crate::fetch::FetchRequest;
use crate::media::{ContentReference, StreamSource};

/// Headroom on top of the render wait for the service's own work.
const RENDER_MARGIN: Duration = Duration::from_secs(5);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    referer: Option<&'a str>,
    wait_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<&'a str>,
}

#[derive(Deserialize, Debug, Default)]
struct RenderResponse {
    #[serde(default)]
    html: String,
    /// Urls the page requested while it was open.
    #[serde(default)]
    requests: Vec<String>,
}

/// Renders the embed page in an external browser service and picks the
/// manifest out of the network log or the final document.
///
/// Request: `POST {render_url}` with `{"url", "referer", "waitMs",
/// "userAgent"}`. Response: `{"html": .., "requests": [..]}`.
#[derive(Debug, Clone)]
pub struct HeadlessAdapter {
    settings: EmbedSettings,
    spec: HeadlessSpec,
}

impl HeadlessAdapter {
    pub fn new(settings: EmbedSettings, spec: HeadlessSpec) -> Self {
        Self { settings, spec }
    }
}

#[async_trait]
impl ProviderAdapter for HeadlessAdapter {
    fn key(&self) -> &str {
        &self.settings.key
    }

    fn variant(&self) -> &'static str {
        "headless"
    }

    async fn run(
        &self,
        reference: &ContentReference,
        ctx: &AdapterContext,
    ) -> Result<Extraction, StageError> {
        let mut decode = ctx.decode_context(reference);
        let embed_url = self
            .settings
            .embed_url(reference, &decode.vars)
            .at(Stage::Start)?;

        let body = serde_json::to_vec(&RenderRequest {
            url: &embed_url,
            referer: self.settings.referer.as_deref(),
            wait_ms: self.spec.wait_ms,
            user_agent: ctx.fingerprint.get("userAgent"),
        })
        .map_err(DecodeError::from)
        .at(Stage::Start)?;

        debug!(provider = %self.settings.key, url = %embed_url, "rendering embed page");
        let response = ctx
            .fetch
            .fetch(
                FetchRequest::post(&self.spec.render_url, body)
                    .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                    .timeout(Duration::from_millis(self.spec.wait_ms) + RENDER_MARGIN),
            )
            .await
            .at(Stage::FetchEmbed)?;
        let rendered: RenderResponse = response
            .json()
            .map_err(DecodeError::from)
            .at(Stage::FetchEmbed)?;

        let referer = self
            .spec
            .playback_referer
            .clone()
            .unwrap_or_else(|| embed_url.clone());

        let observed = manifest_urls(&rendered.requests.join("\n"));
        let mut extraction = if !observed.is_empty() {
            debug!(
                provider = %self.settings.key,
                count = observed.len(),
                "manifest seen in network log"
            );
            Extraction {
                sources: observed.into_iter().map(StreamSource::new).collect(),
                subtitles: vec![],
            }
        } else {
            let output = run_chain(&self.spec.stages, rendered.html.into_bytes(), &mut decode)
                .map_err(|failure| StageError::new(Stage::Decode(failure.index), failure))?;
            validate_output(&output, None, &embed_url).at(Stage::Validate)?
        };

        finish_sources(&mut extraction.sources, &referer);
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Fingerprint;
    use crate::extractor::error::ErrorKind;
    use crate::extractor::providers::profile::{AdapterSpec, ProviderProfile};
    use crate::fetch::{FetchClient, FetchConfig};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer, stages: serde_json::Value) -> HeadlessAdapter {
        let profile: ProviderProfile = serde_json::from_value(serde_json::json!({
            "key": "render-gamma",
            "kind": "headless",
            "embed_url": "https://gamma.example/embed/{id}",
            "render_url": format!("{}/render", server.uri()),
            "wait_ms": 100,
            "stages": stages,
        }))
        .unwrap();
        profile.check().unwrap();
        match &profile.adapter {
            AdapterSpec::Headless(spec) => HeadlessAdapter::new(profile.settings().unwrap(), spec.clone()),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn context() -> AdapterContext {
        AdapterContext::new(
            FetchClient::with_client(reqwest::Client::new(), FetchConfig::default()),
            Fingerprint::browser("UA/2.0"),
        )
    }

    #[tokio::test]
    async fn prefers_network_log() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .and(body_partial_json(serde_json::json!({
                "url": "https://gamma.example/embed/550",
                "userAgent": "UA/2.0",
                "waitMs": 100,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "html": "<html></html>",
                "requests": [
                    "https://gamma.example/player.js",
                    "https://cdn.example/v/master.m3u8?token=abc"
                ]
            })))
            .mount(&server)
            .await;

        let extraction = adapter(&server, serde_json::json!([]))
            .run(&ContentReference::movie("tmdb", "550"), &context())
            .await
            .unwrap();
        assert_eq!(extraction.sources.len(), 1);
        assert_eq!(extraction.sources[0].url, "https://cdn.example/v/master.m3u8?token=abc");
        assert_eq!(extraction.sources[0].referer, "https://gamma.example/embed/550");
    }

    #[tokio::test]
    async fn decodes_rendered_document_when_log_is_empty() {
        let server = MockServer::start().await;
        Mock::given(path("/render"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "html": "<video data-src=\"https://cdn.example/x/index.m3u8\"></video>",
                "requests": []
            })))
            .mount(&server)
            .await;

        let stages = serde_json::json!([{"kind": "extract", "pattern": "data-src=\"([^\"]+)\""}]);
        let extraction = adapter(&server, stages)
            .run(&ContentReference::movie("tmdb", "550"), &context())
            .await
            .unwrap();
        assert_eq!(extraction.sources[0].url, "https://cdn.example/x/index.m3u8");
    }

    #[tokio::test]
    async fn nothing_playable_is_scheme_change() {
        let server = MockServer::start().await;
        Mock::given(path("/render"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "html": "<p>removed</p>",
                "requests": []
            })))
            .mount(&server)
            .await;

        let failure = adapter(&server, serde_json::json!([]))
            .extract(&ContentReference::movie("tmdb", "550"), &context())
            .await
            .unwrap_err();
        assert_eq!(failure.stage, "validate");
        assert_eq!(failure.kind, ErrorKind::DecodeSchemeChanged);
    }
}
