use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    Method,
    header::{CONTENT_TYPE, HeaderValue},
};
use tracing::{debug, warn};

use super::{
    profile::{ChainSpec, EmbedSettings, Hop, HopMethod, header_map},
    template::{render, resolve_url},
    validate::{finish_sources, pattern_subtitles, validate_output},
};
use crate::decode::{DecodeContext, run_chain};
use crate::extractor::error::ExtractorError;
use crate::extractor::provider_adapter::{
    AdapterContext, AtStage, Extraction, ProviderAdapter, Stage, StageError,
};
use crate::fetch::{FetchRequest, FetchResponse};
use crate::hls;
use crate::media::{ContentReference, StreamFormat, StreamSource};

/// The static adapter: fetch the embed page, follow the configured hops,
/// then run the decode chain (and its alternatives) until one validates.
#[derive(Debug, Clone)]
pub struct ChainAdapter {
    settings: EmbedSettings,
    spec: ChainSpec,
}

/// Current position in the hop walk.
struct Page {
    url: String,
    body: Vec<u8>,
}

impl From<FetchResponse> for Page {
    fn from(response: FetchResponse) -> Self {
        Self {
            url: response.url,
            body: response.body.to_vec(),
        }
    }
}

impl ChainAdapter {
    pub fn new(settings: EmbedSettings, spec: ChainSpec) -> Self {
        Self { settings, spec }
    }

    fn hop_request(
        &self,
        hop: &Hop,
        target: &str,
        page: &Page,
        decode: &DecodeContext,
    ) -> Result<FetchRequest, ExtractorError> {
        let method = match hop.method {
            HopMethod::Get => Method::GET,
            HopMethod::Post => Method::POST,
        };
        let mut request = FetchRequest::new(method, target)
            .headers(self.settings.headers.clone())
            .origin(self.settings.origin.as_deref());

        let referer = match &hop.referer {
            Some(template) => render(template, &decode.vars)?,
            None => page.url.clone(),
        };
        request = request.referer(Some(referer.as_str()));

        let headers = header_map(&hop.headers).map_err(ExtractorError::Profile)?;
        request = request.headers(headers);

        if let Some(body) = &hop.body {
            request.body = Some(Bytes::from(render(body, &decode.vars)?));
            let content_type = hop
                .content_type
                .as_deref()
                .unwrap_or("application/x-www-form-urlencoded");
            let value = HeaderValue::from_str(content_type)
                .map_err(|e| ExtractorError::Profile(format!("content type: {e}")))?;
            request = request.header(CONTENT_TYPE, value);
        }
        Ok(request)
    }

    /// Runs the primary decode chain, then each alternative, against the
    /// final page. Returns the first output that validates. When none does,
    /// the primary chain's failure is reported.
    fn decode_and_validate(
        &self,
        page: &Page,
        decode: &mut DecodeContext,
    ) -> Result<(Extraction, Vec<u8>), StageError> {
        let chains = std::iter::once(&self.spec.stages).chain(self.spec.alternatives.iter());
        let mut primary_failure: Option<StageError> = None;

        for (attempt, stages) in chains.enumerate() {
            let mut ctx = decode.clone();
            let outcome = match run_chain(stages, page.body.clone(), &mut ctx) {
                Ok(output) => validate_output(&output, self.spec.sources.as_ref(), &page.url)
                    .map(|extraction| (extraction, output))
                    .at(Stage::Validate),
                Err(failure) => Err(StageError::new(Stage::Decode(failure.index), failure)),
            };
            match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(
                            provider = %self.settings.key,
                            alternative = attempt,
                            "alternative decode chain validated"
                        );
                    }
                    *decode = ctx;
                    return Ok(result);
                }
                Err(err) => {
                    debug!(
                        provider = %self.settings.key,
                        attempt,
                        stage = %err.stage,
                        error = %err.error,
                        "decode chain rejected"
                    );
                    primary_failure.get_or_insert(err);
                }
            }
        }

        Err(primary_failure.unwrap_or_else(|| {
            StageError::new(
                Stage::Validate,
                ExtractorError::SchemeChanged("no decode chain configured".to_string()),
            )
        }))
    }

    /// Adds one source per rendition when the manifest is a master
    /// playlist. Probe failures keep the master source only.
    async fn expand_variants(
        &self,
        sources: Vec<StreamSource>,
        referer: &str,
        ctx: &AdapterContext,
    ) -> Vec<StreamSource> {
        let mut expanded = Vec::with_capacity(sources.len());
        for source in sources {
            if source.stream_format != StreamFormat::Hls {
                expanded.push(source);
                continue;
            }
            let probe = ctx
                .fetch
                .fetch(FetchRequest::get(&source.url).referer(Some(referer)))
                .await
                .map_err(ExtractorError::from)
                .and_then(|response| Ok(hls::variants(&response.body, &source.url)?));
            let variants = match probe {
                Ok(variants) => variants,
                Err(e) => {
                    warn!(provider = %self.settings.key, error = %e, "variant probe failed");
                    vec![]
                }
            };
            let renditions: Vec<StreamSource> = variants
                .into_iter()
                .map(|variant| {
                    let mut rendition = source.clone();
                    rendition.url = variant.url;
                    rendition.quality = variant.quality;
                    rendition
                })
                .collect();
            expanded.push(source);
            expanded.extend(renditions);
        }
        expanded
    }
}

#[async_trait]
impl ProviderAdapter for ChainAdapter {
    fn key(&self) -> &str {
        &self.settings.key
    }

    fn variant(&self) -> &'static str {
        "chain"
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

        debug!(provider = %self.settings.key, version = self.settings.version, "fetching embed page");
        let mut page: Page = ctx
            .fetch
            .fetch(self.settings.request(&embed_url))
            .await
            .at(Stage::FetchEmbed)?
            .into();

        for (index, hop) in self.spec.hops.iter().enumerate() {
            let stage = Stage::FetchIntermediate(index + 1);
            let payload = run_chain(&hop.stages, page.body.clone(), &mut decode).at(stage)?;
            decode.vars.insert(
                "payload".to_string(),
                String::from_utf8_lossy(&payload).trim().to_string(),
            );
            let target = render(hop.url.as_deref().unwrap_or("{payload}"), &decode.vars)
                .and_then(|link| resolve_url(&page.url, &link))
                .at(stage)?;
            let request = self
                .hop_request(hop, &target, &page, &decode)
                .map_err(|e| StageError::new(stage, e))?;

            debug!(provider = %self.settings.key, %stage, "following hop");
            page = ctx.fetch.fetch(request).await.at(stage)?.into();
        }

        let (mut extraction, output) = self.decode_and_validate(&page, &mut decode)?;

        if let Some(pattern) = &self.spec.subtitle_pattern {
            let mut tracks = pattern_subtitles(pattern, &String::from_utf8_lossy(&output));
            for track in pattern_subtitles(pattern, &String::from_utf8_lossy(&page.body)) {
                if !tracks.iter().any(|t| t.url == track.url) {
                    tracks.push(track);
                }
            }
            extraction.subtitles.extend(tracks);
        }

        let referer = self
            .spec
            .playback_referer
            .clone()
            .unwrap_or_else(|| page.url.clone());
        finish_sources(&mut extraction.sources, &referer);

        if self.spec.expand_variants {
            extraction.sources = self
                .expand_variants(extraction.sources, &referer, ctx)
                .await;
        }

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
    use base64::Engine as _;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(profile: serde_json::Value) -> ChainAdapter {
        let profile: ProviderProfile = serde_json::from_value(profile).unwrap();
        profile.check().unwrap();
        match &profile.adapter {
            AdapterSpec::Chain(spec) => ChainAdapter::new(profile.settings().unwrap(), spec.clone()),
            other => panic!("not a chain profile: {other:?}"),
        }
    }

    fn context() -> AdapterContext {
        AdapterContext::new(
            FetchClient::with_client(reqwest::Client::new(), FetchConfig::default()),
            Fingerprint::browser("UA/1.0"),
        )
    }

    fn reversed_base64(text: &str) -> String {
        base64::engine::general_purpose::STANDARD
            .encode(text)
            .chars()
            .rev()
            .collect()
    }

    #[tokio::test]
    async fn walks_hops_and_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movie/550"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<iframe src="/rcp/abc123"></iframe>"#,
            ))
            .mount(&server)
            .await;
        let player = format!(
            r#"<div id="player" data-hash="{}"></div><track src="https://subs.example/en.vtt" label="English">"#,
            reversed_base64("https://cdn.example/list.m3u8")
        );
        Mock::given(method("GET"))
            .and(path("/rcp/abc123"))
            .and(header("referer", format!("{}/movie/550", server.uri()).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(player))
            .mount(&server)
            .await;

        let adapter = adapter(serde_json::json!({
            "key": "embed-alpha",
            "kind": "chain",
            "embed_url": format!("{}/movie/{{id}}", server.uri()),
            "hops": [{"stages": [{"kind": "extract", "pattern": r#"iframe src="([^"]+)""#}]}],
            "stages": [
                {"kind": "extract", "pattern": r#"data-hash="([^"]+)""#},
                {"kind": "reverse"},
                {"kind": "base64"}
            ],
            "subtitle_pattern": r#"<track src="(?P<url>[^"]+)" label="(?P<label>[^"]+)""#
        }));

        let extraction = adapter
            .run(&ContentReference::movie("tmdb", "550"), &context())
            .await
            .unwrap();
        assert_eq!(extraction.sources.len(), 1);
        assert_eq!(extraction.sources[0].url, "https://cdn.example/list.m3u8");
        assert_eq!(extraction.sources[0].quality, "auto");
        assert_eq!(
            extraction.sources[0].referer,
            format!("{}/rcp/abc123", server.uri())
        );
        assert_eq!(extraction.subtitles.len(), 1);
        assert_eq!(extraction.subtitles[0].label, "English");
    }

    #[tokio::test]
    async fn alternative_chain_wins_when_primary_does_not_validate() {
        let server = MockServer::start().await;
        let encoded = hex::encode("https://cdn.example/alt.m3u8");
        Mock::given(path("/e/7"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("var src='{encoded}';")))
            .mount(&server)
            .await;

        let adapter = adapter(serde_json::json!({
            "key": "embed-gamma",
            "kind": "chain",
            "embed_url": format!("{}/e/{{id}}", server.uri()),
            "stages": [
                {"kind": "extract", "pattern": "src='([^']+)'"},
                {"kind": "reverse"}
            ],
            "alternatives": [[
                {"kind": "extract", "pattern": "src='([^']+)'"},
                {"kind": "hex"}
            ]]
        }));

        let extraction = adapter
            .run(&ContentReference::movie("tmdb", "7"), &context())
            .await
            .unwrap();
        assert_eq!(extraction.sources[0].url, "https://cdn.example/alt.m3u8");
    }

    #[tokio::test]
    async fn changed_page_reports_decode_stage() {
        let server = MockServer::start().await;
        Mock::given(path("/movie/550"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>redesigned</html>"))
            .mount(&server)
            .await;

        let adapter = adapter(serde_json::json!({
            "key": "embed-alpha",
            "kind": "chain",
            "embed_url": format!("{}/movie/{{id}}", server.uri()),
            "stages": [
                {"kind": "extract", "pattern": r#"data-hash="([^"]+)""#},
                {"kind": "base64"}
            ]
        }));

        let failure = adapter
            .extract(&ContentReference::movie("tmdb", "550"), &context())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::DecodeSchemeChanged);
        assert_eq!(failure.stage, "decode[0]");
    }

    #[tokio::test]
    async fn decoded_garbage_fails_validation() {
        let server = MockServer::start().await;
        Mock::given(path("/movie/550"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"data-hash="{}""#,
                reversed_base64("not a manifest")
            )))
            .mount(&server)
            .await;

        let adapter = adapter(serde_json::json!({
            "key": "embed-alpha",
            "kind": "chain",
            "embed_url": format!("{}/movie/{{id}}", server.uri()),
            "stages": [
                {"kind": "extract", "pattern": r#"data-hash="([^"]+)""#},
                {"kind": "reverse"},
                {"kind": "base64"}
            ]
        }));

        let failure = adapter
            .extract(&ContentReference::movie("tmdb", "550"), &context())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::DecodeSchemeChanged);
        assert_eq!(failure.stage, "validate");
    }

    #[tokio::test]
    async fn dead_embed_is_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(path("/movie/550"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = adapter(serde_json::json!({
            "key": "embed-alpha",
            "kind": "chain",
            "embed_url": format!("{}/movie/{{id}}", server.uri()),
            "stages": [{"kind": "reverse"}]
        }));

        let failure = adapter
            .extract(&ContentReference::movie("tmdb", "550"), &context())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(failure.stage, "fetch_embed");
    }

    #[tokio::test]
    async fn expands_master_playlist_variants() {
        let server = MockServer::start().await;
        let master_url = format!("{}/hls/master.m3u8", server.uri());
        Mock::given(path("/e/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("file:\"{master_url}\"")))
            .mount(&server)
            .await;
        Mock::given(path("/hls/master.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080\n1080.m3u8\n",
            ))
            .mount(&server)
            .await;

        let adapter = adapter(serde_json::json!({
            "key": "embed-delta",
            "kind": "chain",
            "embed_url": format!("{}/e/{{id}}", server.uri()),
            "stages": [],
            "expand_variants": true
        }));

        let extraction = adapter
            .run(&ContentReference::movie("tmdb", "1"), &context())
            .await
            .unwrap();
        let qualities: Vec<_> = extraction.sources.iter().map(|s| s.quality.as_str()).collect();
        assert_eq!(qualities, ["auto", "1080p"]);
        assert_eq!(extraction.sources[1].url, format!("{}/hls/1080.m3u8", server.uri()));
    }
}
