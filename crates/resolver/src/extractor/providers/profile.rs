use std::str::FromStr;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::template;
use crate::decode::{DecodeStage, Pattern, SignatureHeaderNames};
use crate::extractor::error::ExtractorError;
use crate::fetch::FetchRequest;
use crate::media::{ContentReference, MediaType, StreamFormat};

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_url_field() -> String {
    "/file".to_string()
}

fn default_ciphertext_pointer() -> String {
    "/data".to_string()
}

fn default_wait_ms() -> u64 {
    8000
}

/// Versioned configuration for one provider. Every provider literal
/// (urls, patterns, alphabets, key names) lives here rather than in code,
/// so a scheme change is a profile bump.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ProviderProfile {
    pub key: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Movie embed url template, e.g. `https://embed.example/movie/{id}`.
    pub embed_url: String,
    #[serde(default)]
    pub tv_embed_url: Option<String>,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub headers: FxHashMap<String, String>,
    /// Catalog id systems the provider understands. Empty means any.
    #[serde(default)]
    pub id_systems: Vec<String>,
    #[serde(flatten)]
    pub adapter: AdapterSpec,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterSpec {
    Chain(ChainSpec),
    Delegate(DelegateSpec),
    Headless(HeadlessSpec),
    /// Runs `primary`; when its output fails validation, runs `fallback`.
    Fallback {
        primary: Box<AdapterSpec>,
        fallback: Box<AdapterSpec>,
    },
}

impl AdapterSpec {
    pub fn variant(&self) -> &'static str {
        match self {
            AdapterSpec::Chain(_) => "chain",
            AdapterSpec::Delegate(_) => "delegate",
            AdapterSpec::Headless(_) => "headless",
            AdapterSpec::Fallback { .. } => "fallback",
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HopMethod {
    #[default]
    Get,
    Post,
}

/// One intermediate fetch. `stages` run on the current page and their
/// output becomes `{payload}` for the `url` template.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Hop {
    #[serde(default)]
    pub stages: Vec<DecodeStage>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: HopMethod,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Referer template; defaults to the page the hop was found on.
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub headers: FxHashMap<String, String>,
}

/// Maps a decoded JSON document to sources. Pointers are RFC 6901.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SourceMapping {
    /// Array of source objects; empty means the document root.
    #[serde(default)]
    pub list: String,
    #[serde(default = "default_url_field")]
    pub url: String,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Array of `{file|url, label, lang|language}` subtitle objects.
    #[serde(default)]
    pub subtitles: Option<String>,
    /// Declared format of every mapped url. Without it, mapped urls must
    /// end in `.m3u8` or `.mp4`.
    #[serde(default)]
    pub format: Option<StreamFormat>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ChainSpec {
    #[serde(default)]
    pub hops: Vec<Hop>,
    pub stages: Vec<DecodeStage>,
    /// Competing decode chains, tried in order when `stages` does not
    /// validate.
    #[serde(default)]
    pub alternatives: Vec<Vec<DecodeStage>>,
    #[serde(default)]
    pub sources: Option<SourceMapping>,
    /// Named groups `url`, optional `label` and `lang`.
    #[serde(default)]
    pub subtitle_pattern: Option<Pattern>,
    #[serde(default)]
    pub playback_referer: Option<String>,
    /// Lists each rendition of a master playlist as its own source.
    #[serde(default)]
    pub expand_variants: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DelegateSpec {
    pub api_url: String,
    pub api_key: String,
    pub secret: String,
    #[serde(default)]
    pub header_names: SignatureHeaderNames,
    /// Sidecar that runs the provider's compiled decrypt routine.
    pub decryptor_url: String,
    #[serde(default = "default_ciphertext_pointer")]
    pub ciphertext_pointer: String,
    #[serde(default)]
    pub stages: Vec<DecodeStage>,
    #[serde(default)]
    pub sources: Option<SourceMapping>,
    #[serde(default)]
    pub playback_referer: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct HeadlessSpec {
    /// Render service endpoint, see [`super::headless`].
    pub render_url: String,
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,
    #[serde(default)]
    pub stages: Vec<DecodeStage>,
    #[serde(default)]
    pub playback_referer: Option<String>,
}

impl ProviderProfile {
    /// Rejects profiles that could never run: bad stage parameters, broken
    /// headers, unparseable templates.
    pub fn check(&self) -> Result<(), ExtractorError> {
        if self.key.trim().is_empty() {
            return Err(ExtractorError::Profile("provider key is empty".to_string()));
        }
        self.settings()?;
        check_spec(&self.key, &self.adapter)
    }

    pub fn settings(&self) -> Result<EmbedSettings, ExtractorError> {
        Ok(EmbedSettings {
            key: self.key.clone(),
            version: self.version,
            embed_url: self.embed_url.clone(),
            tv_embed_url: self.tv_embed_url.clone(),
            referer: self.referer.clone(),
            origin: self.origin.clone(),
            headers: header_map(&self.headers)
                .map_err(|e| ExtractorError::Profile(format!("{}: {e}", self.key)))?,
            id_systems: self.id_systems.clone(),
        })
    }
}

fn check_stages(key: &str, stages: &[DecodeStage]) -> Result<(), ExtractorError> {
    stages.iter().enumerate().try_for_each(|(index, stage)| {
        stage.check().map_err(|e| {
            ExtractorError::Profile(format!("{key}: stage {index} ({}): {e}", stage.name()))
        })
    })
}

fn check_spec(key: &str, spec: &AdapterSpec) -> Result<(), ExtractorError> {
    match spec {
        AdapterSpec::Chain(chain) => {
            for hop in &chain.hops {
                check_stages(key, &hop.stages)?;
                header_map(&hop.headers)
                    .map_err(|e| ExtractorError::Profile(format!("{key}: {e}")))?;
            }
            check_stages(key, &chain.stages)?;
            chain
                .alternatives
                .iter()
                .try_for_each(|alt| check_stages(key, alt))
        }
        AdapterSpec::Delegate(delegate) => {
            if delegate.api_key.is_empty() || delegate.secret.is_empty() {
                return Err(ExtractorError::Profile(format!(
                    "{key}: delegate needs api_key and secret"
                )));
            }
            check_stages(key, &delegate.stages)
        }
        AdapterSpec::Headless(headless) => check_stages(key, &headless.stages),
        AdapterSpec::Fallback { primary, fallback } => {
            if matches!(**primary, AdapterSpec::Fallback { .. }) {
                return Err(ExtractorError::Profile(format!(
                    "{key}: fallback primary cannot itself be a fallback"
                )));
            }
            check_spec(key, primary)?;
            check_spec(key, fallback)
        }
    }
}

pub(crate) fn header_map(headers: &FxHashMap<String, String>) -> Result<HeaderMap, String> {
    headers
        .iter()
        .map(|(name, value)| -> Result<(HeaderName, HeaderValue), String> {
            let name = HeaderName::from_str(name).map_err(|e| format!("header {name}: {e}"))?;
            let value = HeaderValue::from_str(value).map_err(|e| format!("header value: {e}"))?;
            Ok((name, value))
        })
        .collect()
}

/// The request-shaping part of a profile, shared by every adapter variant.
#[derive(Debug, Clone)]
pub struct EmbedSettings {
    pub key: String,
    pub version: u32,
    pub embed_url: String,
    pub tv_embed_url: Option<String>,
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub headers: HeaderMap,
    pub id_systems: Vec<String>,
}

impl EmbedSettings {
    pub fn supports(&self, reference: &ContentReference) -> bool {
        self.id_systems.is_empty()
            || self
                .id_systems
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&reference.id_system))
    }

    /// Renders the embed url for a reference. Tv references use
    /// `tv_embed_url` when set.
    pub fn embed_url(
        &self,
        reference: &ContentReference,
        vars: &FxHashMap<String, String>,
    ) -> Result<String, ExtractorError> {
        if !self.supports(reference) {
            return Err(ExtractorError::InvalidRequest(format!(
                "{} does not support id system {}",
                self.key, reference.id_system
            )));
        }
        let template = match (reference.media_type, &self.tv_embed_url) {
            (MediaType::Tv, Some(tv)) => tv,
            _ => &self.embed_url,
        };
        Ok(template::render(template, vars)?)
    }

    pub fn request(&self, url: &str) -> FetchRequest {
        FetchRequest::get(url)
            .headers(self.headers.clone())
            .referer(self.referer.as_deref())
            .origin(self.origin.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_profile() -> serde_json::Value {
        serde_json::json!({
            "key": "embed-alpha",
            "version": 3,
            "kind": "chain",
            "embed_url": "https://embed.example/movie/{id}",
            "tv_embed_url": "https://embed.example/tv/{id}/{season}/{episode}",
            "referer": "https://embed.example/",
            "hops": [
                {"stages": [{"kind": "extract", "pattern": "iframe src=\"([^\"]+)\""}]}
            ],
            "stages": [
                {"kind": "extract", "pattern": "data-hash=\"([^\"]+)\""},
                {"kind": "reverse"},
                {"kind": "base64"}
            ],
            "alternatives": [[{"kind": "hex"}]]
        })
    }

    #[test]
    fn parses_flattened_kind() {
        let profile: ProviderProfile = serde_json::from_value(chain_profile()).unwrap();
        assert_eq!(profile.version, 3);
        assert!(profile.enabled);
        match &profile.adapter {
            AdapterSpec::Chain(chain) => {
                assert_eq!(chain.hops.len(), 1);
                assert_eq!(chain.stages.len(), 3);
                assert_eq!(chain.alternatives.len(), 1);
            }
            other => panic!("unexpected adapter {other:?}"),
        }
        profile.check().unwrap();
    }

    #[test]
    fn parses_fallback_with_nested_specs() {
        let profile: ProviderProfile = serde_json::from_value(serde_json::json!({
            "key": "embed-beta",
            "kind": "fallback",
            "embed_url": "https://beta.example/e/{id}",
            "primary": {"kind": "chain", "stages": [{"kind": "unpack"}]},
            "fallback": {"kind": "headless", "render_url": "http://render.local/render"}
        }))
        .unwrap();
        assert_eq!(profile.adapter.variant(), "fallback");
        profile.check().unwrap();
    }

    #[test]
    fn check_rejects_bad_alphabet() {
        let mut value = chain_profile();
        value["stages"] = serde_json::json!([{"kind": "alphabet_base64", "alphabet": "abc"}]);
        let profile: ProviderProfile = serde_json::from_value(value).unwrap();
        assert!(matches!(profile.check(), Err(ExtractorError::Profile(_))));
    }

    #[test]
    fn embed_url_picks_tv_template() {
        let profile: ProviderProfile = serde_json::from_value(chain_profile()).unwrap();
        let settings = profile.settings().unwrap();
        let reference = ContentReference::episode("tmdb", "1399", 3, 7);
        let vars: FxHashMap<String, String> = reference
            .template_vars()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(
            settings.embed_url(&reference, &vars).unwrap(),
            "https://embed.example/tv/1399/3/7"
        );
    }

    #[test]
    fn unsupported_id_system_is_invalid_request() {
        let mut value = chain_profile();
        value["id_systems"] = serde_json::json!(["imdb"]);
        let profile: ProviderProfile = serde_json::from_value(value).unwrap();
        let settings = profile.settings().unwrap();
        let err = settings
            .embed_url(&ContentReference::movie("tmdb", "550"), &FxHashMap::default())
            .unwrap_err();
        assert!(matches!(err, ExtractorError::InvalidRequest(_)));
    }
}
