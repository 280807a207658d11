use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    profile::{DelegateSpec, EmbedSettings},
    validate::{finish_sources, validate_output},
};
use crate::decode::{DecodeError, OpaqueDecryptor, SignedHeaders, alphabet::decode_base64, run_chain};
use crate::extractor::error::ExtractorError;
use crate::extractor::provider_adapter::{
    AdapterContext, AtStage, Extraction, ProviderAdapter, Stage, StageError,
};
use crate::fetch::{FetchClient, FetchRequest};
use crate::media::ContentReference;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecryptRequest<'a> {
    ciphertext: String,
    api_key: &'a str,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

/// Calls a sidecar that hosts a provider's compiled decrypt routine.
///
/// Request: `POST {endpoint}` with `{"ciphertext": <base64>, "apiKey": ..}`.
/// Response: `{"plaintext": <base64>}`.
#[derive(Debug, Clone)]
pub struct RemoteDecryptor {
    endpoint: String,
    fetch: FetchClient,
}

impl RemoteDecryptor {
    pub fn new(endpoint: impl Into<String>, fetch: FetchClient) -> Self {
        Self {
            endpoint: endpoint.into(),
            fetch,
        }
    }
}

#[async_trait]
impl OpaqueDecryptor for RemoteDecryptor {
    async fn decrypt(&self, ciphertext: &[u8], api_key: &str) -> Result<Vec<u8>, DecodeError> {
        let body = serde_json::to_vec(&DecryptRequest {
            ciphertext: base64::engine::general_purpose::STANDARD.encode(ciphertext),
            api_key,
        })?;
        let response = self
            .fetch
            .fetch(
                FetchRequest::post(&self.endpoint, body)
                    .header(CONTENT_TYPE, HeaderValue::from_static("application/json")),
            )
            .await
            .map_err(|e| DecodeError::Delegate(e.to_string()))?;
        let decrypted: DecryptResponse = response.json()?;
        decode_base64(&decrypted.plaintext, false)
    }
}

/// Adapter for providers whose API returns ciphertext only their own
/// compiled routine can decrypt. We sign the API call and hand the
/// ciphertext to an [`OpaqueDecryptor`].
#[derive(Clone)]
pub struct DelegateAdapter {
    settings: EmbedSettings,
    spec: DelegateSpec,
    decryptor: Arc<dyn OpaqueDecryptor>,
}

impl std::fmt::Debug for DelegateAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateAdapter")
            .field("key", &self.settings.key)
            .field("api_url", &self.spec.api_url)
            .finish()
    }
}

impl DelegateAdapter {
    pub fn new(
        settings: EmbedSettings,
        spec: DelegateSpec,
        decryptor: Arc<dyn OpaqueDecryptor>,
    ) -> Self {
        Self {
            settings,
            spec,
            decryptor,
        }
    }
}

#[async_trait]
impl ProviderAdapter for DelegateAdapter {
    fn key(&self) -> &str {
        &self.settings.key
    }

    fn variant(&self) -> &'static str {
        "delegate"
    }

    async fn run(
        &self,
        reference: &ContentReference,
        ctx: &AdapterContext,
    ) -> Result<Extraction, StageError> {
        let mut decode = ctx.decode_context(reference);
        if !self.settings.supports(reference) {
            return Err(StageError::new(
                Stage::Start,
                ExtractorError::InvalidRequest(format!(
                    "{} does not support id system {}",
                    self.settings.key, reference.id_system
                )),
            ));
        }
        let api_url = super::template::render(&self.spec.api_url, &decode.vars).at(Stage::Start)?;
        let path = url::Url::parse(&api_url)
            .map(|u| u.path().to_string())
            .map_err(|e| ExtractorError::InvalidRequest(format!("api url: {e}")))
            .at(Stage::Start)?;

        let signed = SignedHeaders::sign(&self.spec.api_key, &self.spec.secret, &path)
            .and_then(|s| s.to_header_map(&self.spec.header_names))
            .at(Stage::Start)?;

        debug!(provider = %self.settings.key, "calling signed source api");
        let response = ctx
            .fetch
            .fetch(self.settings.request(&api_url).headers(signed))
            .await
            .at(Stage::FetchEmbed)?;

        let document: serde_json::Value = response.json().map_err(DecodeError::from).at(Stage::Decode(0))?;
        let ciphertext = document
            .pointer(&self.spec.ciphertext_pointer)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| DecodeError::NoMatch(format!("json pointer {}", self.spec.ciphertext_pointer)))
            .and_then(|text| decode_base64(text, false))
            .at(Stage::Decode(0))?;

        let plaintext = self
            .decryptor
            .decrypt(&ciphertext, &self.spec.api_key)
            .await
            .at(Stage::FetchIntermediate(1))?;

        let output = run_chain(&self.spec.stages, plaintext, &mut decode)
            .map_err(|failure| StageError::new(Stage::Decode(failure.index + 1), failure))?;

        let mut extraction =
            validate_output(&output, self.spec.sources.as_ref(), &api_url).at(Stage::Validate)?;
        let referer = self
            .spec
            .playback_referer
            .clone()
            .or_else(|| self.settings.referer.clone())
            .unwrap_or_default();
        finish_sources(&mut extraction.sources, &referer);
        Ok(extraction)
    }
}
