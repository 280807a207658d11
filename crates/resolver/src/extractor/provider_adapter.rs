use std::{fmt, sync::Arc, time::Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::{ExtractorError, ProviderFailure};
use crate::decode::{DecodeContext, Fingerprint, KeystreamCache};
use crate::fetch::FetchClient;
use crate::media::{ContentReference, StreamSource, SubtitleTrack};

/// Where an adapter run currently is. Failures carry the stage they
/// happened in so operators can tell a dead embed page from a changed
/// decode scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    FetchEmbed,
    /// 1-based hop number after the embed page.
    FetchIntermediate(usize),
    /// 0-based index of the decode stage that failed.
    Decode(usize),
    Validate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Start => f.write_str("start"),
            Stage::FetchEmbed => f.write_str("fetch_embed"),
            Stage::FetchIntermediate(hop) => write!(f, "fetch_intermediate[{hop}]"),
            Stage::Decode(index) => write!(f, "decode[{index}]"),
            Stage::Validate => f.write_str("validate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageError {
    pub stage: Stage,
    pub error: ExtractorError,
}

impl StageError {
    pub fn new(stage: Stage, error: impl Into<ExtractorError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

/// Helper for tagging errors with the stage they occurred in.
pub trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T, E: Into<ExtractorError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|e| StageError::new(stage, e))
    }
}

/// Raw adapter output, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub sources: Vec<StreamSource>,
    pub subtitles: Vec<SubtitleTrack>,
}

/// Shared, read-only services handed to every adapter run.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub fetch: FetchClient,
    pub fingerprint: Arc<Fingerprint>,
    pub keystreams: KeystreamCache,
}

impl AdapterContext {
    pub fn new(fetch: FetchClient, fingerprint: Fingerprint) -> Self {
        Self {
            fetch,
            fingerprint: Arc::new(fingerprint),
            keystreams: KeystreamCache::default(),
        }
    }

    pub fn with_keystreams(mut self, keystreams: KeystreamCache) -> Self {
        self.keystreams = keystreams;
        self
    }

    /// Fresh decode state for one run, seeded with the reference's
    /// template variables.
    pub fn decode_context(&self, reference: &ContentReference) -> DecodeContext {
        let mut ctx = DecodeContext::new(self.fingerprint.clone(), self.keystreams.clone());
        ctx.vars.extend(
            reference
                .template_vars()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v)),
        );
        ctx
    }
}

/// One way of turning a content reference into playable sources.
///
/// Implementations walk `START -> FETCH_EMBED -> FETCH_INTERMEDIATE* ->
/// DECODE -> VALIDATE` in order and stop at the first failing stage. `run`
/// reports that stage; `extract` turns it into a [`ProviderFailure`] and
/// never panics or propagates.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable registry key, e.g. `"embed-alpha"`.
    fn key(&self) -> &str;

    /// Adapter variant name, for logs and health output.
    fn variant(&self) -> &'static str;

    async fn run(
        &self,
        reference: &ContentReference,
        ctx: &AdapterContext,
    ) -> Result<Extraction, StageError>;

    async fn extract(
        &self,
        reference: &ContentReference,
        ctx: &AdapterContext,
    ) -> Result<Extraction, ProviderFailure> {
        let started = Instant::now();
        match self.run(reference, ctx).await {
            Ok(extraction) => {
                debug!(
                    provider = %self.key(),
                    sources = extraction.sources.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "provider succeeded"
                );
                Ok(extraction)
            }
            Err(StageError { stage, error }) => {
                let kind = error.kind();
                warn!(
                    provider = %self.key(),
                    %stage,
                    %kind,
                    error = %error,
                    "provider failed"
                );
                Err(ProviderFailure::new(
                    self.key(),
                    kind,
                    stage.to_string(),
                    error.to_string(),
                ))
            }
        }
    }
}

pub type DynAdapter = Arc<dyn ProviderAdapter>;
