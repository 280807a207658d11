use serde::Serialize;

use super::{StreamSource, SubtitleTrack};
use crate::extractor::error::{ErrorKind, ProviderFailure};

/// Canonical outcome of one extraction. Built only through the constructors
/// below so that `success` always implies at least one source.
///
/// ```compile_fail
/// let mut result = embed_resolver::ExtractionResult::invalid_request("missing id");
/// result.success = true;
/// ```
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    success: bool,
    sources: Vec<StreamSource>,
    subtitles: Vec<SubtitleTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) failed_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    failures: Vec<ProviderFailure>,
}

impl ExtractionResult {
    pub fn success(
        provider: impl Into<String>,
        sources: Vec<StreamSource>,
        subtitles: Vec<SubtitleTrack>,
    ) -> Self {
        let provider = provider.into();
        let sources: Vec<_> = sources.into_iter().filter(|s| !s.url.is_empty()).collect();
        if sources.is_empty() {
            return Self::failure(ProviderFailure::new(
                provider,
                ErrorKind::DecodeSchemeChanged,
                "validate",
                "no playable sources in decoded output",
            ));
        }
        Self {
            success: true,
            sources,
            subtitles,
            error: None,
            error_kind: None,
            provider: Some(provider),
            failed_provider: None,
            failures: vec![],
        }
    }

    pub fn failure(failure: ProviderFailure) -> Self {
        Self {
            success: false,
            sources: vec![],
            subtitles: vec![],
            error: Some(failure.message.clone()),
            error_kind: Some(failure.kind),
            provider: None,
            failed_provider: Some(failure.provider.clone()),
            failures: vec![failure],
        }
    }

    /// Every attempted provider failed; one record per provider is kept.
    pub fn exhausted(failures: Vec<ProviderFailure>) -> Self {
        let failed_provider = failures.last().map(|f| f.provider.clone());
        Self {
            success: false,
            sources: vec![],
            subtitles: vec![],
            error: Some(format!(
                "all providers exhausted ({} attempted)",
                failures.len()
            )),
            error_kind: Some(ErrorKind::AllProvidersExhausted),
            provider: None,
            failed_provider,
            failures,
        }
    }

    pub fn timeout(failures: Vec<ProviderFailure>) -> Self {
        Self {
            success: false,
            sources: vec![],
            subtitles: vec![],
            error: Some("request deadline exceeded".to_string()),
            error_kind: Some(ErrorKind::Timeout),
            provider: None,
            failed_provider: failures.last().map(|f| f.provider.clone()),
            failures,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            success: false,
            sources: vec![],
            subtitles: vec![],
            error: Some(message.into()),
            error_kind: Some(ErrorKind::InvalidRequest),
            provider: None,
            failed_provider: None,
            failures: vec![],
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn sources(&self) -> &[StreamSource] {
        &self.sources
    }

    pub fn subtitles(&self) -> &[SubtitleTrack] {
        &self.subtitles
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The provider-side failure kind, when this result is a failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    /// Provider that produced the sources.
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn failed_provider(&self) -> Option<&str> {
        self.failed_provider.as_deref()
    }

    /// One record per provider that was tried and failed.
    pub fn failures(&self) -> &[ProviderFailure] {
        &self.failures
    }
}
