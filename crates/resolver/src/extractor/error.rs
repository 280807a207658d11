use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decode::{ChainFailure, DecodeError};
use crate::fetch::FetchError;
use crate::gateway::GatewayError;
use crate::hls::HlsError;

/// Failure classes reported to callers. `DecodeSchemeChanged` means an
/// adapter needs maintenance; the others are environmental.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    UpstreamUnavailable,
    DecodeSchemeChanged,
    ProxyFailure,
    Timeout,
    AllProvidersExhausted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::DecodeSchemeChanged => "DecodeSchemeChanged",
            ErrorKind::ProxyFailure => "ProxyFailure",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::AllProvidersExhausted => "AllProvidersExhausted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("invalid provider profile: {0}")]
    Profile(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("decode stage {index} ({stage}) failed: {error}")]
    Chain {
        index: usize,
        stage: &'static str,
        error: DecodeError,
    },
    #[error("decoded output failed validation: {0}")]
    SchemeChanged(String),
    #[error(transparent)]
    Hls(#[from] HlsError),
    #[error("deadline exceeded")]
    Timeout,
}

impl From<ChainFailure> for ExtractorError {
    fn from(failure: ChainFailure) -> Self {
        ExtractorError::Chain {
            index: failure.index,
            stage: failure.stage,
            error: failure.error,
        }
    }
}

fn fetch_kind(err: &FetchError) -> ErrorKind {
    match err {
        FetchError::Timeout(_) => ErrorKind::Timeout,
        FetchError::Gateway(_) => ErrorKind::ProxyFailure,
        FetchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        FetchError::Network(_)
        | FetchError::Upstream4xx { .. }
        | FetchError::Upstream5xx { .. }
        | FetchError::Blocked { .. }
        | FetchError::TooLarge { .. } => ErrorKind::UpstreamUnavailable,
    }
}

impl ExtractorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractorError::InvalidRequest(_)
            | ExtractorError::UnknownProvider(_)
            | ExtractorError::Profile(_) => ErrorKind::InvalidRequest,
            ExtractorError::Fetch(err) => fetch_kind(err),
            ExtractorError::Gateway(_) => ErrorKind::ProxyFailure,
            ExtractorError::Decode(DecodeError::Delegate(_)) => ErrorKind::UpstreamUnavailable,
            ExtractorError::Decode(_)
            | ExtractorError::Chain { .. }
            | ExtractorError::SchemeChanged(_) => ErrorKind::DecodeSchemeChanged,
            ExtractorError::Hls(err) => match err {
                HlsError::Fetch(err) => fetch_kind(err),
                HlsError::Gateway(_) => ErrorKind::ProxyFailure,
                _ => ErrorKind::DecodeSchemeChanged,
            },
            ExtractorError::Timeout => ErrorKind::Timeout,
        }
    }
}

/// What went wrong with one provider, kept for diagnostics.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    pub provider: String,
    pub kind: ErrorKind,
    pub stage: String,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(
        provider: impl Into<String>,
        kind: ErrorKind,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            stage: stage.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed at {} ({}): {}",
            self.provider, self.stage, self.kind, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn kinds_separate_drift_from_transport() {
        assert_eq!(
            ExtractorError::from(FetchError::Upstream5xx { status: 503 }).kind(),
            ErrorKind::UpstreamUnavailable
        );
        assert_eq!(
            ExtractorError::from(FetchError::Timeout(Duration::from_secs(1))).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            ExtractorError::from(FetchError::Gateway(GatewayError::Timeout)).kind(),
            ErrorKind::ProxyFailure
        );
        assert_eq!(
            ExtractorError::from(DecodeError::NoMatch("x".into())).kind(),
            ErrorKind::DecodeSchemeChanged
        );
        assert_eq!(
            ExtractorError::SchemeChanged("no manifest".into()).kind(),
            ErrorKind::DecodeSchemeChanged
        );
    }

    #[test]
    fn failure_serializes_kind_by_name() {
        let failure = ProviderFailure::new(
            "alpha",
            ErrorKind::DecodeSchemeChanged,
            "decode[1]",
            "bad alphabet",
        );
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "DecodeSchemeChanged");
        assert_eq!(json["stage"], "decode[1]");
    }
}
