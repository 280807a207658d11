use std::time::Duration;

use thiserror::Error;

use crate::gateway::GatewayError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream client error: {status}")]
    Upstream4xx { status: u16 },
    #[error("upstream server error: {status}")]
    Upstream5xx { status: u16 },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("blocked by upstream protection (status {status}) and no gateway configured")]
    Blocked { status: u16 },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("upstream body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl FetchError {
    /// Strips the URL, which may carry tokens or the gateway key.
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout(timeout);
        }
        if err.is_builder() {
            return FetchError::InvalidRequest(err.without_url().to_string());
        }
        FetchError::Network(err.without_url().to_string())
    }

    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            400..=499 => Some(FetchError::Upstream4xx { status }),
            500..=599 => Some(FetchError::Upstream5xx { status }),
            _ => None,
        }
    }

    /// Upstream status, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Upstream4xx { status }
            | FetchError::Upstream5xx { status }
            | FetchError::Blocked { status } => Some(*status),
            FetchError::Gateway(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Gateway(GatewayError::Timeout)
        )
    }
}
