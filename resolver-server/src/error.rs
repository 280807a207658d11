use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use embed_resolver::fetch::FetchError;
use embed_resolver::gateway::GatewayError;
use embed_resolver::hls::HlsError;
use serde_json::json;
use thiserror::Error;

/// Failures of the relay endpoints. Messages never carry the gateway key:
/// gateway errors are redacted before they get here and fetch errors have
/// their urls stripped.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Invalid key data")]
    InvalidKey { size: usize, expected: usize },

    #[error("upstream request timed out")]
    Timeout,

    #[error("{message}")]
    Upstream { status: Option<u16>, message: String },

    #[error("proxy gateway is not configured")]
    NotConfigured,

    #[error("upstream body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Timeout(_) => ApiError::Timeout,
            FetchError::InvalidRequest(message) => ApiError::InvalidRequest(message),
            FetchError::Gateway(err) => err.into(),
            FetchError::Upstream4xx { status }
            | FetchError::Upstream5xx { status }
            | FetchError::Blocked { status } => ApiError::Upstream {
                status: Some(status),
                message: err.to_string(),
            },
            FetchError::TooLarge { limit } => ApiError::TooLarge { limit },
            FetchError::Network(_) => ApiError::Upstream {
                status: None,
                message: err.to_string(),
            },
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotConfigured => ApiError::NotConfigured,
            GatewayError::Timeout => ApiError::Timeout,
            GatewayError::InvalidRequest(message) => ApiError::InvalidRequest(message),
            GatewayError::Rejected { status, .. } => ApiError::Upstream {
                status: Some(status),
                message: err.to_string(),
            },
            GatewayError::Unreachable(_) => ApiError::Upstream {
                status: None,
                message: err.to_string(),
            },
        }
    }
}

impl From<HlsError> for ApiError {
    fn from(err: HlsError) -> Self {
        match err {
            HlsError::InvalidKey { size, expected } => ApiError::InvalidKey { size, expected },
            HlsError::Fetch(err) => err.into(),
            HlsError::Gateway(err) => err.into(),
            other => ApiError::Upstream {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidKey { .. } | ApiError::Upstream { .. } | ApiError::TooLarge { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self, "relay request failed");
        }

        let body = match &self {
            ApiError::InvalidKey { size, expected } => json!({
                "error": self.to_string(),
                "size": size,
                "expected": expected,
            }),
            ApiError::Upstream {
                status: Some(upstream),
                ..
            } => json!({
                "error": self.to_string(),
                "status": upstream,
            }),
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_key_is_bad_gateway() {
        let err = ApiError::from(HlsError::InvalidKey {
            size: 10,
            expected: 16,
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "Invalid key data");
    }

    #[test]
    fn fetch_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from(FetchError::Upstream4xx { status: 404 }).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(FetchError::Timeout(std::time::Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(FetchError::Gateway(GatewayError::NotConfigured)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(FetchError::TooLarge { limit: 10 }).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
