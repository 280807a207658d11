use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("proxy gateway is not configured")]
    NotConfigured,
    #[error("invalid gateway request: {0}")]
    InvalidRequest(String),
    #[error("proxy gateway unreachable: {0}")]
    Unreachable(String),
    #[error("proxy gateway timed out")]
    Timeout,
    #[error("proxy gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl GatewayError {
    /// Status the gateway answered with, when it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}
