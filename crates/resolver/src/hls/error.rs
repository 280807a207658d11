use thiserror::Error;

use crate::decode::DecodeError;
use crate::fetch::FetchError;
use crate::gateway::GatewayError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HlsError {
    #[error("playlist error: {0}")]
    Playlist(String),
    #[error("unsupported key method: {0}")]
    UnsupportedMethod(String),
    #[error("key uri is missing")]
    MissingKeyUri,
    #[error("invalid key data: {size} bytes (expected {expected})")]
    InvalidKey { size: usize, expected: usize },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
