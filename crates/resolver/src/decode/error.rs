use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid alphabet: {0}")]
    InvalidAlphabet(String),
    #[error("base64 decode failed: {0}")]
    Base64(String),
    #[error("hex decode failed: {0}")]
    Hex(String),
    #[error("invalid key size: {actual} bytes (expected {expected})")]
    KeySize { actual: usize, expected: usize },
    #[error("invalid iv size: {actual} bytes (expected {expected})")]
    IvSize { actual: usize, expected: usize },
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("keystream is empty")]
    EmptyKeystream,
    #[error("malformed packed script: {0}")]
    Unpack(String),
    #[error("pattern did not match: {0}")]
    NoMatch(String),
    #[error("missing variable: {0}")]
    MissingVariable(String),
    #[error("payload is not valid utf-8")]
    Utf8,
    #[error("json error: {0}")]
    Json(String),
    #[error("decrypt delegate failed: {0}")]
    Delegate(String),
    #[error("signature error: {0}")]
    Signature(String),
}

impl From<std::string::FromUtf8Error> for DecodeError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        DecodeError::Utf8
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err.to_string())
    }
}
