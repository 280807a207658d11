//! Call contract for providers that ship their own compiled decrypt routine.
//!
//! The routine itself is a black box: we only build the signed request
//! headers it expects and hand it `(ciphertext, api_key)`.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::error::DecodeError;

type HmacSha256 = Hmac<Sha256>;

/// Header names the provider API reads the signature from.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SignatureHeaderNames {
    pub api_key: String,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

impl Default for SignatureHeaderNames {
    fn default() -> Self {
        Self {
            api_key: "X-Api-Key".to_string(),
            timestamp: "X-Timestamp".to_string(),
            nonce: "X-Nonce".to_string(),
            signature: "X-Signature".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub api_key: String,
    pub timestamp: u64,
    pub nonce: String,
    /// Lowercase hex HMAC-SHA256 over `key:timestamp:nonce:path`.
    pub signature: String,
}

impl SignedHeaders {
    /// Signs `path` with the current time and a fresh nonce.
    pub fn sign(api_key: &str, secret: &str, path: &str) -> Result<Self, DecodeError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self::sign_at(api_key, secret, path, timestamp, nonce)
    }

    pub fn sign_at(
        api_key: &str,
        secret: &str,
        path: &str,
        timestamp: u64,
        nonce: String,
    ) -> Result<Self, DecodeError> {
        let payload = format!("{api_key}:{timestamp}:{nonce}:{path}");
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| DecodeError::Signature(e.to_string()))?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(Self {
            api_key: api_key.to_string(),
            timestamp,
            nonce,
            signature,
        })
    }

    pub fn to_header_map(&self, names: &SignatureHeaderNames) -> Result<HeaderMap, DecodeError> {
        let mut headers = HeaderMap::new();
        let timestamp = self.timestamp.to_string();
        for (name, value) in [
            (&names.api_key, self.api_key.as_str()),
            (&names.timestamp, timestamp.as_str()),
            (&names.nonce, self.nonce.as_str()),
            (&names.signature, self.signature.as_str()),
        ] {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| DecodeError::Signature(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| DecodeError::Signature(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// A decrypt routine we can call but do not implement.
#[async_trait]
pub trait OpaqueDecryptor: Send + Sync {
    async fn decrypt(&self, ciphertext: &[u8], api_key: &str) -> Result<Vec<u8>, DecodeError>;
}
