use std::time::Duration;

use bytes::Bytes;
use moka::future::Cache;
use tracing::debug;

use super::{error::HlsError, playlist::SegmentKey};
use crate::decode::aes_cbc::{AES_128_KEY_LEN, Padding, decrypt_cbc};
use crate::fetch::{FetchClient, FetchRequest};
use crate::gateway::{GatewayRequest, GatewayScope};

/// Key responses larger than this are refused before they are buffered.
pub const KEY_BODY_LIMIT: u64 = 4096;

/// Accepts exactly one AES-128 key.
pub fn validate_key(data: &[u8]) -> Result<[u8; AES_128_KEY_LEN], HlsError> {
    data.try_into().map_err(|_| HlsError::InvalidKey {
        size: data.len(),
        expected: AES_128_KEY_LEN,
    })
}

/// Fetches HLS keys (directly or through the gateway) and decrypts segments.
#[derive(Clone)]
pub struct SegmentDecryptor {
    fetch: FetchClient,
    keys: Cache<String, [u8; AES_128_KEY_LEN]>,
}

impl SegmentDecryptor {
    pub fn new(fetch: FetchClient, key_ttl: Duration) -> Self {
        Self {
            fetch,
            keys: Cache::builder()
                .max_capacity(256)
                .time_to_live(key_ttl)
                .build(),
        }
    }

    async fn fetch_key_bytes(&self, uri: &str, referer: Option<&str>) -> Result<Bytes, HlsError> {
        if let Some(gateway) = self.fetch.gateway()
            && self.fetch.blocklist().requires_key_proxy(uri)
        {
            debug!("fetching key through gateway");
            let response = gateway
                .fetch(GatewayRequest::new(GatewayScope::Key, uri).with_referer(referer))
                .await?;
            return Ok(response.body);
        }
        let body = self
            .fetch
            .open(
                FetchRequest::get(uri)
                    .referer(referer)
                    .scope(GatewayScope::Key),
                KEY_BODY_LIMIT,
            )
            .await?
            .collect()
            .await?;
        Ok(body)
    }

    pub async fn fetch_key(
        &self,
        uri: &str,
        referer: Option<&str>,
    ) -> Result<[u8; AES_128_KEY_LEN], HlsError> {
        if let Some(key) = self.keys.get(uri).await {
            return Ok(key);
        }
        let body = self.fetch_key_bytes(uri, referer).await?;
        let key = validate_key(&body)?;
        self.keys.insert(uri.to_string(), key).await;
        Ok(key)
    }

    pub async fn decrypt_segment(
        &self,
        data: &[u8],
        key: &SegmentKey,
        sequence: u64,
        referer: Option<&str>,
    ) -> Result<Vec<u8>, HlsError> {
        let key_bytes = self.fetch_key(&key.uri, referer).await?;
        let iv = key.iv_for(sequence);
        Ok(decrypt_cbc(data, &key_bytes, &iv, Padding::Pkcs7)?)
    }
}

impl std::fmt::Debug for SegmentDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentDecryptor")
            .field("cached_keys", &self.keys.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::aes_cbc::{encrypt_cbc_pkcs7, sequence_iv};
    use crate::fetch::FetchConfig;
    use crate::gateway::{BlockList, ProxyCredential, ProxyGateway};
    use std::sync::Arc;
    use wiremock::matchers::{path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn decryptor(fetch: FetchClient) -> SegmentDecryptor {
        SegmentDecryptor::new(fetch, Duration::from_secs(60))
    }

    fn fetch_client() -> FetchClient {
        FetchClient::with_client(reqwest::Client::new(), FetchConfig::default())
    }

    #[test]
    fn key_must_be_sixteen_bytes() {
        assert!(validate_key(&[0u8; 16]).is_ok());
        assert_eq!(
            validate_key(&[0u8; 10]),
            Err(HlsError::InvalidKey {
                size: 10,
                expected: 16
            })
        );
    }

    #[tokio::test]
    async fn decrypts_with_sequence_iv_and_caches_key() {
        let server = MockServer::start().await;
        let key = [7u8; 16];
        Mock::given(path("/key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(key.to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let segment_key = SegmentKey {
            uri: format!("{}/key", server.uri()),
            iv: None,
        };
        let decryptor = decryptor(fetch_client());
        for sequence in [3u64, 4] {
            let plaintext = format!("segment {sequence}");
            let ciphertext = encrypt_cbc_pkcs7(plaintext.as_bytes(), &key, &sequence_iv(sequence));
            let out = decryptor
                .decrypt_segment(&ciphertext, &segment_key, sequence, None)
                .await
                .unwrap();
            assert_eq!(out, plaintext.as_bytes());
        }
    }

    #[tokio::test]
    async fn short_key_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(path("/key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 10]))
            .mount(&server)
            .await;

        let err = decryptor(fetch_client())
            .fetch_key(&format!("{}/key", server.uri()), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HlsError::InvalidKey {
                size: 10,
                expected: 16
            }
        );
    }

    #[tokio::test]
    async fn key_host_on_block_list_uses_gateway_key_scope() {
        let relay = MockServer::start().await;
        Mock::given(path("/key"))
            .and(query_param("url", "https://keys.example/k/1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 16]))
            .expect(1)
            .mount(&relay)
            .await;

        let gateway = ProxyGateway::new(
            Arc::new(ProxyCredential::new(relay.uri(), "k")),
            reqwest::Client::new(),
            Duration::from_secs(5),
        );
        let blocklist = BlockList {
            key_hosts: vec!["keys.example".into()],
            ..Default::default()
        };
        let fetch = fetch_client()
            .with_gateway(Some(gateway))
            .with_blocklist(Arc::new(blocklist));

        let key = decryptor(fetch)
            .fetch_key("https://keys.example/k/1", None)
            .await
            .unwrap();
        assert_eq!(key, [9u8; 16]);
    }
}
