use std::sync::Arc;
use std::time::Duration;

use md5::Md5;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::error::DecodeError;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Md5,
}

impl HashAlgorithm {
    fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                parts.iter().for_each(|p| hasher.update(p));
                hasher.finalize().to_vec()
            }
            HashAlgorithm::Md5 => {
                let mut hasher = Md5::new();
                parts.iter().for_each(|p| hasher.update(p));
                hasher.finalize().to_vec()
            }
        }
    }
}

/// Environment attributes some providers mix into their key derivation.
///
/// Field order is preserved; providers concatenate values in the order their
/// player script reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    fields: Vec<(String, String)>,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// A desktop browser profile matching the default fetch headers.
    pub fn browser(user_agent: &str) -> Self {
        Self::new()
            .with("userAgent", user_agent)
            .with("language", "en-US")
            .with("platform", "Win32")
            .with("screen", "1920x1080")
            .with("colorDepth", "24")
            .with("timezone", "UTC")
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Derives a keystream by hash chaining.
///
/// `seed = "{timestamp}:{fingerprint}"`, `block_0 = H(seed)`,
/// `block_i = H(block_{i-1} || seed)`; the keystream is the concatenation of
/// `rounds` blocks.
pub fn derive_keystream(
    timestamp: &str,
    fingerprint: &str,
    rounds: usize,
    hash: HashAlgorithm,
) -> Vec<u8> {
    let seed = format!("{timestamp}:{fingerprint}");
    let mut keystream = Vec::new();
    let mut block: Vec<u8> = Vec::new();
    for round in 0..rounds {
        block = if round == 0 {
            hash.digest(&[seed.as_bytes()])
        } else {
            hash.digest(&[block.as_slice(), seed.as_bytes()])
        };
        keystream.extend_from_slice(&block);
    }
    keystream
}

/// XORs `data` with the keystream, wrapping the keystream when it is shorter.
pub fn xor(data: &[u8], keystream: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if keystream.is_empty() {
        return Err(DecodeError::EmptyKeystream);
    }
    Ok(data
        .iter()
        .zip(keystream.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeystreamKey {
    timestamp: String,
    fingerprint: String,
    rounds: usize,
    hash: HashAlgorithm,
}

/// Keystreams are derived once per `(timestamp, fingerprint)` and reused.
#[derive(Clone)]
pub struct KeystreamCache {
    cache: Cache<KeystreamKey, Arc<Vec<u8>>>,
}

impl KeystreamCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get_or_derive(
        &self,
        timestamp: &str,
        fingerprint: &str,
        rounds: usize,
        hash: HashAlgorithm,
    ) -> Arc<Vec<u8>> {
        let key = KeystreamKey {
            timestamp: timestamp.to_string(),
            fingerprint: fingerprint.to_string(),
            rounds,
            hash,
        };
        self.cache.get_with(key, || {
            debug!(timestamp, rounds, ?hash, "deriving keystream");
            Arc::new(derive_keystream(timestamp, fingerprint, rounds, hash))
        })
    }

    pub fn contains(
        &self,
        timestamp: &str,
        fingerprint: &str,
        rounds: usize,
        hash: HashAlgorithm,
    ) -> bool {
        self.cache.contains_key(&KeystreamKey {
            timestamp: timestamp.to_string(),
            fingerprint: fingerprint.to_string(),
            rounds,
            hash,
        })
    }
}

impl Default for KeystreamCache {
    fn default() -> Self {
        Self::new(1024, Duration::from_secs(600))
    }
}

impl std::fmt::Debug for KeystreamCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystreamCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_round_trips_shorter_and_longer_than_keystream() {
        let keystream = derive_keystream("1700000000", "ua|en-US", 1, HashAlgorithm::Sha256);
        assert_eq!(keystream.len(), 32);

        let short = b"m3u8".to_vec();
        let long: Vec<u8> = b"https://cdn.example/hls/abcdef/master.m3u8?token=0123456789".to_vec();
        assert!(long.len() > keystream.len());

        for plaintext in [short, long, vec![]] {
            let ciphertext = xor(&plaintext, &keystream).unwrap();
            assert_eq!(ciphertext.len(), plaintext.len());
            assert_eq!(xor(&ciphertext, &keystream).unwrap(), plaintext);
        }
    }

    #[test]
    fn xor_wraps_keystream() {
        let out = xor(&[0, 0, 0, 0, 0], &[1, 2]).unwrap();
        assert_eq!(out, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn empty_keystream_is_an_error() {
        assert_eq!(xor(b"abc", &[]), Err(DecodeError::EmptyKeystream));
    }

    #[test]
    fn keystream_chains_blocks() {
        let one = derive_keystream("1", "fp", 1, HashAlgorithm::Md5);
        let three = derive_keystream("1", "fp", 3, HashAlgorithm::Md5);
        assert_eq!(one.len(), 16);
        assert_eq!(three.len(), 48);
        assert_eq!(&three[..16], one.as_slice());
        assert_ne!(&three[16..32], &three[..16]);
        assert_ne!(
            derive_keystream("2", "fp", 1, HashAlgorithm::Md5),
            one,
            "timestamp must change the keystream"
        );
    }

    #[test]
    fn cache_derives_once() {
        let cache = KeystreamCache::default();
        assert!(!cache.contains("1", "fp", 2, HashAlgorithm::Sha256));
        let first = cache.get_or_derive("1", "fp", 2, HashAlgorithm::Sha256);
        let second = cache.get_or_derive("1", "fp", 2, HashAlgorithm::Sha256);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.contains("1", "fp", 2, HashAlgorithm::Sha256));
    }
}
