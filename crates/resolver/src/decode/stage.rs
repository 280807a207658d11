use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{
    aes_cbc::{self, Padding},
    alphabet::{SubstitutionAlphabet, decode_base64},
    error::DecodeError,
    keystream::{self, Fingerprint, HashAlgorithm, KeystreamCache},
    pattern::Pattern,
    unpacker,
};

fn default_rounds() -> usize {
    1
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyEncoding {
    #[default]
    Hex,
    Base64,
    Raw,
}

impl KeyEncoding {
    fn decode(&self, value: &str) -> Result<Vec<u8>, DecodeError> {
        match self {
            KeyEncoding::Hex => {
                hex::decode(value.trim()).map_err(|e| DecodeError::Hex(e.to_string()))
            }
            KeyEncoding::Base64 => decode_base64(value, false),
            KeyEncoding::Raw => Ok(value.as_bytes().to_vec()),
        }
    }
}

/// One reversible transform in a provider's decode chain. The output of a
/// stage is the input of the next one.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodeStage {
    /// Keeps the `payload` group (or group 1) of the first match. Other named
    /// groups are stored as variables.
    Extract { pattern: Pattern },
    Reverse,
    Base64 {
        #[serde(default)]
        url_safe: bool,
    },
    AlphabetBase64 { alphabet: String },
    Hex,
    UrlDecode,
    XorKeystream {
        fields: Vec<String>,
        #[serde(default)]
        timestamp_var: Option<String>,
        #[serde(default = "default_rounds")]
        rounds: usize,
        #[serde(default)]
        hash: HashAlgorithm,
    },
    Unpack,
    AesCbc {
        #[serde(default)]
        key_var: Option<String>,
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        key_encoding: KeyEncoding,
        #[serde(default)]
        iv: Option<String>,
        #[serde(default)]
        padding: Padding,
    },
    JsonField { pointer: String },
    /// Saves the current payload as a variable and passes it through.
    Store { var: String },
    /// Replaces the payload with a stored variable.
    Load { var: String },
}

impl DecodeStage {
    pub fn name(&self) -> &'static str {
        match self {
            DecodeStage::Extract { .. } => "extract",
            DecodeStage::Reverse => "reverse",
            DecodeStage::Base64 { .. } => "base64",
            DecodeStage::AlphabetBase64 { .. } => "alphabet_base64",
            DecodeStage::Hex => "hex",
            DecodeStage::UrlDecode => "url_decode",
            DecodeStage::XorKeystream { .. } => "xor_keystream",
            DecodeStage::Unpack => "unpack",
            DecodeStage::AesCbc { .. } => "aes_cbc",
            DecodeStage::JsonField { .. } => "json_field",
            DecodeStage::Store { .. } => "store",
            DecodeStage::Load { .. } => "load",
        }
    }

    /// Checks parameters that can be checked without input, so broken
    /// profiles are rejected at load time.
    pub fn check(&self) -> Result<(), DecodeError> {
        match self {
            DecodeStage::AlphabetBase64 { alphabet } => {
                SubstitutionAlphabet::new(alphabet).map(|_| ())
            }
            DecodeStage::XorKeystream { rounds: 0, .. } => Err(DecodeError::EmptyKeystream),
            DecodeStage::AesCbc { key_var: None, key: None, .. } => Err(
                DecodeError::MissingVariable("aes_cbc needs key or key_var".to_string()),
            ),
            _ => Ok(()),
        }
    }

    pub fn apply(&self, input: Vec<u8>, ctx: &mut DecodeContext) -> Result<Vec<u8>, DecodeError> {
        match self {
            DecodeStage::Extract { pattern } => {
                let text = as_text(&input)?;
                let (payload, named) = pattern
                    .capture(text)
                    .ok_or_else(|| DecodeError::NoMatch(pattern.as_str().to_string()))?;
                let payload = payload.as_bytes().to_vec();
                ctx.vars.extend(named);
                Ok(payload)
            }
            DecodeStage::Reverse => match String::from_utf8(input) {
                Ok(text) => Ok(text.chars().rev().collect::<String>().into_bytes()),
                Err(err) => {
                    let mut bytes = err.into_bytes();
                    bytes.reverse();
                    Ok(bytes)
                }
            },
            DecodeStage::Base64 { url_safe } => decode_base64(as_text(&input)?, *url_safe),
            DecodeStage::AlphabetBase64 { alphabet } => {
                SubstitutionAlphabet::new(alphabet)?.decode(as_text(&input)?.trim())
            }
            DecodeStage::Hex => {
                hex::decode(as_text(&input)?.trim()).map_err(|e| DecodeError::Hex(e.to_string()))
            }
            DecodeStage::UrlDecode => urlencoding::decode(as_text(&input)?)
                .map(|text| text.into_owned().into_bytes())
                .map_err(|_| DecodeError::Utf8),
            DecodeStage::XorKeystream {
                fields,
                timestamp_var,
                rounds,
                hash,
            } => {
                let timestamp = match timestamp_var {
                    Some(var) => ctx.var(var)?.to_string(),
                    None => SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs()
                        .to_string(),
                };
                let fingerprint = ctx.render_fields(fields)?;
                let keystream =
                    ctx.keystreams
                        .get_or_derive(&timestamp, &fingerprint, *rounds, *hash);
                keystream::xor(&input, &keystream)
            }
            DecodeStage::Unpack => {
                unpacker::unpack_script(as_text(&input)?).map(String::into_bytes)
            }
            DecodeStage::AesCbc {
                key_var,
                key,
                key_encoding,
                iv,
                padding,
            } => {
                let key_text = match (key_var, key) {
                    (Some(var), _) => ctx.var(var)?.to_string(),
                    (None, Some(key)) => key.clone(),
                    (None, None) => {
                        return Err(DecodeError::MissingVariable("aes key".to_string()));
                    }
                };
                let key_bytes = key_encoding.decode(&key_text)?;
                let iv_bytes = match iv {
                    Some(iv) => aes_cbc::parse_iv(iv)?,
                    None => [0u8; aes_cbc::AES_BLOCK_LEN],
                };
                aes_cbc::decrypt_cbc(&input, &key_bytes, &iv_bytes, *padding)
            }
            DecodeStage::JsonField { pointer } => {
                let value: serde_json::Value = serde_json::from_slice(&input)?;
                let field = value
                    .pointer(pointer)
                    .ok_or_else(|| DecodeError::NoMatch(format!("json pointer {pointer}")))?;
                Ok(match field {
                    serde_json::Value::String(s) => s.clone().into_bytes(),
                    other => other.to_string().into_bytes(),
                })
            }
            DecodeStage::Store { var } => {
                ctx.vars
                    .insert(var.clone(), String::from_utf8_lossy(&input).into_owned());
                Ok(input)
            }
            DecodeStage::Load { var } => Ok(ctx.var(var)?.as_bytes().to_vec()),
        }
    }
}

fn as_text(input: &[u8]) -> Result<&str, DecodeError> {
    std::str::from_utf8(input).map_err(|_| DecodeError::Utf8)
}

/// State shared by the stages of one adapter run: variables captured by
/// hops and earlier stages, the client fingerprint, and the keystream cache.
#[derive(Debug, Clone)]
pub struct DecodeContext {
    pub vars: FxHashMap<String, String>,
    pub fingerprint: Arc<Fingerprint>,
    pub keystreams: KeystreamCache,
}

impl DecodeContext {
    pub fn new(fingerprint: Arc<Fingerprint>, keystreams: KeystreamCache) -> Self {
        Self {
            vars: FxHashMap::default(),
            fingerprint,
            keystreams,
        }
    }

    pub fn var(&self, name: &str) -> Result<&str, DecodeError> {
        self.vars
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| DecodeError::MissingVariable(name.to_string()))
    }

    /// Fingerprint fields first, then captured variables, joined with `|`.
    fn render_fields(&self, fields: &[String]) -> Result<String, DecodeError> {
        fields
            .iter()
            .map(|field| match self.fingerprint.get(field) {
                Some(value) => Ok(value.to_string()),
                None => self.var(field).map(str::to_string).map_err(|_| {
                    DecodeError::MissingVariable(format!("fingerprint.{field}"))
                }),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|values| values.join("|"))
    }
}

/// A failed chain reports the index of the stage that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainFailure {
    pub index: usize,
    pub stage: &'static str,
    pub error: DecodeError,
}

/// Runs the stages in order, each on the previous stage's output.
pub fn run_chain(
    stages: &[DecodeStage],
    input: Vec<u8>,
    ctx: &mut DecodeContext,
) -> Result<Vec<u8>, ChainFailure> {
    stages
        .iter()
        .enumerate()
        .try_fold(input, |payload, (index, stage)| {
            trace!(index, stage = stage.name(), len = payload.len(), "applying decode stage");
            stage.apply(payload, ctx).map_err(|error| ChainFailure {
                index,
                stage: stage.name(),
                error,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::alphabet::STANDARD_ALPHABET;
    use base64::Engine as _;

    fn ctx() -> DecodeContext {
        DecodeContext::new(
            Arc::new(Fingerprint::browser("UA/1.0")),
            KeystreamCache::default(),
        )
    }

    fn stages(toml_like_json: serde_json::Value) -> Vec<DecodeStage> {
        serde_json::from_value(toml_like_json).unwrap()
    }

    #[test]
    fn extract_reverse_base64_chain() {
        let url = "https://cdn.example/list.m3u8";
        let encoded: String = base64::engine::general_purpose::STANDARD
            .encode(url)
            .chars()
            .rev()
            .collect();
        let page = format!("<script>var ts=1700000000; player.load(\"{encoded}\")</script>");

        let chain = stages(serde_json::json!([
            {"kind": "extract", "pattern": r#"ts=(?P<ts>\d+);.*?load\("(?P<payload>[^"]+)"\)"#},
            {"kind": "reverse"},
            {"kind": "base64"},
        ]));
        let mut ctx = ctx();
        let out = run_chain(&chain, page.into_bytes(), &mut ctx).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), url);
        assert_eq!(ctx.var("ts").unwrap(), "1700000000");
    }

    #[test]
    fn xor_stage_uses_captured_timestamp() {
        let mut ctx = ctx();
        ctx.vars.insert("ts".into(), "1700000000".into());
        let fingerprint = "UA/1.0|en-US";
        let keystream =
            keystream::derive_keystream("1700000000", fingerprint, 2, HashAlgorithm::Sha256);
        let ciphertext = keystream::xor(b"https://cdn.example/list.m3u8", &keystream).unwrap();
        let hexed = hex::encode(ciphertext);

        let chain = stages(serde_json::json!([
            {"kind": "hex"},
            {"kind": "xor_keystream", "fields": ["userAgent", "language"], "timestamp_var": "ts", "rounds": 2},
        ]));
        let out = run_chain(&chain, hexed.into_bytes(), &mut ctx).unwrap();
        assert_eq!(out, b"https://cdn.example/list.m3u8");
        assert!(ctx.keystreams.contains("1700000000", fingerprint, 2, HashAlgorithm::Sha256));
    }

    #[test]
    fn aes_stage_reads_key_from_variable() {
        let key = [0x11u8; 16];
        let ciphertext = aes_cbc::encrypt_cbc_pkcs7(b"{\"file\":\"https://cdn.example/a.m3u8\"}", &key, &[0u8; 16]);
        let mut ctx = ctx();
        ctx.vars.insert("key".into(), hex::encode(key));

        let chain = stages(serde_json::json!([
            {"kind": "base64"},
            {"kind": "aes_cbc", "key_var": "key"},
            {"kind": "json_field", "pointer": "/file"},
        ]));
        let input = base64::engine::general_purpose::STANDARD.encode(ciphertext);
        let out = run_chain(&chain, input.into_bytes(), &mut ctx).unwrap();
        assert_eq!(out, b"https://cdn.example/a.m3u8");
    }

    #[test]
    fn fields_render_in_requested_order() {
        let mut ctx = ctx();
        ctx.vars.insert("ts".to_string(), "1700000000".to_string());
        let fields = ["language", "ts", "userAgent"].map(str::to_string);
        assert_eq!(ctx.render_fields(&fields).unwrap(), "en-US|1700000000|UA/1.0");
        assert!(matches!(
            ctx.render_fields(&["gpu".to_string()]),
            Err(DecodeError::MissingVariable(name)) if name == "fingerprint.gpu"
        ));
    }

    #[test]
    fn failure_reports_stage_index() {
        let chain = stages(serde_json::json!([
            {"kind": "reverse"},
            {"kind": "alphabet_base64", "alphabet": STANDARD_ALPHABET},
            {"kind": "json_field", "pointer": "/file"},
        ]));
        let err = run_chain(&chain, b"%%not base64%%".to_vec(), &mut ctx()).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.stage, "alphabet_base64");
    }

    #[test]
    fn check_rejects_broken_parameters() {
        let bad = DecodeStage::AlphabetBase64 {
            alphabet: "short".into(),
        };
        assert!(bad.check().is_err());
        let no_key = DecodeStage::AesCbc {
            key_var: None,
            key: None,
            key_encoding: KeyEncoding::Hex,
            iv: None,
            padding: Padding::Pkcs7,
        };
        assert!(no_key.check().is_err());
        assert!(DecodeStage::Reverse.check().is_ok());
    }

    #[test]
    fn url_decode_stage() {
        let chain = stages(serde_json::json!([
            {"kind": "url_decode"},
            {"kind": "json_field", "pointer": "/file"},
        ]));
        let input = b"%7B%22file%22%3A%22https%3A%2F%2Fcdn.example%2Fa.m3u8%22%7D".to_vec();
        let out = run_chain(&chain, input, &mut ctx()).unwrap();
        assert_eq!(out, b"https://cdn.example/a.m3u8");
    }

    #[test]
    fn store_and_load_round_trip() {
        let chain = stages(serde_json::json!([
            {"kind": "store", "var": "raw"},
            {"kind": "reverse"},
            {"kind": "load", "var": "raw"},
        ]));
        let out = run_chain(&chain, b"abc".to_vec(), &mut ctx()).unwrap();
        assert_eq!(out, b"abc");
    }
}
