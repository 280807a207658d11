use base64::{
    Engine as _, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use rustc_hash::FxHashMap;

use super::error::DecodeError;

pub const STANDARD_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const LENIENT_CONFIG: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

/// Standard alphabet, padding optional on decode.
pub const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT_CONFIG);
/// Url-safe alphabet, padding optional on decode.
pub const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT_CONFIG);

/// Decodes standard or url-safe base64, ignoring ascii whitespace.
pub fn decode_base64(input: &str, url_safe: bool) -> Result<Vec<u8>, DecodeError> {
    let cleaned: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let engine = if url_safe {
        &LENIENT_URL_SAFE
    } else {
        &LENIENT_STANDARD
    };
    engine
        .decode(cleaned.as_bytes())
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// Base64 over a provider-specific permutation of the standard alphabet.
///
/// Characters are mapped by position onto the standard alphabet before a
/// regular decode. Characters outside the alphabet (padding, separators) are
/// passed through untouched.
#[derive(Debug, Clone)]
pub struct SubstitutionAlphabet {
    to_standard: FxHashMap<char, char>,
    from_standard: FxHashMap<char, char>,
}

impl SubstitutionAlphabet {
    pub fn new(custom: &str) -> Result<Self, DecodeError> {
        let custom_chars: Vec<char> = custom.chars().collect();
        if custom_chars.len() != 64 {
            return Err(DecodeError::InvalidAlphabet(format!(
                "expected 64 characters, got {}",
                custom_chars.len()
            )));
        }

        let mut to_standard = FxHashMap::default();
        let mut from_standard = FxHashMap::default();
        for (custom_char, standard_char) in custom_chars.iter().zip(STANDARD_ALPHABET.chars()) {
            if to_standard.insert(*custom_char, standard_char).is_some() {
                return Err(DecodeError::InvalidAlphabet(format!(
                    "duplicate character '{custom_char}'"
                )));
            }
            from_standard.insert(standard_char, *custom_char);
        }

        // A permutation must use exactly the standard characters, otherwise
        // pass-through characters would become ambiguous.
        if let Some(foreign) = custom_chars
            .iter()
            .find(|c| !STANDARD_ALPHABET.contains(**c))
        {
            return Err(DecodeError::InvalidAlphabet(format!(
                "'{foreign}' is not a base64 character"
            )));
        }

        Ok(Self {
            to_standard,
            from_standard,
        })
    }

    pub fn to_standard(&self, input: &str) -> String {
        input
            .chars()
            .map(|c| self.to_standard.get(&c).copied().unwrap_or(c))
            .collect()
    }

    pub fn decode(&self, input: &str) -> Result<Vec<u8>, DecodeError> {
        decode_base64(&self.to_standard(input), false)
    }

    pub fn encode(&self, data: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD
            .encode(data)
            .chars()
            .map(|c| self.from_standard.get(&c).copied().unwrap_or(c))
            .collect()
    }
}
