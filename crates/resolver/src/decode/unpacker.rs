//! Reverses the `eval(function(p,a,c,k,e,d){...})` token packing used by many
//! embed players.

use std::sync::LazyLock;

use regex::{Captures, Regex, RegexBuilder};

use super::error::DecodeError;

const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

static PACKED_ARGS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r"\}\s*\(\s*'(?P<payload>.*)',\s*(?P<base>\d+|\[\]),\s*(?P<count>\d+),\s*'(?P<dict>.*?)'\.split\('\|'\)",
    )
    .dot_matches_new_line(true)
    .build()
    .unwrap()
});

static WORD_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").unwrap());

static PACKED_HEADER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"eval\(function\(p,a,c,k,e,[rd]\)").unwrap());

/// Whether the source contains a packed script.
pub fn is_packed(source: &str) -> bool {
    let compact: String = source.chars().filter(|c| !c.is_whitespace()).collect();
    PACKED_HEADER_REGEX.is_match(&compact)
}

/// Renders `index` as a base-N numeral the way packed scripts name tokens:
/// `[0-9a-z]` up to base 36, then `[A-Z]` for digits 36..62.
pub fn token_for(mut index: usize, base: u32) -> String {
    let base = base as usize;
    if index == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while index > 0 {
        digits.push(DIGITS[index % base]);
        index /= base;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Inverse of [`token_for`]. Numerals with a leading zero or a digit outside
/// `base` are not tokens.
fn token_index(token: &str, base: u32) -> Option<usize> {
    if token.len() > 1 && token.starts_with('0') {
        return None;
    }
    token.bytes().try_fold(0usize, |acc, b| {
        let digit = DIGITS[..base as usize].iter().position(|&d| d == b)?;
        acc.checked_mul(base as usize)?.checked_add(digit)
    })
}

/// Replaces every token in `packed` with its dictionary word.
///
/// Each word of the payload is looked up once, so `1` never matches inside
/// `10` and substituted words are not rewritten again. Empty dictionary
/// words leave the token as-is.
pub fn unpack(
    packed: &str,
    base: u32,
    count: usize,
    dictionary: &[&str],
) -> Result<String, DecodeError> {
    if !(2..=62).contains(&base) {
        return Err(DecodeError::Unpack(format!("unsupported base {base}")));
    }
    if dictionary.len() < count {
        return Err(DecodeError::Unpack(format!(
            "dictionary has {} words, expected {count}",
            dictionary.len()
        )));
    }

    let unpacked = WORD_REGEX.replace_all(packed, |caps: &Captures| {
        let token = &caps[0];
        token_index(token, base)
            .filter(|&index| index < count)
            .map(|index| dictionary[index])
            .filter(|word| !word.is_empty())
            .unwrap_or(token)
            .to_string()
    });
    Ok(unpacked.into_owned())
}

/// Finds the packer call in a script, unescapes its payload and unpacks it.
pub fn unpack_script(source: &str) -> Result<String, DecodeError> {
    let caps = PACKED_ARGS_REGEX
        .captures(source)
        .ok_or_else(|| DecodeError::Unpack("packer arguments not found".to_string()))?;

    let payload = caps["payload"].replace("\\\\", "\\").replace("\\'", "'");
    let base = match &caps["base"] {
        "[]" => 62,
        raw => raw
            .parse::<u32>()
            .map_err(|e| DecodeError::Unpack(format!("invalid base: {e}")))?,
    };
    let count = caps["count"]
        .parse::<usize>()
        .map_err(|e| DecodeError::Unpack(format!("invalid count: {e}")))?;
    let dictionary: Vec<&str> = caps["dict"].split('|').collect();

    unpack(&payload, base, count, &dictionary)
}
