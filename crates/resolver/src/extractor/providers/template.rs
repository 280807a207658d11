use std::sync::LazyLock;

use regex::{Captures, Regex};
use rustc_hash::FxHashMap;
use url::Url;

use crate::decode::DecodeError;

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Substitutes `{name}` placeholders. Unknown names are an error.
pub fn render(template: &str, vars: &FxHashMap<String, String>) -> Result<String, DecodeError> {
    let mut missing: Option<String> = None;
    let rendered = PLACEHOLDER_REGEX.replace_all(template, |caps: &Captures| {
        match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(DecodeError::MissingVariable(name)),
        None => Ok(rendered.into_owned()),
    }
}

/// Resolves a possibly relative or protocol-relative link against the page
/// it was found on.
pub fn resolve_url(base: &str, link: &str) -> Result<String, DecodeError> {
    let link = link.trim();
    let base = Url::parse(base).map_err(|e| DecodeError::NoMatch(format!("base url: {e}")))?;
    let url = base
        .join(link)
        .map_err(|e| DecodeError::NoMatch(format!("link {link:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(DecodeError::NoMatch(format!("unsupported scheme {other}"))),
    }
}
