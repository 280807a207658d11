use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::profile::SourceMapping;
use crate::decode::Pattern;
use crate::extractor::error::ExtractorError;
use crate::extractor::provider_adapter::Extraction;
use crate::hls::is_playlist;
use crate::media::{AUTO_QUALITY, StreamSource, SubtitleTrack};

static MANIFEST_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'<>\\]+?\.(?:m3u8|mp4)(?:\?[^\s"'<>\\]*)?"#).unwrap()
});

fn unescape(text: &str) -> String {
    text.replace("\\/", "/").replace("\\u0026", "&")
}

/// Absolute http(s) manifest urls in `text`, in order of appearance,
/// without duplicates.
pub fn manifest_urls(text: &str) -> Vec<String> {
    let text = unescape(text);
    let mut urls: Vec<String> = Vec::new();
    for m in MANIFEST_URL_REGEX.find_iter(&text) {
        let url = m.as_str().to_string();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

fn is_http_url(text: &str) -> bool {
    url::Url::parse(text).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// Whether the url's path names a manifest or progressive file.
fn has_manifest_extension(url: &str) -> bool {
    url::Url::parse(url).is_ok_and(|u| {
        let path = u.path().to_ascii_lowercase();
        path.ends_with(".m3u8") || path.ends_with(".mp4")
    })
}

fn string_at<'a>(item: &'a Value, pointer: Option<&str>) -> Option<&'a str> {
    pointer
        .and_then(|p| item.pointer(p))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn first_string<'a>(item: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|f| item.get(*f).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn items<'a>(document: &'a Value, pointer: &str) -> Vec<&'a Value> {
    let node = if pointer.is_empty() {
        Some(document)
    } else {
        document.pointer(pointer)
    };
    match node {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => vec![],
    }
}

fn mapped_sources(payload: &str, mapping: &SourceMapping) -> Result<Extraction, ExtractorError> {
    let document: Value = serde_json::from_str(payload.trim())
        .map_err(|e| ExtractorError::SchemeChanged(format!("decoded output is not json: {e}")))?;

    let sources: Vec<StreamSource> = items(&document, &mapping.list)
        .into_iter()
        .filter_map(|item| {
            let url = string_at(item, Some(mapping.url.as_str()))
                .filter(|u| is_http_url(u))
                .filter(|u| mapping.format.is_some() || has_manifest_extension(u))?;
            let mut source = StreamSource::new(url);
            if let Some(format) = mapping.format {
                source.stream_format = format;
            }
            if let Some(quality) = string_at(item, mapping.quality.as_deref()) {
                source.quality = quality.to_string();
            }
            if let Some(label) = string_at(item, mapping.label.as_deref()) {
                source.label = label.to_string();
            }
            if let Some(language) = string_at(item, mapping.language.as_deref()) {
                source.language = language.to_string();
            }
            Some(source)
        })
        .collect();

    let subtitles: Vec<SubtitleTrack> = mapping
        .subtitles
        .as_deref()
        .map(|pointer| {
            items(&document, pointer)
                .into_iter()
                .filter_map(|item| {
                    let url = first_string(item, &["file", "url", "src"]).filter(|u| is_http_url(u))?;
                    Some(SubtitleTrack {
                        label: first_string(item, &["label", "name"]).unwrap_or_default().to_string(),
                        language: first_string(item, &["lang", "language", "srclang"])
                            .unwrap_or_default()
                            .to_string(),
                        url: url.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Extraction { sources, subtitles })
}

/// The VALIDATE step. Decoded output passes when it is (or contains) a
/// manifest url, maps to at least one source through `mapping`, or is a
/// playlist body served from `page_url`. Anything else means the provider's
/// scheme no longer matches its profile.
pub fn validate_output(
    output: &[u8],
    mapping: Option<&SourceMapping>,
    page_url: &str,
) -> Result<Extraction, ExtractorError> {
    if is_playlist(output) {
        return Ok(Extraction {
            sources: vec![StreamSource::new(page_url)],
            subtitles: vec![],
        });
    }

    let text = String::from_utf8_lossy(output);
    let extraction = match mapping {
        Some(mapping) => mapped_sources(&text, mapping)?,
        None => Extraction {
            sources: manifest_urls(&text).into_iter().map(StreamSource::new).collect(),
            subtitles: vec![],
        },
    };

    if extraction.sources.is_empty() {
        let preview: String = text.chars().take(80).collect();
        return Err(ExtractorError::SchemeChanged(format!(
            "no manifest url in decoded output ({preview:?})"
        )));
    }
    Ok(extraction)
}

/// Subtitle tracks matched by a profile pattern with `url`, `label` and
/// `lang` named groups.
pub fn pattern_subtitles(pattern: &Pattern, text: &str) -> Vec<SubtitleTrack> {
    let text = unescape(text);
    let mut tracks: Vec<SubtitleTrack> = Vec::new();
    for caps in pattern.captures_iter(&text) {
        let Some(url) = caps.name("url").map(|m| m.as_str()).filter(|u| is_http_url(u)) else {
            continue;
        };
        if tracks.iter().any(|t| t.url == url) {
            continue;
        }
        tracks.push(SubtitleTrack {
            label: caps.name("label").map(|m| m.as_str().to_string()).unwrap_or_default(),
            language: caps.name("lang").map(|m| m.as_str().to_string()).unwrap_or_default(),
            url: url.to_string(),
        });
    }
    tracks
}

/// Fills in defaults a provider left empty.
pub fn finish_sources(sources: &mut [StreamSource], referer: &str) {
    for source in sources {
        if source.quality.trim().is_empty() {
            source.quality = AUTO_QUALITY.to_string();
        }
        if source.referer.is_empty() {
            source.referer = referer.to_string();
        }
    }
}
