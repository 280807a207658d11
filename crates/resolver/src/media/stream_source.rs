use crate::media::StreamFormat;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const AUTO_QUALITY: &str = "auto";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamSource {
    // Manifest or progressive file url
    pub url: String,
    // Quality label, e.g. "1080p" or "auto" for adaptive manifests
    pub quality: String,
    #[serde(rename = "type")]
    pub stream_format: StreamFormat,
    pub language: String,
    // Referer the CDN expects on segment requests
    pub referer: String,
    pub requires_segment_proxy: bool,
    pub requires_key_proxy: bool,
    // Free text the provider attached (server name, title), used for classification
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

impl StreamSource {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            stream_format: StreamFormat::from_url(&url),
            url,
            quality: AUTO_QUALITY.to_string(),
            language: String::new(),
            referer: String::new(),
            requires_segment_proxy: false,
            requires_key_proxy: false,
            label: String::new(),
        }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = referer.into();
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Host of the source url, lowercased.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    }
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) - {}", self.stream_format, self.quality, self.url)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
    pub label: String,
    pub language: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_wire_names() {
        let source = StreamSource::new("https://cdn.example/list.m3u8");
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["type"], "hls");
        assert_eq!(json["quality"], "auto");
        assert_eq!(json["requiresSegmentProxy"], false);
        assert!(json.get("label").is_none());
    }
}
