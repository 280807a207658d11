//! Turns raw adapter output into the canonical, ordered source list.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::extractor::provider_adapter::Extraction;
use crate::gateway::BlockList;
use crate::media::{AUTO_QUALITY, StreamSource, SubtitleTrack};

static FOREIGN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(hindi|tamil|telugu|malayalam|kannada|bengali|urdu|spanish|español|espanol|latino|castellano|french|français|francais|vostfr|vf|german|deutsch|italian|italiano|portuguese|português|dublado|russian|arabic|turkish|korean|japanese|chinese|mandarin|thai|vietnamese|indonesian|polish|dutch|dubbed|dub)\b",
    )
    .unwrap()
});

static QUALITY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(4k|uhd|2160p|1440p|1080p|fhd|full\s?hd|hd|720p|bluray|blu-ray|web-?dl|hdr)\b")
        .unwrap()
});

/// Ordering bucket for a source. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LanguageClass {
    EnglishQuality,
    English,
    Foreign,
}

impl LanguageClass {
    /// Classifies from the source's free text and language tag. A non-English
    /// language tag always wins over the text.
    pub fn of(source: &StreamSource) -> Self {
        let language = source.language.trim().to_ascii_lowercase();
        if !language.is_empty() && !language.starts_with("en") {
            return LanguageClass::Foreign;
        }
        let text = format!("{} {} {}", source.label, source.url, source.quality);
        if FOREIGN_REGEX.is_match(&text) {
            LanguageClass::Foreign
        } else if QUALITY_REGEX.is_match(&text) {
            LanguageClass::EnglishQuality
        } else {
            LanguageClass::English
        }
    }
}

fn merge_text(into: &mut String, from: String) {
    if into.trim().is_empty() && !from.trim().is_empty() {
        *into = from;
    }
}

/// Merges duplicate `source` into `into`, which came first.
fn merge(into: &mut StreamSource, source: StreamSource) {
    if into.quality == AUTO_QUALITY && !source.quality.trim().is_empty() {
        into.quality = source.quality;
    }
    merge_text(&mut into.language, source.language);
    merge_text(&mut into.referer, source.referer);
    merge_text(&mut into.label, source.label);
    into.requires_segment_proxy |= source.requires_segment_proxy;
    into.requires_key_proxy |= source.requires_key_proxy;
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    blocklist: Arc<BlockList>,
}

impl Normalizer {
    pub fn new(blocklist: Arc<BlockList>) -> Self {
        Self { blocklist }
    }

    /// Dedups sources by url, fills defaults, sets proxy flags and sorts
    /// by [`LanguageClass`]. The sort is stable, so provider order survives
    /// within a class. The format is left as the adapter set it.
    pub fn sources(&self, sources: Vec<StreamSource>) -> Vec<StreamSource> {
        let mut out: Vec<StreamSource> = Vec::with_capacity(sources.len());
        let mut seen: FxHashMap<String, usize> = FxHashMap::default();

        for mut source in sources {
            source.url = source.url.trim().to_string();
            if source.url.is_empty() {
                continue;
            }
            match seen.get(&source.url) {
                Some(&index) => merge(&mut out[index], source),
                None => {
                    seen.insert(source.url.clone(), out.len());
                    out.push(source);
                }
            }
        }

        for source in &mut out {
            if source.quality.trim().is_empty() {
                source.quality = AUTO_QUALITY.to_string();
            }
            source.requires_segment_proxy |= self.blocklist.matches_url(&source.url);
            source.requires_key_proxy |= self.blocklist.requires_key_proxy(&source.url);
        }

        out.sort_by_key(LanguageClass::of);
        trace!(count = out.len(), "normalized sources");
        out
    }

    /// Drops subtitle tracks without a url and duplicates by url.
    pub fn subtitles(&self, subtitles: Vec<SubtitleTrack>) -> Vec<SubtitleTrack> {
        let mut out: Vec<SubtitleTrack> = Vec::with_capacity(subtitles.len());
        for track in subtitles {
            if track.url.trim().is_empty() || out.iter().any(|t| t.url == track.url) {
                continue;
            }
            out.push(track);
        }
        out
    }

    pub fn normalize(&self, extraction: Extraction) -> Extraction {
        Extraction {
            sources: self.sources(extraction.sources),
            subtitles: self.subtitles(extraction.subtitles),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StreamFormat;

    #[test]
    fn orders_by_language_class() {
        let normalizer = Normalizer::default();
        let sources = vec![
            StreamSource::new("https://cdn.example/hindi/a.m3u8").with_label("Hindi Dub"),
            StreamSource::new("https://cdn.example/b.m3u8").with_label("English 1080p"),
            StreamSource::new("https://cdn.example/c.m3u8").with_label("English"),
        ];
        let urls: Vec<String> = normalizer
            .sources(sources)
            .into_iter()
            .map(|s| s.url)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/b.m3u8",
                "https://cdn.example/c.m3u8",
                "https://cdn.example/hindi/a.m3u8",
            ]
        );
    }

    #[test]
    fn equal_classes_keep_provider_order() {
        let normalizer = Normalizer::default();
        let sources = vec![
            StreamSource::new("https://cdn.example/other-a.m3u8").with_label("Latino"),
            StreamSource::new("https://cdn.example/en-a.m3u8").with_label("English"),
            StreamSource::new("https://cdn.example/other-b.m3u8").with_label("Latino"),
            StreamSource::new("https://cdn.example/en-b.m3u8").with_label("English"),
            StreamSource::new("https://cdn.example/other-c.m3u8").with_language("fr"),
            StreamSource::new("https://cdn.example/en-c.m3u8"),
        ];
        let urls: Vec<String> = normalizer
            .sources(sources)
            .into_iter()
            .map(|s| s.url)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/en-a.m3u8",
                "https://cdn.example/en-b.m3u8",
                "https://cdn.example/en-c.m3u8",
                "https://cdn.example/other-a.m3u8",
                "https://cdn.example/other-b.m3u8",
                "https://cdn.example/other-c.m3u8",
            ]
        );
    }

    #[test]
    fn adapter_format_is_kept() {
        let mut source = StreamSource::new("https://cdn.example/play?id=7");
        source.stream_format = StreamFormat::Mp4;
        let out = Normalizer::default().sources(vec![source]);
        assert_eq!(out[0].stream_format, StreamFormat::Mp4);
    }

    #[test]
    fn dedup_merges_fields_and_flags() {
        let normalizer = Normalizer::default();
        let mut first = StreamSource::new("https://cdn.example/a.m3u8");
        first.requires_key_proxy = true;
        let second = StreamSource::new("https://cdn.example/a.m3u8")
            .with_quality("720p")
            .with_referer("https://embed.example/");
        let out = normalizer.sources(vec![first, second, StreamSource::new("")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].quality, "720p");
        assert_eq!(out[0].referer, "https://embed.example/");
        assert!(out[0].requires_key_proxy);
    }

    #[test]
    fn blocklisted_hosts_need_proxy() {
        let normalizer = Normalizer::new(Arc::new(BlockList::new(vec!["blocked.example".into()])));
        let out = normalizer.sources(vec![
            StreamSource::new("https://edge.blocked.example/v.mp4"),
            StreamSource::new("https://open.example/v.m3u8"),
        ]);
        assert!(out[0].requires_segment_proxy);
        assert!(out[0].requires_key_proxy);
        assert_eq!(out[0].stream_format, StreamFormat::Mp4);
        assert!(!out[1].requires_segment_proxy);
    }

    #[test]
    fn language_tag_overrides_text() {
        let source = StreamSource::new("https://cdn.example/1080p.m3u8").with_language("es");
        assert_eq!(LanguageClass::of(&source), LanguageClass::Foreign);
    }
}
