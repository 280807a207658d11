use m3u8_rs::{KeyMethod, MasterPlaylist, Playlist, VariantStream};
use url::Url;

use super::error::HlsError;
use crate::decode::aes_cbc::{self, AES_BLOCK_LEN};

/// The `#EXT-X-KEY` in force for a segment, with its URI made absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentKey {
    pub uri: String,
    pub iv: Option<[u8; AES_BLOCK_LEN]>,
}

impl SegmentKey {
    /// Explicit IV, or the media sequence number as a big-endian block.
    pub fn iv_for(&self, sequence: u64) -> [u8; AES_BLOCK_LEN] {
        self.iv.unwrap_or_else(|| aes_cbc::sequence_iv(sequence))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    pub uri: String,
    pub sequence: u64,
    pub key: Option<SegmentKey>,
}

fn resolve(base: &Url, uri: &str) -> Result<String, HlsError> {
    base.join(uri)
        .map(|u| u.to_string())
        .map_err(|e| HlsError::Playlist(format!("cannot join {uri}: {e}")))
}

fn segment_key(key: &m3u8_rs::Key, base: &Url) -> Result<Option<SegmentKey>, HlsError> {
    match &key.method {
        KeyMethod::None => Ok(None),
        KeyMethod::AES128 => {
            let uri = key.uri.as_deref().ok_or(HlsError::MissingKeyUri)?;
            let iv = key.iv.as_deref().map(aes_cbc::parse_iv).transpose()?;
            Ok(Some(SegmentKey {
                uri: resolve(base, uri)?,
                iv,
            }))
        }
        other => Err(HlsError::UnsupportedMethod(format!("{other:?}"))),
    }
}

/// Lists the segments of a media playlist with their sequence numbers and
/// the key in force for each. A key declaration applies to every following
/// segment until the next one.
pub fn media_segments(playlist: &[u8], playlist_url: &str) -> Result<Vec<SegmentEntry>, HlsError> {
    let base = Url::parse(playlist_url).map_err(|e| HlsError::Playlist(e.to_string()))?;
    let media = match m3u8_rs::parse_playlist_res(playlist) {
        Ok(Playlist::MediaPlaylist(media)) => media,
        Ok(Playlist::MasterPlaylist(_)) => {
            return Err(HlsError::Playlist("expected a media playlist".to_string()));
        }
        Err(e) => return Err(HlsError::Playlist(e.to_string())),
    };

    let mut current: Option<SegmentKey> = None;
    media
        .segments
        .iter()
        .enumerate()
        .map(|(index, segment)| -> Result<SegmentEntry, HlsError> {
            if let Some(key) = &segment.key {
                current = segment_key(key, &base)?;
            }
            Ok(SegmentEntry {
                uri: resolve(&base, &segment.uri)?,
                sequence: media.media_sequence + index as u64,
                key: current.clone(),
            })
        })
        .collect()
}

/// A rendition listed in a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub url: String,
    pub quality: String,
    pub bandwidth: u64,
}

fn variant_quality(variant: &VariantStream) -> String {
    match &variant.resolution {
        Some(resolution) => format!("{}p", resolution.height),
        None if variant.bandwidth > 0 => format!("{}kbps", variant.bandwidth / 1000),
        None => "auto".to_string(),
    }
}

fn master_variants(master: MasterPlaylist, base: &Url) -> Result<Vec<Variant>, HlsError> {
    let mut variants = master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .map(|v| -> Result<Variant, HlsError> {
            Ok(Variant {
                url: resolve(base, &v.uri)?,
                quality: variant_quality(v),
                bandwidth: v.bandwidth,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
    Ok(variants)
}

/// Variants of a master playlist, highest bandwidth first. A media playlist
/// yields an empty list.
pub fn variants(playlist: &[u8], playlist_url: &str) -> Result<Vec<Variant>, HlsError> {
    let base = Url::parse(playlist_url).map_err(|e| HlsError::Playlist(e.to_string()))?;
    match m3u8_rs::parse_playlist_res(playlist) {
        Ok(Playlist::MasterPlaylist(master)) => master_variants(master, &base),
        Ok(Playlist::MediaPlaylist(_)) => Ok(vec![]),
        Err(e) => Err(HlsError::Playlist(e.to_string())),
    }
}

/// Whether a body looks like an HLS playlist.
pub fn is_playlist(body: &[u8]) -> bool {
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace() && *b != 0xEF && *b != 0xBB && *b != 0xBF)
        .unwrap_or(body.len());
    body[start..].starts_with(b"#EXTM3U")
}
