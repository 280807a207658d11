//! HLS helpers: key declarations, segment decryption and variant probing.

pub mod decrypt;
pub mod error;
pub mod playlist;

pub use decrypt::{SegmentDecryptor, validate_key};
pub use error::HlsError;
pub use playlist::{SegmentEntry, SegmentKey, Variant, is_playlist, media_segments, variants};
