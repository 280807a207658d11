pub mod formats;
pub mod reference;
pub mod result;
pub mod stream_source;

pub use formats::{MediaType, StreamFormat};
pub use reference::{ContentReference, DEFAULT_ID_SYSTEM, ExtractionRequest};
pub use result::ExtractionResult;
pub use stream_source::{AUTO_QUALITY, StreamSource, SubtitleTrack};
