//! Resolves catalog content references into playable manifests by walking
//! embed provider chains, and relays blocked media fetches through a proxy
//! gateway.

pub mod decode;
pub mod extractor;
pub mod fetch;
pub mod gateway;
pub mod hls;
pub mod media;
pub mod normalize;

pub use extractor::{ExtractorError, ProviderRegistry};
pub use media::{ContentReference, ExtractionRequest, ExtractionResult};
