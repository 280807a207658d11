pub mod cache;
pub mod error;
pub mod provider_adapter;
pub mod providers;
pub mod registry;

pub use cache::{CacheConfig, CacheKey, ResultCache};
pub use error::{ErrorKind, ExtractorError, ProviderFailure};
pub use provider_adapter::{AdapterContext, DynAdapter, Extraction, ProviderAdapter, Stage};
pub use providers::{AdapterSpec, ProviderProfile, build_adapter};
pub use registry::{ProviderRegistry, RegistryConfig, Strategy};
