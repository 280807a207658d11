//! Adapter variants and the profiles that configure them.

pub mod chain;
pub mod delegate;
pub mod fallback;
pub mod headless;
pub mod profile;
pub mod template;
pub mod validate;

use std::sync::Arc;

pub use chain::ChainAdapter;
pub use delegate::{DelegateAdapter, RemoteDecryptor};
pub use fallback::FallbackAdapter;
pub use headless::HeadlessAdapter;
pub use profile::{AdapterSpec, EmbedSettings, ProviderProfile};

use super::error::ExtractorError;
use super::provider_adapter::DynAdapter;
use crate::fetch::FetchClient;

/// Builds the adapter a profile describes. The profile is checked first so
/// a broken profile is rejected at startup rather than on first use.
pub fn build_adapter(
    profile: &ProviderProfile,
    fetch: &FetchClient,
) -> Result<DynAdapter, ExtractorError> {
    profile.check()?;
    let settings = profile.settings()?;
    Ok(adapter_for(&profile.key, settings, &profile.adapter, fetch))
}

fn adapter_for(
    key: &str,
    settings: EmbedSettings,
    spec: &AdapterSpec,
    fetch: &FetchClient,
) -> DynAdapter {
    match spec {
        AdapterSpec::Chain(chain) => Arc::new(ChainAdapter::new(settings, chain.clone())),
        AdapterSpec::Delegate(delegate) => {
            let decryptor = Arc::new(RemoteDecryptor::new(
                delegate.decryptor_url.clone(),
                fetch.clone(),
            ));
            Arc::new(DelegateAdapter::new(settings, delegate.clone(), decryptor))
        }
        AdapterSpec::Headless(headless) => {
            Arc::new(HeadlessAdapter::new(settings, headless.clone()))
        }
        AdapterSpec::Fallback { primary, fallback } => Arc::new(FallbackAdapter::new(
            key,
            adapter_for(key, settings.clone(), primary, fetch),
            adapter_for(key, settings, fallback, fetch),
        )),
    }
}
