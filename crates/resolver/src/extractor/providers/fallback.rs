use async_trait::async_trait;
use tracing::info;

use crate::extractor::error::ErrorKind;
use crate::extractor::provider_adapter::{
    AdapterContext, DynAdapter, Extraction, ProviderAdapter, StageError,
};
use crate::media::ContentReference;

/// Runs a cheap adapter first and a costlier one only when the cheap one's
/// decode scheme no longer validates. Transport failures are returned as
/// they are, since the fallback would hit the same upstream.
pub struct FallbackAdapter {
    key: String,
    primary: DynAdapter,
    fallback: DynAdapter,
}

impl FallbackAdapter {
    pub fn new(key: impl Into<String>, primary: DynAdapter, fallback: DynAdapter) -> Self {
        Self {
            key: key.into(),
            primary,
            fallback,
        }
    }
}

impl std::fmt::Debug for FallbackAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackAdapter")
            .field("key", &self.key)
            .field("primary", &self.primary.variant())
            .field("fallback", &self.fallback.variant())
            .finish()
    }
}

#[async_trait]
impl ProviderAdapter for FallbackAdapter {
    fn key(&self) -> &str {
        &self.key
    }

    fn variant(&self) -> &'static str {
        "fallback"
    }

    async fn run(
        &self,
        reference: &ContentReference,
        ctx: &AdapterContext,
    ) -> Result<Extraction, StageError> {
        match self.primary.run(reference, ctx).await {
            Err(err) if err.error.kind() == ErrorKind::DecodeSchemeChanged => {
                info!(
                    provider = %self.key,
                    stage = %err.stage,
                    fallback = self.fallback.variant(),
                    "primary scheme changed, using fallback"
                );
                self.fallback.run(reference, ctx).await
            }
            outcome => outcome,
        }
    }
}
