use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cache::{CacheKey, ResultCache};
use super::error::{ErrorKind, ExtractorError, ProviderFailure};
use super::provider_adapter::{AdapterContext, DynAdapter, Extraction, ProviderAdapter};
use super::providers::{ProviderProfile, build_adapter};
use crate::media::{ContentReference, ExtractionRequest, ExtractionResult};
use crate::normalize::Normalizer;

fn default_deadline_ms() -> u64 {
    20_000
}

/// How the registry walks its providers when no hint is given.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One provider at a time, in configured order.
    #[default]
    Sequential,
    /// All providers at once; the first success wins and the rest are
    /// dropped.
    Race,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Provider keys in fallback order. Empty means profile order.
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub strategy: Strategy,
    /// Bound on one whole extraction, across every provider tried.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            order: vec![],
            strategy: Strategy::default(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

/// Maps provider keys to adapters and runs extractions across them.
pub struct ProviderRegistry {
    adapters: FxHashMap<String, DynAdapter>,
    order: Vec<String>,
    strategy: Strategy,
    deadline: Duration,
    ctx: AdapterContext,
    normalizer: Normalizer,
    cache: Option<ResultCache>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("order", &self.order)
            .field("strategy", &self.strategy)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new(ctx: AdapterContext, normalizer: Normalizer) -> Self {
        Self {
            adapters: FxHashMap::default(),
            order: vec![],
            strategy: Strategy::default(),
            deadline: Duration::from_millis(default_deadline_ms()),
            ctx,
            normalizer,
            cache: None,
        }
    }

    /// Builds adapters for every enabled profile. Keys listed in
    /// `config.order` come first; the remaining profiles follow in
    /// declaration order.
    pub fn from_profiles(
        profiles: &[ProviderProfile],
        config: &RegistryConfig,
        ctx: AdapterContext,
        normalizer: Normalizer,
    ) -> Result<Self, ExtractorError> {
        let mut registry = Self::new(ctx, normalizer)
            .with_strategy(config.strategy)
            .with_deadline(Duration::from_millis(config.deadline_ms));

        for profile in profiles.iter().filter(|p| p.enabled) {
            let adapter = build_adapter(profile, &registry.ctx.fetch)?;
            debug!(
                provider = %profile.key,
                version = profile.version,
                variant = adapter.variant(),
                "registered provider"
            );
            registry.register(adapter);
        }

        if !config.order.is_empty() {
            registry.set_order(&config.order)?;
        }
        Ok(registry)
    }

    /// Adds an adapter at the end of the order, replacing any adapter with
    /// the same key.
    pub fn register(&mut self, adapter: DynAdapter) {
        let key = adapter.key().to_string();
        if self.adapters.insert(key.clone(), adapter).is_none() {
            self.order.push(key);
        }
    }

    /// Moves `keys` to the front of the fallback order.
    pub fn set_order(&mut self, keys: &[String]) -> Result<(), ExtractorError> {
        if let Some(unknown) = keys.iter().find(|k| !self.adapters.contains_key(*k)) {
            return Err(ExtractorError::UnknownProvider(unknown.clone()));
        }
        let rest: Vec<String> = self
            .order
            .iter()
            .filter(|k| !keys.contains(k))
            .cloned()
            .collect();
        self.order = keys.iter().cloned().chain(rest).collect();
        Ok(())
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cache(mut self, cache: Option<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    /// `(key, variant)` for every provider, in fallback order.
    pub fn providers(&self) -> Vec<(&str, &'static str)> {
        self.order
            .iter()
            .filter_map(|key| self.adapters.get(key).map(|a| (key.as_str(), a.variant())))
            .collect()
    }

    pub fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    /// Resolves a request. Always returns a structured result.
    pub async fn extract(&self, request: &ExtractionRequest) -> ExtractionResult {
        let reference = &request.reference;
        if let Err(e) = reference.validate() {
            return ExtractionResult::invalid_request(e.to_string());
        }

        let hint = request.provider_hint.as_deref().filter(|h| !h.is_empty());
        let candidates: Vec<DynAdapter> = match hint {
            Some(hint) => match self.adapters.get(hint) {
                Some(adapter) => vec![adapter.clone()],
                None => return ExtractionResult::invalid_request(format!("unknown provider: {hint}")),
            },
            None => self
                .order
                .iter()
                .filter_map(|key| self.adapters.get(key).cloned())
                .collect(),
        };
        if candidates.is_empty() {
            return ExtractionResult::exhausted(vec![]);
        }

        let cache_key = CacheKey::new(hint, reference);
        if let Some(cache) = &self.cache
            && let Some(cached) = cache.get(&cache_key).await
        {
            debug!(reference = %reference, "serving cached result");
            return cached;
        }

        let mut failures: Vec<ProviderFailure> = Vec::new();
        let attempt = async {
            match self.strategy {
                Strategy::Sequential => self.sequential(&candidates, reference, &mut failures).await,
                Strategy::Race => self.race(&candidates, reference, &mut failures).await,
            }
        };
        let outcome = tokio::time::timeout(self.deadline, attempt).await;

        let result = match outcome {
            Ok(Some((provider, extraction))) => {
                let Extraction { sources, subtitles } = self.normalizer.normalize(extraction);
                info!(
                    provider = %provider,
                    reference = %reference,
                    sources = sources.len(),
                    "extraction succeeded"
                );
                ExtractionResult::success(provider, sources, subtitles)
            }
            Ok(None) if hint.is_some() && failures.len() == 1 => {
                ExtractionResult::failure(failures.remove(0))
            }
            Ok(None) => {
                warn!(reference = %reference, attempted = failures.len(), "all providers failed");
                ExtractionResult::exhausted(failures)
            }
            Err(_) => {
                warn!(
                    reference = %reference,
                    deadline_ms = self.deadline.as_millis() as u64,
                    recorded = failures.len(),
                    "extraction deadline exceeded"
                );
                ExtractionResult::timeout(failures)
            }
        };

        if result.is_success()
            && let Some(cache) = &self.cache
        {
            cache.put(cache_key, &result).await;
        }
        result
    }

    fn record(
        adapter: &DynAdapter,
        outcome: Result<Extraction, ProviderFailure>,
        failures: &mut Vec<ProviderFailure>,
    ) -> Option<(String, Extraction)> {
        match outcome {
            Ok(extraction) if !extraction.sources.is_empty() => {
                Some((adapter.key().to_string(), extraction))
            }
            Ok(_) => {
                failures.push(ProviderFailure::new(
                    adapter.key(),
                    ErrorKind::DecodeSchemeChanged,
                    "validate",
                    "adapter returned no sources",
                ));
                None
            }
            Err(failure) => {
                failures.push(failure);
                None
            }
        }
    }

    async fn sequential(
        &self,
        candidates: &[DynAdapter],
        reference: &ContentReference,
        failures: &mut Vec<ProviderFailure>,
    ) -> Option<(String, Extraction)> {
        for adapter in candidates {
            let outcome = adapter.extract(reference, &self.ctx).await;
            if let Some(found) = Self::record(adapter, outcome, failures) {
                return Some(found);
            }
        }
        None
    }

    async fn race(
        &self,
        candidates: &[DynAdapter],
        reference: &ContentReference,
        failures: &mut Vec<ProviderFailure>,
    ) -> Option<(String, Extraction)> {
        let mut pending: FuturesUnordered<_> = candidates
            .iter()
            .map(|adapter| async move { (adapter, adapter.extract(reference, &self.ctx).await) })
            .collect();

        while let Some((adapter, outcome)) = pending.next().await {
            if let Some(found) = Self::record(adapter, outcome, failures) {
                debug!(provider = %found.0, dropped = pending.len(), "race won");
                return Some(found);
            }
        }
        None
    }
}
