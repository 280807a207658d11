use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use embed_resolver::extractor::{AdapterContext, ProviderRegistry, ResultCache};
use embed_resolver::fetch::{FetchClient, create_client};
use embed_resolver::gateway::{ProxyCredential, ProxyGateway};
use embed_resolver::hls::SegmentDecryptor;
use embed_resolver::normalize::Normalizer;
use tracing::info;

use crate::config::{AppConfig, RelayConfig};

const KEY_TTL: Duration = Duration::from_secs(300);

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub fetch: FetchClient,
    pub keys: SegmentDecryptor,
    pub relay: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(registry: ProviderRegistry, fetch: FetchClient, relay: RelayConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            keys: SegmentDecryptor::new(fetch.clone(), KEY_TTL),
            fetch,
            relay: Arc::new(relay),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let fetch_config = config.fetch.to_fetch_config();
        let client = create_client(&fetch_config).context("Failed to build http client")?;
        let blocklist = Arc::new(config.blocklist.clone());

        let gateway = config.gateway.as_ref().map(|gateway| {
            ProxyGateway::new(
                Arc::new(ProxyCredential::new(&gateway.endpoint, &gateway.auth_key)),
                client.clone(),
                Duration::from_millis(gateway.timeout_ms),
            )
        });
        info!(
            gateway = gateway.is_some(),
            blocked_hosts = blocklist.hosts.len(),
            "fetch client ready"
        );

        let fetch = FetchClient::with_client(client, fetch_config)
            .with_gateway(gateway)
            .with_blocklist(blocklist.clone());

        let ctx = AdapterContext::new(
            fetch.clone(),
            config.fingerprint.build(config.fetch.user_agent()),
        );
        let registry = ProviderRegistry::from_profiles(
            &config.providers,
            &config.registry,
            ctx,
            Normalizer::new(blocklist),
        )
        .context("Failed to load provider profiles")?
        .with_cache(config.cache.enabled.then(|| ResultCache::new(&config.cache)));

        info!(providers = registry.providers().len(), "provider registry ready");
        Ok(Self::new(registry, fetch, config.relay.clone()))
    }
}
