//! Short-lived cache of successful extraction results.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use moka::future::Cache as MokaCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::media::{ContentReference, ExtractionResult};

/// Query parameters CDNs use for signed-url expiry, in unix seconds (or
/// milliseconds when the value is too large to be seconds).
const EXPIRY_PARAMS: [&str; 5] = ["expires", "exp", "e", "expiry", "Expires"];

/// Values above this are taken to be milliseconds.
const MILLIS_THRESHOLD: u64 = 1_000_000_000_000;

fn default_ttl_secs() -> u64 {
    600
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_safety_margin_secs() -> u64 {
    60
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    /// How long before a signed url expires its result stops being served.
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            safety_margin_secs: default_safety_margin_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider: String,
    pub reference: ContentReference,
}

impl CacheKey {
    /// `provider` is the hint the caller gave, or `"auto"` for registry
    /// order.
    pub fn new(provider: Option<&str>, reference: &ContentReference) -> Self {
        Self {
            provider: provider.unwrap_or("auto").to_string(),
            reference: reference.clone(),
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    result: ExtractionResult,
    expires_at: Instant,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Earliest signed-url expiry (unix seconds) among `urls`.
pub fn earliest_expiry<'a>(urls: impl IntoIterator<Item = &'a str>) -> Option<u64> {
    urls.into_iter()
        .filter_map(|raw| url::Url::parse(raw).ok())
        .flat_map(|url| {
            url.query_pairs()
                .filter(|(name, _)| EXPIRY_PARAMS.contains(&name.as_ref()))
                .filter_map(|(_, value)| value.parse::<u64>().ok())
                .map(|value| {
                    if value > MILLIS_THRESHOLD {
                        value / 1000
                    } else {
                        value
                    }
                })
                .collect::<Vec<_>>()
        })
        .min()
}

/// Moka-backed result cache. Entries carry their own deadline so that a
/// result never outlives the urls inside it.
#[derive(Clone)]
pub struct ResultCache {
    cache: MokaCache<CacheKey, CacheEntry>,
    ttl: Duration,
    safety_margin: Duration,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.cache.entry_count())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = Duration::from_secs(config.ttl_secs.max(1));
        let cache = MokaCache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(ttl)
            .build();
        debug!(
            max_entries = config.max_entries,
            ttl_secs = ttl.as_secs(),
            "result cache created"
        );
        Self {
            cache,
            ttl,
            safety_margin: Duration::from_secs(config.safety_margin_secs),
        }
    }

    /// How long `result` may be served, or `None` when it should not be
    /// cached at all.
    pub fn ttl_for(&self, result: &ExtractionResult) -> Option<Duration> {
        if !result.is_success() {
            return None;
        }
        let urls = result
            .sources()
            .iter()
            .map(|s| s.url.as_str())
            .chain(result.subtitles().iter().map(|t| t.url.as_str()));
        let Some(expiry) = earliest_expiry(urls) else {
            return Some(self.ttl);
        };
        let remaining = expiry
            .saturating_sub(unix_now())
            .saturating_sub(self.safety_margin.as_secs());
        if remaining == 0 {
            return None;
        }
        Some(self.ttl.min(Duration::from_secs(remaining)))
    }

    pub async fn get(&self, key: &CacheKey) -> Option<ExtractionResult> {
        let entry = self.cache.get(key).await?;
        if Instant::now() >= entry.expires_at {
            debug!(reference = %key.reference, "cached result past url expiry");
            self.cache.invalidate(key).await;
            return None;
        }
        Some(entry.result)
    }

    /// Stores a successful result. Failures and results whose urls are
    /// about to expire are skipped.
    pub async fn put(&self, key: CacheKey, result: &ExtractionResult) {
        let Some(ttl) = self.ttl_for(result) else {
            return;
        };
        let entry = CacheEntry {
            result: result.clone(),
            expires_at: Instant::now() + ttl,
        };
        self.cache.insert(key, entry).await;
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StreamSource;

    fn result_with(url: &str) -> ExtractionResult {
        ExtractionResult::success("alpha", vec![StreamSource::new(url)], vec![])
    }

    #[test]
    fn reads_seconds_and_millis() {
        assert_eq!(
            earliest_expiry(["https://cdn.example/a.m3u8?e=2000000000&t=x"]),
            Some(2_000_000_000)
        );
        assert_eq!(
            earliest_expiry([
                "https://cdn.example/a.m3u8?Expires=2000000500000",
                "https://cdn.example/b.m3u8?expires=2000000100",
            ]),
            Some(2_000_000_100)
        );
        assert_eq!(earliest_expiry(["https://cdn.example/a.m3u8?t=1"]), None);
    }

    #[test]
    fn ttl_clamped_below_url_expiry() {
        let cache = ResultCache::new(&CacheConfig::default());
        let expiry = unix_now() + 180;
        let ttl = cache
            .ttl_for(&result_with(&format!("https://cdn.example/a.m3u8?exp={expiry}")))
            .unwrap();
        assert!(ttl <= Duration::from_secs(120));
        assert!(ttl < cache.ttl);
    }

    #[test]
    fn nearly_expired_results_are_not_cached() {
        let cache = ResultCache::new(&CacheConfig::default());
        let expiry = unix_now() + 30;
        assert!(
            cache
                .ttl_for(&result_with(&format!("https://cdn.example/a.m3u8?exp={expiry}")))
                .is_none()
        );
        assert!(cache.ttl_for(&ExtractionResult::invalid_request("x")).is_none());
    }

    #[tokio::test]
    async fn stores_and_returns_success() {
        let cache = ResultCache::new(&CacheConfig::default());
        let reference = ContentReference::movie("tmdb", "550");
        let key = CacheKey::new(None, &reference);
        cache.put(key.clone(), &result_with("https://cdn.example/a.m3u8")).await;
        let cached = cache.get(&key).await.unwrap();
        assert!(cached.is_success());
        assert!(cache.get(&CacheKey::new(Some("beta"), &reference)).await.is_none());
    }
}
