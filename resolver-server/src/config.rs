use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use dirs::config_dir;
use embed_resolver::decode::Fingerprint;
use embed_resolver::extractor::{CacheConfig, ProviderProfile, RegistryConfig};
use embed_resolver::fetch::{DEFAULT_USER_AGENT, FetchConfig, RedirectPolicy};
use embed_resolver::gateway::BlockList;
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    pub timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// 0 disables redirects
    pub max_redirects: usize,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl FetchSettings {
    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn to_fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            max_timeout: Duration::from_millis(self.max_timeout_ms.max(self.timeout_ms)),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            redirect: match self.max_redirects {
                0 => RedirectPolicy::None,
                max => RedirectPolicy::Follow(max),
            },
            user_agent: self.user_agent().to_string(),
            ..FetchConfig::default()
        }
    }
}

/// Limits on the segment, key and subtitle relay endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Segment responses are cut off past this many bytes
    pub max_body_bytes: u64,
    /// Subtitles are buffered for conversion, so they get a smaller cap
    pub max_subtitle_bytes: u64,
    /// Permit loopback, private and link-local targets
    pub allow_private_targets: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 64 * 1024 * 1024,
            max_subtitle_bytes: 2 * 1024 * 1024,
            allow_private_targets: false,
        }
    }
}

fn default_gateway_timeout_ms() -> u64 {
    15_000
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub endpoint: String,
    pub auth_key: String,
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("endpoint", &self.endpoint)
            .field("auth_key", &"***")
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Environment attributes the xor keystream stages hash. The user agent
/// comes from the fetch section so headers and keys agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintConfig {
    pub language: String,
    pub platform: String,
    pub screen: String,
    pub color_depth: String,
    pub timezone: String,
}

impl FingerprintConfig {
    pub fn build(&self, user_agent: &str) -> Fingerprint {
        Fingerprint::browser(user_agent)
            .with("language", self.language.as_str())
            .with("platform", self.platform.as_str())
            .with("screen", self.screen.as_str())
            .with("colorDepth", self.color_depth.as_str())
            .with("timezone", self.timezone.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub fetch: FetchSettings,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    #[serde(default)]
    pub blocklist: BlockList,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub fingerprint: FingerprintConfig,
    #[serde(default)]
    pub providers: Vec<ProviderProfile>,
}

impl AppConfig {
    /// Layers the built-in defaults, the config file and `RESOLVER_*`
    /// environment variables, in that order.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        match config_path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = Self::default_config_path()
                    && default_path.exists()
                {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }

        // e.g. RESOLVER_GATEWAY__AUTH_KEY, RESOLVER_SERVER__PORT
        builder = builder.add_source(
            Environment::with_prefix("RESOLVER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn default_config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("resolver-server").join("config.toml"))
    }

    /// The effective configuration as TOML, with the gateway key masked.
    pub fn show(&self) -> Result<String> {
        let mut shown = self.clone();
        if let Some(gateway) = shown.gateway.as_mut() {
            gateway.auth_key = "***".to_string();
        }
        toml::to_string_pretty(&shown).context("Failed to serialize configuration for display")
    }
}
