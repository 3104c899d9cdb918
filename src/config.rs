use crate::core::scoring::AbsentInput;
use crate::services::http::RetryPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or checking configuration
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing credential: {0}")]
    MissingCredential(String),
}

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub client: ClientSettings,
    pub enrichment: EnrichmentSettings,
    pub providers: ProvidersSettings,
    pub cache: CacheSettings,
    pub recommend: RecommendSettings,
    pub scoring: ScoringSettings,
    pub explainer: Option<ExplainerSettings>,
    pub logging: LoggingSettings,
}

/// Shared outbound HTTP behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub requests_per_minute: u32,
    pub retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            retries: 3,
            backoff_base_ms: 1000,
            backoff_cap_ms: 8000,
            timeout_secs: 10,
        }
    }
}

impl ClientSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub enabled: bool,
    pub cache_ttl_days: u64,
    pub radius_m: f64,
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub yandex_url: String,
    pub yandex_api_key: Option<String>,
    pub dgis_url: String,
    pub dgis_api_key: Option<String>,
    pub overpass_url: String,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_days: 7,
            radius_m: 1200.0,
            timeout_secs: 15,
            concurrency: 8,
            yandex_url: "https://search-maps.yandex.ru/v1/".to_string(),
            yandex_api_key: None,
            dgis_url: "https://catalog.api.2gis.com/3.0/items".to_string(),
            dgis_api_key: None,
            overpass_url: "https://overpass-api.de/api/interpreter".to_string(),
        }
    }
}

impl EnrichmentSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_days * 24 * 60 * 60)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersSettings {
    pub avito: ProviderSettings,
    pub domclick: ProviderSettings,
    pub yandex_realty: ProviderSettings,
    pub cian_partner: ProviderSettings,
    pub cian_source: ProviderSettings,
    pub pik: ProviderSettings,
}

impl ProvidersSettings {
    pub const DOMCLICK_URL: &'static str = "https://api.domclick.ru/v1";
    pub const YANDEX_REALTY_URL: &'static str = "https://realty-partners.yandex.ru/api/v1";
    pub const CIAN_PARTNER_URL: &'static str = "https://partners.cian.ru/api/v2";
    pub const PIK_URL: &'static str = "https://api.pik.ru/v2";

    /// Enabled providers with their resolved base URL, in aggregation order
    pub fn enabled(&self) -> Vec<(&'static str, &ProviderSettings, Option<String>)> {
        [
            ("avito", &self.avito, None),
            ("domclick", &self.domclick, Some(Self::DOMCLICK_URL)),
            ("yandex_realty", &self.yandex_realty, Some(Self::YANDEX_REALTY_URL)),
            ("cian_partner", &self.cian_partner, Some(Self::CIAN_PARTNER_URL)),
            ("cian_source", &self.cian_source, None),
            ("pik", &self.pik, Some(Self::PIK_URL)),
        ]
        .into_iter()
        .filter(|(_, provider, _)| provider.enabled)
        .map(|(name, provider, default_url)| {
            let base_url = provider.base_url.clone().or_else(|| default_url.map(str::to_string));
            (name, provider, base_url)
        })
        .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub partner_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub redis_url: Option<String>,
    pub l1_cache_size: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            l1_cache_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecommendSettings {
    pub top_n: usize,
}

impl Default for RecommendSettings {
    fn default() -> Self {
        Self { top_n: 10 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub absent_input: AbsentInput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainerSettings {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_explainer_model")]
    pub model: String,
    #[serde(default = "default_explainer_timeout")]
    pub timeout_secs: u64,
}

fn default_explainer_model() -> String { "gpt-4o-mini".to_string() }
fn default_explainer_timeout() -> u64 { 15 }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "compact".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the structs
    /// 2. Configuration files (config/default.toml, config/local.toml)
    /// 3. Environment variables (prefixed with ESTATE__)
    /// 4. Well-known secret variables such as AVITO_API_KEY
    pub fn load() -> Result<Self, SettingsError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        Self::finish(builder)
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let builder = Config::builder().add_source(File::from(path.as_ref()));
        Self::finish(builder)
    }

    /// Parse settings from TOML text alone, without files or environment
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(text)?)
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, SettingsError> {
        // e.g., ESTATE__CLIENT__REQUESTS_PER_MINUTE -> client.requests_per_minute
        let settings = builder
            .add_source(
                Environment::with_prefix("ESTATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings = substitute_env_vars(settings, |name| std::env::var(name).ok())?;
        Ok(settings.try_deserialize()?)
    }

    /// Check that everything enabled has the credentials it needs
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (name, provider, base_url) in self.providers.enabled() {
            if base_url.as_deref().map_or(true, str::is_empty) {
                return Err(SettingsError::MissingCredential(format!("providers.{}.base_url", name)));
            }
            // PIK identifies partners by id; everyone else wants an API key
            let (field, credential) = match name {
                "pik" => ("partner_id", provider.partner_id.as_deref()),
                _ => ("api_key", provider.api_key.as_deref()),
            };
            if credential.map_or(true, str::is_empty) {
                return Err(SettingsError::MissingCredential(format!("providers.{}.{}", name, field)));
            }
        }

        if let Some(explainer) = &self.explainer {
            if explainer.api_key.as_deref().map_or(true, str::is_empty) {
                return Err(SettingsError::MissingCredential("explainer.api_key".to_string()));
            }
        }

        Ok(())
    }
}

/// Secret variables and the setting each one fills
const SECRET_VARS: &[(&str, &str)] = &[
    ("AVITO_API_KEY", "providers.avito.api_key"),
    ("DOMCLICK_API_KEY", "providers.domclick.api_key"),
    ("YANDEX_REALTY_API_KEY", "providers.yandex_realty.api_key"),
    ("CIAN_PARTNER_API_KEY", "providers.cian_partner.api_key"),
    ("CIAN_API_KEY", "providers.cian_source.api_key"),
    ("PIK_PARTNER_ID", "providers.pik.partner_id"),
    ("YANDEX_MAPS_API_KEY", "enrichment.yandex_api_key"),
    ("DGIS_API_KEY", "enrichment.dgis_api_key"),
    ("REDIS_URL", "cache.redis_url"),
];

/// Apply well-known secret variables on top of the layered config
fn substitute_env_vars<F>(settings: Config, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = Config::builder().add_source(settings);

    for (var, key) in SECRET_VARS {
        if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
            builder = builder.set_override(*key, value)?;
        }
    }

    builder.build()
}
