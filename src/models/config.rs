//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Backoff parameters for transient fetch failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Traversal subset and caps
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Output and checkpoint locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Built-in annotators
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::config("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::config("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::config("crawler.max_concurrent must be > 0"));
        }
        if self.crawler.item_concurrency == 0 {
            return Err(AppError::config("crawler.item_concurrency must be > 0"));
        }
        self.crawler.listing_url().map_err(|e| {
            AppError::config(format!(
                "crawler.base_url/listing_path do not form a URL: {e}"
            ))
        })?;
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(AppError::config(
                "retry.max_delay_ms must be >= retry.base_delay_ms",
            ));
        }
        if self.limits.max_restaurants == Some(0) {
            return Err(AppError::config("limits.max_restaurants must be > 0"));
        }
        if self.limits.max_items_per_restaurant == Some(0) {
            return Err(AppError::config(
                "limits.max_items_per_restaurant must be > 0",
            ));
        }
        Ok(())
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Site root; relative links are resolved against it
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Path of the restaurant listing page
    #[serde(default = "defaults::listing_path")]
    pub listing_path: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Minimum spacing between requests to one host, in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Brands processed concurrently
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Menu items processed concurrently within one brand
    #[serde(default = "defaults::item_concurrency")]
    pub item_concurrency: usize,
}

impl CrawlerConfig {
    pub fn listing_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.base_url)?.join(&self.listing_path)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            listing_path: defaults::listing_path(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
            item_concurrency: defaults::item_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles each attempt
    #[serde(default = "defaults::base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound on a single backoff delay
    #[serde(default = "defaults::max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            base_delay_ms: defaults::base_delay(),
            max_delay_ms: defaults::max_delay(),
        }
    }
}

/// Which part of the site to traverse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Brand names to include (case-insensitive); empty means all
    #[serde(default)]
    pub brands: Vec<String>,

    #[serde(default)]
    pub max_restaurants: Option<usize>,

    #[serde(default)]
    pub max_items_per_restaurant: Option<usize>,
}

impl LimitsConfig {
    pub fn includes_brand(&self, name: &str) -> bool {
        self.brands.is_empty()
            || self
                .brands
                .iter()
                .any(|b| b.trim().eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the local document store
    #[serde(default = "defaults::store_dir")]
    pub store_dir: PathBuf,

    /// Embedded checkpoint database directory
    #[serde(default = "defaults::checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Rejection reports and run summaries
    #[serde(default = "defaults::report_dir")]
    pub report_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            store_dir: defaults::store_dir(),
            checkpoint_dir: defaults::checkpoint_dir(),
            report_dir: defaults::report_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Tag menu items with macronutrient profile labels
    #[serde(default = "defaults::enabled")]
    pub macro_profile: bool,

    /// Protein-per-calorie ratio and band of each menu item
    #[serde(default = "defaults::enabled")]
    pub golden_ratio: bool,

    /// Copy the first serving image onto its menu item
    #[serde(default = "defaults::enabled")]
    pub item_images: bool,

    /// TOML table of brand name to category and cuisine
    #[serde(default)]
    pub category_lookup: Option<PathBuf>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            macro_profile: defaults::enabled(),
            golden_ratio: defaults::enabled(),
            item_images: defaults::enabled(),
            category_lookup: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Crawler defaults
    pub fn base_url() -> String {
        "https://fastfoodnutrition.org".into()
    }
    pub fn listing_path() -> String {
        "/fast-food-restaurants".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; harvester/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        500
    }
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn item_concurrency() -> usize {
        2
    }

    // Retry defaults
    pub fn max_retries() -> u32 {
        3
    }
    pub fn base_delay() -> u64 {
        1000
    }
    pub fn max_delay() -> u64 {
        60_000
    }

    // Path defaults
    pub fn store_dir() -> PathBuf {
        PathBuf::from("data/store")
    }
    pub fn checkpoint_dir() -> PathBuf {
        PathBuf::from("data/checkpoints")
    }
    pub fn report_dir() -> PathBuf {
        PathBuf::from("data/reports")
    }

    pub fn enabled() -> bool {
        true
    }
    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(
            config.crawler.listing_url().unwrap().as_str(),
            "https://fastfoodnutrition.org/fast-food-restaurants"
        );
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [crawler]
            max_concurrent = 8

            [limits]
            brands = ["Taco Bell"]
            max_items_per_restaurant = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.crawler.max_concurrent, 8);
        assert_eq!(config.crawler.timeout_secs, 30);
        assert_eq!(config.limits.max_items_per_restaurant, Some(5));
        assert!(config.limits.includes_brand("taco bell"));
        assert!(!config.limits.includes_brand("Arby's"));
        assert!(config.enrichment.enabled);
        assert!(config.enrichment.golden_ratio);
        assert!(config.enrichment.item_images);
    }

    #[test]
    fn rejects_inverted_delays() {
        let mut config = Config::default();
        config.retry.max_delay_ms = 10;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn rejects_zero_caps_and_bad_url() {
        let mut config = Config::default();
        config.limits.max_restaurants = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.crawler.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_brand_filter_includes_everything() {
        assert!(LimitsConfig::default().includes_brand("Anything"));
    }
}
