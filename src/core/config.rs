use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::pricing::catalog::{ModelEntry, PriceTerms, FALLBACK_TERMS};

pub const ADMIN_KEY_ENV: &str = "LEDGERLENS_ADMIN_KEY";
pub const DEFAULT_BASE_URL: &str = "https://api.venice.ai/api/v1";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_format")]
    pub default_format: String,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_format() -> String {
    "text".to_string()
}
fn default_color() -> String {
    "auto".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_format: default_format(),
            color: default_color(),
        }
    }
}

/// Billing endpoint access and snapshot refresh policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_incremental_threshold_secs")]
    pub incremental_threshold_secs: u64,
    #[serde(default = "default_overlap_secs")]
    pub overlap_secs: u64,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_page_size() -> u32 {
    500
}
fn default_max_pages() -> u32 {
    20
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_incremental_threshold_secs() -> u64 {
    3600
}
fn default_overlap_secs() -> u64 {
    300
}
fn default_window_days() -> u32 {
    7
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    10_000
}
fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            cache_ttl_secs: default_cache_ttl_secs(),
            incremental_threshold_secs: default_incremental_threshold_secs(),
            overlap_secs: default_overlap_secs(),
            window_days: default_window_days(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_path: None,
        }
    }
}

impl LedgerConfig {
    /// Admin key from the environment, else from the config file.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key_with_env(std::env::var(ADMIN_KEY_ENV).ok())
    }

    /// Like [`resolve_api_key`](Self::resolve_api_key) with the environment
    /// value passed in. Blank keys count as missing.
    pub fn api_key_with_env(&self, env: Option<String>) -> Option<String> {
        let usable = |key: &String| {
            let key = key.trim();
            (!key.is_empty()).then(|| key.to_string())
        };
        env.as_ref()
            .and_then(usable)
            .or_else(|| self.api_key.as_ref().and_then(usable))
    }

    /// Snapshot location, respecting XDG_CACHE_HOME unless overridden.
    pub fn snapshot_path(&self) -> PathBuf {
        if let Some(path) = &self.cache_path {
            return path.clone();
        }
        let cache_dir = std::env::var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".cache")
            });
        cache_dir.join("ledgerlens").join("ledger-snapshot.json")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Thresholds for the usage and recommendation passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_min_request_count")]
    pub min_request_count: u64,
    #[serde(default = "default_min_savings_percent")]
    pub min_savings_percent: f64,
    #[serde(default = "default_small_request_tokens")]
    pub small_request_tokens: f64,
    #[serde(default = "default_cache_min_requests")]
    pub cache_min_requests: u64,
    #[serde(default = "default_target_hit_rate")]
    pub target_hit_rate: f64,
}

fn default_min_request_count() -> u64 {
    10
}
fn default_min_savings_percent() -> f64 {
    15.0
}
fn default_small_request_tokens() -> f64 {
    1000.0
}
fn default_cache_min_requests() -> u64 {
    5
}
fn default_target_hit_rate() -> f64 {
    70.0
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_request_count: default_min_request_count(),
            min_savings_percent: default_min_savings_percent(),
            small_request_tokens: default_small_request_tokens(),
            cache_min_requests: default_cache_min_requests(),
            target_hit_rate: default_target_hit_rate(),
        }
    }
}

/// Spend-share thresholds (percent) for guessing which credential drives a
/// model. These are heuristics, not measurements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    #[serde(default = "default_dominant_model_percent")]
    pub dominant_model_percent: f64,
    #[serde(default = "default_dominant_credential_percent")]
    pub dominant_credential_percent: f64,
    #[serde(default = "default_significant_model_percent")]
    pub significant_model_percent: f64,
    #[serde(default = "default_relevance_floor_percent")]
    pub relevance_floor_percent: f64,
}

fn default_dominant_model_percent() -> f64 {
    80.0
}
fn default_dominant_credential_percent() -> f64 {
    70.0
}
fn default_significant_model_percent() -> f64 {
    30.0
}
fn default_relevance_floor_percent() -> f64 {
    1.0
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            dominant_model_percent: default_dominant_model_percent(),
            dominant_credential_percent: default_dominant_credential_percent(),
            significant_model_percent: default_significant_model_percent(),
            relevance_floor_percent: default_relevance_floor_percent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_fallback")]
    pub fallback: PriceTerms,
    /// Fetch live prices from the models endpoint before analysis.
    #[serde(default = "default_true")]
    pub fetch_remote: bool,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

fn default_fallback() -> PriceTerms {
    FALLBACK_TERMS
}
fn default_true() -> bool {
    true
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            fallback: default_fallback(),
            fetch_remote: true,
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub attribution: AttributionConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
}

impl AppConfig {
    /// Get the config file path, respecting XDG_CONFIG_HOME
    pub fn config_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".config")
            });
        config_dir.join("ledgerlens").join("config.toml")
    }

    /// Load config from the default path, falling back to defaults if not found
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Serialize and write this config to the config file path.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the config
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !["text", "json"].contains(&self.settings.default_format.as_str()) {
            issues.push(format!(
                "Invalid default_format: '{}' (must be 'text' or 'json')",
                self.settings.default_format
            ));
        }
        if !["auto", "always", "never"].contains(&self.settings.color.as_str()) {
            issues.push(format!(
                "Invalid color: '{}' (must be 'auto', 'always', or 'never')",
                self.settings.color
            ));
        }

        let ledger = &self.ledger;
        if !ledger.base_url.starts_with("http://") && !ledger.base_url.starts_with("https://") {
            issues.push(format!("Invalid ledger.base_url: '{}'", ledger.base_url));
        }
        if ledger.page_size == 0 {
            issues.push("ledger.page_size must be at least 1".to_string());
        }
        if ledger.max_pages == 0 {
            issues.push("ledger.max_pages must be at least 1".to_string());
        }
        if ledger.window_days == 0 {
            issues.push("ledger.window_days must be at least 1".to_string());
        }
        if ledger.max_attempts == 0 {
            issues.push("ledger.max_attempts must be at least 1".to_string());
        }
        if ledger.cache_ttl_secs > ledger.incremental_threshold_secs {
            issues.push(format!(
                "ledger.cache_ttl_secs ({}) exceeds incremental_threshold_secs ({})",
                ledger.cache_ttl_secs, ledger.incremental_threshold_secs
            ));
        }
        if ledger.retry_base_delay_ms > ledger.retry_max_delay_ms {
            issues.push("ledger.retry_base_delay_ms exceeds retry_max_delay_ms".to_string());
        }

        let analysis = &self.analysis;
        if !(0.0..=100.0).contains(&analysis.min_savings_percent) {
            issues.push(format!(
                "analysis.min_savings_percent out of range: {}",
                analysis.min_savings_percent
            ));
        }
        if !(0.0..=100.0).contains(&analysis.target_hit_rate) {
            issues.push(format!(
                "analysis.target_hit_rate out of range: {}",
                analysis.target_hit_rate
            ));
        }

        let attribution = &self.attribution;
        for (name, value) in [
            ("dominant_model_percent", attribution.dominant_model_percent),
            ("dominant_credential_percent", attribution.dominant_credential_percent),
            ("significant_model_percent", attribution.significant_model_percent),
            ("relevance_floor_percent", attribution.relevance_floor_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                issues.push(format!("attribution.{} out of range: {}", name, value));
            }
        }

        let priced = std::iter::once(("fallback", &self.pricing.fallback))
            .chain(self.pricing.models.iter().map(|m| (m.id.as_str(), &m.terms)));
        for (id, terms) in priced {
            if terms.input < 0.0 || terms.output < 0.0 {
                issues.push(format!("Pricing '{}': negative price", id));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pricing::catalog::Capability;

    #[test]
    fn default_settings_are_valid() {
        let config = AppConfig::default();
        let issues = config.validate();
        assert!(issues.is_empty(), "Default config should be valid, got: {:?}", issues);
    }

    #[test]
    fn default_ledger_policy() {
        let ledger = LedgerConfig::default();
        assert_eq!(ledger.page_size, 500);
        assert_eq!(ledger.max_pages, 20);
        assert_eq!(ledger.cache_ttl_secs, 300);
        assert_eq!(ledger.incremental_threshold_secs, 3600);
        assert_eq!(ledger.overlap_secs, 300);
        assert_eq!(ledger.max_attempts, 3);
        assert_eq!(ledger.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn validate_catches_invalid_format() {
        let mut config = AppConfig::default();
        config.settings.default_format = "xml".to_string();
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.contains("default_format")));
    }

    #[test]
    fn validate_catches_invalid_color() {
        let mut config = AppConfig::default();
        config.settings.color = "blue".to_string();
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.contains("color")));
    }

    #[test]
    fn validate_catches_inverted_refresh_windows() {
        let mut config = AppConfig::default();
        config.ledger.cache_ttl_secs = 7200;
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.contains("cache_ttl_secs")));
    }

    #[test]
    fn validate_catches_out_of_range_thresholds() {
        let mut config = AppConfig::default();
        config.analysis.min_savings_percent = 150.0;
        config.attribution.relevance_floor_percent = -1.0;
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.contains("min_savings_percent")));
        assert!(issues.iter().any(|i| i.contains("relevance_floor_percent")));
    }

    #[test]
    fn parse_minimal_toml() {
        let toml = r#"
[settings]
default_format = "json"
color = "always"

[ledger]
window_days = 30
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.settings.default_format, "json");
        assert_eq!(config.ledger.window_days, 30);
        assert_eq!(config.ledger.page_size, 500);
        assert_eq!(config.analysis.min_request_count, 10);
    }

    #[test]
    fn parse_pricing_overrides() {
        let toml = r#"
[pricing.fallback]
input = 1.0
output = 4.0

[[pricing.models]]
id = "my-model"
name = "My Model"
input = 0.1
output = 0.4
cache_input = 0.01
capabilities = ["function_calling", "vision"]
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.pricing.fallback.input, 1.0);
        assert!(config.pricing.fallback.cache_input.is_none());
        let model = &config.pricing.models[0];
        assert_eq!(model.id, "my-model");
        assert_eq!(model.terms.cache_input, Some(0.01));
        assert!(model.capabilities.contains(&Capability::Vision));
        assert!(!model.beta);
    }

    #[test]
    fn parse_empty_toml_gives_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.settings.default_format, "text");
        assert_eq!(config.pricing.fallback, FALLBACK_TERMS);
        assert!(config.pricing.fetch_remote);
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.ledger.window_days = 14;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.ledger.window_days, 14);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.ledger.max_pages, 20);
    }

    #[test]
    fn explicit_cache_path_wins() {
        let ledger = LedgerConfig {
            cache_path: Some(PathBuf::from("/tmp/snap.json")),
            ..LedgerConfig::default()
        };
        assert_eq!(ledger.snapshot_path(), PathBuf::from("/tmp/snap.json"));
    }

    #[test]
    fn environment_key_wins_over_config_key() {
        let ledger = LedgerConfig {
            api_key: Some("from-file".to_string()),
            ..LedgerConfig::default()
        };
        assert_eq!(ledger.api_key_with_env(Some(" from-env ".to_string())).as_deref(), Some("from-env"));
        assert_eq!(ledger.api_key_with_env(Some("  ".to_string())).as_deref(), Some("from-file"));
        assert_eq!(ledger.api_key_with_env(None).as_deref(), Some("from-file"));
        assert_eq!(LedgerConfig::default().api_key_with_env(None), None);
    }

    #[test]
    fn config_path_uses_xdg_when_set() {
        std::env::set_var("XDG_CONFIG_HOME", "/tmp/test_xdg_config");
        let path = AppConfig::config_path();
        std::env::remove_var("XDG_CONFIG_HOME");
        assert_eq!(path, PathBuf::from("/tmp/test_xdg_config/ledgerlens/config.toml"));
    }
}
