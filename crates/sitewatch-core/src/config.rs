use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable that overrides `kma.service_key`.
pub const SERVICE_KEY_ENV: &str = "SITEWATCH_KMA_KEY";

const APP_DIR: &str = "sitewatch";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// All errors joined into one line
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// KMA open API settings
    #[serde(default)]
    pub kma: KmaConfig,

    /// Address geocoder settings
    #[serde(default)]
    pub geocoder: GeocoderConfig,

    /// Polling loop settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Cold-weather classification thresholds
    #[serde(default)]
    pub thresholds: ThresholdsConfig,

    /// Roster and cache locations
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmaConfig {
    /// Base URL of the data.go.kr KMA services
    #[serde(default = "default_kma_base_url")]
    pub base_url: String,

    /// data.go.kr service key (decoded form). Can be set via `SITEWATCH_KMA_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<String>,
}

fn default_kma_base_url() -> String {
    "https://apis.data.go.kr/1360000".to_string()
}

impl Default for KmaConfig {
    fn default() -> Self {
        Self {
            base_url: default_kma_base_url(),
            service_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    /// Nominatim-compatible search endpoint
    #[serde(default = "default_geocoder_base_url")]
    pub base_url: String,

    /// Nominatim requires an identifying User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Pause between geocoding requests
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

fn default_geocoder_base_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_user_agent() -> String {
    format!("sitewatch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_delay_ms() -> u64 {
    1000
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoder_base_url(),
            user_agent: default_user_agent(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Refresh interval in minutes
    #[serde(default = "default_refresh_minutes")]
    pub refresh_minutes: u32,

    /// Maximum temperature requests in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// A stored snapshot older than this is refreshed before display
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: u32,
}

fn default_refresh_minutes() -> u32 {
    30
}

fn default_concurrency() -> usize {
    4
}

fn default_stale_after_minutes() -> u32 {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_minutes: default_refresh_minutes(),
            concurrency: default_concurrency(),
            stale_after_minutes: default_stale_after_minutes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    /// At or below this temperature a site is in severe cold (°C)
    #[serde(default = "default_severe_cold")]
    pub severe_cold_c: f64,

    /// At or below this temperature a site is in cold (°C)
    #[serde(default = "default_cold")]
    pub cold_c: f64,
}

fn default_severe_cold() -> f64 {
    -15.0
}

fn default_cold() -> f64 {
    -12.0
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            severe_cold_c: default_severe_cold(),
            cold_c: default_cold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// CSV export of the site roster
    #[serde(default = "default_roster_path")]
    pub roster: PathBuf,

    /// Geocoded coordinates cache
    #[serde(default = "default_site_cache_path")]
    pub site_cache: PathBuf,

    /// Last monitoring snapshot
    #[serde(default = "default_snapshot_path")]
    pub snapshot: PathBuf,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_roster_path() -> PathBuf {
    data_dir().join("sites.csv")
}

fn default_site_cache_path() -> PathBuf {
    data_dir().join("site_cache.csv")
}

fn default_snapshot_path() -> PathBuf {
    data_dir().join("snapshot.json")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            roster: default_roster_path(),
            site_cache: default_site_cache_path(),
            snapshot: default_snapshot_path(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location when `None`.
    ///
    /// A missing file is created with defaults. Environment overrides are
    /// applied after parsing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            tracing::info!("Writing default config to {}", config_path.display());
            let config = Self::default();
            config.save(&config_path)?;
            config
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Warnings are logged; errors fail the load.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult)> {
        let config = Self::load(path)?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(SERVICE_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.kma.service_key = Some(key.trim().to_string());
        }
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.kma.base_url, "kma.base_url", &mut result);
        self.validate_url(&self.geocoder.base_url, "geocoder.base_url", &mut result);

        if self
            .kma
            .service_key
            .as_deref()
            .map_or(true, |k| k.trim().is_empty())
        {
            result.add_warning(
                "kma.service_key",
                format!("No service key configured (set {} or kma.service_key)", SERVICE_KEY_ENV),
            );
        }

        if self.geocoder.user_agent.trim().is_empty() {
            result.add_error("geocoder.user_agent", "User agent must not be empty");
        }

        if self.geocoder.request_delay_ms < 1000 {
            result.add_warning(
                "geocoder.request_delay_ms",
                "Nominatim allows at most one request per second",
            );
        }

        if self.monitor.refresh_minutes == 0 {
            result.add_warning("monitor.refresh_minutes", "Refresh disabled (0 minutes)");
        } else if self.monitor.refresh_minutes > 1440 {
            result.add_warning(
                "monitor.refresh_minutes",
                "Refresh interval is more than 24 hours",
            );
        }

        if self.monitor.concurrency == 0 {
            result.add_error("monitor.concurrency", "Concurrency must be at least 1");
        }

        if !self.thresholds.severe_cold_c.is_finite() || !self.thresholds.cold_c.is_finite() {
            result.add_error("thresholds", "Thresholds must be finite numbers");
        } else if self.thresholds.severe_cold_c > self.thresholds.cold_c {
            result.add_error(
                "thresholds.severe_cold_c",
                format!(
                    "Severe cold threshold ({}) must not be above cold threshold ({})",
                    self.thresholds.severe_cold_c, self.thresholds.cold_c
                ),
            );
        }

        if !self.paths.roster.exists() {
            result.add_warning(
                "paths.roster",
                format!("Roster file does not exist: {}", self.paths.roster.display()),
            );
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }
                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// `<config dir>/sitewatch/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR);

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_missing_service_key_is_warning() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "kma.service_key"));
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.kma.base_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "kma.base_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.geocoder.base_url = "ftp://example.com".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = Config::default();
        config.thresholds.severe_cold_c = -5.0;
        config.thresholds.cold_c = -10.0;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "thresholds.severe_cold_c"));
    }

    #[test]
    fn test_equal_thresholds_allowed() {
        let mut config = Config::default();
        config.thresholds.severe_cold_c = -12.0;
        config.thresholds.cold_c = -12.0;
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.monitor.concurrency = 0;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "monitor.concurrency"));
    }

    #[test]
    fn test_fast_geocoder_is_warning() {
        let mut config = Config::default();
        config.geocoder.request_delay_ms = 100;
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "geocoder.request_delay_ms"));
    }

    #[test]
    fn test_env_override_sets_service_key() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| {
            (key == SERVICE_KEY_ENV).then(|| "  abc123  ".to_string())
        });
        assert_eq!(config.kma.service_key.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_blank_env_override_ignored() {
        let mut config = Config::default();
        config.kma.service_key = Some("from-file".to_string());
        config.apply_env_overrides(|_| Some("   ".to_string()));
        assert_eq!(config.kma.service_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [monitor]
            refresh_minutes = 10

            [thresholds]
            cold_c = -10.0
            "#,
        )
        .unwrap();

        assert_eq!(config.monitor.refresh_minutes, 10);
        assert_eq!(config.monitor.concurrency, 4);
        assert_eq!(config.thresholds.cold_c, -10.0);
        assert_eq!(config.thresholds.severe_cold_c, -15.0);
        assert_eq!(config.kma.base_url, "https://apis.data.go.kr/1360000");
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load(Some(&path)).unwrap();

        assert!(path.exists());
        assert_eq!(config.monitor.refresh_minutes, 30);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.monitor.refresh_minutes = 5;
        config.paths.roster = dir.path().join("roster.csv");
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.monitor.refresh_minutes, 5);
        assert_eq!(loaded.paths.roster, dir.path().join("roster.csv"));
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
