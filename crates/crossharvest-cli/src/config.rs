//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use crossharvest_core::{ClientConfig, RetryPolicy};
use crossharvest_crossref::api::CROSSREF_API;
use crossharvest_crossref::config as harvest_defaults;
use serde::Deserialize;

/// Environment variable consulted when no contact address is configured
pub const CONTACT_ENV: &str = "CROSSREF_MAILTO";

/// Global configuration for crossharvest
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub client: ClientSection,
    pub harvest: HarvestSection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub base_url: String,
    pub client_identifier: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub contact: Option<String>,
    pub max_retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_ms: u64,
    pub min_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let client = ClientConfig::default();
        Self {
            base_url: CROSSREF_API.to_string(),
            client_identifier: None,
            contact: None,
            max_retry_attempts: retry.max_attempts,
            backoff_base_ms: retry.base_delay.as_millis() as u64,
            backoff_max_ms: retry.max_delay.as_millis() as u64,
            jitter_ms: retry.max_jitter.as_millis() as u64,
            min_interval_ms: client.min_interval.as_millis() as u64,
            request_timeout_secs: client.request_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestSection {
    pub per_window_threshold: u64,
    pub rows_per_call: u32,
    pub sort_key: String,
    pub batch_days: u32,
    pub prefixes: Vec<String>,
    pub max_cursor_repeats: u32,
    pub max_pages_per_window: u32,
    pub max_fallback_pages: u32,
    pub fallback_enabled: bool,
}

impl Default for HarvestSection {
    fn default() -> Self {
        Self {
            per_window_threshold: harvest_defaults::DEFAULT_THRESHOLD,
            rows_per_call: crossharvest_crossref::api::MAX_ROWS,
            sort_key: "deposited".to_string(),
            batch_days: harvest_defaults::DEFAULT_BATCH_DAYS,
            prefixes: Vec::new(),
            max_cursor_repeats: harvest_defaults::DEFAULT_MAX_CURSOR_REPEATS,
            max_pages_per_window: harvest_defaults::DEFAULT_MAX_PAGES_PER_WINDOW,
            max_fallback_pages: harvest_defaults::DEFAULT_MAX_FALLBACK_PAGES,
            fallback_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub default_dir: PathBuf,
    /// Gzip the NDJSON outputs
    pub gzip: bool,
    /// Mirror raw API items to `<stem>_raw.ndjson`
    pub provenance: bool,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            default_dir: PathBuf::from("./data"),
            gzip: true,
            provenance: true,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl ClientSection {
    /// Configured contact, else `$CROSSREF_MAILTO`
    pub fn contact(&self) -> Option<String> {
        self.contact
            .clone()
            .or_else(|| std::env::var(CONTACT_ENV).ok())
            .filter(|c| !c.trim().is_empty())
    }

    /// Client settings; validation happens when the client is built
    pub fn to_client_config(&self) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            base_url: self.base_url.clone(),
            client_identifier: self
                .client_identifier
                .clone()
                .unwrap_or(defaults.client_identifier),
            contact: self.contact().unwrap_or_default(),
            retry: RetryPolicy {
                max_attempts: self.max_retry_attempts,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
                max_jitter: Duration::from_millis(self.jitter_ms),
            },
            min_interval: Duration::from_millis(self.min_interval_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./crossharvest.toml (current directory)
    /// 2. ~/.config/crossharvest/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("crossharvest.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "crossharvest") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.client.base_url, CROSSREF_API);
        assert_eq!(config.client.max_retry_attempts, 6);
        assert_eq!(config.harvest.per_window_threshold, 1500);
        assert_eq!(config.harvest.rows_per_call, 1000);
        assert!(config.harvest.fallback_enabled);
        assert_eq!(config.output.default_dir, PathBuf::from("./data"));
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("CROSSHARVEST_TEST_CONTACT", "ops@example.org");
        assert_eq!(
            expand_env_var("${CROSSHARVEST_TEST_CONTACT}"),
            Some("ops@example.org".to_string())
        );
        std::env::remove_var("CROSSHARVEST_TEST_CONTACT");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[client]
contact = "harvest@example.org"
client_identifier = "preprint-tracker/2.1"
max_retry_attempts = 3
backoff_base_ms = 200

[harvest]
per_window_threshold = 800
sort_key = "indexed"
prefixes = ["10.1101", "10.21203"]
fallback_enabled = false

[output]
default_dir = "/tmp/crossref"
gzip = false
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.client.contact(), Some("harvest@example.org".to_string()));
        assert_eq!(config.harvest.per_window_threshold, 800);
        assert_eq!(config.harvest.prefixes.len(), 2);
        assert!(!config.harvest.fallback_enabled);
        assert!(!config.output.gzip);
        // Unset keys keep their defaults
        assert_eq!(config.harvest.batch_days, 7);

        let client = config.client.to_client_config();
        assert_eq!(client.client_identifier, "preprint-tracker/2.1");
        assert_eq!(client.retry.max_attempts, 3);
        assert_eq!(client.retry.base_delay, Duration::from_millis(200));
        assert_eq!(client.retry.max_delay, Duration::from_secs(60));
    }
}
