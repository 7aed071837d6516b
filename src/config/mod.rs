// gemflows — Run multi-step AI workflows from YAML recipes
// License: Apache-2.0

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("home directory not found")]
    NoHomeDir,
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub recipes: RecipesConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: String::new(),
            default_model: default_model(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_max_retries() -> usize {
    2
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// Recipes
// ---------------------------------------------------------------------------

pub const DEFAULT_RECIPES_BASE_URL: &str =
    "https://raw.githubusercontent.com/ProggePal/palsGemFlows/main/workflows/";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipesConfig {
    /// Raw-content base URL of the remote recipe catalog.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_github_repo")]
    pub github_repo: String,
    #[serde(default = "default_github_ref")]
    pub github_ref: String,
    #[serde(default = "default_github_dir")]
    pub github_dir: String,
    /// Local directory searched for workflows before the remote catalog.
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: String,
}

impl Default for RecipesConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cache_ttl_secs: default_cache_ttl_secs(),
            github_repo: default_github_repo(),
            github_ref: default_github_ref(),
            github_dir: default_github_dir(),
            workflows_dir: default_workflows_dir(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_RECIPES_BASE_URL.to_string()
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_github_repo() -> String {
    "ProggePal/palsGemFlows".to_string()
}
fn default_github_ref() -> String {
    "main".to_string()
}
fn default_github_dir() -> String {
    "workflows".to_string()
}
fn default_workflows_dir() -> String {
    "workflows".to_string()
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub posthog_api_key: String,
    /// Empty means the PostHog US ingest endpoint.
    #[serde(default)]
    pub posthog_endpoint: String,
    /// Log step completions when PostHog is not configured.
    #[serde(default)]
    pub log_events: bool,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a JSON file, falling back to defaults.
    /// Environment overrides are applied either way.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (prefix: GEMFLOWS_)
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("GEMFLOWS_PROVIDER_API_KEY") {
            self.provider.api_key = v;
        } else if self.provider.api_key.is_empty() {
            if let Some(v) = get("GEMINI_API_KEY") {
                self.provider.api_key = v;
            }
        }
        if let Some(v) = get("GEMFLOWS_PROVIDER_API_BASE") {
            self.provider.api_base = v;
        }
        if let Some(v) = get("GEMFLOWS_PROVIDER_DEFAULT_MODEL") {
            self.provider.default_model = v;
        }
        if let Some(v) = get("GEMFLOWS_RECIPES_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.recipes.base_url = v;
        }
        if let Some(v) = get("POSTHOG_API_KEY") {
            self.telemetry.posthog_api_key = v;
        }
        if let Some(v) = get("POSTHOG_ENDPOINT") {
            self.telemetry.posthog_endpoint = v;
        }
    }

    /// Get the default config file path: ~/.gemflows/config.json
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".gemflows").join("config.json"))
    }

    /// Validate configuration for basic correctness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "provider.timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.provider.max_retries > 10 {
            return Err(ConfigError::Invalid {
                field: "provider.max_retries",
                reason: format!("{} is more than the limit of 10", self.provider.max_retries),
            });
        }
        if let Err(e) = url::Url::parse(&self.recipes.base_url) {
            return Err(ConfigError::Invalid {
                field: "recipes.base_url",
                reason: e.to_string(),
            });
        }
        if !self.provider.api_base.is_empty() {
            if let Err(e) = url::Url::parse(&self.provider.api_base) {
                return Err(ConfigError::Invalid {
                    field: "provider.api_base",
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
