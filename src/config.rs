//! # Feature: Configuration System
//!
//! Service configuration from a YAML file (with environment variable
//! interpolation) or from plain environment variables.
//!
//! - **Version**: 3.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 3.0.0: Store backend, CORS allow-list and generation throttle settings
//! - 2.0.0: YAML configuration with `${VAR}` interpolation
//! - 1.0.0: Initial environment variable configuration

use anyhow::{Context, Result};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::rate_limiter::{DEFAULT_COOLDOWN_MINUTES, DEFAULT_MAX_TRIES, MAX_COOLDOWN_MINUTES};

/// Origins allowed to call the API from a browser when none are configured
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "https://imthebreakupbot.com",
    "https://www.imthebreakupbot.com",
    "https://itsbreakupbot.com",
    "https://www.itsbreakupbot.com",
    "http://localhost:3000",
];

// ============================================================================
// Settings Sections
// ============================================================================

/// Which key-value backend holds messages and threads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
    Upstash,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            "upstash" | "kv" | "redis" => Ok(StoreBackend::Upstash),
            other => anyhow::bail!("Unknown store backend '{}'. Use: memory, sqlite, upstash", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// SQLite database file (sqlite backend only)
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Upstash REST endpoint, e.g. `https://eu1-xxx.upstash.io`
    #[serde(default)]
    pub upstash_url: Option<String>,

    #[serde(default)]
    pub upstash_token: Option<String>,

    /// Expiry applied to every write (upstash backend only)
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Memory,
            database_path: default_database_path(),
            upstash_url: None,
            upstash_token: None,
            ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key; generation fails with an error while this is empty
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_top_p")]
    pub top_p: f64,

    #[serde(default)]
    pub presence_penalty: Option<f64>,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        OpenAiConfig {
            api_key: String::new(),
            model: default_openai_model(),
            base_url: default_openai_base_url(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            presence_penalty: None,
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Server-side tries/cooldown on `/generate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
}

impl ThrottleConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_minutes.saturating_mul(60))
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfig {
            enabled: false,
            max_tries: default_max_tries(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

// ============================================================================
// Service Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Public base URL used in share links; inferred from request headers when unset
    #[serde(default)]
    pub site_url: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    #[serde(default)]
    pub throttle: ThrottleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: default_bind_addr(),
            site_url: None,
            log_level: default_log_level(),
            openai: OpenAiConfig::default(),
            store: StoreConfig::default(),
            allowed_origins: default_allowed_origins(),
            throttle: ThrottleConfig::default(),
        }
    }
}

// Default value functions for serde
fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_path() -> String {
    "breakupbot.db".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temperature() -> f64 {
    0.9
}

fn default_top_p() -> f64 {
    1.0
}

fn default_max_output_tokens() -> u32 {
    500
}

fn default_allowed_origins() -> Vec<String> {
    DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect()
}

fn default_max_tries() -> u32 {
    DEFAULT_MAX_TRIES
}

fn default_cooldown_minutes() -> u64 {
    DEFAULT_COOLDOWN_MINUTES
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env_non_empty(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        None => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let config = Config {
            bind_addr: env_non_empty("BIND_ADDR").unwrap_or(defaults.bind_addr),
            site_url: env_non_empty("SITE_URL"),
            log_level: env_non_empty("LOG_LEVEL").unwrap_or(defaults.log_level),
            openai: OpenAiConfig {
                api_key: env_non_empty("OPENAI_API_KEY").unwrap_or_default(),
                model: env_non_empty("OPENAI_MODEL").unwrap_or(defaults.openai.model),
                base_url: env_non_empty("OPENAI_BASE_URL").unwrap_or(defaults.openai.base_url),
                temperature: env_parse("OPENAI_TEMPERATURE")?.unwrap_or(defaults.openai.temperature),
                top_p: env_parse("OPENAI_TOP_P")?.unwrap_or(defaults.openai.top_p),
                presence_penalty: env_parse("OPENAI_PRESENCE_PENALTY")?,
                max_output_tokens: env_parse("OPENAI_MAX_OUTPUT_TOKENS")?
                    .unwrap_or(defaults.openai.max_output_tokens),
            },
            store: StoreConfig {
                backend: env_parse("STORE_BACKEND")?.unwrap_or(defaults.store.backend),
                database_path: env_non_empty("DATABASE_PATH").unwrap_or(defaults.store.database_path),
                upstash_url: env_non_empty("UPSTASH_REDIS_REST_URL"),
                upstash_token: env_non_empty("UPSTASH_REDIS_REST_TOKEN"),
                ttl_secs: env_parse("STORE_TTL_SECS")?,
            },
            allowed_origins: env_non_empty("ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.allowed_origins),
            throttle: ThrottleConfig {
                enabled: env_parse("THROTTLE_ENABLED")?.unwrap_or(defaults.throttle.enabled),
                max_tries: env_parse("MAX_TRIES")?.unwrap_or(defaults.throttle.max_tries),
                cooldown_minutes: env_parse("COOLDOWN_MINUTES")?
                    .unwrap_or(defaults.throttle.cooldown_minutes),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable interpolation
    ///
    /// Supports `${VAR_NAME}` syntax for environment variable substitution.
    /// Example: `api_key: "${OPENAI_API_KEY}"`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate YAML content after interpolating environment variables
    pub fn from_yaml(content: &str) -> Result<Self> {
        let interpolated = interpolate_env_vars(content)?;
        let config: Config = serde_yaml::from_str(&interpolated).context("Invalid YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Auto-detect and load configuration
    ///
    /// Priority order:
    /// 1. If CONFIG_FILE env var is set, load from that file
    /// 2. If config.yaml exists in current directory, load from it
    /// 3. Fall back to environment variables
    pub fn auto_load() -> Result<Self> {
        if let Ok(config_path) = env::var("CONFIG_FILE") {
            info!("Loading config from CONFIG_FILE: {}", config_path);
            return Self::from_file(&config_path);
        }

        let default_config_path = "config.yaml";
        if Path::new(default_config_path).exists() {
            info!("Loading config from {}", default_config_path);
            return Self::from_file(default_config_path);
        }

        info!("No config file found, using environment variables");
        Self::from_env()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind_addr '{}'", self.bind_addr))?;

        if self.throttle.max_tries == 0 {
            anyhow::bail!("throttle.max_tries must be at least 1");
        }

        if self.throttle.cooldown_minutes > MAX_COOLDOWN_MINUTES {
            anyhow::bail!(
                "throttle.cooldown_minutes must be at most {} (one year), got {}",
                MAX_COOLDOWN_MINUTES,
                self.throttle.cooldown_minutes
            );
        }

        if !(0.0..=2.0).contains(&self.openai.temperature) {
            anyhow::bail!("openai.temperature must be between 0 and 2, got {}", self.openai.temperature);
        }

        if !(0.0..=1.0).contains(&self.openai.top_p) {
            anyhow::bail!("openai.top_p must be between 0 and 1, got {}", self.openai.top_p);
        }

        if let Some(penalty) = self.openai.presence_penalty {
            if !(-2.0..=2.0).contains(&penalty) {
                anyhow::bail!("openai.presence_penalty must be between -2 and 2, got {}", penalty);
            }
        }

        if self.openai.max_output_tokens == 0 {
            anyhow::bail!("openai.max_output_tokens must be positive");
        }

        if self.store.backend == StoreBackend::Upstash {
            let has_url = self.store.upstash_url.as_deref().is_some_and(|u| !u.is_empty());
            let has_token = self.store.upstash_token.as_deref().is_some_and(|t| !t.is_empty());
            if !has_url || !has_token {
                anyhow::bail!("The upstash store requires store.upstash_url and store.upstash_token");
            }
        }

        Ok(())
    }

    /// Configured public base URL without trailing slashes
    pub fn site_url(&self) -> Option<&str> {
        self.site_url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/'))
            .filter(|u| !u.is_empty())
    }
}

// ============================================================================
// Environment Variable Interpolation
// ============================================================================

static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    // Pattern: ${VAR_NAME} or ${VAR_NAME:-default}
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex")
});

/// Interpolate environment variables in a string
///
/// Supports `${VAR_NAME}` syntax. If a variable is not set, returns an error.
/// Use `${VAR_NAME:-default}` for default values.
fn interpolate_env_vars(content: &str) -> Result<String> {
    let mut errors = Vec::new();

    let result = ENV_VAR_PATTERN.replace_all(content, |cap: &regex::Captures| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    errors.push(format!("Environment variable '{}' is not set", var_name));
                    String::new()
                }
            },
        }
    });

    if !errors.is_empty() {
        anyhow::bail!("Missing environment variables:\n  - {}", errors.join("\n  - "));
    }

    Ok(result.into_owned())
}

// ============================================================================
// Tests
// ============================================================================
