//! Configuration loading for the webhook monitor.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `HOOKWATCH_`, producing a typed [`AppConfig`].

use std::{
    collections::BTreeMap,
    env, io,
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "HOOKWATCH_";

/// Application configuration derived from `HOOKWATCH_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    /// Overrides the GitHub API base for every server (mock servers in tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_api_base: Option<String>,
    #[serde(default)]
    pub checker: CheckerConfig,
}

/// Periodic webhook checker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CheckerConfig {
    #[serde(default = "default_checker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_checker_initial_delay_seconds")]
    pub initial_delay_seconds: u64,
    #[serde(default = "default_checker_interval_seconds")]
    pub interval_seconds: u64,
    /// Servers reporting this many remaining requests or fewer are skipped
    #[serde(default = "default_checker_quota_low_water_mark")]
    pub quota_low_water_mark: u32,
    #[serde(default = "default_checker_outcome_ttl_seconds")]
    pub outcome_ttl_seconds: u64,
    #[serde(default = "default_checker_outcome_cache_capacity")]
    pub outcome_cache_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            github_api_base: None,
            checker: CheckerConfig::default(),
        }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            enabled: default_checker_enabled(),
            initial_delay_seconds: default_checker_initial_delay_seconds(),
            interval_seconds: default_checker_interval_seconds(),
            quota_low_water_mark: default_checker_quota_low_water_mark(),
            outcome_ttl_seconds: default_checker_outcome_ttl_seconds(),
            outcome_cache_capacity: default_checker_outcome_cache_capacity(),
        }
    }
}

impl CheckerConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn outcome_ttl(&self) -> Duration {
        Duration::from_secs(self.outcome_ttl_seconds)
    }

    pub fn cache_capacity(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.outcome_cache_capacity)
            .ok_or(ConfigError::InvalidOutcomeCacheCapacity)
    }

    /// Validate checker configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(60..=86_400).contains(&self.interval_seconds) {
            return Err(ConfigError::InvalidCheckerInterval {
                value: self.interval_seconds,
            });
        }

        if self.initial_delay_seconds > self.interval_seconds {
            return Err(ConfigError::InvalidCheckerInitialDelay {
                value: self.initial_delay_seconds,
                interval: self.interval_seconds,
            });
        }

        if self.quota_low_water_mark > 1000 {
            return Err(ConfigError::InvalidQuotaLowWaterMark {
                value: self.quota_low_water_mark,
            });
        }

        if self.outcome_ttl_seconds < 60 {
            return Err(ConfigError::InvalidOutcomeTtl {
                value: self.outcome_ttl_seconds,
            });
        }

        self.cache_capacity()?;

        Ok(())
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        config.database_url = redact_database_password(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.profile.as_str(), "local" | "test") && self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        self.checker.validate()?;

        if let Err(source) = self.bind_addr() {
            return Err(ConfigError::InvalidBindAddr {
                value: self.api_bind_addr.clone(),
                source,
            });
        }

        Ok(())
    }
}

fn redact_database_password(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("[REDACTED]")).is_ok() {
                url.to_string()
            } else {
                database_url.to_string()
            }
        }
        _ => database_url.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://hookwatch.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_checker_enabled() -> bool {
    true
}

fn default_checker_initial_delay_seconds() -> u64 {
    60
}

fn default_checker_interval_seconds() -> u64 {
    3600
}

fn default_checker_quota_low_water_mark() -> u32 {
    10
}

fn default_checker_outcome_ttl_seconds() -> u64 {
    7200
}

fn default_checker_outcome_cache_capacity() -> usize {
    10_000
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error(
        "no operator tokens configured; set HOOKWATCH_OPERATOR_TOKEN or HOOKWATCH_OPERATOR_TOKENS"
    )]
    MissingOperatorTokens,
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("checker interval must be between 60 and 86400 seconds, got {value}")]
    InvalidCheckerInterval { value: u64 },
    #[error("checker initial delay ({value}s) cannot exceed the interval ({interval}s)")]
    InvalidCheckerInitialDelay { value: u64, interval: u64 },
    #[error("quota low-water mark must be between 0 and 1000, got {value}")]
    InvalidQuotaLowWaterMark { value: u32 },
    #[error("outcome TTL must be at least 60 seconds, got {value}")]
    InvalidOutcomeTtl { value: u64 },
    #[error("outcome cache capacity must be greater than zero")]
    InvalidOutcomeCacheCapacity,
}

/// Reads `.env`, `.env.local`, `.env.<profile>` and `.env.<profile>.local`
/// from a base directory, then the process environment, later sources
/// overriding earlier ones.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the layered configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut layers = self.read_layers()?;

        let config = AppConfig {
            profile: layers.string("PROFILE").unwrap_or_else(default_profile),
            api_bind_addr: layers
                .string("API_BIND_ADDR")
                .unwrap_or_else(default_api_bind_addr),
            log_level: layers.string("LOG_LEVEL").unwrap_or_else(default_log_level),
            log_format: layers.string("LOG_FORMAT").unwrap_or_else(default_log_format),
            database_url: layers
                .string("DATABASE_URL")
                .unwrap_or_else(default_database_url),
            db_max_connections: layers
                .parsed("DB_MAX_CONNECTIONS")?
                .unwrap_or_else(default_db_max_connections),
            db_acquire_timeout_ms: layers
                .parsed("DB_ACQUIRE_TIMEOUT_MS")?
                .unwrap_or_else(default_db_acquire_timeout_ms),
            operator_tokens: layers.operator_tokens(),
            github_api_base: layers.string("GITHUB_API_BASE"),
            checker: CheckerConfig::from_layers(&mut layers)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn read_layers(&self) -> Result<Layers, ConfigError> {
        let mut layers = Layers::default();
        layers.merge_file(&self.base_dir.join(".env"))?;
        layers.merge_file(&self.base_dir.join(".env.local"))?;

        // The profile may come from the process environment or the base files.
        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| layers.values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);
        layers.merge_file(&self.base_dir.join(format!(".env.{profile}")))?;
        layers.merge_file(&self.base_dir.join(format!(".env.{profile}.local")))?;

        layers.merge(env::vars());
        Ok(layers)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckerConfig {
    fn from_layers(layers: &mut Layers) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            enabled: layers
                .parsed("CHECKER_ENABLED")?
                .unwrap_or(defaults.enabled),
            initial_delay_seconds: layers
                .parsed("CHECKER_INITIAL_DELAY_SECONDS")?
                .unwrap_or(defaults.initial_delay_seconds),
            interval_seconds: layers
                .parsed("CHECKER_INTERVAL_SECONDS")?
                .unwrap_or(defaults.interval_seconds),
            quota_low_water_mark: layers
                .parsed("CHECKER_QUOTA_LOW_WATER_MARK")?
                .unwrap_or(defaults.quota_low_water_mark),
            outcome_ttl_seconds: layers
                .parsed("CHECKER_OUTCOME_TTL_SECONDS")?
                .unwrap_or(defaults.outcome_ttl_seconds),
            outcome_cache_capacity: layers
                .parsed("CHECKER_OUTCOME_CACHE_CAPACITY")?
                .unwrap_or(defaults.outcome_cache_capacity),
        })
    }
}

/// `HOOKWATCH_*` values with the prefix stripped, last writer wins.
#[derive(Debug, Default)]
struct Layers {
    values: BTreeMap<String, String>,
}

impl Layers {
    fn merge(&mut self, pairs: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in pairs {
            if let Some(name) = key.strip_prefix(ENV_PREFIX) {
                self.values.insert(name.to_string(), value);
            }
        }
    }

    /// Merges one dotenv file; a missing file is not an error.
    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let env_file_error = |source| ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        };

        let entries = match dotenvy::from_path_iter(path) {
            Ok(entries) => entries,
            Err(dotenvy::Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(());
            }
            Err(err) => return Err(env_file_error(err)),
        };
        let pairs = entries
            .collect::<Result<Vec<_>, _>>()
            .map_err(env_file_error)?;
        self.merge(pairs);
        Ok(())
    }

    /// Removes and returns a trimmed, non-blank value.
    fn string(&mut self, key: &str) -> Option<String> {
        self.values
            .remove(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T: FromStr>(&mut self, key: &str) -> Result<Option<T>, ConfigError> {
        self.string(key)
            .map(|value| {
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: format!("{ENV_PREFIX}{key}"),
                    value,
                })
            })
            .transpose()
    }

    /// `OPERATOR_TOKENS` (comma separated) wins over a single `OPERATOR_TOKEN`.
    fn operator_tokens(&mut self) -> Vec<String> {
        let single = self.string("OPERATOR_TOKEN");
        match self.values.remove("OPERATOR_TOKENS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect(),
            None => single.into_iter().collect(),
        }
    }
}
