//! Configuration types for lotsync components.
//!
//! Values are layered: built-in defaults, then an optional TOML file
//! (see [`default_config_path`]), then a handful of environment variables
//! (`DB_MAX_CONNECTIONS`, `SYNC_PAGE_SIZE`, `HTTP_TIMEOUT_SECS`). Secrets such as
//! the database URL and the API key never live in the file; the CLI reads them
//! from flags or the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// Database connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// HTTP client configuration for upstream API calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Hard deadline for every page request.
    pub timeout_secs: u64,
    /// Deadline for the connectivity probe made before the first page.
    pub probe_timeout_secs: u64,
    /// Upper bound on upstream requests per second, independent of retry backoff.
    pub requests_per_second: f64,
    pub user_agent: String,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            probe_timeout_secs: 10,
            requests_per_second: 4.0,
            user_agent: "lotsync/0.1 (inventory-mirror)".to_string(),
        }
    }
}

/// Delays prescribed by the error classifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub network_delay_ms: u64,
    pub server_base_delay_ms: u64,
    pub server_max_delay_ms: u64,
    pub timeout_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            network_delay_ms: 1_000,
            server_base_delay_ms: 2_000,
            server_max_delay_ms: 30_000,
            timeout_delay_ms: 3_000,
        }
    }
}

/// Ingestion run configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Fixed id of the sync target; keys the status row and the checkpoint file.
    pub target_id: String,
    /// Items requested per upstream page.
    pub page_size: u32,
    /// A checkpoint is written every this many pages.
    pub checkpoint_interval: u32,
    /// Attempts per page before the run fails.
    pub max_attempts: u32,
    /// Rows of one page upserted concurrently.
    pub upsert_concurrency: usize,
    /// Consecutive empty pages that end a run.
    pub empty_page_threshold: u32,
    /// Pages past the reported last page tolerated before stopping.
    pub completion_buffer: u32,
    /// Share of the reported total that counts as a complete mirror.
    pub completion_ratio: f64,
    pub checkpoint_max_age_hours: i64,
    /// A `running` status with no activity for this long is treated as a crashed run.
    pub stale_run_minutes: i64,
    /// Directory holding checkpoint files. Defaults to `<data_dir>/lotsync`.
    pub checkpoint_dir: Option<PathBuf>,
}

impl SyncConfig {
    pub fn checkpoint_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.checkpoint_max_age_hours)
    }

    pub fn stale_run_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_run_minutes)
    }

    /// Path of the checkpoint file for the configured target.
    pub fn checkpoint_path(&self) -> PathBuf {
        let dir = self.checkpoint_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("lotsync")
        });
        dir.join(format!("checkpoint-{}.json", self.target_id))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            target_id: "inventory".to_string(),
            page_size: 25,
            checkpoint_interval: 10,
            max_attempts: 5,
            upsert_concurrency: 8,
            empty_page_threshold: 25,
            completion_buffer: 5,
            completion_ratio: 0.95,
            checkpoint_max_age_hours: 24,
            stale_run_minutes: 15,
            checkpoint_dir: None,
        }
    }
}

/// Query surface limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// Complete configuration file layout.
///
/// ```toml
/// [sync]
/// page_size = 50
/// checkpoint_interval = 20
///
/// [query]
/// max_page_size = 200
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db: DbConfig,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub sync: SyncConfig,
    pub query: QueryConfig,
}

impl AppConfig {
    /// Parses a TOML document. Missing sections and keys fall back to defaults.
    pub fn from_toml(content: &str) -> Result<Self, AppError> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| AppError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides from a lookup function.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DB_MAX_CONNECTIONS") {
            self.db.max_connections = parse_env("DB_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = lookup("SYNC_PAGE_SIZE") {
            self.sync.page_size = parse_env("SYNC_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("HTTP_TIMEOUT_SECS") {
            self.http.timeout_secs = parse_env("HTTP_TIMEOUT_SECS", &v)?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.sync.page_size == 0 {
            return Err(AppError::ConfigError("sync.page_size must be > 0".into()));
        }
        if self.sync.checkpoint_interval == 0 {
            return Err(AppError::ConfigError(
                "sync.checkpoint_interval must be > 0".into(),
            ));
        }
        if self.sync.max_attempts == 0 {
            return Err(AppError::ConfigError("sync.max_attempts must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.sync.completion_ratio) {
            return Err(AppError::ConfigError(
                "sync.completion_ratio must be within 0.0..=1.0".into(),
            ));
        }
        if self.http.requests_per_second <= 0.0 {
            return Err(AppError::ConfigError(
                "http.requests_per_second must be > 0".into(),
            ));
        }
        if self.query.max_page_size == 0 || self.query.default_page_size == 0 {
            return Err(AppError::ConfigError("query page sizes must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::ConfigError(format!("{} has invalid value '{}'", name, value)))
}

/// Returns `<config_dir>/lotsync/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("lotsync").join("config.toml"))
}

/// Loads configuration from `path` (or the default location) and the environment.
///
/// A missing file is not an error: defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, AppError> {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => default_config_path(),
    };

    let mut config = match path {
        Some(p) if p.exists() => {
            tracing::debug!(path = %p.display(), "Loading configuration file");
            let content = std::fs::read_to_string(&p)?;
            AppConfig::from_toml(&content)?
        }
        _ => AppConfig::default(),
    };

    config.apply_env(|name| std::env::var(name).ok())?;
    Ok(config)
}
