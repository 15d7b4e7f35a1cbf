//! Offline subsystem configuration
//!
//! [`OfflineConfig`] carries every bound and switch the offline engine uses.
//! It is built from defaults, an optional TOML file, and environment
//! overrides, in that order.
//!
//! ```toml
//! remote_base_url = "https://api.example.com/apps/companion"
//! database_path = "/var/lib/companion/offline.db"
//! store_timeout_ms = 5000
//! fetch_timeout_ms = 30000
//! max_sync_attempts = 3
//! auto_sync = true
//! ```

use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default remote endpoint
const DEFAULT_REMOTE_URL: &str = "http://127.0.0.1:3000/api";

/// Environment variable overriding the remote endpoint
pub const ENV_API_URL: &str = "COMPANION_API_URL";
/// Environment variable carrying the remote api key
pub const ENV_API_KEY: &str = "COMPANION_API_KEY";
/// Environment variable overriding the database location
pub const ENV_DB_PATH: &str = "COMPANION_DB_PATH";

/// Offline engine configuration
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Base URL of the remote service
    pub remote_base_url: String,
    /// Bearer key for the remote service
    pub api_key: Option<String>,
    /// Bound for a single store operation
    pub store_timeout: Duration,
    /// Bound for opening the store
    pub init_timeout: Duration,
    /// Bound for a single network fetch
    pub fetch_timeout: Duration,
    /// Remote attempts before a pending operation is marked failed
    pub max_sync_attempts: u32,
    /// Retries per media download
    pub download_retries: u32,
    /// Linear backoff step between download attempts
    pub download_backoff_step: Duration,
    /// Whether connectivity changes trigger a sync automatically
    pub auto_sync: bool,
    /// Periodic sync while online, if any
    pub sync_interval: Option<Duration>,
    /// Items between progress reports inside the largest download phase
    pub progress_interval: usize,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            remote_base_url: DEFAULT_REMOTE_URL.to_string(),
            api_key: None,
            store_timeout: Duration::from_secs(5),
            init_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(30),
            max_sync_attempts: 3,
            download_retries: 3,
            download_backoff_step: Duration::from_secs(1),
            auto_sync: true,
            sync_interval: Some(Duration::from_secs(300)),
            progress_interval: 10,
        }
    }
}

impl OfflineConfig {
    /// Create a new builder seeded with defaults
    pub fn builder() -> OfflineConfigBuilder {
        OfflineConfigBuilder::default()
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let config = file.apply(Self::default());
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&source)?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `COMPANION_*` environment variables
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            self.remote_base_url = url;
        }
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Ok(path) = std::env::var(ENV_DB_PATH) {
            self.database_path = PathBuf::from(path);
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.remote_base_url).map_err(|_| ConfigError::InvalidUrl(self.remote_base_url.clone()))?;
        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("store_timeout"));
        }
        if self.init_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("init_timeout"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("fetch_timeout"));
        }
        if self.max_sync_attempts == 0 {
            return Err(ConfigError::InvalidValue("max_sync_attempts"));
        }
        if self.progress_interval == 0 {
            return Err(ConfigError::InvalidValue("progress_interval"));
        }
        Ok(())
    }

    /// Full URL for a remote path
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.remote_base_url.trim_end_matches('/'), path)
    }
}

fn default_database_path() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
    path.push("companion");
    path.push("offline.db");
    path
}

/// On-disk shape of the configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    remote_base_url: Option<String>,
    api_key: Option<String>,
    store_timeout_ms: Option<u64>,
    init_timeout_ms: Option<u64>,
    fetch_timeout_ms: Option<u64>,
    max_sync_attempts: Option<u32>,
    download_retries: Option<u32>,
    download_backoff_ms: Option<u64>,
    auto_sync: Option<bool>,
    sync_interval_secs: Option<u64>,
    progress_interval: Option<usize>,
}

impl ConfigFile {
    fn apply(self, mut config: OfflineConfig) -> OfflineConfig {
        if let Some(v) = self.database_path {
            config.database_path = v;
        }
        if let Some(v) = self.remote_base_url {
            config.remote_base_url = v;
        }
        if self.api_key.is_some() {
            config.api_key = self.api_key;
        }
        if let Some(v) = self.store_timeout_ms {
            config.store_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.init_timeout_ms {
            config.init_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.fetch_timeout_ms {
            config.fetch_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.max_sync_attempts {
            config.max_sync_attempts = v;
        }
        if let Some(v) = self.download_retries {
            config.download_retries = v;
        }
        if let Some(v) = self.download_backoff_ms {
            config.download_backoff_step = Duration::from_millis(v);
        }
        if let Some(v) = self.auto_sync {
            config.auto_sync = v;
        }
        if let Some(v) = self.sync_interval_secs {
            // 0 disables periodic sync
            config.sync_interval = (v > 0).then(|| Duration::from_secs(v));
        }
        if let Some(v) = self.progress_interval {
            config.progress_interval = v;
        }
        config
    }
}

/// Builder for OfflineConfig
#[derive(Debug, Default)]
pub struct OfflineConfigBuilder {
    config: OfflineConfig,
}

impl OfflineConfigBuilder {
    /// Set the database file
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = path.into();
        self
    }

    /// Set the remote base URL
    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote_base_url = url.into();
        self
    }

    /// Set the remote api key
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Set the per-operation store bound
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    /// Set the store initialization bound
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.config.init_timeout = timeout;
        self
    }

    /// Set the network fetch bound
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    /// Set the sync attempt ceiling
    pub fn max_sync_attempts(mut self, attempts: u32) -> Self {
        self.config.max_sync_attempts = attempts;
        self
    }

    /// Set the download retry count
    pub fn download_retries(mut self, retries: u32) -> Self {
        self.config.download_retries = retries;
        self
    }

    /// Set the linear download backoff step
    pub fn download_backoff_step(mut self, step: Duration) -> Self {
        self.config.download_backoff_step = step;
        self
    }

    /// Enable or disable automatic sync
    pub fn auto_sync(mut self, enabled: bool) -> Self {
        self.config.auto_sync = enabled;
        self
    }

    /// Set or clear the periodic sync interval
    pub fn sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.sync_interval = interval;
        self
    }

    /// Set the progress reporting interval
    pub fn progress_interval(mut self, items: usize) -> Self {
        self.config.progress_interval = items;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<OfflineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid value for {0}")]
    InvalidValue(&'static str),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("failed to read configuration: {0}")]
    Io(String),
}

impl From<ConfigError> for crate::shared::error::OfflineError {
    fn from(err: ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
