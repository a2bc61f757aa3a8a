//! Configuration types for esgf-dl

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Worker layout as written in the configuration file
///
/// Values are kept signed so that a negative count produces a configuration
/// error naming the offending key instead of an opaque parse failure.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadsSection {
    /// Total worker budget
    pub n: i64,

    /// Dedicated worker count per host
    #[serde(default)]
    pub host_limits: BTreeMap<String, i64>,
}

/// Validated worker layout
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadsConfig {
    /// Total worker budget across all partitions
    pub total_workers: usize,
    /// Dedicated worker count per host
    pub host_limits: BTreeMap<String, usize>,
}

impl Default for DownloadsConfig {
    /// Single catch-all worker, used when the `downloads` block is absent
    fn default() -> Self {
        Self {
            total_workers: 1,
            host_limits: BTreeMap::new(),
        }
    }
}

impl DownloadsConfig {
    /// Number of workers dedicated to specific hosts
    pub fn dedicated_workers(&self) -> usize {
        self.host_limits.values().sum()
    }

    /// Number of workers left for hosts without a dedicated limit
    pub fn catch_all_workers(&self) -> usize {
        self.total_workers.saturating_sub(self.dedicated_workers())
    }
}

impl TryFrom<&DownloadsSection> for DownloadsConfig {
    type Error = Error;

    fn try_from(section: &DownloadsSection) -> Result<Self> {
        let total_workers = usize::try_from(section.n).map_err(|_| {
            Error::config(
                "downloads.n",
                format!("total worker count must not be negative, got {}", section.n),
            )
        })?;

        let mut host_limits = BTreeMap::new();
        for (host, &limit) in &section.host_limits {
            let key = format!("downloads.host_limits.{host}");
            if host.trim().is_empty() {
                return Err(Error::config(key, "host name must not be empty"));
            }
            let limit = usize::try_from(limit).map_err(|_| {
                Error::config(
                    key.clone(),
                    format!("host limit for '{host}' must not be negative, got {limit}"),
                )
            })?;
            if limit == 0 {
                return Err(Error::config(
                    key,
                    format!("host limit for '{host}' must be at least 1"),
                ));
            }
            host_limits.insert(host.clone(), limit);
        }

        Ok(Self {
            total_workers,
            host_limits,
        })
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./esgf-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Name of the queue holding pending work (default: "downloads")
    #[serde(default = "default_download_queue")]
    pub download_queue: String,

    /// Name of the queue receiving failed work (default: "failed")
    #[serde(default = "default_failure_queue")]
    pub failure_queue: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            download_queue: default_download_queue(),
            failure_queue: default_failure_queue(),
        }
    }
}

/// HTTP client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout per file (default: 1 hour)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Connection establishment timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Retry configuration for transient failures inside a single file fetch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for the orchestrator
///
/// Only the `downloads` block describes the worker pool; everything else has
/// working defaults, so an empty JSON object is a valid configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Worker layout; absent means a single catch-all worker
    #[serde(default)]
    pub downloads: Option<DownloadsSection>,

    /// Database and queue names
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Interval between queue-size checks while running (default: 15 seconds)
    #[serde(default = "default_monitor_interval", with = "duration_serde")]
    pub monitor_interval: Duration,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Per-file retry settings
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            downloads: None,
            persistence: PersistenceConfig::default(),
            monitor_interval: default_monitor_interval(),
            http: HttpConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                "path",
                format!("failed to read config file '{}': {}", path.display(), e),
            )
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::Config {
            message: format!("failed to parse config: {e}"),
            key: None,
        })
    }

    /// Validate every field, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.monitor_interval.is_zero() {
            return Err(Error::config(
                "monitor_interval",
                "monitor interval must be greater than zero",
            ));
        }
        if self.persistence.download_queue == self.persistence.failure_queue {
            return Err(Error::config(
                "persistence.failure_queue",
                "failure queue must differ from the download queue",
            ));
        }
        self.downloads().map(|_| ())
    }

    /// Validated worker layout
    ///
    /// A missing `downloads` block is not fatal: it degrades to one catch-all
    /// worker and logs a warning.
    pub fn downloads(&self) -> Result<DownloadsConfig> {
        match &self.downloads {
            Some(section) => DownloadsConfig::try_from(section),
            None => {
                tracing::warn!("No downloads configuration found, using a single catch-all worker");
                Ok(DownloadsConfig::default())
            }
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./esgf-dl.db")
}

fn default_download_queue() -> String {
    "downloads".to_string()
}

fn default_failure_queue() -> String {
    "failed".to_string()
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    concat!("esgf-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
