//! Configuration types for scap-feed

use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Default number of chunks the queue holds before the producer is suspended
pub const DEFAULT_QUEUE_SIZE: usize = 3;
/// Default maximum number of items per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 100;
/// Default number of attempts shared by one producer session
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 20;
/// Public NVD REST API root
pub const DEFAULT_NVD_BASE_URL: &str = "https://services.nvd.nist.gov/rest/json/";

/// Queue sizing for a single processor run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Maximum number of items per chunk (default: 100)
    ///
    /// For API producers this is the page size requested from the upstream.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum number of chunks buffered between producer and worker (default: 3)
    ///
    /// At most `chunk_size * queue_size` items are held in memory.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            queue_size: default_queue_size(),
        }
    }
}

impl ProcessorConfig {
    /// Config with an item-specific chunk size and the default queue size
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..Default::default()
        }
    }
}

/// Retry configuration for transient upstream failures
///
/// `attempts` is the budget for one producer session: attempts spent while
/// sizing the result set are no longer available to the download loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one (default: 20)
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,

    /// Delay before the first retry (default: 0, retry immediately)
    #[serde(default, with = "millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 5 seconds)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to non-zero delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            initial_delay: Duration::ZERO,
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Filter options passed to NVD API requests
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFilter {
    /// Only items modified at or after this time
    #[serde(default)]
    pub last_modified_start: Option<NaiveDateTime>,

    /// Only items modified at or before this time (defaults to now when only a start is set)
    #[serde(default)]
    pub last_modified_end: Option<NaiveDateTime>,

    /// Keyword search (CPE and CVE endpoints)
    #[serde(default)]
    pub keyword_search: Option<String>,

    /// Restrict to a single CVE (CVE and CPE match endpoints)
    #[serde(default)]
    pub cve_id: Option<String>,

    /// Restrict to match strings matching this CPE (CPE match endpoint)
    #[serde(default)]
    pub match_string_search: Option<String>,
}

/// NVD API access configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NvdApiConfig {
    /// API root URL (default: the public NVD REST API)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key for extended rate limits
    #[serde(default)]
    pub api_key: Option<String>,

    /// Minimum interval between requests (None = derived from whether an API key is set)
    #[serde(default, with = "optional_millis_serde")]
    pub request_interval: Option<Duration>,

    /// HTTP request timeout (default: 180 seconds)
    #[serde(default = "default_request_timeout", with = "millis_serde")]
    pub request_timeout: Duration,

    /// Fetch at most this many items (None = all available)
    #[serde(default)]
    pub request_results: Option<u64>,

    /// Index of the first item to request
    #[serde(default)]
    pub start_index: u64,

    /// Request filters
    #[serde(default)]
    pub filter: RequestFilter,
}

impl Default for NvdApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            request_interval: None,
            request_timeout: default_request_timeout(),
            request_results: None,
            start_index: 0,
            filter: RequestFilter::default(),
        }
    }
}

impl NvdApiConfig {
    /// Interval between requests honouring the public NVD rate limits
    ///
    /// Without a key the NVD allows 5 requests per 30 seconds, with a key 50.
    pub fn effective_request_interval(&self) -> Duration {
        match (self.request_interval, &self.api_key) {
            (Some(interval), _) => interval,
            (None, Some(_)) => Duration::from_millis(600),
            (None, None) => Duration::from_secs(6),
        }
    }
}

/// SQLite destination/source configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path (default: "./scap.db")
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Update existing rows on conflicting primary keys instead of skipping them (default: true)
    #[serde(default = "default_true")]
    pub update: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            update: true,
        }
    }
}

/// JSON document output configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonOutputConfig {
    /// Directory to write the JSON file into (default: ".")
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Gzip compress the resulting file
    #[serde(default)]
    pub compress: bool,

    /// JSON schema the written document is validated against
    #[serde(default)]
    pub schema_path: Option<PathBuf>,

    /// Fail the run when validation fails instead of only logging (default: false)
    #[serde(default)]
    pub strict_validation: bool,
}

impl Default for JsonOutputConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            compress: false,
            schema_path: None,
            strict_validation: false,
        }
    }
}

/// Main configuration
///
/// Each sub-config is consumed by one component: the processor sizes the queue,
/// the producer uses `retry` and `nvd` (or `database` when reading from SQLite),
/// the worker uses `database` or `json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Queue sizing
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Retry budget for API producers
    #[serde(default)]
    pub retry: RetryConfig,

    /// NVD API access
    #[serde(default)]
    pub nvd: NvdApiConfig,

    /// SQLite database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// JSON output
    #[serde(default)]
    pub json: JsonOutputConfig,
}

impl Config {
    /// Check the settings that would otherwise fail deep inside a run
    pub fn validate(&self) -> Result<()> {
        if self.processor.chunk_size == 0 {
            return Err(config_error("chunk size must be at least 1", "chunk_size"));
        }
        if self.processor.queue_size == 0 {
            return Err(config_error("queue size must be at least 1", "queue_size"));
        }
        if self.retry.attempts == 0 {
            return Err(config_error(
                "retry attempts must be at least 1",
                "attempts",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "backoff multiplier must be at least 1.0",
                "backoff_multiplier",
            ));
        }
        if let (Some(start), Some(end)) = (
            self.nvd.filter.last_modified_start,
            self.nvd.filter.last_modified_end,
        ) {
            if start > end {
                return Err(config_error(
                    "last modification start date is after the end date",
                    "last_modified_start",
                ));
            }
        }
        url::Url::parse(&self.nvd.base_url)?;
        Ok(())
    }

    /// Parse a configuration from a JSON string, filling in defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_base_url() -> String {
    DEFAULT_NVD_BASE_URL.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./scap.db")
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Optional Duration serialization helper (milliseconds)
mod optional_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.processor.chunk_size, 100);
        assert_eq!(config.processor.queue_size, 3);
        assert_eq!(config.retry.attempts, 20);
        assert_eq!(config.retry.initial_delay, Duration::ZERO);
        assert!(config.database.update);
        assert!(!config.json.compress);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.processor.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.nvd.base_url, DEFAULT_NVD_BASE_URL);
        assert_eq!(config.database.path, PathBuf::from("./scap.db"));
    }

    #[test]
    fn test_partial_json() {
        let config = Config::from_json(
            r#"{
                "processor": {"chunk_size": 500},
                "retry": {"attempts": 3, "initial_delay": 250},
                "nvd": {"api_key": "secret", "request_results": 10}
            }"#,
        )
        .unwrap();
        assert_eq!(config.processor.chunk_size, 500);
        assert_eq!(config.processor.queue_size, DEFAULT_QUEUE_SIZE);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.nvd.request_results, Some(10));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let err = Config::from_json(r#"{"processor": {"chunk_size": 0}}"#).unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("chunk_size")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default();
        config.retry.attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_date_window_rejected() {
        let mut config = Config::default();
        config.nvd.filter.last_modified_start = NaiveDateTime::parse_from_str(
            "2024-12-09T00:00:00",
            "%Y-%m-%dT%H:%M:%S",
        )
        .ok();
        config.nvd.filter.last_modified_end = NaiveDateTime::parse_from_str(
            "2024-01-01T00:00:00",
            "%Y-%m-%dT%H:%M:%S",
        )
        .ok();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_interval_depends_on_api_key() {
        let mut nvd = NvdApiConfig::default();
        assert_eq!(nvd.effective_request_interval(), Duration::from_secs(6));
        nvd.api_key = Some("key".into());
        assert_eq!(nvd.effective_request_interval(), Duration::from_millis(600));
        nvd.request_interval = Some(Duration::ZERO);
        assert_eq!(nvd.effective_request_interval(), Duration::ZERO);
    }
}
