use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::translation::validator::ValidatorConfig;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Chat-completion endpoint settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Process-wide request throttling
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Translation engine settings
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Job queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Chat-completion endpoint configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    // @field: Base URL of an OpenAI-compatible API
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    // @field: API key (may also come from STORELINGO_API_KEY)
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Model name
    #[serde(default = "default_model")]
    pub model: String,

    // @field: Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    // @field: Completion token budget for one request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    // @field: Hard timeout for a regular request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    // @field: Hard timeout for long-text requests
    #[serde(default = "default_long_text_timeout_secs")]
    pub long_text_timeout_secs: u64,

    // @field: Maximum attempts for a transient-failing call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    // @field: Base delay of the exponential backoff
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    // @field: Upper bound of a single backoff delay
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            long_text_timeout_secs: default_long_text_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn long_text_timeout(&self) -> Duration {
        Duration::from_secs(self.long_text_timeout_secs)
    }

    /// API key from the config, falling back to the environment
    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        std::env::var("STORELINGO_API_KEY").unwrap_or_default()
    }
}

/// Rate limiter configuration shared by all concurrent jobs
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests in any 60 second window
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Minimum spacing between two requests
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

/// Translation engine configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationConfig {
    /// Language of the stored resources
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Fields longer than this (chars) go through the chunked flow
    #[serde(default = "default_long_text_threshold")]
    pub long_text_threshold: usize,

    /// Upper bound of a chunk (chars)
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Chunks with less visible text than this are not sent to the API
    #[serde(default = "default_markup_only_threshold")]
    pub markup_only_threshold: usize,

    /// Texts at least this fraction of the threshold count as borderline-long
    #[serde(default = "default_borderline_ratio")]
    pub borderline_ratio: f64,

    /// Maximum list items sent in one request
    #[serde(default = "default_list_batch_size")]
    pub list_batch_size: usize,

    /// Terms that must never be translated
    #[serde(default)]
    pub brand_terms: Vec<String>,

    /// Whether accepted translations are memoised
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Translations kept in memory before the oldest are evicted
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Whether CJK output is scanned for residual English
    #[serde(default = "default_true")]
    pub residual_post_pass: bool,

    /// Completeness heuristics thresholds
    #[serde(default)]
    pub validator: ValidatorConfig,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            source_language: default_source_language(),
            long_text_threshold: default_long_text_threshold(),
            max_chunk_size: default_max_chunk_size(),
            markup_only_threshold: default_markup_only_threshold(),
            borderline_ratio: default_borderline_ratio(),
            list_batch_size: default_list_batch_size(),
            brand_terms: Vec::new(),
            cache_enabled: true,
            cache_max_entries: default_cache_max_entries(),
            residual_post_pass: true,
            validator: ValidatorConfig::default(),
        }
    }
}

/// Job queue configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueConfig {
    /// SQLite file shared by all worker processes
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// How long a statement waits on a locked database before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Whether to try the durable backend at all
    #[serde(default = "default_true")]
    pub use_durable_backend: bool,

    /// Workers per job kind
    #[serde(default = "default_queue_concurrency")]
    pub concurrency: usize,

    /// Attempts before a job is failed for good
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between job attempts
    #[serde(default = "default_job_backoff_ms")]
    pub job_backoff_ms: u64,

    /// How long a claimed job stays locked before another worker may take it
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Idle polling interval of workers
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Probe interval while running on the fallback queue
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Delay added per resource when a batch fans out
    #[serde(default = "default_batch_stagger_ms")]
    pub batch_stagger_ms: u64,

    /// Finished jobs older than this are removed by `clean`
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            use_durable_backend: true,
            concurrency: default_queue_concurrency(),
            max_attempts: default_max_attempts(),
            job_backoff_ms: default_job_backoff_ms(),
            lease_secs: default_lease_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            health_check_interval_secs: default_health_check_interval_secs(),
            batch_stagger_ms: default_batch_stagger_ms(),
            completed_retention_secs: default_completed_retention_secs(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn batch_stagger(&self) -> Duration {
        Duration::from_millis(self.batch_stagger_ms)
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<&LogLevel> for log::LevelFilter {
    fn from(level: &LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_long_text_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_min_interval_ms() -> u64 {
    200
}

fn default_source_language() -> String {
    "en".to_string()
}

fn default_long_text_threshold() -> usize {
    1500
}

fn default_max_chunk_size() -> usize {
    1200
}

fn default_markup_only_threshold() -> usize {
    3
}

fn default_borderline_ratio() -> f64 {
    0.7
}

fn default_list_batch_size() -> usize {
    20
}

fn default_cache_max_entries() -> usize {
    crate::translation::cache::DEFAULT_MAX_ENTRIES
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_queue_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_job_backoff_ms() -> u64 {
    5000
}

fn default_lease_secs() -> u64 {
    600
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_batch_stagger_ms() -> u64 {
    1000
}

fn default_completed_retention_secs() -> u64 {
    24 * 3600
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load the configuration from a JSON file, creating a default one if missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to open config file: {}", path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            return Ok(config);
        }

        warn!("Config file not found at '{}', creating default config.", path.display());
        let config = Config::default();
        let config_json = serde_json::to_string_pretty(&config)
            .context("Failed to serialize default config to JSON")?;
        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write default config to file: {}", path.display()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        crate::language_utils::get_language_name(&self.translation.source_language)?;

        if self.api.endpoint.trim().is_empty() {
            return Err(anyhow!("API endpoint must not be empty"));
        }
        url::Url::parse(&self.api.endpoint)
            .with_context(|| format!("Invalid API endpoint: {}", self.api.endpoint))?;

        if self.api.model.trim().is_empty() {
            return Err(anyhow!("Model name must not be empty"));
        }
        if self.api.max_retries == 0 {
            return Err(anyhow!("api.max_retries must be at least 1"));
        }
        if self.translation.max_chunk_size == 0 {
            return Err(anyhow!("translation.max_chunk_size must be positive"));
        }
        if self.translation.max_chunk_size > self.translation.long_text_threshold {
            return Err(anyhow!(
                "translation.max_chunk_size ({}) must not exceed long_text_threshold ({})",
                self.translation.max_chunk_size,
                self.translation.long_text_threshold
            ));
        }
        if self.translation.cache_enabled && self.translation.cache_max_entries == 0 {
            return Err(anyhow!("translation.cache_max_entries must be positive while the cache is enabled"));
        }
        if !(0.0..=1.0).contains(&self.translation.borderline_ratio) {
            return Err(anyhow!("translation.borderline_ratio must be within 0.0..=1.0"));
        }
        if self.queue.concurrency == 0 {
            return Err(anyhow!("queue.concurrency must be at least 1"));
        }
        if self.queue.max_attempts == 0 {
            return Err(anyhow!("queue.max_attempts must be at least 1"));
        }
        if self.rate_limit.requests_per_minute == 0 {
            return Err(anyhow!("rate_limit.requests_per_minute must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_shouldValidate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.health_check_interval_secs, 30);
        assert_eq!(config.api.max_retries, 3);
    }

    #[test]
    fn test_validate_withChunkLargerThanThreshold_shouldFail() {
        let mut config = Config::default();
        config.translation.max_chunk_size = config.translation.long_text_threshold + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_withBadEndpoint_shouldFail() {
        let mut config = Config::default();
        config.api.endpoint = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partialJson_shouldFillDefaults() {
        let config: Config = serde_json::from_str(r#"{"api": {"model": "local-model"}, "log_level": "debug"}"#)
            .unwrap();
        assert_eq!(config.api.model, "local-model");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.queue.concurrency, 2);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_loadOrCreate_withMissingFile_shouldWriteDefaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.json");
        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        let reloaded = Config::load_or_create(&path).unwrap();
        assert_eq!(config.api.model, reloaded.api.model);
    }
}
