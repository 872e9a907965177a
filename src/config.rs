//! Configuration types for genesis-connector

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use utoipa::ToSchema;

/// Serialize/deserialize a Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Upstream feed service connection settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FeedConfig {
    /// Base URL of the feed service (default: "http://localhost:4000")
    #[serde(default = "default_feed_url")]
    pub url: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_feed_timeout", with = "duration_secs")]
    #[schema(value_type = u64)]
    pub timeout: Duration,

    /// Retry policy for feed calls
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            timeout: default_feed_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Queue substrate connection settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueConfig {
    /// Connection URL for the queue substrate (default: "redis://localhost:6379/0")
    #[serde(default = "default_queue_url")]
    pub url: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: default_queue_url(),
        }
    }
}

/// State store settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StateConfig {
    /// Path to the state database file (default: "./genesis-connector.db")
    ///
    /// `STATE_URL` accepts either a bare path or a `sqlite:` prefixed URL.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// Artifact storage layout
///
/// All artifacts are named by article id under a configurable root:
/// `html/{id}.html`, `images/{id}/image_NN.ext`, `metadata/{id}.json`,
/// `text/{id}.txt`.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StorageConfig {
    /// Root directory for all artifacts (default: "/tmp/genesis-content")
    #[serde(default = "default_storage_base")]
    pub base_path: PathBuf,
}

impl StorageConfig {
    /// Directory holding HTML artifacts
    pub fn html_dir(&self) -> PathBuf {
        self.base_path.join("html")
    }

    /// Directory holding per-article image directories
    pub fn images_dir(&self) -> PathBuf {
        self.base_path.join("images")
    }

    /// Directory holding metadata manifests
    pub fn metadata_dir(&self) -> PathBuf {
        self.base_path.join("metadata")
    }

    /// Directory holding extracted text
    pub fn text_dir(&self) -> PathBuf {
        self.base_path.join("text")
    }

    /// HTML artifact path for an article id
    pub fn html_path(&self, id: &str) -> PathBuf {
        self.html_dir().join(format!("{id}.html"))
    }

    /// Image directory for an article id
    pub fn images_path(&self, id: &str) -> PathBuf {
        self.images_dir().join(id)
    }

    /// Metadata manifest path for an article id
    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.metadata_dir().join(format!("{id}.json"))
    }

    /// Extracted-text path for an article id
    pub fn text_path(&self, id: &str) -> PathBuf {
        self.text_dir().join(format!("{id}.txt"))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_storage_base(),
        }
    }
}

/// Discovery stage settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DiscoveryConfig {
    /// Interval between scheduled discovery runs (default: 300 seconds)
    #[serde(default = "default_discovery_interval", with = "duration_secs")]
    #[schema(value_type = u64)]
    pub interval: Duration,

    /// Lookback window for the recent-articles query in hours (default: 24)
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,

    /// Maximum articles fetched per scheduled run (default: 1000)
    #[serde(default = "default_discovery_limit")]
    pub limit: u32,

    /// Maximum retries for discovery-side operations (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Status surface binding for this stage
    #[serde(default = "StageApiConfig::discovery")]
    pub api: StageApiConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: default_discovery_interval(),
            window_hours: default_window_hours(),
            limit: default_discovery_limit(),
            max_retries: default_max_retries(),
            api: StageApiConfig::discovery(),
        }
    }
}

/// Download stage settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadConfig {
    /// Per-request timeout for HTML and image fetches (default: 30 seconds)
    #[serde(default = "default_download_timeout", with = "duration_secs")]
    #[schema(value_type = u64)]
    pub timeout: Duration,

    /// Maximum retries before a download task is deadlettered (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Tasks processed per worker batch (default: 10)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sleep between worker batches (default: 60 seconds; doubled when idle)
    #[serde(default = "default_download_interval", with = "duration_secs")]
    #[schema(value_type = u64)]
    pub worker_interval: Duration,

    /// Maximum inline images downloaded per article (default: 10)
    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// Per-image fetch timeout (default: 15 seconds)
    #[serde(default = "default_image_timeout", with = "duration_secs")]
    #[schema(value_type = u64)]
    pub image_timeout: Duration,

    /// Status surface binding for this stage
    #[serde(default = "StageApiConfig::download")]
    pub api: StageApiConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout: default_download_timeout(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            worker_interval: default_download_interval(),
            max_images: default_max_images(),
            image_timeout: default_image_timeout(),
            api: StageApiConfig::download(),
        }
    }
}

/// Extraction stage settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExtractionConfig {
    /// Maximum retries before a parse task is deadlettered (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Tasks processed per worker batch (default: 10)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sleep between worker batches (default: 5 seconds; doubled when idle)
    #[serde(default = "default_extraction_interval", with = "duration_secs")]
    #[schema(value_type = u64)]
    pub worker_interval: Duration,

    /// Status surface binding for this stage
    #[serde(default = "StageApiConfig::extraction")]
    pub api: StageApiConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            worker_interval: default_extraction_interval(),
            api: StageApiConfig::extraction(),
        }
    }
}

/// Bind address for one stage's status surface
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StageApiConfig {
    /// Bind host (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Serve interactive Swagger UI docs (default: false)
    #[serde(default)]
    pub swagger_ui: bool,
}

impl StageApiConfig {
    /// Default binding for the discovery stage
    pub fn discovery() -> Self {
        Self {
            host: default_host(),
            port: 5001,
            swagger_ui: false,
        }
    }

    /// Default binding for the download stage
    pub fn download() -> Self {
        Self {
            host: default_host(),
            port: 5003,
            swagger_ui: false,
        }
    }

    /// Default binding for the extraction stage
    pub fn extraction() -> Self {
        Self {
            host: default_host(),
            port: 5006,
            swagger_ui: false,
        }
    }

    /// Render the bind address as "host:port"
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_secs")]
    #[schema(value_type = u64)]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_secs")]
    #[schema(value_type = u64)]
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
            max_attempts: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for the content pipeline
///
/// Fields are organized into logical sub-configs:
/// - [`feed`](FeedConfig) — upstream feed service connection
/// - [`queue`](QueueConfig) — queue substrate connection
/// - [`state`](StateConfig) — state store location
/// - [`storage`](StorageConfig) — artifact layout on disk
/// - [`discovery`](DiscoveryConfig) / [`download`](DownloadConfig) /
///   [`extraction`](ExtractionConfig) — per-stage behavior
///
/// [`Config::from_env`] reads the recognized environment keys; every field
/// has a sensible default so the pipeline also works with
/// `Config::default()` plus an in-process queue.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Upstream feed service
    #[serde(default)]
    pub feed: FeedConfig,

    /// Queue substrate
    #[serde(default)]
    pub queue: QueueConfig,

    /// State store
    #[serde(default)]
    pub state: StateConfig,

    /// Artifact storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Discovery stage
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Download stage
    #[serde(default)]
    pub download: DownloadConfig,

    /// Extraction stage
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Log level hint for embedding applications (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Recognized keys: `FEED_URL`, `FEED_TIMEOUT`, `QUEUE_URL`, `STATE_URL`,
    /// `DISCOVERY_INTERVAL`, `BATCH_SIZE`, `MAX_RETRIES`, `DOWNLOAD_TIMEOUT`,
    /// `MAX_DOWNLOAD_RETRIES`, `MAX_EXTRACTION_RETRIES`, `STORAGE_BASE_PATH`,
    /// `LOG_LEVEL`, and per-stage `DISCOVERY_PORT`/`DISCOVERY_HOST`,
    /// `DOWNLOAD_PORT`/`DOWNLOAD_HOST`, `EXTRACTION_PORT`/`EXTRACTION_HOST`.
    /// Unset keys keep their defaults; unparsable values are configuration
    /// errors.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Some(url) = env_string("FEED_URL") {
            config.feed.url = url;
        }
        if let Some(secs) = env_parse::<u64>("FEED_TIMEOUT")? {
            config.feed.timeout = Duration::from_secs(secs);
        }
        if let Some(url) = env_string("QUEUE_URL") {
            config.queue.url = url;
        }
        if let Some(url) = env_string("STATE_URL") {
            // Accept either a bare path or a sqlite: URL
            let path = url.strip_prefix("sqlite:").unwrap_or(&url);
            config.state.path = PathBuf::from(path);
        }
        if let Some(path) = env_string("STORAGE_BASE_PATH") {
            config.storage.base_path = PathBuf::from(path);
        }
        if let Some(secs) = env_parse::<u64>("DISCOVERY_INTERVAL")? {
            config.discovery.interval = Duration::from_secs(secs);
        }
        if let Some(size) = env_parse::<usize>("BATCH_SIZE")? {
            config.download.batch_size = size;
            config.extraction.batch_size = size;
        }
        if let Some(retries) = env_parse::<u32>("MAX_RETRIES")? {
            config.discovery.max_retries = retries;
            config.feed.retry.max_attempts = retries;
        }
        if let Some(secs) = env_parse::<u64>("DOWNLOAD_TIMEOUT")? {
            config.download.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = env_parse::<u32>("MAX_DOWNLOAD_RETRIES")? {
            config.download.max_retries = retries;
        }
        if let Some(retries) = env_parse::<u32>("MAX_EXTRACTION_RETRIES")? {
            config.extraction.max_retries = retries;
        }
        if let Some(level) = env_string("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(host) = env_string("DISCOVERY_HOST") {
            config.discovery.api.host = host;
        }
        if let Some(port) = env_parse::<u16>("DISCOVERY_PORT")? {
            config.discovery.api.port = port;
        }
        if let Some(host) = env_string("DOWNLOAD_HOST") {
            config.download.api.host = host;
        }
        if let Some(port) = env_parse::<u16>("DOWNLOAD_PORT")? {
            config.download.api.port = port;
        }
        if let Some(host) = env_string("EXTRACTION_HOST") {
            config.extraction.api.host = host;
        }
        if let Some(port) = env_parse::<u16>("EXTRACTION_PORT")? {
            config.extraction.api.port = port;
        }

        Ok(config)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(value) => value.parse::<T>().map(Some).map_err(|_| Error::Config {
            message: format!("invalid value '{value}' for {key}"),
            key: Some(key.to_string()),
        }),
        None => Ok(None),
    }
}

fn default_feed_url() -> String {
    "http://localhost:4000".to_string()
}

fn default_feed_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_queue_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./genesis-connector.db")
}

fn default_storage_base() -> PathBuf {
    PathBuf::from("/tmp/genesis-content")
}

fn default_discovery_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_window_hours() -> u32 {
    24
}

fn default_discovery_limit() -> u32 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_batch_size() -> usize {
    10
}

fn default_download_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_images() -> usize {
    10
}

fn default_image_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_extraction_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
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

fn default_true() -> bool {
    true
}
