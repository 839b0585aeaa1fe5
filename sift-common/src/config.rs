//! Configuration management for Sift services.
//!
//! All Sift services share a configuration file at `~/.sift/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (SIFT_* prefix, plus `POLYGON_API_KEY`)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `SIFT_LOG_LEVEL` → observability.log_level
//! - `SIFT_LOG_FORMAT` → observability.log_format
//! - `POLYGON_API_KEY` → screener.provider.api_key
//! - `SIFT_PROVIDER_BASE_URL` → screener.provider.base_url
//! - `SIFT_CACHE_DB` → screener.cache.db_path
//! - `SIFT_MAX_CONCURRENT_FETCHES` → screener.acquisition.max_concurrent_fetches

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".sift"),
        |dirs| dirs.home_dir().join(".sift"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration shared by Sift services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Screening engine settings
    #[serde(default)]
    pub screener: ScreenerConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when no file exists. Environment overrides are applied afterwards.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::info!("Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SIFT_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("SIFT_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(key) = std::env::var("POLYGON_API_KEY") {
            if !key.trim().is_empty() {
                self.screener.provider.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("SIFT_PROVIDER_BASE_URL") {
            self.screener.provider.base_url = url;
        }
        if let Ok(path) = std::env::var("SIFT_CACHE_DB") {
            self.screener.cache.db_path = Some(PathBuf::from(path));
        }
        if let Ok(limit) = std::env::var("SIFT_MAX_CONCURRENT_FETCHES") {
            if let Ok(n) = limit.parse() {
                self.screener.acquisition.max_concurrent_fetches = n;
            }
        }
    }

    /// Polygon API key, if configured.
    pub fn polygon_api_key(&self) -> Option<String> {
        self.screener
            .provider
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets forced to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Screener Configuration
// ============================================================================

/// Configuration for the screening query engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenerConfig {
    /// Upstream market data provider
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Bulk/individual fetch strategy and concurrency
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Lookback extension policy
    #[serde(default)]
    pub lookback: LookbackConfig,

    /// Filter evaluation worker pool
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Result cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// External backtest engine hand-off
    #[serde(default)]
    pub backtest: BacktestConfig,
}

/// Upstream market data provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// REST base URL (e.g. "https://api.polygon.io")
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// API key, normally supplied through `POLYGON_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// Proactive request budget per minute
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: u32,

    /// Idle keep-alive connections retained per host
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Page size for the active ticker listing
    #[serde(default = "default_ticker_page_size")]
    pub ticker_page_size: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            api_key: None,
            timeout_secs: default_provider_timeout_secs(),
            rate_limit_rpm: default_rate_limit_rpm(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            ticker_page_size: default_ticker_page_size(),
        }
    }
}

/// Data acquisition strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Maximum in-flight per-symbol fetches
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Retries per symbol on transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before a retry
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Explicit universes at least this large count as broad
    #[serde(default = "default_bulk_universe_threshold")]
    pub bulk_universe_threshold: usize,

    /// Longest requested span (in trading days) served by the bulk path
    #[serde(default = "default_bulk_max_trading_days")]
    pub bulk_max_trading_days: u32,

    /// Disable to force the individual path
    #[serde(default = "default_true")]
    pub bulk_enabled: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            bulk_universe_threshold: default_bulk_universe_threshold(),
            bulk_max_trading_days: default_bulk_max_trading_days(),
            bulk_enabled: true,
        }
    }
}

/// Lookback extension policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookbackConfig {
    /// Trading days added on top of the longest filter requirement
    #[serde(default = "default_buffer_days")]
    pub buffer_days: u32,

    /// Upper bound on the total extension; larger requirements are rejected
    #[serde(default = "default_max_extension_days")]
    pub max_extension_days: u32,
}

impl Default for LookbackConfig {
    fn default() -> Self {
        Self {
            buffer_days: default_buffer_days(),
            max_extension_days: default_max_extension_days(),
        }
    }
}

/// CPU pool used for filter evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Worker threads; 0 means one per CPU
    #[serde(default)]
    pub worker_threads: usize,
}

/// Screening result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether cached results are read and written
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// SQLite file; defaults to `~/.sift/screening.db`
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Entry lifetime as a duration string ("30m", "24h", "7d")
    #[serde(default = "default_cache_ttl")]
    pub ttl: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: None,
            ttl: default_cache_ttl(),
        }
    }
}

impl CacheConfig {
    /// Resolved database path.
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir().join("screening.db"))
    }
}

/// External backtest engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Program invoked once per job; `None` disables the hand-off
    #[serde(default)]
    pub command: Option<String>,

    /// Extra arguments placed before the job file path
    #[serde(default)]
    pub args: Vec<String>,

    /// Root under which per-job working directories are created
    #[serde(default)]
    pub work_root: Option<PathBuf>,

    /// Per-job timeout
    #[serde(default = "default_backtest_timeout_secs")]
    pub timeout_secs: u64,

    /// Jobs running at once
    #[serde(default = "default_backtest_concurrency")]
    pub max_concurrent_jobs: usize,

    /// Keep job directories after completion (debugging)
    #[serde(default)]
    pub keep_work_dirs: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            work_root: None,
            timeout_secs: default_backtest_timeout_secs(),
            max_concurrent_jobs: default_backtest_concurrency(),
            keep_work_dirs: false,
        }
    }
}

impl BacktestConfig {
    /// Resolved work root.
    pub fn resolved_work_root(&self) -> PathBuf {
        self.work_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sift-backtests"))
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_true() -> bool {
    true
}
fn default_provider_base_url() -> String {
    "https://api.polygon.io".into()
}
fn default_provider_timeout_secs() -> u64 {
    30
}
fn default_rate_limit_rpm() -> u32 {
    6000
}
fn default_pool_max_idle_per_host() -> usize {
    100
}
fn default_ticker_page_size() -> u32 {
    1000
}
fn default_max_concurrent_fetches() -> usize {
    100
}
fn default_max_retries() -> u32 {
    1
}
fn default_retry_delay_ms() -> u64 {
    250
}
fn default_bulk_universe_threshold() -> usize {
    500
}
fn default_bulk_max_trading_days() -> u32 {
    1
}
fn default_buffer_days() -> u32 {
    5
}
fn default_max_extension_days() -> u32 {
    205
}
fn default_cache_ttl() -> String {
    "24h".into()
}
fn default_backtest_timeout_secs() -> u64 {
    600
}
fn default_backtest_concurrency() -> usize {
    4
}
