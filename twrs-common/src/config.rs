//! Configuration management for the monitor.
//!
//! The configuration file lives at `~/.twrs/config.json`. It only carries
//! ambient settings (logging, feed endpoints, storage path, schedule
//! granularity). Anything the user changes from the CLI at runtime
//! (credentials, refresh interval, watch list) lives in the state store.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (TWRS_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `TWRS_LOG_LEVEL` → observability.log_level
//! - `TWRS_LOG_FORMAT` → observability.log_format
//! - `TWRS_DB_PATH` → storage.db_path
//! - `TWRS_BOT_TOKEN` → notification.bot_token
//! - `TWRS_CHAT_ID` → notification.chat_id

use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".twrs"),
        |dirs| dirs.home_dir().join(".twrs"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Market-data feed
    #[serde(default)]
    pub feed: FeedConfig,

    /// Local state store
    #[serde(default)]
    pub storage: StorageConfig,

    /// Multi-period return projection
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Chat webhook transport
    #[serde(default)]
    pub notification: NotificationConfig,

    /// Background scheduling
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration (explicit path or default) with environment overrides.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("TWRS_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("TWRS_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(path) = std::env::var("TWRS_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(path));
        }
        if let Ok(token) = std::env::var("TWRS_BOT_TOKEN") {
            self.notification.bot_token = Some(token);
        }
        if let Ok(chat) = std::env::var("TWRS_CHAT_ID") {
            self.notification.chat_id = Some(chat);
        }
    }

    /// Save configuration to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create config directory {}", dir.display())
                })?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }
}

// ============================================================================
// Sections
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
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// One candidate end-of-day endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEndpointConfig {
    /// URL template; `{date}` is replaced with `YYYYMMDD`
    pub url: String,
    /// Row layout tag (day_all, mi_index, open_api, heuristic)
    pub layout: String,
}

impl FeedEndpointConfig {
    fn new(url: &str, layout: &str) -> Self {
        Self {
            url: url.to_string(),
            layout: layout.to_string(),
        }
    }
}

/// Market-data feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Candidate endpoints, tried in order
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<FeedEndpointConfig>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// User agent sent with feed requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Local time (HH:MM, exchange time) after which the day's file is normally published
    #[serde(default = "default_publish_time")]
    pub publish_time: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
            publish_time: default_publish_time(),
        }
    }
}

/// Local state store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path (defaults to `~/.twrs/state.db`)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Effective database path.
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir().join("state.db"))
    }
}

/// Placeholder multipliers turning a daily change percent into a period return.
///
/// Only used for periods without enough recorded close history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    #[serde(default = "default_mult_1w")]
    pub one_week: f64,
    #[serde(default = "default_mult_1m")]
    pub one_month: f64,
    #[serde(default = "default_mult_3m")]
    pub three_months: f64,
    #[serde(default = "default_mult_6m")]
    pub six_months: f64,
    #[serde(default = "default_mult_1y")]
    pub one_year: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            one_week: default_mult_1w(),
            one_month: default_mult_1m(),
            three_months: default_mult_3m(),
            six_months: default_mult_6m(),
            one_year: default_mult_1y(),
        }
    }
}

/// Chat webhook transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Bot API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Seed bot token, used only when none is stored
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Seed destination chat, used only when none is stored
    #[serde(default)]
    pub chat_id: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_timeout(),
            bot_token: None,
            chat_id: None,
        }
    }
}

/// Background scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between daily-report checks
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Exchange offset from UTC in hours
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            utc_offset_hours: default_utc_offset(),
        }
    }
}

impl ScheduleConfig {
    /// Exchange time zone as a fixed offset. Falls back to UTC+8 on out-of-range values.
    pub fn exchange_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours.saturating_mul(3600))
            .or_else(|| FixedOffset::east_opt(8 * 3600))
            .unwrap_or_else(|| Utc.fix())
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
fn default_timeout() -> u64 {
    15
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)".into()
}
fn default_publish_time() -> String {
    "14:00".into()
}
fn default_api_base() -> String {
    "https://api.telegram.org".into()
}
fn default_check_interval() -> u64 {
    60
}
fn default_utc_offset() -> i32 {
    8
}
fn default_mult_1w() -> f64 {
    1.5
}
fn default_mult_1m() -> f64 {
    3.0
}
fn default_mult_3m() -> f64 {
    6.0
}
fn default_mult_6m() -> f64 {
    10.0
}
fn default_mult_1y() -> f64 {
    15.0
}

fn default_endpoints() -> Vec<FeedEndpointConfig> {
    vec![
        FeedEndpointConfig::new(
            "https://www.twse.com.tw/rwd/zh/afterTrading/STOCK_DAY_ALL?date={date}&response=json",
            "day_all",
        ),
        FeedEndpointConfig::new(
            "https://www.twse.com.tw/exchangeReport/STOCK_DAY_ALL?response=json&date={date}",
            "day_all",
        ),
        FeedEndpointConfig::new(
            "https://www.twse.com.tw/exchangeReport/MI_INDEX?response=json&date={date}&type=ALLBUT0999",
            "mi_index",
        ),
        FeedEndpointConfig::new(
            "https://openapi.twse.com.tw/v1/exchangeReport/STOCK_DAY_ALL",
            "open_api",
        ),
    ]
}
