//! Application state: settings, watch list, and the daily-report marker.
//!
//! Loaded once at startup. Every mutation writes through to the store before
//! returning, so a crash never loses an acknowledged change.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use twrs_common::{Error, NotificationConfig, Result};

use super::Store;
use crate::data::Security;

const SETTINGS_KEY: &str = "settings";
const WATCHLIST_KEY: &str = "watchlist";
const LAST_REPORT_KEY: &str = "last_report_date";

/// Refresh intervals below this are raised to it.
pub const MIN_REFRESH_INTERVAL_SECS: u64 = 30;

// ============================================================================
// Settings
// ============================================================================

/// Local-time window in which the daily summary may be sent. Start inclusive,
/// end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ReportWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidInput(format!(
                "report window start {} must be before end {}",
                start.format("%H:%M"),
                end.format("%H:%M")
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        time >= self.start && time < self.end
    }
}

impl Default for ReportWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(14, 30, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// User-mutable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,

    #[serde(default)]
    pub auto_refresh: bool,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Push the top-N message after each background refresh
    #[serde(default)]
    pub push_top_on_refresh: bool,

    #[serde(default)]
    pub daily_report: bool,
    #[serde(default)]
    pub report_window: ReportWindow,

    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Watch alerts flag entries whose |change %| reaches this
    #[serde(default = "default_alert_change_pct")]
    pub alert_change_pct: f64,
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_top_n() -> usize {
    10
}

fn default_alert_change_pct() -> f64 {
    5.0
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            auto_refresh: false,
            refresh_interval_secs: default_refresh_interval(),
            push_top_on_refresh: false,
            daily_report: false,
            report_window: ReportWindow::default(),
            top_n: default_top_n(),
            alert_change_pct: default_alert_change_pct(),
        }
    }
}

impl Settings {
    /// Token and chat id, when both are set and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let token = self.bot_token.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        let chat = self.chat_id.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
        Some((token, chat))
    }

    /// Clamp values into their accepted ranges.
    fn normalize(&mut self) {
        self.refresh_interval_secs = self.refresh_interval_secs.max(MIN_REFRESH_INTERVAL_SECS);
        self.top_n = self.top_n.max(1);
        if !self.alert_change_pct.is_finite() || self.alert_change_pct < 0.0 {
            self.alert_change_pct = default_alert_change_pct();
        }
    }
}

/// A starred security, frozen at the time it was added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub security: Security,
    pub added_at: DateTime<Utc>,
}

// ============================================================================
// AppState
// ============================================================================

/// Settings, watch list, and report marker over a store.
pub struct AppState {
    store: Arc<dyn Store>,
    settings: Settings,
    watchlist: Vec<WatchEntry>,
    last_report_date: Option<NaiveDate>,
}

impl AppState {
    /// Load everything from the store.
    ///
    /// Seed credentials fill in only what the store does not have. Entries
    /// that fail to decode fall back to defaults with a warning.
    pub async fn load(store: Arc<dyn Store>, seed: &NotificationConfig) -> Result<Self> {
        let mut settings: Settings = load_json(store.as_ref(), SETTINGS_KEY).await?.unwrap_or_default();
        settings.normalize();

        if settings.bot_token.is_none() {
            settings.bot_token = seed.bot_token.clone();
        }
        if settings.chat_id.is_none() {
            settings.chat_id = seed.chat_id.clone();
        }

        let watchlist: Vec<WatchEntry> = load_json(store.as_ref(), WATCHLIST_KEY).await?.unwrap_or_default();

        let last_report_date = store
            .get(LAST_REPORT_KEY)
            .await?
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok());

        info!(
            watch_entries = watchlist.len(),
            auto_refresh = settings.auto_refresh,
            daily_report = settings.daily_report,
            "Loaded application state"
        );

        Ok(Self {
            store,
            settings,
            watchlist,
            last_report_date,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn watchlist(&self) -> &[WatchEntry] {
        &self.watchlist
    }

    pub fn last_report_date(&self) -> Option<NaiveDate> {
        self.last_report_date
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// Apply a settings change and persist it.
    pub async fn update_settings<F>(&mut self, change: F) -> Result<&Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut next = self.settings.clone();
        change(&mut next);
        next.normalize();

        let json = serde_json::to_string(&next)?;
        self.store.set(SETTINGS_KEY, &json).await?;
        self.settings = next;
        Ok(&self.settings)
    }

    /// Add a snapshot of a security. Returns `false` if the code is already
    /// watched (the existing snapshot is kept).
    pub async fn add_watch(&mut self, security: &Security) -> Result<bool> {
        if self.watchlist.iter().any(|e| e.security.code == security.code) {
            return Ok(false);
        }

        let mut next = self.watchlist.clone();
        next.push(WatchEntry {
            security: security.clone(),
            added_at: Utc::now(),
        });
        self.save_watchlist(next).await?;
        info!(code = %security.code, "Added to watch list");
        Ok(true)
    }

    /// Remove a code. Returns `false` if it was not watched.
    pub async fn remove_watch(&mut self, code: &str) -> Result<bool> {
        let next: Vec<WatchEntry> = self
            .watchlist
            .iter()
            .filter(|e| e.security.code != code)
            .cloned()
            .collect();
        if next.len() == self.watchlist.len() {
            return Ok(false);
        }

        self.save_watchlist(next).await?;
        info!(code = %code, "Removed from watch list");
        Ok(true)
    }

    /// Remember that the daily summary went out for `date`.
    pub async fn mark_reported(&mut self, date: NaiveDate) -> Result<()> {
        self.store
            .set(LAST_REPORT_KEY, &date.format("%Y-%m-%d").to_string())
            .await?;
        self.last_report_date = Some(date);
        Ok(())
    }

    async fn save_watchlist(&mut self, next: Vec<WatchEntry>) -> Result<()> {
        let json = serde_json::to_string(&next)?;
        self.store.set(WATCHLIST_KEY, &json).await?;
        self.watchlist = next;
        Ok(())
    }
}

async fn load_json<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key, error = %e, "Stored value is unreadable, using defaults");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MemoryStore, StateStore};

    fn memory() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_defaults_when_empty() {
        let state = AppState::load(memory(), &NotificationConfig::default()).await.unwrap();
        assert_eq!(state.settings(), &Settings::default());
        assert!(state.watchlist().is_empty());
        assert_eq!(state.last_report_date(), None);
        assert!(state.settings().credentials().is_none());
    }

    #[tokio::test]
    async fn test_seed_credentials_only_fill_gaps() {
        let store = memory();
        store
            .set(SETTINGS_KEY, r#"{"bot_token":"stored-token"}"#)
            .await
            .unwrap();
        let seed = NotificationConfig {
            bot_token: Some("seed-token".into()),
            chat_id: Some("42".into()),
            ..NotificationConfig::default()
        };

        let state = AppState::load(store, &seed).await.unwrap();
        assert_eq!(state.settings().credentials(), Some(("stored-token", "42")));
    }

    #[tokio::test]
    async fn test_settings_persist_and_clamp() {
        let store = memory();
        let mut state = AppState::load(Arc::clone(&store), &NotificationConfig::default())
            .await
            .unwrap();
        state
            .update_settings(|s| {
                s.auto_refresh = true;
                s.refresh_interval_secs = 5;
                s.top_n = 0;
            })
            .await
            .unwrap();

        let reloaded = AppState::load(store, &NotificationConfig::default()).await.unwrap();
        assert!(reloaded.settings().auto_refresh);
        assert_eq!(reloaded.settings().refresh_interval_secs, MIN_REFRESH_INTERVAL_SECS);
        assert_eq!(reloaded.settings().top_n, 1);
    }

    #[tokio::test]
    async fn test_watch_add_remove_round_trip() {
        let store = memory();
        let mut state = AppState::load(Arc::clone(&store), &NotificationConfig::default())
            .await
            .unwrap();
        let tsmc = Security::from_quote("2330", "台積電", 1035.0, 15.0);

        assert!(state.add_watch(&tsmc).await.unwrap());
        assert!(!state.add_watch(&tsmc).await.unwrap());

        let reloaded = AppState::load(Arc::clone(&store), &NotificationConfig::default())
            .await
            .unwrap();
        assert_eq!(reloaded.watchlist().len(), 1);
        assert_eq!(reloaded.watchlist()[0].security, tsmc);

        assert!(state.remove_watch("2330").await.unwrap());
        assert!(!state.remove_watch("2330").await.unwrap());
        let reloaded = AppState::load(store, &NotificationConfig::default()).await.unwrap();
        assert!(reloaded.watchlist().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_settings_fall_back() {
        let store = memory();
        store.set(SETTINGS_KEY, "not json").await.unwrap();
        let state = AppState::load(store, &NotificationConfig::default()).await.unwrap();
        assert_eq!(state.settings().top_n, 10);
    }

    #[test]
    fn test_report_window() {
        let window = ReportWindow::default();
        assert!(window.contains(NaiveTime::from_hms_opt(14, 30, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(15, 59, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(16, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(9, 0, 0).unwrap()));

        let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        assert!(ReportWindow::new(t(16), t(15)).is_err());
    }
}
