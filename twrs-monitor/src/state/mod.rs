//! Persistent state behind two small ports.
//!
//! [`StateStore`] is a string key/value store for settings and the watch
//! list. [`CloseHistory`] records daily closes so period returns can be
//! computed from real history. Both have a SQLite implementation and an
//! in-memory one for tests and `--demo` runs.

mod app;
mod sqlite;

pub use app::{AppState, ReportWindow, Settings, WatchEntry, MIN_REFRESH_INTERVAL_SECS};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use twrs_common::Result;

use crate::data::Security;

/// Recorded closes older than this are pruned on every write.
pub const HISTORY_RETENTION_DAYS: i64 = 400;

/// Key/value persistence for application state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Per-day close prices.
#[async_trait]
pub trait CloseHistory: Send + Sync {
    /// Record every close of a snapshot, replacing that day's earlier record.
    async fn record_closes(&self, date: NaiveDate, securities: &[Security]) -> Result<()>;

    /// Latest recorded close on or before `date`, per code.
    async fn closes_as_of(&self, date: NaiveDate) -> Result<HashMap<String, (NaiveDate, f64)>>;
}

/// Everything the service persists.
pub trait Store: StateStore + CloseHistory {}

impl<T: StateStore + CloseHistory> Store for T {}

// ============================================================================
// In-memory store
// ============================================================================

/// Volatile store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
    closes: RwLock<BTreeMap<NaiveDate, HashMap<String, f64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[async_trait]
impl CloseHistory for MemoryStore {
    async fn record_closes(&self, date: NaiveDate, securities: &[Security]) -> Result<()> {
        let day: HashMap<String, f64> = securities
            .iter()
            .map(|s| (s.code.clone(), s.price))
            .collect();

        let mut closes = self.closes.write().await;
        closes.insert(date, day);

        let cutoff = date - Duration::days(HISTORY_RETENTION_DAYS);
        closes.retain(|d, _| *d >= cutoff);
        Ok(())
    }

    async fn closes_as_of(&self, date: NaiveDate) -> Result<HashMap<String, (NaiveDate, f64)>> {
        let closes = self.closes.read().await;
        let mut latest = HashMap::new();
        // Ascending walk so later days overwrite earlier ones
        for (day, prices) in closes.range(..=date) {
            for (code, price) in prices {
                latest.insert(code.clone(), (*day, *price));
            }
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, d).unwrap()
    }

    #[tokio::test]
    async fn test_memory_kv() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_closes_as_of_picks_latest_on_or_before() {
        let store = MemoryStore::new();
        store
            .record_closes(day(1), &[Security::from_quote("2330", "台積電", 100.0, 0.0)])
            .await
            .unwrap();
        store
            .record_closes(
                day(3),
                &[
                    Security::from_quote("2330", "台積電", 103.0, 0.0),
                    Security::from_quote("2881", "富邦金", 80.0, 0.0),
                ],
            )
            .await
            .unwrap();

        let as_of_2 = store.closes_as_of(day(2)).await.unwrap();
        assert_eq!(as_of_2.get("2330"), Some(&(day(1), 100.0)));
        assert!(!as_of_2.contains_key("2881"));

        let as_of_5 = store.closes_as_of(day(5)).await.unwrap();
        assert_eq!(as_of_5.get("2330"), Some(&(day(3), 103.0)));
        assert_eq!(as_of_5.len(), 2);
    }
}
