//! SQLite-backed state store.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use twrs_common::{Error, Result};

use super::{CloseHistory, StateStore, HISTORY_RETENTION_DAYS};
use crate::data::Security;

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Settings, watch list, report marker
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Daily closes for historical period returns
CREATE TABLE IF NOT EXISTS closes (
    code TEXT NOT NULL,
    date TEXT NOT NULL,
    close REAL NOT NULL,
    PRIMARY KEY (code, date)
);

CREATE INDEX IF NOT EXISTS idx_closes_date
ON closes(date DESC);
"#;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Persistent store in a single SQLite file.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open {}: {}", path.display(), e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(storage_err)?;

        conn.execute_batch(CREATE_TABLES_SQL).map_err(storage_err)?;

        info!(db_path = %path.display(), "Opened state store");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct days with recorded closes.
    pub async fn history_days(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let count: i64 = db
            .query_row("SELECT COUNT(DISTINCT date) FROM closes", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        db.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(storage_err)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, value],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl CloseHistory for SqliteStore {
    async fn record_closes(&self, date: NaiveDate, securities: &[Security]) -> Result<()> {
        let day = date.format(DATE_FORMAT).to_string();
        let cutoff = (date - Duration::days(HISTORY_RETENTION_DAYS))
            .format(DATE_FORMAT)
            .to_string();

        let mut db = self.db.lock().await;
        let tx = db.transaction().map_err(storage_err)?;
        tx.execute("DELETE FROM closes WHERE date = ?1", params![day])
            .map_err(storage_err)?;
        {
            let mut stmt = tx
                .prepare("INSERT OR REPLACE INTO closes (code, date, close) VALUES (?1, ?2, ?3)")
                .map_err(storage_err)?;
            for security in securities {
                stmt.execute(params![security.code, day, security.price])
                    .map_err(storage_err)?;
            }
        }
        let pruned = tx
            .execute("DELETE FROM closes WHERE date < ?1", params![cutoff])
            .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;

        debug!(date = %day, count = securities.len(), pruned, "Recorded closes");
        Ok(())
    }

    async fn closes_as_of(&self, date: NaiveDate) -> Result<HashMap<String, (NaiveDate, f64)>> {
        let day = date.format(DATE_FORMAT).to_string();
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(
                r#"
                SELECT c.code, c.date, c.close
                FROM closes c
                JOIN (
                    SELECT code, MAX(date) AS latest FROM closes WHERE date <= ?1 GROUP BY code
                ) m ON c.code = m.code AND c.date = m.latest
                "#,
            )
            .map_err(storage_err)?;

        let rows = stmt
            .query_map(params![day], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })
            .map_err(storage_err)?;

        let mut closes = HashMap::new();
        for row in rows {
            let (code, date, close) = row.map_err(storage_err)?;
            if let Ok(date) = NaiveDate::parse_from_str(&date, DATE_FORMAT) {
                closes.insert(code, (date, close));
            }
        }
        Ok(closes)
    }
}
