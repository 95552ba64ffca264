//! Defaultable persistence: SQLite-backed last-value store with TTL.
//! One row per cache key; expiry is an absolute unix timestamp checked on read.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use defaultable_core::RawValue;
use defaultable_store::LastValueStore;
use metrics::{counter, histogram};
use rusqlite::OptionalExtension;
use tracing::info;

pub const ENV_DB_PATH: &str = "DEFAULTABLE_DB_PATH";

/// Bound on how long a call waits for a locked database before erroring.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// SQLite-backed store. Simple, synchronous; lookups fail fast when the db is busy.
pub struct SqliteStore {
    db: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var(ENV_DB_PATH).unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.busy_timeout(BUSY_TIMEOUT).context("setting busy timeout")?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS last_value (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            [],
        ).context("creating last_value table")?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_last_value_expires ON last_value(expires_at)",
            [],
        ).ok();
        let me = Self { db: std::sync::Mutex::new(db) };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(path = %path, "opened last value store");
        Ok(me)
    }

    /// Delete rows whose TTL has passed. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let db = self.lock()?;
        let n = db.execute("DELETE FROM last_value WHERE expires_at <= ?1", [now_ts()])?;
        counter!("persist_purged_total", n as u64);
        Ok(n)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }
}

impl LastValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<RawValue>> {
        let started = std::time::Instant::now();
        let db = self.lock()?;
        let raw: Option<String> = db
            .query_row(
                "SELECT value FROM last_value WHERE key = ?1 AND expires_at > ?2",
                (key, now_ts()),
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("reading last value {}", key))?;
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s).with_context(|| format!("decoding last value {}", key))?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &RawValue, ttl: Duration) -> Result<()> {
        let started = std::time::Instant::now();
        let encoded = serde_json::to_string(value).context("encoding last value")?;
        let expires_at = expires_at(now_ts(), ttl);
        let db = self.lock()?;
        db.execute(
            "INSERT INTO last_value(key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            (key, &encoded, expires_at),
        ).with_context(|| format!("writing last value {}", key))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }
}

/// Absolute expiry in unix seconds, saturating at `i64::MAX` for oversized TTLs.
fn expires_at(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".defaultable");
        let _ = std::fs::create_dir_all(&p);
        p.push("last_values.db");
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    "last_values.db".to_string()
}

pub fn now_ts() -> i64 {
    // seconds since epoch
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_secs() as i64
}
