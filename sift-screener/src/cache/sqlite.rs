//! SQLite-backed screening cache.
//!
//! One `screening_entries` row per stored screening, carrying every key
//! column, and one `screening_entry_symbols` row per (entry, symbol).

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection};
use sift_common::config::CacheConfig;
use sift_common::util::parse_duration_secs;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::key::{CacheKey, KeyValue, KEY_COLUMNS};
use super::{
    BatchCounters, CacheEntry, CacheError, CachedSymbol, ScreeningCache, StoreRequest,
};

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS screening_entries (
    entry_id TEXT PRIMARY KEY,
    data_date TEXT NOT NULL,
    range_start TEXT NOT NULL,
    universe TEXT NOT NULL,
    pr_enabled INTEGER NOT NULL,
    pr_min REAL,
    pr_max REAL,
    ma_enabled INTEGER NOT NULL,
    ma_period INTEGER,
    ma_condition TEXT,
    rsi_enabled INTEGER NOT NULL,
    rsi_period INTEGER,
    rsi_condition TEXT,
    rsi_threshold REAL,
    gap_enabled INTEGER NOT NULL,
    gap_direction TEXT,
    gap_threshold REAL,
    pddv_enabled INTEGER NOT NULL,
    pddv_min REAL,
    pddv_max REAL,
    rv_enabled INTEGER NOT NULL,
    rv_recent INTEGER,
    rv_lookback INTEGER,
    rv_min_ratio REAL,
    symbols_screened INTEGER NOT NULL,
    symbols_qualifying INTEGER NOT NULL,
    symbols_failed INTEGER NOT NULL,
    symbols_skipped INTEGER NOT NULL,
    failed_symbols_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_screening_entries_lookup
ON screening_entries(data_date, range_start, universe, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_screening_entries_expires
ON screening_entries(expires_at);

CREATE TABLE IF NOT EXISTS screening_entry_symbols (
    entry_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    filter_params_json TEXT NOT NULL,
    qualifying_dates_json TEXT NOT NULL,
    metrics_json TEXT NOT NULL,
    PRIMARY KEY (entry_id, symbol)
);
"#;

const ENTRY_FIELDS: &[&str] = &[
    "symbols_screened",
    "symbols_qualifying",
    "symbols_failed",
    "symbols_skipped",
    "failed_symbols_json",
    "created_at",
    "expires_at",
];

/// Fixed-width UTC timestamp, so text order is time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn integrity(entry_id: &str, reason: impl std::fmt::Display) -> CacheError {
    CacheError::Integrity {
        entry_id: entry_id.to_string(),
        reason: reason.to_string(),
    }
}

/// Row counts for maintenance and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub live_entries: usize,
    pub symbol_rows: usize,
}

struct EntryRow {
    entry_id: String,
    data_date: String,
    screened: i64,
    qualifying: i64,
    failed: i64,
    skipped: i64,
    failed_symbols_json: String,
    created_at: String,
    expires_at: String,
}

/// Screening cache over a single SQLite connection.
pub struct SqliteScreeningCache {
    db: Arc<Mutex<Connection>>,
    ttl: Duration,
}

impl SqliteScreeningCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: impl AsRef<Path>, ttl: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).context("Failed to open screening cache database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set database pragmas")?;

        info!(db_path = %path.display(), ttl_secs = ttl.num_seconds(), "Initialized screening cache");
        Self::with_connection(conn, ttl)
    }

    /// In-memory cache; contents vanish with the value.
    pub fn in_memory(ttl: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn, ttl)
    }

    /// Build from configuration: `db_path` (or the default) and `ttl`.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let secs = parse_duration_secs(&config.ttl).map_err(|e| anyhow!(e))?;
        let ttl = Duration::seconds(i64::try_from(secs).context("cache ttl out of range")?);
        Self::open(config.resolved_db_path(), ttl)
    }

    fn with_connection(conn: Connection, ttl: Duration) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create database tables")?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entry and row counts.
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let db = self.db.lock().await;
        let now = timestamp(Utc::now());

        let entries: i64 = db.query_row("SELECT COUNT(*) FROM screening_entries", [], |row| row.get(0))?;
        let live_entries: i64 = db.query_row(
            "SELECT COUNT(*) FROM screening_entries WHERE expires_at > ?1",
            params![now],
            |row| row.get(0),
        )?;
        let symbol_rows: i64 =
            db.query_row("SELECT COUNT(*) FROM screening_entry_symbols", [], |row| row.get(0))?;

        Ok(CacheStats {
            entries: entries as usize,
            live_entries: live_entries as usize,
            symbol_rows: symbol_rows as usize,
        })
    }

    fn load_symbols(db: &Connection, entry_id: &str) -> Result<Vec<CachedSymbol>, CacheError> {
        let mut stmt = db.prepare(
            r#"
            SELECT symbol, filter_params_json, qualifying_dates_json, metrics_json
            FROM screening_entry_symbols
            WHERE entry_id = ?1
            ORDER BY symbol
            "#,
        )?;

        let rows = stmt
            .query_map(params![entry_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(symbol, params_json, dates_json, metrics_json)| {
                Ok(CachedSymbol {
                    filter_params: serde_json::from_str(&params_json)
                        .map_err(|e| integrity(entry_id, format!("{symbol} filter params: {e}")))?,
                    qualifying_dates: serde_json::from_str(&dates_json)
                        .map_err(|e| integrity(entry_id, format!("{symbol} dates: {e}")))?,
                    metrics: serde_json::from_str(&metrics_json)
                        .map_err(|e| integrity(entry_id, format!("{symbol} metrics: {e}")))?,
                    symbol,
                })
            })
            .collect()
    }

    fn decode_entry(key: &CacheKey, row: EntryRow, symbols: Vec<CachedSymbol>) -> Result<CacheEntry, CacheError> {
        let id = row.entry_id.as_str();
        let parse_ts = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| integrity(id, format!("timestamp {s:?}: {e}")))
        };
        let count = |n: i64| usize::try_from(n).map_err(|_| integrity(id, format!("negative counter {n}")));

        let counters = BatchCounters {
            symbols_screened: count(row.screened)?,
            symbols_qualifying: count(row.qualifying)?,
            symbols_failed: count(row.failed)?,
            symbols_skipped: count(row.skipped)?,
            failed_symbols: serde_json::from_str(&row.failed_symbols_json)
                .map_err(|e| integrity(id, format!("failed symbols: {e}")))?,
        };

        Ok(CacheEntry {
            data_date: NaiveDate::parse_from_str(&row.data_date, "%Y-%m-%d")
                .map_err(|e| integrity(id, format!("data date: {e}")))?,
            created_at: parse_ts(&row.created_at)?,
            expires_at: parse_ts(&row.expires_at)?,
            key: key.clone(),
            symbols,
            counters,
            entry_id: row.entry_id,
        })
    }
}

#[async_trait]
impl ScreeningCache for SqliteScreeningCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let db = self.db.lock().await;

        let mut values = key.values();
        values.push(KeyValue::Text(timestamp(Utc::now())));
        let sql = format!(
            "SELECT entry_id, data_date, {fields} FROM screening_entries \
             WHERE {clause} AND expires_at > ?{now} \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            fields = ENTRY_FIELDS.join(", "),
            clause = CacheKey::where_clause(1),
            now = KEY_COLUMNS.len() + 1,
        );

        let result = db.query_row(&sql, params_from_iter(values.iter()), |row| {
            Ok(EntryRow {
                entry_id: row.get(0)?,
                data_date: row.get(1)?,
                screened: row.get(2)?,
                qualifying: row.get(3)?,
                failed: row.get(4)?,
                skipped: row.get(5)?,
                failed_symbols_json: row.get(6)?,
                created_at: row.get(7)?,
                expires_at: row.get(8)?,
            })
        });

        let row = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                debug!(data_date = %key.data_date, "Screening cache miss");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let symbols = Self::load_symbols(&db, &row.entry_id)?;
        let entry = Self::decode_entry(key, row, symbols)?;
        debug!(
            entry_id = %entry.entry_id,
            symbols = entry.symbols.len(),
            "Screening cache hit"
        );
        Ok(Some(entry))
    }

    async fn store(&self, key: &CacheKey, request: StoreRequest<'_>) -> Result<CacheEntry, CacheError> {
        let entry_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let expires_at = created_at + self.ttl;

        let failed_json = serde_json::to_string(&request.counters.failed_symbols)?;
        let symbol_rows = request
            .symbols
            .iter()
            .map(|s| {
                Ok((
                    s.symbol.as_str(),
                    serde_json::to_string(&s.filter_params)?,
                    serde_json::to_string(&s.qualifying_dates)?,
                    serde_json::to_string(&s.metrics)?,
                ))
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        let mut columns: Vec<&str> = vec!["entry_id"];
        columns.extend_from_slice(KEY_COLUMNS);
        columns.extend_from_slice(ENTRY_FIELDS);

        let mut values = vec![KeyValue::Text(entry_id.clone())];
        values.extend(key.values());
        let counters = request.counters;
        values.extend([
            KeyValue::Int(counters.symbols_screened as i64),
            KeyValue::Int(counters.symbols_qualifying as i64),
            KeyValue::Int(counters.symbols_failed as i64),
            KeyValue::Int(counters.symbols_skipped as i64),
            KeyValue::Text(failed_json),
            KeyValue::Text(timestamp(created_at)),
            KeyValue::Text(timestamp(expires_at)),
        ]);

        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO screening_entries ({}) VALUES ({})",
            columns.join(", "),
            placeholders
        );

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(&sql, params_from_iter(values.iter()))?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO screening_entry_symbols
                (entry_id, symbol, filter_params_json, qualifying_dates_json, metrics_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for (symbol, params_json, dates_json, metrics_json) in &symbol_rows {
                stmt.execute(params![entry_id, symbol, params_json, dates_json, metrics_json])?;
            }
        }
        tx.commit()?;

        debug!(
            entry_id = %entry_id,
            symbols = request.symbols.len(),
            expires_at = %expires_at,
            "Stored screening cache entry"
        );

        Ok(CacheEntry {
            entry_id,
            key: key.clone(),
            data_date: request.data_date,
            symbols: request.symbols.to_vec(),
            counters: counters.clone(),
            created_at,
            expires_at,
        })
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let mut db = self.db.lock().await;
        let now = timestamp(Utc::now());

        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM screening_entry_symbols WHERE entry_id IN \
             (SELECT entry_id FROM screening_entries WHERE expires_at <= ?1)",
            params![now],
        )?;
        let removed = tx.execute("DELETE FROM screening_entries WHERE expires_at <= ?1", params![now])?;
        tx.commit()?;

        if removed > 0 {
            info!(removed, "Purged expired screening cache entries");
        }
        Ok(removed)
    }
}
