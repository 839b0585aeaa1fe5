//! Screening result cache.
//!
//! Completed screenings are stored under a [`CacheKey`] and served back to
//! identical requests until they expire. Entries are immutable: a repeat
//! store inserts a newer entry, and lookups return the newest live one.

pub mod key;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filters::{FilterKind, FilterSpec, MetricsSummary, QualificationResult};

pub use key::{universe_fingerprint, CacheKey, KeyReal, KeyValue, KEY_COLUMNS};
pub use sqlite::{CacheStats, SqliteScreeningCache};

/// Cache failures. Callers treat every variant as a miss (or a skipped store).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cache entry {entry_id} is corrupt: {reason}")]
    Integrity { entry_id: String, reason: String },

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Batch-level counters kept with each entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    pub symbols_screened: usize,
    pub symbols_qualifying: usize,
    pub symbols_failed: usize,
    pub symbols_skipped: usize,
    pub failed_symbols: Vec<String>,
}

/// One qualifying symbol as stored and returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSymbol {
    pub symbol: String,
    pub qualifying_dates: Vec<NaiveDate>,
    pub metrics: BTreeMap<FilterKind, MetricsSummary>,
    /// Enabled filter parameters the symbol was screened with
    pub filter_params: serde_json::Value,
}

impl CachedSymbol {
    pub fn from_result(result: &QualificationResult, filter_params: serde_json::Value) -> Self {
        Self {
            symbol: result.symbol.clone(),
            qualifying_dates: result.qualifying_dates.clone(),
            metrics: result.metrics.clone(),
            filter_params,
        }
    }
}

/// Parameter echo for the enabled filters, ordered by kind.
pub fn filter_params_echo(filters: &[FilterSpec]) -> serde_json::Value {
    let mut enabled: Vec<&FilterSpec> = filters.iter().filter(|f| f.is_enabled()).collect();
    enabled.sort_by_key(|f| f.kind());
    serde_json::Value::Array(enabled.into_iter().map(FilterSpec::params_json).collect())
}

/// What a completed screening writes to the cache.
#[derive(Debug, Clone, Copy)]
pub struct StoreRequest<'a> {
    pub data_date: NaiveDate,
    /// Qualifying symbols, ordered
    pub symbols: &'a [CachedSymbol],
    pub counters: &'a BatchCounters,
}

/// A stored screening.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub entry_id: String,
    pub key: CacheKey,
    pub data_date: NaiveDate,
    pub symbols: Vec<CachedSymbol>,
    pub counters: BatchCounters,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result cache seam; injected into the screener.
#[async_trait]
pub trait ScreeningCache: Send + Sync {
    /// Newest unexpired entry with exactly this key.
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert a fresh entry for `key`.
    async fn store(&self, key: &CacheKey, request: StoreRequest<'_>) -> Result<CacheEntry, CacheError>;

    /// Delete expired entries; returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, CacheError>;
}
