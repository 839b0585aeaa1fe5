//! Caller-facing request and response types.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cache::{BatchCounters, CachedSymbol};
use crate::data::{DateRange, FetchPath, Universe};
use crate::error::ConfigurationError;
use crate::filters::FilterSpec;
use crate::lookback::ExtendedRange;

/// One screening query.
///
/// ```json
/// {
///   "start": "2024-01-02",
///   "end": "2024-01-02",
///   "universe": "all_active",
///   "filters": [
///     {"kind": "price_range", "min_price": 2.0, "max_price": 10.0},
///     {"kind": "gap", "direction": "up", "threshold_pct": 4.0}
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub universe: Universe,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

impl ScreeningRequest {
    /// Request over every active symbol with no filters.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            universe: Universe::AllActive,
            filters: Vec::new(),
        }
    }

    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.universe = Universe::Symbols(symbols.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn requested(&self) -> DateRange {
        DateRange::new(self.start, self.end)
    }

    /// Copy with the universe normalized.
    pub fn normalized(&self) -> Self {
        Self {
            universe: self.universe.normalized(),
            ..self.clone()
        }
    }

    /// Reject requests that cannot be screened. Runs before any I/O.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.start > self.end {
            return Err(ConfigurationError::InvertedDateRange {
                start: self.start,
                end: self.end,
            });
        }

        if let Universe::Symbols(symbols) = &self.universe {
            if symbols.iter().all(|s| s.trim().is_empty()) {
                return Err(ConfigurationError::EmptyUniverse);
            }
        }

        let mut seen = BTreeSet::new();
        for filter in &self.filters {
            if !seen.insert(filter.kind()) {
                return Err(ConfigurationError::DuplicateFilter(filter.kind()));
            }
            filter.validate()?;
        }

        Ok(())
    }
}

/// Batch counters plus wall time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    #[serde(flatten)]
    pub counters: BatchCounters,
    pub execution_time_ms: u64,
}

/// Result of one screening.
///
/// `results` lists only symbols with at least one qualifying date, sorted by
/// symbol. An empty list is a successful screening where nothing qualified.
#[derive(Debug, Clone, Serialize)]
pub struct ScreeningResponse {
    pub results: Vec<CachedSymbol>,
    pub stats: BatchStats,
    pub cache_hit: bool,
    pub extension: ExtendedRange,
    /// Acquisition path; `None` when served from cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_path: Option<FetchPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_entry_id: Option<String>,
}

impl ScreeningResponse {
    pub fn symbols(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.symbol.as_str()).collect()
    }
}
