//! Market data layer.
//!
//! - `provider`: the upstream trait and its error classification
//! - `polygon`: HTTP implementation over a pooled client
//! - `rate_limiter`: proactive request throttling
//! - `acquisition`: bulk/individual fetch strategy with fallback
//! - `calendar`: weekday trading-day arithmetic

pub mod acquisition;
pub mod calendar;
pub mod polygon;
pub mod provider;
pub mod rate_limiter;

pub use acquisition::{AcquisitionResult, DataAcquirer, FetchPath, FetchRequest};
pub use polygon::PolygonProvider;
pub use provider::{MarketDataProvider, ProviderError};
pub use rate_limiter::{shared_limiter, RateLimiter, SharedRateLimiter};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Bars
// ============================================================================

/// One daily OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Volume-weighted average price, when the provider reports it
    #[serde(default)]
    pub vwap: Option<f64>,
}

/// Daily bars for one symbol, strictly ascending by date with no duplicates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarSeries {
    symbol: String,
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Build a series from bars in any order.
    ///
    /// Bars are sorted by date; for duplicate dates the bar that arrived last wins.
    pub fn from_unsorted(symbol: impl Into<String>, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.date);

        let mut unique: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match unique.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => unique.push(bar),
            }
        }

        Self {
            symbol: symbol.into(),
            bars: unique,
        }
    }

    /// An empty series (symbol known, no data).
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bars: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|b| b.date).collect()
    }

    pub fn opens(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.open).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }
}

// ============================================================================
// Ranges and Universes
// ============================================================================

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self::new(date, date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }

    /// Trading days covered by the range.
    pub fn trading_days(&self) -> u32 {
        calendar::count_trading_days(self.start, self.end)
    }
}

/// Which symbols a request screens.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Universe {
    /// Every actively traded symbol the provider knows
    #[default]
    AllActive,
    /// An explicit symbol list
    Symbols(Vec<String>),
}

impl Universe {
    pub fn is_all_active(&self) -> bool {
        matches!(self, Self::AllActive)
    }

    /// Explicit symbol count, `None` for the full market.
    pub fn explicit_len(&self) -> Option<usize> {
        match self {
            Self::AllActive => None,
            Self::Symbols(s) => Some(s.len()),
        }
    }

    /// Trimmed, upper-cased, sorted and de-duplicated copy.
    pub fn normalized(&self) -> Self {
        match self {
            Self::AllActive => Self::AllActive,
            Self::Symbols(symbols) => {
                let mut out: Vec<String> = symbols
                    .iter()
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                out.sort();
                out.dedup();
                Self::Symbols(out)
            }
        }
    }
}
