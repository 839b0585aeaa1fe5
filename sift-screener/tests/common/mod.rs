//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use sift_common::config::{EvaluationConfig, ScreenerConfig};
use sift_screener::data::{calendar, Bar, MarketDataProvider, ProviderError};

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn bar(date: NaiveDate, open: f64, close: f64, volume: f64) -> Bar {
    Bar {
        date,
        open,
        high: open.max(close),
        low: open.min(close),
        close,
        volume,
        vwap: None,
    }
}

/// Bars on every weekday in `[start, end]`; `shape(i, date)` gives (open, close, volume).
pub fn weekday_bars(
    start: NaiveDate,
    end: NaiveDate,
    shape: impl Fn(usize, NaiveDate) -> (f64, f64, f64),
) -> Vec<Bar> {
    calendar::trading_days(start, end)
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            let (open, close, volume) = shape(i, date);
            bar(date, open, close, volume)
        })
        .collect()
}

/// Screener settings tuned for tests: fast retries, small pools.
pub fn test_config() -> ScreenerConfig {
    let mut config = ScreenerConfig::default();
    config.acquisition.retry_delay_ms = 1;
    config.evaluation = EvaluationConfig { worker_threads: 2 };
    config
}

// ============================================================================
// Mock Market
// ============================================================================

/// In-memory provider with call counters and injectable failures.
#[derive(Default)]
pub struct MockMarket {
    bars: HashMap<String, Vec<Bar>>,
    flaky: Mutex<HashMap<String, u32>>,
    broken: HashSet<String>,
    delay: Duration,

    pub fail_grouped: AtomicBool,
    pub fail_listing: AtomicBool,

    pub grouped_calls: AtomicU32,
    pub range_calls: AtomicU32,
    pub listing_calls: AtomicU32,
    pub grouped_dates: Mutex<Vec<NaiveDate>>,
    pub range_requests: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,

    in_flight: AtomicU32,
    pub max_in_flight: AtomicU32,
}

impl MockMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    /// The first `failures` range fetches for `symbol` fail with a network error.
    pub fn with_flaky(self, symbol: &str, failures: u32) -> Self {
        self.flaky
            .lock()
            .unwrap()
            .insert(symbol.to_string(), failures);
        self
    }

    /// Range fetches for `symbol` always fail with a non-recoverable error.
    pub fn with_broken(mut self, symbol: &str) -> Self {
        self.broken.insert(symbol.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn upstream_calls(&self) -> u32 {
        self.grouped_calls.load(Ordering::SeqCst)
            + self.range_calls.load(Ordering::SeqCst)
            + self.listing_calls.load(Ordering::SeqCst)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.bars.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

#[async_trait]
impl MarketDataProvider for MockMarket {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn grouped_daily(&self, date: NaiveDate) -> Result<HashMap<String, Bar>, ProviderError> {
        self.grouped_calls.fetch_add(1, Ordering::SeqCst);
        self.grouped_dates.lock().unwrap().push(date);

        if self.fail_grouped.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("grouped endpoint down".into()));
        }

        Ok(self
            .bars
            .iter()
            .filter_map(|(symbol, bars)| {
                bars.iter()
                    .find(|b| b.date == date)
                    .map(|b| (symbol.clone(), *b))
            })
            .collect())
    }

    async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        self.range_requests
            .lock()
            .unwrap()
            .push((symbol.to_string(), start, end));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.broken.contains(symbol) {
            return Err(ProviderError::DataNotAvailable(format!("{symbol} delisted")));
        }

        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(symbol) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ProviderError::Network("connection reset".into()));
                }
            }
        }

        Ok(self
            .bars
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= start && b.date <= end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn active_symbols(&self) -> Result<Vec<String>, ProviderError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("reference endpoint down".into()));
        }
        Ok(self.symbols())
    }
}
