//! Daily bar acquisition with bulk/individual strategy selection.
//!
//! # Strategy
//!
//! - **Bulk**: the requested span is at most `bulk_max_trading_days` trading
//!   days and the universe is broad (all active, or an explicit list of at
//!   least `bulk_universe_threshold` symbols). One grouped call per trading
//!   day: the requested days, then walking back until enough prior non-empty
//!   days are collected for the longest lookback, never past the extended
//!   start. Symbols that still hold too few prior bars (they did not trade on
//!   some of those days) are re-fetched over the extended range, so the bulk
//!   and individual paths hand the engine the same bars.
//! - **Individual**: one range fetch per symbol over the extended range,
//!   bounded by a semaphore, with one retry on transient errors.
//!
//! Any bulk failure is logged and the same range is re-fetched on the
//! individual path; callers only see [`AcquisitionResult`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sift_common::config::AcquisitionConfig;

use super::calendar;
use super::provider::{MarketDataProvider, ProviderError};
use super::{Bar, BarSeries, DateRange, Universe};
use crate::error::AcquisitionError;

// ============================================================================
// Request / Result
// ============================================================================

/// What to fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Symbols to fetch
    pub universe: Universe,
    /// Range the caller will evaluate
    pub requested: DateRange,
    /// Earliest date worth fetching (requested start minus the lookback extension)
    pub extended_start: NaiveDate,
    /// Prior trading days the bulk path must collect before `requested.start`
    pub min_history_days: u32,
}

impl FetchRequest {
    /// Full range fetched on the individual path.
    pub fn extended_range(&self) -> DateRange {
        DateRange::new(self.extended_start, self.requested.end)
    }
}

/// Path actually used to satisfy a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPath {
    Bulk,
    Individual,
    /// Bulk was attempted, failed, and the individual path took over
    BulkFallback,
    /// Nothing to fetch (no trading days requested)
    Skipped,
}

/// Per-symbol series plus the symbols that could not be fetched.
#[derive(Debug)]
pub struct AcquisitionResult {
    pub series: HashMap<String, BarSeries>,
    pub failures: BTreeSet<String>,
    pub path: FetchPath,
}

impl AcquisitionResult {
    fn empty(path: FetchPath) -> Self {
        Self {
            series: HashMap::new(),
            failures: BTreeSet::new(),
            path,
        }
    }
}

// ============================================================================
// Data Acquirer
// ============================================================================

/// Fetches bar series from a [`MarketDataProvider`].
///
/// Holds no cached data; every call goes upstream.
pub struct DataAcquirer {
    provider: Arc<dyn MarketDataProvider>,
    config: AcquisitionConfig,
}

impl DataAcquirer {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: AcquisitionConfig) -> Self {
        Self { provider, config }
    }

    /// Pick the bulk or individual path for a request.
    pub fn select_path(&self, request: &FetchRequest) -> FetchPath {
        let span = request.requested.trading_days();
        if span == 0 {
            return FetchPath::Skipped;
        }
        if !self.config.bulk_enabled {
            return FetchPath::Individual;
        }

        let broad = match request.universe.explicit_len() {
            None => true,
            Some(n) => n >= self.config.bulk_universe_threshold,
        };

        if span <= self.config.bulk_max_trading_days && broad {
            FetchPath::Bulk
        } else {
            FetchPath::Individual
        }
    }

    /// Fetch series for every symbol in the request's universe.
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        let started = Instant::now();
        let path = self.select_path(request);

        let result = match path {
            FetchPath::Skipped => {
                info!(
                    start = %request.requested.start,
                    end = %request.requested.end,
                    "No trading days in requested range, skipping acquisition"
                );
                Ok(AcquisitionResult::empty(FetchPath::Skipped))
            }
            FetchPath::Bulk => match self.fetch_bulk(request, cancel).await {
                Ok(series) => self.top_up_short_history(request, series, cancel).await,
                Err(BulkError::Cancelled) => Err(AcquisitionError::Cancelled),
                Err(BulkError::Provider(e)) => {
                    warn!(
                        provider = self.provider.name(),
                        error = %e,
                        "Bulk fetch failed, falling back to per-symbol fetches"
                    );
                    let mut result = self.fetch_individual(request, cancel).await?;
                    result.path = FetchPath::BulkFallback;
                    Ok(result)
                }
            },
            FetchPath::Individual | FetchPath::BulkFallback => {
                self.fetch_individual(request, cancel).await
            }
        }?;

        info!(
            path = ?result.path,
            symbols = result.series.len(),
            failures = result.failures.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Acquisition complete"
        );

        Ok(result)
    }

    // ========================================================================
    // Bulk Path
    // ========================================================================

    async fn fetch_bulk(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, BarSeries>, BulkError> {
        let requested_days = calendar::trading_days(request.requested.start, request.requested.end);
        let mut bars_by_symbol: HashMap<String, Vec<Bar>> = HashMap::new();

        for day in &requested_days {
            let bars = self.grouped_day(*day, cancel).await?;
            merge_grouped(&mut bars_by_symbol, bars);
        }

        let mut collected = 0u32;
        let mut day = request.requested.start;
        while collected < request.min_history_days {
            day = calendar::previous_trading_day(day);
            if day < request.extended_start {
                debug!(
                    collected,
                    needed = request.min_history_days,
                    "Reached extended start before collecting full history"
                );
                break;
            }

            let bars = self.grouped_day(day, cancel).await?;
            if bars.is_empty() {
                debug!(%day, "No grouped bars (market holiday)");
                continue;
            }
            collected += 1;
            merge_grouped(&mut bars_by_symbol, bars);
        }

        let mut series: HashMap<String, BarSeries> = match &request.universe {
            Universe::AllActive => bars_by_symbol
                .into_iter()
                .map(|(symbol, bars)| {
                    let s = BarSeries::from_unsorted(symbol.clone(), bars);
                    (symbol, s)
                })
                .collect(),
            Universe::Symbols(symbols) => {
                let wanted: HashSet<&str> = symbols.iter().map(String::as_str).collect();
                bars_by_symbol
                    .into_iter()
                    .filter(|(symbol, _)| wanted.contains(symbol.as_str()))
                    .map(|(symbol, bars)| {
                        let s = BarSeries::from_unsorted(symbol.clone(), bars);
                        (symbol, s)
                    })
                    .collect()
            }
        };

        // Requested symbols the market had no bars for stay visible as empty series
        if let Universe::Symbols(symbols) = &request.universe {
            for symbol in symbols {
                series
                    .entry(symbol.clone())
                    .or_insert_with(|| BarSeries::empty(symbol.clone()));
            }
        }

        Ok(series)
    }

    /// Re-fetch symbols the walk-back left short of history.
    ///
    /// The walk-back counts market days, so a symbol that did not trade on
    /// one of them has fewer prior bars than it needs. Those symbols get the
    /// same range fetch the individual path would make.
    async fn top_up_short_history(
        &self,
        request: &FetchRequest,
        mut series: HashMap<String, BarSeries>,
        cancel: &CancellationToken,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        let needed = request.min_history_days as usize;
        let mut short: Vec<String> = series
            .values()
            .filter(|s| is_short_of_history(s, request.requested, needed))
            .map(|s| s.symbol().to_string())
            .collect();

        if short.is_empty() {
            return Ok(AcquisitionResult {
                series,
                failures: BTreeSet::new(),
                path: FetchPath::Bulk,
            });
        }

        short.sort();
        info!(
            symbols = short.len(),
            needed,
            "Bulk history short for some symbols, fetching their ranges"
        );

        let (fetched, failures) = self
            .fetch_ranges(short, request.extended_range(), cancel)
            .await?;
        series.extend(fetched);
        for symbol in &failures {
            series.remove(symbol);
        }

        Ok(AcquisitionResult {
            series,
            failures,
            path: FetchPath::Bulk,
        })
    }

    async fn grouped_day(
        &self,
        day: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Bar>, BulkError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BulkError::Cancelled),
            result = self.provider.grouped_daily(day) => result.map_err(BulkError::Provider),
        }
    }

    // ========================================================================
    // Individual Path
    // ========================================================================

    async fn resolve_symbols(
        &self,
        universe: &Universe,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, AcquisitionError> {
        match universe {
            Universe::Symbols(symbols) => {
                let unique: BTreeSet<&String> = symbols.iter().collect();
                Ok(unique.into_iter().cloned().collect())
            }
            Universe::AllActive => {
                let listed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AcquisitionError::Cancelled),
                    listed = self.provider.active_symbols() => listed,
                };
                listed.map_err(AcquisitionError::UniverseUnavailable)
            }
        }
    }

    async fn fetch_individual(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        let symbols = self.resolve_symbols(&request.universe, cancel).await?;
        let (series, failures) = self
            .fetch_ranges(symbols, request.extended_range(), cancel)
            .await?;

        Ok(AcquisitionResult {
            series,
            failures,
            path: FetchPath::Individual,
        })
    }

    /// One range fetch per symbol, bounded by the concurrency limit.
    async fn fetch_ranges(
        &self,
        symbols: Vec<String>,
        range: DateRange,
        cancel: &CancellationToken,
    ) -> Result<(HashMap<String, BarSeries>, BTreeSet<String>), AcquisitionError> {
        let limit = self.config.max_concurrent_fetches.max(1);
        let retry = RetryPolicy {
            max_retries: self.config.max_retries,
            delay: Duration::from_millis(self.config.retry_delay_ms),
        };

        debug!(
            symbols = symbols.len(),
            concurrency = limit,
            start = %range.start,
            end = %range.end,
            "Dispatching per-symbol fetches"
        );

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut join_set: JoinSet<(String, Result<Vec<Bar>, ProviderError>)> = JoinSet::new();
        let mut pending: HashSet<String> = HashSet::with_capacity(symbols.len());

        for symbol in symbols {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(AcquisitionError::Cancelled);
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit
                    .map_err(|e| AcquisitionError::Internal(e.to_string()))?,
            };

            let provider = Arc::clone(&self.provider);
            pending.insert(symbol.clone());

            join_set.spawn(async move {
                let _permit = permit;
                let result =
                    fetch_with_retry(provider.as_ref(), &symbol, range, retry).await;
                (symbol, result)
            });
        }

        let mut series = HashMap::new();
        let mut failures = BTreeSet::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(AcquisitionError::Cancelled);
                }
                next = join_set.join_next() => next,
            };

            match next {
                None => break,
                Some(Ok((symbol, Ok(bars)))) => {
                    pending.remove(&symbol);
                    let s = BarSeries::from_unsorted(symbol.clone(), bars);
                    series.insert(symbol, s);
                }
                Some(Ok((symbol, Err(e)))) => {
                    pending.remove(&symbol);
                    warn!(symbol = %symbol, error = %e, "Symbol fetch failed");
                    failures.insert(symbol);
                }
                Some(Err(join_error)) => {
                    warn!(error = %join_error, "Fetch task failed");
                }
            }
        }

        // Tasks that panicked never reported their symbol
        failures.extend(pending);

        Ok((series, failures))
    }
}

// ============================================================================
// Helpers
// ============================================================================

enum BulkError {
    Cancelled,
    Provider(ProviderError),
}

/// Traded inside `requested` but holds fewer than `needed` bars before it.
fn is_short_of_history(series: &BarSeries, requested: DateRange, needed: usize) -> bool {
    if needed == 0 {
        return false;
    }
    let bars = series.bars();
    let prior = bars.iter().filter(|b| b.date < requested.start).count();
    let in_range = bars
        .iter()
        .any(|b| b.date >= requested.start && b.date <= requested.end);
    in_range && prior < needed
}

fn merge_grouped(into: &mut HashMap<String, Vec<Bar>>, day: HashMap<String, Bar>) {
    for (symbol, bar) in day {
        into.entry(symbol).or_default().push(bar);
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

async fn fetch_with_retry(
    provider: &dyn MarketDataProvider,
    symbol: &str,
    range: DateRange,
    retry: RetryPolicy,
) -> Result<Vec<Bar>, ProviderError> {
    let mut attempt = 0u32;
    loop {
        match provider.daily_bars(symbol, range.start, range.end).await {
            Ok(bars) => return Ok(bars),
            Err(e) if e.is_recoverable() && attempt < retry.max_retries => {
                attempt += 1;
                let wait = match &e {
                    ProviderError::RateLimited {
                        retry_after_secs: Some(secs),
                    } => retry.delay.max(Duration::from_secs(*secs)),
                    _ => retry.delay,
                };
                debug!(
                    symbol,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "Retrying symbol fetch"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
