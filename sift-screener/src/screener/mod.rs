//! Screening orchestration.
//!
//! `screen` runs one request end to end:
//! validate, extend the range, consult the cache, acquire bars, evaluate on
//! the CPU pool, and store the outcome. Nothing is stored for a cancelled
//! request or for one where any symbol failed to fetch.

mod request;

pub use request::{BatchStats, ScreeningRequest, ScreeningResponse};

use std::sync::Arc;
use std::time::Instant;

use sift_common::config::{LookbackConfig, ScreenerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backtest::{self, BacktestError, BacktestJob, BacktestReport, BacktestRunner};
use crate::cache::{
    filter_params_echo, BatchCounters, CacheKey, CachedSymbol, ScreeningCache, StoreRequest,
};
use crate::data::{BarSeries, DataAcquirer, FetchRequest, MarketDataProvider};
use crate::error::ScreenerError;
use crate::filters::FilterEngine;
use crate::lookback;

/// Runs screening requests against a provider, with an optional result cache.
pub struct Screener {
    acquirer: DataAcquirer,
    engine: Arc<FilterEngine>,
    cache: Option<Arc<dyn ScreeningCache>>,
    lookback: LookbackConfig,
    max_concurrent_backtests: usize,
}

impl Screener {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        cache: Option<Arc<dyn ScreeningCache>>,
        config: &ScreenerConfig,
    ) -> Result<Self, ScreenerError> {
        let engine = FilterEngine::new(&config.evaluation)?;
        info!(
            provider = provider.name(),
            cache = cache.is_some(),
            eval_threads = engine.worker_threads(),
            "Screener initialized"
        );

        Ok(Self {
            acquirer: DataAcquirer::new(provider, config.acquisition.clone()),
            engine: Arc::new(engine),
            cache,
            lookback: config.lookback.clone(),
            max_concurrent_backtests: config.backtest.max_concurrent_jobs.max(1),
        })
    }

    /// Screen one request.
    pub async fn screen(
        &self,
        request: &ScreeningRequest,
        cancel: &CancellationToken,
    ) -> Result<ScreeningResponse, ScreenerError> {
        let started = Instant::now();
        let request = request.normalized();
        request.validate()?;

        let requested = request.requested();
        let extension = lookback::compute_extension(&request.filters, requested, &self.lookback)?;
        let key = CacheKey::from_request(&requested, &request.universe, &request.filters);

        debug!(
            start = %requested.start,
            end = %requested.end,
            extended_start = %extension.extended_start,
            extension_days = extension.extension_days,
            "Lookback computed"
        );

        // ====================================================================
        // Cache lookup
        // ====================================================================

        if let Some(cache) = &self.cache {
            match cache.lookup(&key).await {
                Ok(Some(entry)) => {
                    let execution_time_ms = started.elapsed().as_millis() as u64;
                    info!(
                        entry_id = %entry.entry_id,
                        qualifying = entry.symbols.len(),
                        execution_time_ms,
                        "Served screening from cache"
                    );
                    return Ok(ScreeningResponse {
                        results: entry.symbols,
                        stats: BatchStats {
                            counters: entry.counters,
                            execution_time_ms,
                        },
                        cache_hit: true,
                        extension,
                        fetch_path: None,
                        cache_entry_id: Some(entry.entry_id),
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Screening cache lookup failed, treating as miss"),
            }
        }

        if cancel.is_cancelled() {
            return Err(ScreenerError::Cancelled);
        }

        // ====================================================================
        // Acquisition
        // ====================================================================

        let fetch = FetchRequest {
            universe: request.universe.clone(),
            requested,
            extended_start: extension.extended_start,
            min_history_days: extension.max_requirement,
        };
        let acquired = self.acquirer.fetch(&fetch, cancel).await?;
        let fetch_path = acquired.path;
        let failures = acquired.failures;

        let mut series: Vec<BarSeries> = acquired.series.into_values().collect();
        series.sort_by(|a, b| a.symbol().cmp(b.symbol()));

        // ====================================================================
        // Evaluation
        // ====================================================================

        let engine = Arc::clone(&self.engine);
        let filters = request.filters.clone();
        let token = cancel.clone();
        let results = tokio::task::spawn_blocking(move || {
            engine.evaluate_batch(&series, &requested, &filters, &token)
        })
        .await
        .map_err(|e| ScreenerError::Evaluation(e.to_string()))?
        .ok_or(ScreenerError::Cancelled)?;

        if cancel.is_cancelled() {
            return Err(ScreenerError::Cancelled);
        }

        let params = filter_params_echo(&request.filters);
        let qualifying: Vec<CachedSymbol> = results
            .iter()
            .filter(|r| r.qualifies())
            .map(|r| CachedSymbol::from_result(r, params.clone()))
            .collect();

        let counters = BatchCounters {
            symbols_screened: results.len() + failures.len(),
            symbols_qualifying: qualifying.len(),
            symbols_failed: failures.len(),
            symbols_skipped: results.iter().filter(|r| r.is_skipped()).count(),
            failed_symbols: failures.into_iter().collect(),
        };

        // ====================================================================
        // Store
        // ====================================================================

        // Only complete batches are cached
        let mut cache_entry_id = None;
        if counters.symbols_failed > 0 && self.cache.is_some() {
            info!(
                failed = counters.symbols_failed,
                "Not caching screening with failed symbols"
            );
        } else if let Some(cache) = &self.cache {
            let store = StoreRequest {
                data_date: requested.end,
                symbols: &qualifying,
                counters: &counters,
            };
            match cache.store(&key, store).await {
                Ok(entry) => cache_entry_id = Some(entry.entry_id),
                Err(e) => warn!(error = %e, "Failed to store screening result"),
            }
        }

        let execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            path = ?fetch_path,
            screened = counters.symbols_screened,
            qualifying = counters.symbols_qualifying,
            failed = counters.symbols_failed,
            skipped = counters.symbols_skipped,
            execution_time_ms,
            "Screening complete"
        );

        Ok(ScreeningResponse {
            results: qualifying,
            stats: BatchStats {
                counters,
                execution_time_ms,
            },
            cache_hit: false,
            extension,
            fetch_path: Some(fetch_path),
            cache_entry_id,
        })
    }

    /// Hand every qualifying symbol of `response` to the backtest runner.
    ///
    /// Results come back in symbol order, one per qualifying symbol.
    pub async fn backtest_qualifying(
        &self,
        response: &ScreeningResponse,
        runner: Arc<dyn BacktestRunner>,
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<BacktestReport, BacktestError>)> {
        let requested = response.extension.requested;
        let jobs = response
            .results
            .iter()
            .map(|r| {
                BacktestJob::new(
                    &r.symbol,
                    requested,
                    r.qualifying_dates.clone(),
                    r.filter_params.clone(),
                )
            })
            .collect();

        backtest::dispatch(jobs, runner, self.max_concurrent_backtests, cancel).await
    }
}
