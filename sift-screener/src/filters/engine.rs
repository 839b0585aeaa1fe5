//! Composite filter evaluation.
//!
//! Each enabled filter produces a full-length value column and a boolean
//! mask over the symbol's bars. The composite mask is the AND of those
//! masks, restricted to the requested dates. Evaluation is CPU-bound and
//! runs on a dedicated rayon pool, never on the tokio runtime threads.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use sift_common::config::EvaluationConfig;
use statrs::statistics::Statistics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::indicators;
use super::spec::{FilterKind, FilterSpec, GapDirection};
use crate::data::{BarSeries, DateRange};
use crate::error::ScreenerError;

// ============================================================================
// Results
// ============================================================================

/// Whether a symbol could be evaluated at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationStatus {
    Evaluated,
    /// Fewer bars than the longest enabled filter needs; the symbol is skipped.
    InsufficientHistory { available: usize, required: usize },
}

/// Summary of one filter's decisive value over the qualifying dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricsSummary {
    /// Summarize a non-empty sample; `None` for an empty one.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let std_dev = if values.len() == 1 {
            0.0
        } else {
            values.iter().population_std_dev()
        };
        Some(Self {
            count: values.len(),
            mean: values.iter().mean(),
            std_dev,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Per-symbol outcome of composite evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationResult {
    pub symbol: String,
    pub status: EvaluationStatus,
    /// Ascending dates inside the requested range where every enabled filter holds
    pub qualifying_dates: Vec<NaiveDate>,
    pub metrics: BTreeMap<FilterKind, MetricsSummary>,
}

impl QualificationResult {
    pub fn qualifies(&self) -> bool {
        !self.qualifying_dates.is_empty()
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, EvaluationStatus::InsufficientHistory { .. })
    }
}

/// One filter's decisive values and pass/fail mask, aligned with the bars.
#[derive(Debug, Clone)]
pub struct FilterColumn {
    pub kind: FilterKind,
    pub values: Vec<f64>,
    pub mask: Vec<bool>,
}

// ============================================================================
// Column computation
// ============================================================================

fn within(value: f64, min: Option<f64>, max: Option<f64>) -> bool {
    !value.is_nan() && min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
}

/// Compute the value column and mask for one filter.
///
/// NaN values never pass.
pub fn filter_column(series: &BarSeries, filter: &FilterSpec) -> FilterColumn {
    let closes = series.closes();

    let (values, mask): (Vec<f64>, Vec<bool>) = match filter {
        FilterSpec::PriceRange {
            min_price,
            max_price,
            ..
        } => {
            let mask = closes
                .iter()
                .map(|c| within(*c, *min_price, *max_price))
                .collect();
            (closes, mask)
        }
        FilterSpec::PriceVsMovingAverage {
            period, condition, ..
        } => {
            let ma = indicators::moving_average(&closes, *period as usize);
            let mask = closes
                .iter()
                .zip(&ma)
                .map(|(c, m)| !m.is_nan() && condition.holds(*c, *m))
                .collect();
            (indicators::distance_pct(&closes, &ma), mask)
        }
        FilterSpec::Rsi {
            period,
            condition,
            threshold,
            ..
        } => {
            let values = indicators::rsi(&closes, *period as usize);
            let mask = values
                .iter()
                .map(|v| !v.is_nan() && condition.holds(*v, *threshold))
                .collect();
            (values, mask)
        }
        FilterSpec::Gap {
            direction,
            threshold_pct,
            ..
        } => {
            let threshold = threshold_pct.unwrap_or(0.0);
            let values = indicators::gap_pct(&series.opens(), &closes);
            let mask = values
                .iter()
                .map(|g| {
                    if g.is_nan() {
                        return false;
                    }
                    match direction {
                        GapDirection::Up => *g > 0.0 && *g >= threshold,
                        GapDirection::Down => *g < 0.0 && g.abs() >= threshold,
                        GapDirection::Any => g.abs() >= threshold,
                    }
                })
                .collect();
            (values, mask)
        }
        FilterSpec::PreviousDayDollarVolume {
            min_dollar_volume,
            max_dollar_volume,
            ..
        } => {
            let values = indicators::previous_dollar_volume(&series.volumes(), &closes);
            let mask = values
                .iter()
                .map(|v| within(*v, *min_dollar_volume, *max_dollar_volume))
                .collect();
            (values, mask)
        }
        FilterSpec::RelativeVolume {
            recent_days,
            lookback_days,
            min_ratio,
            ..
        } => {
            let values = indicators::relative_volume(
                &series.volumes(),
                *recent_days as usize,
                *lookback_days as usize,
            );
            let mask = values
                .iter()
                .map(|r| !r.is_nan() && *r >= *min_ratio)
                .collect();
            (values, mask)
        }
    };

    FilterColumn {
        kind: filter.kind(),
        values,
        mask,
    }
}

/// Longest bar requirement among enabled filters; at least one bar.
pub fn required_bars(filters: &[FilterSpec]) -> usize {
    filters
        .iter()
        .filter(|f| f.is_enabled())
        .map(FilterSpec::required_bars)
        .max()
        .unwrap_or(1)
        .max(1)
}

// ============================================================================
// Engine
// ============================================================================

/// Evaluates composite filters over bar series on a dedicated worker pool.
pub struct FilterEngine {
    pool: ThreadPool,
}

impl FilterEngine {
    /// Build the worker pool. `worker_threads == 0` sizes it to the CPU count.
    pub fn new(config: &EvaluationConfig) -> Result<Self, ScreenerError> {
        let threads = if config.worker_threads == 0 {
            num_cpus::get()
        } else {
            config.worker_threads
        };

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sift-eval-{i}"))
            .build()
            .map_err(|e| ScreenerError::Evaluation(e.to_string()))?;

        info!(threads, "Filter evaluation pool ready");
        Ok(Self { pool })
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Evaluate every enabled filter against one series.
    pub fn evaluate(
        series: &BarSeries,
        requested: &DateRange,
        filters: &[FilterSpec],
    ) -> QualificationResult {
        let symbol = series.symbol().to_string();
        let required = required_bars(filters);

        if series.len() < required {
            debug!(
                symbol = %symbol,
                available = series.len(),
                required,
                "Insufficient history, skipping"
            );
            return QualificationResult {
                symbol,
                status: EvaluationStatus::InsufficientHistory {
                    available: series.len(),
                    required,
                },
                qualifying_dates: Vec::new(),
                metrics: BTreeMap::new(),
            };
        }

        let dates = series.dates();
        let columns: Vec<FilterColumn> = filters
            .iter()
            .filter(|f| f.is_enabled())
            .map(|f| filter_column(series, f))
            .collect();

        let qualifying: Vec<usize> = (0..dates.len())
            .filter(|&i| requested.contains(dates[i]))
            .filter(|&i| columns.iter().all(|col| col.mask[i]))
            .collect();

        let metrics = columns
            .iter()
            .filter_map(|col| {
                let values: Vec<f64> = qualifying.iter().map(|&i| col.values[i]).collect();
                MetricsSummary::from_values(&values).map(|m| (col.kind, m))
            })
            .collect();

        QualificationResult {
            symbol,
            status: EvaluationStatus::Evaluated,
            qualifying_dates: qualifying.iter().map(|&i| dates[i]).collect(),
            metrics,
        }
    }

    /// Evaluate a batch of series in parallel.
    ///
    /// Returns `None` when the token is cancelled before every symbol was
    /// evaluated. Output order follows input order.
    pub fn evaluate_batch(
        &self,
        series: &[BarSeries],
        requested: &DateRange,
        filters: &[FilterSpec],
        cancel: &CancellationToken,
    ) -> Option<Vec<QualificationResult>> {
        self.pool.install(|| {
            series
                .par_iter()
                .map(|s| {
                    if cancel.is_cancelled() {
                        None
                    } else {
                        Some(Self::evaluate(s, requested, filters))
                    }
                })
                .collect()
        })
    }
}

impl std::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEngine")
            .field("worker_threads", &self.pool.current_num_threads())
            .finish()
    }
}
