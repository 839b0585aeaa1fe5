//! Filter configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigurationError;

// ============================================================================
// Kinds and Enums
// ============================================================================

/// Fieldless discriminant of [`FilterSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    PriceRange,
    PriceVsMovingAverage,
    Rsi,
    Gap,
    PreviousDayDollarVolume,
    RelativeVolume,
}

impl FilterKind {
    pub const ALL: [FilterKind; 6] = [
        FilterKind::PriceRange,
        FilterKind::PriceVsMovingAverage,
        FilterKind::Rsi,
        FilterKind::Gap,
        FilterKind::PreviousDayDollarVolume,
        FilterKind::RelativeVolume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceRange => "price_range",
            Self::PriceVsMovingAverage => "price_vs_moving_average",
            Self::Rsi => "rsi",
            Self::Gap => "gap",
            Self::PreviousDayDollarVolume => "previous_day_dollar_volume",
            Self::RelativeVolume => "relative_volume",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison side for moving-average and RSI filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Above,
    Below,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
        }
    }

    /// Strict comparison of `value` against `reference`.
    pub fn holds(&self, value: f64, reference: f64) -> bool {
        match self {
            Self::Above => value > reference,
            Self::Below => value < reference,
        }
    }
}

/// Required sign of an opening gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapDirection {
    Up,
    Down,
    Any,
}

impl GapDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Any => "any",
        }
    }
}

// ============================================================================
// Filter Spec
// ============================================================================

/// One configured filter.
///
/// Serialized with a `kind` tag, e.g.
/// `{"kind": "gap", "direction": "up", "threshold_pct": 4.0}`.
/// `enabled` defaults to true when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    /// Close within `[min_price, max_price]`; either bound may be unset.
    PriceRange {
        #[serde(default = "default_enabled")]
        enabled: bool,
        #[serde(default)]
        min_price: Option<f64>,
        #[serde(default)]
        max_price: Option<f64>,
    },
    /// Close strictly above/below the trailing `period`-bar mean close.
    PriceVsMovingAverage {
        #[serde(default = "default_enabled")]
        enabled: bool,
        period: u32,
        condition: Condition,
    },
    /// RSI over `period` close-to-close deltas strictly above/below `threshold`.
    Rsi {
        #[serde(default = "default_enabled")]
        enabled: bool,
        period: u32,
        condition: Condition,
        threshold: f64,
    },
    /// Opening gap versus the prior close, in percent.
    Gap {
        #[serde(default = "default_enabled")]
        enabled: bool,
        direction: GapDirection,
        #[serde(default)]
        threshold_pct: Option<f64>,
    },
    /// Prior bar's `volume * close` within optional bounds.
    PreviousDayDollarVolume {
        #[serde(default = "default_enabled")]
        enabled: bool,
        #[serde(default)]
        min_dollar_volume: Option<f64>,
        #[serde(default)]
        max_dollar_volume: Option<f64>,
    },
    /// Mean volume over `recent_days` divided by mean volume over `lookback_days`.
    RelativeVolume {
        #[serde(default = "default_enabled")]
        enabled: bool,
        recent_days: u32,
        lookback_days: u32,
        min_ratio: f64,
    },
}

fn default_enabled() -> bool {
    true
}

impl FilterSpec {
    pub fn kind(&self) -> FilterKind {
        match self {
            Self::PriceRange { .. } => FilterKind::PriceRange,
            Self::PriceVsMovingAverage { .. } => FilterKind::PriceVsMovingAverage,
            Self::Rsi { .. } => FilterKind::Rsi,
            Self::Gap { .. } => FilterKind::Gap,
            Self::PreviousDayDollarVolume { .. } => FilterKind::PreviousDayDollarVolume,
            Self::RelativeVolume { .. } => FilterKind::RelativeVolume,
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            Self::PriceRange { enabled, .. }
            | Self::PriceVsMovingAverage { enabled, .. }
            | Self::Rsi { enabled, .. }
            | Self::Gap { enabled, .. }
            | Self::PreviousDayDollarVolume { enabled, .. }
            | Self::RelativeVolume { enabled, .. } => *enabled,
        }
    }

    /// Trailing trading days of history needed before a date; 0 when disabled.
    pub fn lookback_days(&self) -> u32 {
        if !self.is_enabled() {
            return 0;
        }
        match self {
            Self::PriceRange { .. } => 0,
            Self::PriceVsMovingAverage { period, .. } => *period,
            Self::Rsi { period, .. } => period.saturating_add(1),
            Self::Gap { .. } | Self::PreviousDayDollarVolume { .. } => 1,
            Self::RelativeVolume {
                recent_days,
                lookback_days,
                ..
            } => (*recent_days).max(*lookback_days),
        }
    }

    /// Bars (including the evaluated date) needed to compute one value.
    pub fn required_bars(&self) -> usize {
        match self {
            Self::PriceRange { .. } => 1,
            Self::PriceVsMovingAverage { period, .. } => *period as usize,
            Self::Rsi { period, .. } => *period as usize + 1,
            Self::Gap { .. } | Self::PreviousDayDollarVolume { .. } => 2,
            Self::RelativeVolume {
                recent_days,
                lookback_days,
                ..
            } => (*recent_days).max(*lookback_days) as usize,
        }
    }

    /// Check parameter bounds. Disabled filters are not checked.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let kind = self.kind();
        let invalid = |reason: &str| -> Result<(), ConfigurationError> {
            Err(ConfigurationError::invalid(kind, reason))
        };

        match self {
            Self::PriceRange {
                min_price,
                max_price,
                ..
            } => {
                check_bounds(kind, *min_price, *max_price, "min_price", "max_price")?;
            }
            Self::PriceVsMovingAverage { period, .. } => {
                if *period == 0 {
                    return invalid("period must be at least 1");
                }
            }
            Self::Rsi {
                period, threshold, ..
            } => {
                if *period == 0 {
                    return invalid("period must be at least 1");
                }
                if !threshold.is_finite() || !(0.0..=100.0).contains(threshold) {
                    return invalid("threshold must be between 0 and 100");
                }
            }
            Self::Gap { threshold_pct, .. } => {
                if let Some(t) = threshold_pct {
                    if !t.is_finite() || *t < 0.0 {
                        return invalid("threshold_pct must be a non-negative number");
                    }
                }
            }
            Self::PreviousDayDollarVolume {
                min_dollar_volume,
                max_dollar_volume,
                ..
            } => {
                check_bounds(
                    kind,
                    *min_dollar_volume,
                    *max_dollar_volume,
                    "min_dollar_volume",
                    "max_dollar_volume",
                )?;
            }
            Self::RelativeVolume {
                recent_days,
                lookback_days,
                min_ratio,
                ..
            } => {
                if *recent_days == 0 || *lookback_days == 0 {
                    return invalid("recent_days and lookback_days must be at least 1");
                }
                if recent_days > lookback_days {
                    return invalid("recent_days must not exceed lookback_days");
                }
                if !min_ratio.is_finite() || *min_ratio < 0.0 {
                    return invalid("min_ratio must be a non-negative number");
                }
            }
        }
        Ok(())
    }

    /// Parameters echoed alongside cached results.
    pub fn params_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn check_bounds(
    kind: FilterKind,
    min: Option<f64>,
    max: Option<f64>,
    min_name: &str,
    max_name: &str,
) -> Result<(), ConfigurationError> {
    for (name, value) in [(min_name, min), (max_name, max)] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(ConfigurationError::invalid(
                    kind,
                    format!("{} must be a non-negative number", name),
                ));
            }
        }
    }
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            return Err(ConfigurationError::invalid(
                kind,
                format!("{} ({}) is greater than {} ({})", min_name, lo, max_name, hi),
            ));
        }
    }
    Ok(())
}
