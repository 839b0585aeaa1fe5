//! Canonical cache key.
//!
//! One column group per filter kind, so the key does not depend on the order
//! filters were listed in. A disabled filter and an absent filter encode the
//! same way: `enabled = 0` with every parameter NULL. Lookups compare each
//! column with SQLite's `IS`, which treats two NULLs as equal.

use chrono::NaiveDate;
use rusqlite::types::{ToSql, ToSqlOutput, Value};
use sha2::{Digest, Sha256};

use crate::data::{DateRange, Universe};
use crate::filters::{Condition, FilterSpec, GapDirection};

/// Key columns in schema order.
pub const KEY_COLUMNS: &[&str] = &[
    "data_date",
    "range_start",
    "universe",
    "pr_enabled",
    "pr_min",
    "pr_max",
    "ma_enabled",
    "ma_period",
    "ma_condition",
    "rsi_enabled",
    "rsi_period",
    "rsi_condition",
    "rsi_threshold",
    "gap_enabled",
    "gap_direction",
    "gap_threshold",
    "pddv_enabled",
    "pddv_min",
    "pddv_max",
    "rv_enabled",
    "rv_recent",
    "rv_lookback",
    "rv_min_ratio",
];

/// A float compared by bit pattern, with `-0.0` folded into `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyReal(u64);

impl KeyReal {
    pub fn new(value: f64) -> Self {
        let value = if value == 0.0 { 0.0 } else { value };
        Self(value.to_bits())
    }

    pub fn get(self) -> f64 {
        f64::from_bits(self.0)
    }
}

fn real(value: Option<f64>) -> Option<KeyReal> {
    value.map(KeyReal::new)
}

/// A single SQL parameter bound into a key column.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<Option<u32>> for KeyValue {
    fn from(v: Option<u32>) -> Self {
        v.map_or(Self::Null, |n| Self::Int(i64::from(n)))
    }
}

impl From<Option<KeyReal>> for KeyValue {
    fn from(v: Option<KeyReal>) -> Self {
        v.map_or(Self::Null, |r| Self::Real(r.get()))
    }
}

impl From<Option<&'static str>> for KeyValue {
    fn from(v: Option<&'static str>) -> Self {
        v.map_or(Self::Null, |s| Self::Text(s.to_string()))
    }
}

impl ToSql for KeyValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            Self::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
        })
    }
}

/// Exact-match identity of a screening request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Requested end date
    pub data_date: NaiveDate,
    pub range_start: NaiveDate,
    /// `*` for every active symbol, otherwise a digest of the sorted list
    pub universe: String,

    pub pr_enabled: bool,
    pub pr_min: Option<KeyReal>,
    pub pr_max: Option<KeyReal>,

    pub ma_enabled: bool,
    pub ma_period: Option<u32>,
    pub ma_condition: Option<Condition>,

    pub rsi_enabled: bool,
    pub rsi_period: Option<u32>,
    pub rsi_condition: Option<Condition>,
    pub rsi_threshold: Option<KeyReal>,

    pub gap_enabled: bool,
    pub gap_direction: Option<GapDirection>,
    pub gap_threshold: Option<KeyReal>,

    pub pddv_enabled: bool,
    pub pddv_min: Option<KeyReal>,
    pub pddv_max: Option<KeyReal>,

    pub rv_enabled: bool,
    pub rv_recent: Option<u32>,
    pub rv_lookback: Option<u32>,
    pub rv_min_ratio: Option<KeyReal>,
}

impl CacheKey {
    fn empty(requested: &DateRange, universe: &Universe) -> Self {
        Self {
            data_date: requested.end,
            range_start: requested.start,
            universe: universe_fingerprint(universe),
            pr_enabled: false,
            pr_min: None,
            pr_max: None,
            ma_enabled: false,
            ma_period: None,
            ma_condition: None,
            rsi_enabled: false,
            rsi_period: None,
            rsi_condition: None,
            rsi_threshold: None,
            gap_enabled: false,
            gap_direction: None,
            gap_threshold: None,
            pddv_enabled: false,
            pddv_min: None,
            pddv_max: None,
            rv_enabled: false,
            rv_recent: None,
            rv_lookback: None,
            rv_min_ratio: None,
        }
    }

    /// Build the key for a request. Disabled filters leave their slot unset.
    pub fn from_request(requested: &DateRange, universe: &Universe, filters: &[FilterSpec]) -> Self {
        let mut key = Self::empty(requested, universe);

        for filter in filters.iter().filter(|f| f.is_enabled()) {
            match filter {
                FilterSpec::PriceRange {
                    min_price,
                    max_price,
                    ..
                } => {
                    key.pr_enabled = true;
                    key.pr_min = real(*min_price);
                    key.pr_max = real(*max_price);
                }
                FilterSpec::PriceVsMovingAverage {
                    period, condition, ..
                } => {
                    key.ma_enabled = true;
                    key.ma_period = Some(*period);
                    key.ma_condition = Some(*condition);
                }
                FilterSpec::Rsi {
                    period,
                    condition,
                    threshold,
                    ..
                } => {
                    key.rsi_enabled = true;
                    key.rsi_period = Some(*period);
                    key.rsi_condition = Some(*condition);
                    key.rsi_threshold = real(Some(*threshold));
                }
                FilterSpec::Gap {
                    direction,
                    threshold_pct,
                    ..
                } => {
                    key.gap_enabled = true;
                    key.gap_direction = Some(*direction);
                    key.gap_threshold = real(*threshold_pct);
                }
                FilterSpec::PreviousDayDollarVolume {
                    min_dollar_volume,
                    max_dollar_volume,
                    ..
                } => {
                    key.pddv_enabled = true;
                    key.pddv_min = real(*min_dollar_volume);
                    key.pddv_max = real(*max_dollar_volume);
                }
                FilterSpec::RelativeVolume {
                    recent_days,
                    lookback_days,
                    min_ratio,
                    ..
                } => {
                    key.rv_enabled = true;
                    key.rv_recent = Some(*recent_days);
                    key.rv_lookback = Some(*lookback_days);
                    key.rv_min_ratio = real(Some(*min_ratio));
                }
            }
        }

        key
    }

    /// Column values in [`KEY_COLUMNS`] order.
    pub fn values(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::Text(self.data_date.format("%Y-%m-%d").to_string()),
            KeyValue::Text(self.range_start.format("%Y-%m-%d").to_string()),
            KeyValue::Text(self.universe.clone()),
            self.pr_enabled.into(),
            self.pr_min.into(),
            self.pr_max.into(),
            self.ma_enabled.into(),
            self.ma_period.into(),
            self.ma_condition.map(|c| c.as_str()).into(),
            self.rsi_enabled.into(),
            self.rsi_period.into(),
            self.rsi_condition.map(|c| c.as_str()).into(),
            self.rsi_threshold.into(),
            self.gap_enabled.into(),
            self.gap_direction.map(|g| g.as_str()).into(),
            self.gap_threshold.into(),
            self.pddv_enabled.into(),
            self.pddv_min.into(),
            self.pddv_max.into(),
            self.rv_enabled.into(),
            self.rv_recent.into(),
            self.rv_lookback.into(),
            self.rv_min_ratio.into(),
        ]
    }

    /// `col1 IS ?{first} AND col2 IS ?{first+1} ...`
    pub fn where_clause(first_param: usize) -> String {
        KEY_COLUMNS
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{col} IS ?{}", first_param + i))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// `*` for the full market, `sha256:<hex>` of the normalized symbol list otherwise.
pub fn universe_fingerprint(universe: &Universe) -> String {
    match universe.normalized() {
        Universe::AllActive => "*".to_string(),
        Universe::Symbols(symbols) => {
            let digest = Sha256::digest(symbols.join(",").as_bytes());
            format!("sha256:{}", hex::encode(digest))
        }
    }
}
