//! Lookback analysis.
//!
//! Period-based filters need history before the first requested date. This
//! module works out how many trading days to prepend and where the fetch
//! window starts. Pure and deterministic: no I/O.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use sift_common::config::LookbackConfig;

use crate::data::{calendar, DateRange};
use crate::error::ConfigurationError;
use crate::filters::{FilterKind, FilterSpec};

/// The requested range plus the history prepended to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtendedRange {
    pub requested: DateRange,
    /// First date to fetch
    pub extended_start: NaiveDate,
    /// `max_requirement + buffer_days`, in trading days
    pub extension_days: u32,
    /// Longest single-filter requirement
    pub max_requirement: u32,
    pub buffer_days: u32,
    /// Requirement per enabled filter
    pub per_filter: BTreeMap<FilterKind, u32>,
}

impl ExtendedRange {
    /// The full window to fetch, `[extended_start, requested.end]`.
    pub fn fetch_range(&self) -> DateRange {
        DateRange::new(self.extended_start, self.requested.end)
    }
}

/// Compute the fetch extension for a filter set.
///
/// Disabled filters contribute nothing. Fails with
/// [`ConfigurationError::LookbackExceedsCap`] when the extension would exceed
/// `policy.max_extension_days`; the range is never silently truncated.
pub fn compute_extension(
    filters: &[FilterSpec],
    requested: DateRange,
    policy: &LookbackConfig,
) -> Result<ExtendedRange, ConfigurationError> {
    if !requested.is_ordered() {
        return Err(ConfigurationError::InvertedDateRange {
            start: requested.start,
            end: requested.end,
        });
    }

    // Repeated kinds keep their largest requirement
    let mut per_filter: BTreeMap<FilterKind, u32> = BTreeMap::new();
    for filter in filters.iter().filter(|f| f.is_enabled()) {
        let days = filter.lookback_days();
        per_filter
            .entry(filter.kind())
            .and_modify(|d| *d = (*d).max(days))
            .or_insert(days);
    }

    let max_requirement = filters
        .iter()
        .filter(|f| f.is_enabled())
        .map(FilterSpec::lookback_days)
        .max()
        .unwrap_or(0);
    let extension_days = max_requirement.saturating_add(policy.buffer_days);

    if extension_days > policy.max_extension_days {
        return Err(ConfigurationError::LookbackExceedsCap {
            required: extension_days,
            cap: policy.max_extension_days,
        });
    }

    Ok(ExtendedRange {
        requested,
        extended_start: calendar::subtract_trading_days(requested.start, extension_days),
        extension_days,
        max_requirement,
        buffer_days: policy.buffer_days,
        per_filter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{Condition, GapDirection};
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn ma(period: u32) -> FilterSpec {
        FilterSpec::PriceVsMovingAverage {
            enabled: true,
            period,
            condition: Condition::Above,
        }
    }

    fn rsi(period: u32) -> FilterSpec {
        FilterSpec::Rsi {
            enabled: true,
            period,
            condition: Condition::Below,
            threshold: 30.0,
        }
    }

    fn rel_vol(recent: u32, lookback: u32) -> FilterSpec {
        FilterSpec::RelativeVolume {
            enabled: true,
            recent_days: recent,
            lookback_days: lookback,
            min_ratio: 1.5,
        }
    }

    #[test]
    fn test_ma20_over_january() {
        let range = DateRange::new(d(2024, 1, 1), d(2024, 1, 30));
        let ext = compute_extension(&[ma(20)], range, &LookbackConfig::default()).unwrap();
        assert_eq!(ext.max_requirement, 20);
        assert_eq!(ext.extension_days, 25);
        assert_eq!(ext.extended_start, d(2023, 11, 27));
        assert_eq!(ext.fetch_range(), DateRange::new(d(2023, 11, 27), d(2024, 1, 30)));
    }

    #[test]
    fn test_per_filter_requirements() {
        let filters = vec![
            FilterSpec::PriceRange {
                enabled: true,
                min_price: None,
                max_price: None,
            },
            FilterSpec::Gap {
                enabled: true,
                direction: GapDirection::Up,
                threshold_pct: None,
            },
            rsi(14),
            rel_vol(2, 20),
        ];
        let range = DateRange::single(d(2024, 3, 4));
        let ext = compute_extension(&filters, range, &LookbackConfig::default()).unwrap();

        assert_eq!(ext.per_filter[&FilterKind::PriceRange], 0);
        assert_eq!(ext.per_filter[&FilterKind::Gap], 1);
        assert_eq!(ext.per_filter[&FilterKind::Rsi], 15);
        assert_eq!(ext.per_filter[&FilterKind::RelativeVolume], 20);
        assert_eq!(ext.max_requirement, 20);
    }

    #[test]
    fn test_repeated_kind_keeps_longest_requirement() {
        let range = DateRange::single(d(2024, 3, 4));
        let ext = compute_extension(
            &[rel_vol(1, 66), rel_vol(1, 1)],
            range,
            &LookbackConfig::default(),
        )
        .unwrap();

        assert_eq!(ext.max_requirement, 66);
        assert_eq!(ext.extension_days, 71);
        assert_eq!(ext.per_filter[&FilterKind::RelativeVolume], 66);
    }

    #[test]
    fn test_no_filters_still_buffers() {
        let range = DateRange::single(d(2024, 1, 8));
        let ext = compute_extension(&[], range, &LookbackConfig::default()).unwrap();
        assert_eq!(ext.max_requirement, 0);
        assert_eq!(ext.extension_days, 5);
        assert_eq!(ext.extended_start, d(2024, 1, 1));
    }

    #[test]
    fn test_disabled_filter_contributes_nothing() {
        let disabled = FilterSpec::PriceVsMovingAverage {
            enabled: false,
            period: 200,
            condition: Condition::Above,
        };
        let range = DateRange::single(d(2024, 1, 8));
        let ext = compute_extension(&[disabled], range, &LookbackConfig::default()).unwrap();
        assert_eq!(ext.max_requirement, 0);
        assert!(ext.per_filter.is_empty());
    }

    #[test]
    fn test_cap_exceeded_rejected() {
        let range = DateRange::single(d(2024, 1, 8));
        let err = compute_extension(&[ma(201)], range, &LookbackConfig::default()).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::LookbackExceedsCap {
                required: 206,
                cap: 205
            }
        );
        // exactly at the cap is fine
        assert!(compute_extension(&[ma(200)], range, &LookbackConfig::default()).is_ok());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let range = DateRange::new(d(2024, 2, 1), d(2024, 1, 1));
        let err = compute_extension(&[], range, &LookbackConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvertedDateRange { .. }));
    }

    fn arb_filter() -> impl Strategy<Value = FilterSpec> {
        prop_oneof![
            (1u32..=150).prop_map(ma),
            (1u32..=100).prop_map(rsi),
            (1u32..=30, 1u32..=150).prop_map(|(r, l)| rel_vol(r.min(l), l)),
            Just(FilterSpec::Gap {
                enabled: true,
                direction: GapDirection::Any,
                threshold_pct: Some(1.0),
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_extension_covers_every_requirement(
            filters in prop::collection::vec(arb_filter(), 0..6),
            offset in 0i64..2000,
        ) {
            let start = d(2020, 1, 1) + chrono::Duration::days(offset);
            let range = DateRange::new(start, start + chrono::Duration::days(10));
            let policy = LookbackConfig::default();
            let ext = compute_extension(&filters, range, &policy).unwrap();

            for f in &filters {
                prop_assert!(ext.extension_days >= f.lookback_days());
            }
            prop_assert!(ext.extension_days >= ext.max_requirement);
            prop_assert!(ext.extended_start <= range.start);
            prop_assert_eq!(
                calendar::count_trading_days(ext.extended_start, range.start)
                    - u32::from(calendar::is_trading_day(range.start)),
                ext.extension_days
            );
        }
    }
}
