//! End-to-end screening scenarios against a mock market.

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use common::{d, test_config, weekday_bars, MockMarket};
use sift_screener::data::{calendar, Bar, BarSeries, DateRange, FetchPath};
use sift_screener::filters::{Condition, FilterEngine, FilterKind, FilterSpec, GapDirection};
use sift_screener::{Screener, ScreeningRequest};
use tokio_util::sync::CancellationToken;

fn screener(market: Arc<MockMarket>) -> Screener {
    Screener::new(market, None, &test_config()).unwrap()
}

// ============================================================================
// Moving Average Over a Month
// ============================================================================

#[tokio::test]
async fn test_ma20_fetches_extended_range_and_reports_requested_dates() {
    let market = Arc::new(MockMarket::new().with_series(
        "RISE",
        weekday_bars(d(2023, 10, 2), d(2024, 2, 9), |i, _| {
            let close = 50.0 + i as f64 * 0.25;
            (close - 0.1, close, 2_000_000.0)
        }),
    ));

    let request = ScreeningRequest::new(d(2024, 1, 1), d(2024, 1, 30))
        .with_symbols(["RISE"])
        .with_filter(FilterSpec::PriceVsMovingAverage {
            enabled: true,
            period: 20,
            condition: Condition::Above,
        });

    let response = screener(market.clone())
        .screen(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.extension.extension_days, 25);
    assert_eq!(response.extension.extended_start, d(2023, 11, 27));
    assert_eq!(response.fetch_path, Some(FetchPath::Individual));

    let requests = market.range_requests.lock().unwrap().clone();
    assert_eq!(requests, vec![("RISE".to_string(), d(2023, 11, 27), d(2024, 1, 30))]);

    assert_eq!(response.symbols(), vec!["RISE"]);
    let dates = &response.results[0].qualifying_dates;
    assert_eq!(*dates, calendar::trading_days(d(2024, 1, 1), d(2024, 1, 30)));
    assert_eq!(dates.len(), 22);
    assert!(dates.iter().all(|date| *date >= d(2024, 1, 1) && *date <= d(2024, 1, 30)));
}

// ============================================================================
// Gap Threshold
// ============================================================================

fn gapper(gap_pct: f64) -> Vec<Bar> {
    weekday_bars(d(2023, 12, 1), d(2024, 1, 12), move |_, date| {
        if date == d(2024, 1, 10) {
            (100.0 * (1.0 + gap_pct / 100.0), 100.0, 1_000_000.0)
        } else {
            (100.0, 100.0, 1_000_000.0)
        }
    })
}

#[tokio::test]
async fn test_gap_up_four_percent() {
    let market = Arc::new(
        MockMarket::new()
            .with_series("GAP5", gapper(5.0))
            .with_series("GAP3", gapper(3.0)),
    );

    let request = ScreeningRequest::new(d(2024, 1, 10), d(2024, 1, 10))
        .with_symbols(["GAP5", "GAP3"])
        .with_filter(FilterSpec::Gap {
            enabled: true,
            direction: GapDirection::Up,
            threshold_pct: Some(4.0),
        });

    let response = screener(market).screen(&request, &CancellationToken::new()).await.unwrap();

    assert_eq!(response.symbols(), vec!["GAP5"]);
    assert_eq!(response.results[0].qualifying_dates, vec![d(2024, 1, 10)]);
    let gap = &response.results[0].metrics[&FilterKind::Gap];
    assert!((gap.mean - 5.0).abs() < 1e-9);
    assert_eq!(response.stats.counters.symbols_screened, 2);
    assert_eq!(response.stats.counters.symbols_qualifying, 1);
}

// ============================================================================
// Relative Volume
// ============================================================================

#[tokio::test]
async fn test_relative_volume_ratio() {
    let base_volume = 22_000_000.0 / 18.0;
    // Two 4M days end on Jan 12; the 18 days before average 22M/18.
    let bars = weekday_bars(d(2023, 12, 1), d(2024, 1, 12), move |_, date| {
        let volume = if date >= d(2024, 1, 11) { 4_000_000.0 } else { base_volume };
        (20.0, 20.0, volume)
    });
    let market = Arc::new(MockMarket::new().with_series("VOL", bars));

    let rel_vol = |min_ratio| FilterSpec::RelativeVolume {
        enabled: true,
        recent_days: 2,
        lookback_days: 20,
        min_ratio,
    };

    let screener = screener(market);
    let at_two = ScreeningRequest::new(d(2024, 1, 12), d(2024, 1, 12))
        .with_symbols(["VOL"])
        .with_filter(rel_vol(2.0));
    let response = screener.screen(&at_two, &CancellationToken::new()).await.unwrap();
    assert_eq!(response.symbols(), vec!["VOL"]);

    let request = ScreeningRequest::new(d(2024, 1, 12), d(2024, 1, 12))
        .with_symbols(["VOL"])
        .with_filter(rel_vol(2.5));
    let response = screener.screen(&request, &CancellationToken::new()).await.unwrap();

    assert_eq!(response.symbols(), vec!["VOL"]);
    let ratio = response.results[0].metrics[&FilterKind::RelativeVolume].mean;
    assert!((ratio - 8.0 / 3.0).abs() < 1e-6, "ratio was {ratio}");

    let strict = ScreeningRequest::new(d(2024, 1, 12), d(2024, 1, 12))
        .with_symbols(["VOL"])
        .with_filter(rel_vol(3.0));
    let response = screener.screen(&strict, &CancellationToken::new()).await.unwrap();
    assert!(response.results.is_empty());
}

// ============================================================================
// Single Day, Full Market
// ============================================================================

fn full_market() -> MockMarket {
    // (symbol, close, open on Jan 10)
    let rows = [
        ("CHEAP_GAP", 5.0, 5.3),   // +6%: qualifies
        ("CHEAP_FLAT", 5.0, 5.05), // +1%
        ("PRICEY_GAP", 50.0, 53.0),
        ("PENNY_GAP", 1.0, 1.1),
        ("EDGE_GAP", 10.0, 10.4), // +4%, close 10: qualifies
        ("GAP_DOWN", 8.0, 7.0),
    ];

    rows.iter().fold(MockMarket::new(), |market, (symbol, close, open)| {
        let (close, open) = (*close, *open);
        market.with_series(
            symbol,
            weekday_bars(d(2023, 12, 1), d(2024, 1, 12), move |_, date| {
                if date == d(2024, 1, 10) {
                    (open, close, 500_000.0)
                } else {
                    (close, close, 500_000.0)
                }
            }),
        )
    })
}

fn price_and_gap() -> Vec<FilterSpec> {
    vec![
        FilterSpec::PriceRange {
            enabled: true,
            min_price: Some(2.0),
            max_price: Some(10.0),
        },
        FilterSpec::Gap {
            enabled: true,
            direction: GapDirection::Up,
            threshold_pct: Some(4.0),
        },
    ]
}

#[tokio::test]
async fn test_single_day_full_market_uses_grouped_calls_only() {
    let market = Arc::new(full_market());
    let mut request = ScreeningRequest::new(d(2024, 1, 10), d(2024, 1, 10));
    request.filters = price_and_gap();

    let response = screener(market.clone())
        .screen(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.fetch_path, Some(FetchPath::Bulk));
    // The requested day plus the prior day the gap needs
    assert_eq!(market.grouped_calls.load(Ordering::SeqCst), 2);
    assert_eq!(market.range_calls.load(Ordering::SeqCst), 0);
    assert_eq!(market.listing_calls.load(Ordering::SeqCst), 0);

    assert_eq!(response.symbols(), vec!["CHEAP_GAP", "EDGE_GAP"]);
    assert_eq!(response.stats.counters.symbols_screened, 6);
    assert!(response.results.len() < market.symbols().len());
}

#[tokio::test]
async fn test_single_day_fallback_matches_bulk() {
    let bulk_market = Arc::new(full_market());
    let mut request = ScreeningRequest::new(d(2024, 1, 10), d(2024, 1, 10));
    request.filters = price_and_gap();
    let bulk = screener(bulk_market)
        .screen(&request, &CancellationToken::new())
        .await
        .unwrap();

    let failing = Arc::new(full_market());
    failing.fail_grouped.store(true, Ordering::SeqCst);
    let fallback = screener(failing.clone())
        .screen(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(fallback.fetch_path, Some(FetchPath::BulkFallback));
    assert_eq!(failing.range_calls.load(Ordering::SeqCst), 6);
    assert_eq!(bulk.symbols(), fallback.symbols());
    for (a, b) in bulk.results.iter().zip(&fallback.results) {
        assert_eq!(a.qualifying_dates, b.qualifying_dates);
    }
}

fn market_with_halted_symbol() -> MockMarket {
    // HALT skips Jan 9 and gaps up 6% on Jan 10 over its Jan 8 close
    let halted: Vec<Bar> = weekday_bars(d(2023, 12, 1), d(2024, 1, 12), |_, date| {
        if date >= d(2024, 1, 10) {
            (10.6, 10.6, 800_000.0)
        } else {
            (10.0, 10.0, 800_000.0)
        }
    })
    .into_iter()
    .filter(|b| b.date != d(2024, 1, 9))
    .collect();

    MockMarket::new().with_series("HALT", halted).with_series(
        "STEADY",
        weekday_bars(d(2023, 12, 1), d(2024, 1, 12), |_, _| (20.0, 20.0, 1_000_000.0)),
    )
}

#[tokio::test]
async fn test_symbol_missing_prior_day_matches_on_bulk_and_fallback() {
    let request = ScreeningRequest::new(d(2024, 1, 10), d(2024, 1, 10)).with_filter(
        FilterSpec::Gap {
            enabled: true,
            direction: GapDirection::Up,
            threshold_pct: Some(4.0),
        },
    );

    let bulk_market = Arc::new(market_with_halted_symbol());
    let bulk = screener(bulk_market.clone())
        .screen(&request, &CancellationToken::new())
        .await
        .unwrap();

    let failing = Arc::new(market_with_halted_symbol());
    failing.fail_grouped.store(true, Ordering::SeqCst);
    let fallback = screener(failing)
        .screen(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(bulk.fetch_path, Some(FetchPath::Bulk));
    assert_eq!(fallback.fetch_path, Some(FetchPath::BulkFallback));
    assert_eq!(bulk.symbols(), vec!["HALT"]);
    assert_eq!(bulk.symbols(), fallback.symbols());
    assert_eq!(bulk.stats.counters.symbols_skipped, 0);
    assert_eq!(
        bulk.results[0].qualifying_dates,
        fallback.results[0].qualifying_dates
    );

    // Only the short symbol needed its own range fetch
    assert_eq!(bulk_market.grouped_calls.load(Ordering::SeqCst), 2);
    let ranges = bulk_market.range_requests.lock().unwrap().clone();
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].0, "HALT");
    assert_eq!(ranges[0].2, d(2024, 1, 10));
}

#[tokio::test]
async fn test_nothing_qualifies_is_ok() {
    let market = Arc::new(full_market());
    let request = ScreeningRequest::new(d(2024, 1, 10), d(2024, 1, 10)).with_filter(
        FilterSpec::PriceRange {
            enabled: true,
            min_price: Some(1_000.0),
            max_price: None,
        },
    );

    let response = screener(market).screen(&request, &CancellationToken::new()).await.unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.stats.counters.symbols_qualifying, 0);
    assert_eq!(response.stats.counters.symbols_screened, 6);
}

#[tokio::test]
async fn test_failed_and_short_symbols_counted() {
    let market = Arc::new(
        MockMarket::new()
            .with_series(
                "OK",
                weekday_bars(d(2023, 12, 1), d(2024, 1, 12), |_, _| (5.0, 5.0, 1.0)),
            )
            .with_series(
                "NEW",
                weekday_bars(d(2024, 1, 11), d(2024, 1, 12), |_, _| (5.0, 5.0, 1.0)),
            )
            .with_broken("GONE"),
    );
    let request = ScreeningRequest::new(d(2024, 1, 2), d(2024, 1, 12))
        .with_symbols(["OK", "NEW", "GONE"])
        .with_filter(FilterSpec::PriceVsMovingAverage {
            enabled: true,
            period: 5,
            condition: Condition::Below,
        });

    let response = screener(market).screen(&request, &CancellationToken::new()).await.unwrap();
    let counters = &response.stats.counters;
    assert_eq!(counters.symbols_screened, 3);
    assert_eq!(counters.symbols_failed, 1);
    assert_eq!(counters.failed_symbols, vec!["GONE".to_string()]);
    assert_eq!(counters.symbols_skipped, 1);
    // Flat closes never sit strictly below their average
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn test_invalid_request_makes_no_upstream_calls() {
    let market = Arc::new(full_market());
    let request = ScreeningRequest::new(d(2024, 1, 12), d(2024, 1, 10));
    let err = screener(market.clone())
        .screen(&request, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, sift_screener::ScreenerError::Configuration(_)));
    assert_eq!(market.upstream_calls(), 0);
}

// ============================================================================
// Composite Rule Over Every Filter Subset
// ============================================================================

fn all_filters(enabled: [bool; 6]) -> Vec<FilterSpec> {
    vec![
        FilterSpec::PriceRange {
            enabled: enabled[0],
            min_price: Some(97.0),
            max_price: Some(104.0),
        },
        FilterSpec::PriceVsMovingAverage {
            enabled: enabled[1],
            period: 10,
            condition: Condition::Above,
        },
        FilterSpec::Rsi {
            enabled: enabled[2],
            period: 14,
            condition: Condition::Above,
            threshold: 50.0,
        },
        FilterSpec::Gap {
            enabled: enabled[3],
            direction: GapDirection::Any,
            threshold_pct: Some(0.5),
        },
        FilterSpec::PreviousDayDollarVolume {
            enabled: enabled[4],
            min_dollar_volume: Some(100_000_000.0),
            max_dollar_volume: None,
        },
        FilterSpec::RelativeVolume {
            enabled: enabled[5],
            recent_days: 3,
            lookback_days: 10,
            min_ratio: 1.0,
        },
    ]
}

fn wavy_series() -> BarSeries {
    let bars = weekday_bars(d(2023, 9, 1), d(2024, 1, 31), |i, _| {
        let x = i as f64;
        let close = 100.0 + 4.0 * (x / 5.0).sin() + 1.5 * (x / 1.7).cos();
        let open = close * (1.0 + 0.012 * (x / 2.3).sin());
        let volume = 1_000_000.0 * (1.5 + (x / 3.1).sin());
        (open, close, volume)
    });
    BarSeries::from_unsorted("WAVE", bars)
}

#[test]
fn test_composite_is_intersection_for_every_subset() {
    let series = wavy_series();
    let requested = DateRange::new(d(2023, 11, 1), d(2024, 1, 31));
    let in_range: BTreeSet<NaiveDate> = series
        .dates()
        .into_iter()
        .filter(|date| requested.contains(*date))
        .collect();

    let singles: Vec<BTreeSet<NaiveDate>> = (0..6)
        .map(|k| {
            let mut enabled = [false; 6];
            enabled[k] = true;
            FilterEngine::evaluate(&series, &requested, &all_filters(enabled))
                .qualifying_dates
                .into_iter()
                .collect()
        })
        .collect();

    // Each filter on its own must be selective, or the check proves little.
    for (k, single) in singles.iter().enumerate() {
        assert!(!single.is_empty(), "filter {k} never passes");
        assert!(single.len() < in_range.len(), "filter {k} always passes");
    }

    for mask in 0u32..64 {
        let enabled: [bool; 6] = std::array::from_fn(|k| mask & (1 << k) != 0);
        let expected = singles
            .iter()
            .enumerate()
            .filter(|(k, _)| enabled[*k])
            .fold(in_range.clone(), |acc, (_, s)| acc.intersection(s).copied().collect());

        let result = FilterEngine::evaluate(&series, &requested, &all_filters(enabled));
        let actual: BTreeSet<NaiveDate> = result.qualifying_dates.iter().copied().collect();
        assert_eq!(actual, expected, "mask {mask:06b}");
        assert!(result.qualifying_dates.windows(2).all(|w| w[0] < w[1]));
    }
}
