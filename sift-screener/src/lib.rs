//! Sift Screener Library
//!
//! A screening query engine over daily equity bars: given a date range, a
//! symbol universe and a set of technical filters, it returns the symbols
//! (and dates) on which every enabled filter holds.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Screener::screen                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Lookback ─▶ Cache lookup ─▶ Acquisition ─▶ Evaluation ─▶ Store  │
//! │  (pure)      (SQLite)        (tokio I/O)    (rayon pool)         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Lookback extension
//! - Period-based filters need history before the first requested date
//! - The fetch window is the requested range plus the longest requirement
//!   and a small buffer, counted in trading days
//!
//! ## Bulk vs individual acquisition
//! - Short ranges over a broad universe use one grouped call per day
//! - Everything else fetches per symbol with bounded concurrency
//! - A failing bulk path falls back to the individual path
//!
//! ## Exact-match cache
//! - Keyed by every filter parameter, the date range and the universe
//! - Unset parameters compare equal (NULL-safe), entries expire by TTL

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod backtest;
pub mod cache;
pub mod data;
pub mod error;
pub mod filters;
pub mod lookback;
pub mod screener;

pub use cache::{CacheEntry, CacheKey, ScreeningCache, SqliteScreeningCache};
pub use data::{Bar, BarSeries, DateRange, MarketDataProvider, PolygonProvider, Universe};
pub use error::{AcquisitionError, ConfigurationError, ScreenerError};
pub use filters::{FilterEngine, FilterKind, FilterSpec, QualificationResult};
pub use lookback::{compute_extension, ExtendedRange};
pub use screener::{BatchStats, Screener, ScreeningRequest, ScreeningResponse};
