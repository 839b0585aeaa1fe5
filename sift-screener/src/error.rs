//! Error types for the screening engine.
//!
//! Upstream fetch errors (`ProviderError`) and cache errors (`CacheError`)
//! live next to their layers; this module holds the request-level errors.

use chrono::NaiveDate;
use thiserror::Error;

use crate::data::ProviderError;
use crate::filters::FilterKind;

/// A request that cannot be screened as configured.
///
/// Raised before any acquisition starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("start date {start} is after end date {end}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },

    #[error("invalid {kind} filter: {reason}")]
    InvalidFilter { kind: FilterKind, reason: String },

    #[error("duplicate {0} filter in request")]
    DuplicateFilter(FilterKind),

    #[error("lookback of {required} trading days exceeds the cap of {cap}")]
    LookbackExceedsCap { required: u32, cap: u32 },

    #[error("explicit symbol universe is empty")]
    EmptyUniverse,
}

impl ConfigurationError {
    pub(crate) fn invalid(kind: FilterKind, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            kind,
            reason: reason.into(),
        }
    }
}

/// Errors that abort acquisition as a whole.
///
/// Per-symbol fetch failures never surface here; they are reported in
/// `AcquisitionResult::failures`.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("acquisition cancelled")]
    Cancelled,

    #[error("failed to list active symbols: {0}")]
    UniverseUnavailable(#[source] ProviderError),

    #[error("acquisition failed: {0}")]
    Internal(String),
}

/// Errors returned by `Screener::screen`.
#[derive(Debug, Error)]
pub enum ScreenerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Acquisition(AcquisitionError),

    #[error("filter evaluation failed: {0}")]
    Evaluation(String),

    #[error("screening cancelled")]
    Cancelled,
}

impl From<AcquisitionError> for ScreenerError {
    fn from(err: AcquisitionError) -> Self {
        match err {
            AcquisitionError::Cancelled => Self::Cancelled,
            other => Self::Acquisition(other),
        }
    }
}
