//! Upstream market data provider abstraction.
//!
//! Two request shapes are consumed: grouped daily bars for the whole market
//! on one date (bulk) and a date range of daily bars for one symbol
//! (individual). The active symbol listing backs "all active" universes
//! when the individual path has to enumerate symbols.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt;

use super::Bar;

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to data providers.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network error (connection failed, timeout)
    Network(String),
    /// Authentication error (invalid or missing key)
    Auth(String),
    /// Rate limit exceeded
    RateLimited { retry_after_secs: Option<u64> },
    /// Data not available for the requested symbol/date
    DataNotAvailable(String),
    /// Provider is temporarily unavailable (5xx)
    Unavailable(String),
    /// Invalid request parameters
    InvalidRequest(String),
    /// Unexpected status or unparsable payload
    Internal(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, ", retry after {} seconds", secs)?;
                }
                Ok(())
            }
            Self::DataNotAvailable(msg) => write!(f, "Data not available: {}", msg),
            Self::Unavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Check if the error is transient (worth one more attempt)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Unavailable(_)
        )
    }
}

// ============================================================================
// Market Data Provider Trait
// ============================================================================

/// Trait for upstream daily-bar sources.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logging (e.g., "polygon")
    fn name(&self) -> &'static str;

    /// Every actively traded symbol's bar for one date, keyed by symbol.
    ///
    /// A market holiday yields an empty map, not an error.
    async fn grouped_daily(&self, date: NaiveDate) -> Result<HashMap<String, Bar>, ProviderError>;

    /// Daily bars for `symbol` over `[start, end]`, in any order.
    async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError>;

    /// Symbols currently trading.
    async fn active_symbols(&self) -> Result<Vec<String>, ProviderError>;
}
