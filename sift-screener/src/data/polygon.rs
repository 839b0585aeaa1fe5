//! Polygon.io REST adapter for US equity daily bars.
//!
//! # Endpoints
//! - Grouped daily: `/v2/aggs/grouped/locale/us/market/stocks/{date}`
//! - Aggregates: `/v2/aggs/ticker/{symbol}/range/1/day/{from}/{to}`
//! - Ticker listing: `/v3/reference/tickers?market=stocks&active=true`
//!
//! Paginated responses carry a `next_url` that omits the API key; the key is
//! appended before following it.
//!
//! One `reqwest::Client` is shared by every request, so keep-alive
//! connections are reused across symbols and across concurrent screenings.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use sift_common::config::{Config, ProviderConfig};
use sift_common::util::{sanitize_for_log, truncate_with_ellipsis};

use super::provider::{MarketDataProvider, ProviderError};
use super::rate_limiter::{shared_limiter, SharedRateLimiter};
use super::Bar;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on aggregate rows per page
const AGGS_PAGE_LIMIT: u32 = 50_000;

/// Retry hint after a 429
const RATE_LIMIT_RETRY_SECS: u64 = 2;

/// Safety stop for runaway pagination
const MAX_PAGES: usize = 500;

/// Idle pooled connections are dropped after this long
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

// ============================================================================
// Polygon Adapter
// ============================================================================

/// Polygon.io adapter implementing [`MarketDataProvider`].
pub struct PolygonProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    rate_limiter: SharedRateLimiter,
    ticker_page_size: u32,
}

impl PolygonProvider {
    /// Create an adapter with an explicit key and provider settings.
    pub fn new(api_key: impl Into<String>, config: &ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
            rate_limiter: shared_limiter("polygon", config.rate_limit_rpm),
            ticker_page_size: config.ticker_page_size.max(1),
        }
    }

    /// Create from config; `None` when no API key is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.polygon_api_key()?;
        Some(Self::new(api_key, &config.screener.provider))
    }

    fn with_key(&self, url: &str) -> String {
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{}{}apiKey={}", url, sep, self.api_key)
    }

    /// GET a JSON document, mapping transport and status failures.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        self.rate_limiter.acquire().await;

        debug!(url = %sanitize_for_log(url), "Fetching from Polygon");

        let response = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Network("Request timeout".into())
                } else if e.is_connect() {
                    ProviderError::Network("Connection failed".into())
                } else {
                    ProviderError::Network(sanitize_for_log(&e.to_string()))
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::Auth("Invalid or unauthorized API key".into()));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(RATE_LIMIT_RETRY_SECS);
            return Err(ProviderError::RateLimited {
                retry_after_secs: Some(retry_after),
            });
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::DataNotAvailable(sanitize_for_log(url)));
        }

        if status.is_server_error() {
            return Err(ProviderError::Unavailable(format!("HTTP {}", status)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Internal(format!(
                "HTTP {}: {}",
                status,
                truncate_with_ellipsis(&body, 200)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("Failed to parse response: {}", e)))
    }

    /// Follow `next_url` links, collecting every page's results.
    async fn get_paged<R: DeserializeOwned>(
        &self,
        first_url: String,
    ) -> Result<Vec<R>, ProviderError> {
        let mut results = Vec::new();
        let mut url = Some(first_url);
        let mut pages = 0;

        while let Some(current) = url.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(ProviderError::Internal(format!(
                    "Pagination exceeded {} pages",
                    MAX_PAGES
                )));
            }

            let page: PolygonPage<R> = self.get_json(&current).await?;
            page.check_status()?;
            results.extend(page.results.unwrap_or_default());
            url = page.next_url.map(|next| self.with_key(&next));
        }

        Ok(results)
    }
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for PolygonProvider {
    fn name(&self) -> &'static str {
        "polygon"
    }

    async fn grouped_daily(&self, date: NaiveDate) -> Result<HashMap<String, Bar>, ProviderError> {
        let url = self.with_key(&format!(
            "{}/v2/aggs/grouped/locale/us/market/stocks/{}?adjusted=true",
            self.base_url, date
        ));

        let page: PolygonPage<GroupedAgg> = self.get_json(&url).await?;
        page.check_status()?;

        let rows = page.results.unwrap_or_default();
        let mut bars = HashMap::with_capacity(rows.len());
        for row in rows {
            bars.insert(row.ticker, row.agg.into_bar(date));
        }

        debug!(%date, symbols = bars.len(), "Fetched grouped daily bars");
        Ok(bars)
    }

    async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        if symbol.is_empty() || symbol.contains('/') {
            return Err(ProviderError::InvalidRequest(format!(
                "Invalid symbol: {:?}",
                symbol
            )));
        }

        let url = self.with_key(&format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}?adjusted=true&sort=asc&limit={}",
            self.base_url, symbol, start, end, AGGS_PAGE_LIMIT
        ));

        let aggs: Vec<Agg> = self.get_paged(url).await?;
        let mut bars = Vec::with_capacity(aggs.len());
        for agg in aggs {
            let date = DateTime::from_timestamp_millis(agg.t)
                .ok_or_else(|| ProviderError::Internal(format!("Invalid timestamp: {}", agg.t)))?
                .date_naive();
            bars.push(agg.into_bar(date));
        }

        Ok(bars)
    }

    async fn active_symbols(&self) -> Result<Vec<String>, ProviderError> {
        let url = self.with_key(&format!(
            "{}/v3/reference/tickers?market=stocks&active=true&limit={}",
            self.base_url, self.ticker_page_size
        ));

        let tickers: Vec<TickerRef> = self.get_paged(url).await?;
        let mut symbols: Vec<String> = tickers.into_iter().map(|t| t.ticker).collect();
        symbols.sort();
        symbols.dedup();

        debug!(count = symbols.len(), "Fetched active symbol listing");
        Ok(symbols)
    }
}

// ============================================================================
// API Response Types
// ============================================================================

/// Envelope shared by aggregate and reference endpoints.
///
/// Absent fields deserialize to `None`. `#[serde(default)]` would add an
/// `R: Default` bound.
#[derive(Debug, Deserialize)]
struct PolygonPage<R> {
    /// "OK", "DELAYED", "ERROR", "NOT_AUTHORIZED", ...
    status: Option<String>,
    results: Option<Vec<R>>,
    next_url: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

impl<R> PolygonPage<R> {
    fn check_status(&self) -> Result<(), ProviderError> {
        match self.status.as_deref() {
            None | Some("OK") | Some("DELAYED") => Ok(()),
            Some("NOT_AUTHORIZED") => Err(ProviderError::Auth(self.detail())),
            Some(other) => Err(ProviderError::Internal(format!(
                "Polygon status {}: {}",
                other,
                self.detail()
            ))),
        }
    }

    fn detail(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "no detail".to_string())
    }
}

/// Aggregate bar.
///
/// Field names are abbreviated in the API:
/// - o/h/l/c: open/high/low/close
/// - v: volume
/// - vw: volume-weighted average price
/// - t: bar start, Unix milliseconds
#[derive(Debug, Deserialize)]
struct Agg {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    #[serde(default)]
    vw: Option<f64>,
    t: i64,
}

impl Agg {
    fn into_bar(self, date: NaiveDate) -> Bar {
        Bar {
            date,
            open: self.o,
            high: self.h,
            low: self.l,
            close: self.c,
            volume: self.v,
            vwap: self.vw,
        }
    }
}

/// Grouped-daily row: an aggregate tagged with its ticker (`T`).
#[derive(Debug, Deserialize)]
struct GroupedAgg {
    #[serde(rename = "T")]
    ticker: String,
    #[serde(flatten)]
    agg: Agg,
}

#[derive(Debug, Deserialize)]
struct TickerRef {
    ticker: String,
}

// ============================================================================
// Tests
// ============================================================================
