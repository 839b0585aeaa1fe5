//! Sift Screener - runs one screening request from a JSON file.
//!
//! Usage: `sift-screener <request.json>`

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use sift_common::config::Config;
use sift_common::logging::init_logging_with_exclusions;
use sift_screener::backtest::ProcessBacktestRunner;
use sift_screener::cache::ScreeningCache;
use sift_screener::{PolygonProvider, Screener, ScreeningRequest, SqliteScreeningCache};

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    let config = Config::load_and_validate()?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Sift Screener v{}", env!("CARGO_PKG_VERSION"));

    let Some(request_path) = std::env::args().nth(1) else {
        bail!("usage: sift-screener <request.json>");
    };
    let raw = std::fs::read_to_string(&request_path)
        .with_context(|| format!("Failed to read request file {request_path}"))?;
    let request: ScreeningRequest =
        serde_json::from_str(&raw).context("Failed to parse screening request")?;

    let Some(provider) = PolygonProvider::from_config(&config) else {
        bail!("no market data API key configured (set POLYGON_API_KEY)");
    };

    let screener_config = &config.screener;
    let cache: Option<Arc<dyn ScreeningCache>> = if screener_config.cache.enabled {
        let cache = SqliteScreeningCache::from_config(&screener_config.cache)?;
        if let Err(e) = cache.purge_expired().await {
            tracing::warn!(error = %e, "Failed to purge expired cache entries");
        }
        let cache: Arc<dyn ScreeningCache> = Arc::new(cache);
        Some(cache)
    } else {
        None
    };

    let screener = Screener::new(Arc::new(provider), cache, screener_config)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling screening");
            ctrl_c.cancel();
        }
    });

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Screener initialized in {:?}",
        startup_duration
    );

    let response = screener.screen(&request, &cancel).await?;

    let output = match ProcessBacktestRunner::from_config(&screener_config.backtest) {
        Some(runner) if !response.results.is_empty() => {
            let outcomes = screener
                .backtest_qualifying(&response, Arc::new(runner), &cancel)
                .await;
            let backtests: Vec<serde_json::Value> = outcomes
                .into_iter()
                .map(|(symbol, outcome)| match outcome {
                    Ok(report) => serde_json::json!({ "symbol": symbol, "report": report }),
                    Err(e) => serde_json::json!({ "symbol": symbol, "error": e.to_string() }),
                })
                .collect();
            serde_json::json!({ "screening": response, "backtests": backtests })
        }
        _ => serde_json::to_value(&response)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
