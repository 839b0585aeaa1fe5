//! Hand-off of qualifying symbols to an external backtest engine.
//!
//! Each job runs the configured program in its own working directory:
//! - `job.json` describes the symbol, range and qualifying dates
//! - the program receives the job file path as its last argument
//! - stdout must be a single JSON statistics document

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sift_common::config::BacktestConfig;
use sift_common::util::truncate_with_ellipsis;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::data::DateRange;

/// File name of the job description inside each working directory.
pub const JOB_FILE: &str = "job.json";

/// One backtest to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestJob {
    pub job_id: String,
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub qualifying_dates: Vec<NaiveDate>,
    /// Filter parameters the symbol qualified under
    pub filters: serde_json::Value,
}

impl BacktestJob {
    pub fn new(
        symbol: impl Into<String>,
        range: DateRange,
        qualifying_dates: Vec<NaiveDate>,
        filters: serde_json::Value,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            start: range.start,
            end: range.end,
            qualifying_dates,
            filters,
        }
    }
}

/// Statistics returned by the engine for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub job_id: String,
    pub symbol: String,
    pub statistics: serde_json::Value,
    pub duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("backtest io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backtest for {symbol} timed out after {secs}s")]
    Timeout { symbol: String, secs: u64 },

    #[error("backtest for {symbol} exited with code {code}: {stderr}")]
    Failed {
        symbol: String,
        code: i32,
        stderr: String,
    },

    #[error("backtest for {symbol} produced invalid output: {reason}")]
    InvalidOutput { symbol: String, reason: String },

    #[error("backtest cancelled")]
    Cancelled,
}

/// Backtest engine seam.
#[async_trait]
pub trait BacktestRunner: Send + Sync {
    async fn run(&self, job: BacktestJob) -> Result<BacktestReport, BacktestError>;
}

// ============================================================================
// Process Runner
// ============================================================================

/// Runs an external program per job.
#[derive(Debug, Clone)]
pub struct ProcessBacktestRunner {
    command: String,
    args: Vec<String>,
    work_root: PathBuf,
    timeout: Duration,
    keep_work_dirs: bool,
}

impl ProcessBacktestRunner {
    pub fn new(command: impl Into<String>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            work_root: work_root.into(),
            timeout: Duration::from_secs(600),
            keep_work_dirs: false,
        }
    }

    /// `None` when no command is configured.
    pub fn from_config(config: &BacktestConfig) -> Option<Self> {
        let command = config.command.as_deref()?.trim();
        if command.is_empty() {
            return None;
        }
        Some(
            Self::new(command, config.resolved_work_root())
                .with_args(config.args.clone())
                .with_timeout(Duration::from_secs(config.timeout_secs))
                .keep_work_dirs(config.keep_work_dirs),
        )
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn keep_work_dirs(mut self, keep: bool) -> Self {
        self.keep_work_dirs = keep;
        self
    }

    pub fn work_dir(&self, job: &BacktestJob) -> PathBuf {
        self.work_root.join(&job.job_id)
    }

    async fn execute(&self, job: &BacktestJob, dir: &Path) -> Result<serde_json::Value, BacktestError> {
        let job_path = dir.join(JOB_FILE);
        let body = serde_json::to_vec_pretty(job).map_err(|e| BacktestError::InvalidOutput {
            symbol: job.symbol.clone(),
            reason: format!("job encoding: {e}"),
        })?;
        tokio::fs::write(&job_path, body).await?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(&job_path)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(BacktestError::Spawn {
                    command: self.command.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(BacktestError::Timeout {
                    symbol: job.symbol.clone(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BacktestError::Failed {
                symbol: job.symbol.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: truncate_with_ellipsis(stderr.trim(), 500),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| BacktestError::InvalidOutput {
            symbol: job.symbol.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl BacktestRunner for ProcessBacktestRunner {
    async fn run(&self, job: BacktestJob) -> Result<BacktestReport, BacktestError> {
        let started = Instant::now();
        let dir = self.work_dir(&job);
        tokio::fs::create_dir_all(&dir).await?;

        debug!(job_id = %job.job_id, symbol = %job.symbol, dir = %dir.display(), "Starting backtest");
        let result = self.execute(&job, &dir).await;

        if !self.keep_work_dirs {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!(dir = %dir.display(), error = %e, "Failed to remove backtest work dir");
            }
        }

        let statistics = result?;
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(job_id = %job.job_id, symbol = %job.symbol, duration_ms, "Backtest complete");

        Ok(BacktestReport {
            job_id: job.job_id,
            symbol: job.symbol,
            statistics,
            duration_ms,
        })
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Run `jobs` with at most `max_concurrent` in flight.
///
/// Results are sorted by symbol. Jobs not yet started when `cancel` fires
/// report [`BacktestError::Cancelled`]; running ones are aborted.
pub async fn dispatch(
    jobs: Vec<BacktestJob>,
    runner: Arc<dyn BacktestRunner>,
    max_concurrent: usize,
    cancel: &CancellationToken,
) -> Vec<(String, Result<BacktestReport, BacktestError>)> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut join_set = JoinSet::new();
    let mut outcomes = Vec::with_capacity(jobs.len());

    for job in jobs {
        let symbol = job.symbol.clone();
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            outcomes.push((symbol, Err(BacktestError::Cancelled)));
            continue;
        };

        let runner = Arc::clone(&runner);
        join_set.spawn(async move {
            let _permit = permit;
            (symbol, runner.run(job).await)
        });
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                join_set.abort_all();
                None
            }
            next = join_set.join_next() => next,
        };

        match next {
            None => break,
            Some(Ok(outcome)) => outcomes.push(outcome),
            Some(Err(e)) => warn!(error = %e, "Backtest task failed"),
        }
    }

    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(symbol: &str) -> BacktestJob {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        BacktestJob::new(
            symbol,
            DateRange::single(day),
            vec![day],
            serde_json::json!([{"kind": "gap"}]),
        )
    }

    struct EchoRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BacktestRunner for EchoRunner {
        async fn run(&self, job: BacktestJob) -> Result<BacktestReport, BacktestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if job.symbol == "FAIL" {
                return Err(BacktestError::Failed {
                    symbol: job.symbol,
                    code: 1,
                    stderr: String::new(),
                });
            }
            Ok(BacktestReport {
                job_id: job.job_id,
                symbol: job.symbol,
                statistics: serde_json::json!({"trades": 1}),
                duration_ms: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_dispatch_sorted_with_failures() {
        let runner = Arc::new(EchoRunner {
            calls: AtomicUsize::new(0),
        });
        let jobs = vec![job("ZZZ"), job("FAIL"), job("AAA")];
        let out = dispatch(jobs, runner.clone(), 2, &CancellationToken::new()).await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
        let symbols: Vec<&str> = out.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(symbols, vec!["AAA", "FAIL", "ZZZ"]);
        assert!(out[0].1.is_ok());
        assert!(matches!(out[1].1, Err(BacktestError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_dispatch_cancelled_before_start() {
        let runner = Arc::new(EchoRunner {
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = dispatch(vec![job("AAA")], runner.clone(), 1, &cancel).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(out[0].1, Err(BacktestError::Cancelled)));
    }

    #[test]
    fn test_from_config_requires_command() {
        assert!(ProcessBacktestRunner::from_config(&BacktestConfig::default()).is_none());
        let config = BacktestConfig {
            command: Some("  ".into()),
            ..BacktestConfig::default()
        };
        assert!(ProcessBacktestRunner::from_config(&config).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_reads_stdout_json() {
        let root = tempfile::tempdir().unwrap();
        // `cat job.json` echoes the job back as the statistics document
        let runner = ProcessBacktestRunner::new("cat", root.path());
        let job = job("AAPL");
        let report = runner.run(job.clone()).await.unwrap();

        assert_eq!(report.symbol, "AAPL");
        assert_eq!(report.statistics["symbol"], "AAPL");
        assert_eq!(report.statistics["job_id"], job.job_id.as_str());
        assert!(!runner.work_dir(&job).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_nonzero_exit() {
        let root = tempfile::tempdir().unwrap();
        let runner = ProcessBacktestRunner::new("sh", root.path())
            .with_args(vec!["-c".into(), "echo boom >&2; exit 3".into()])
            .keep_work_dirs(true);
        let job = job("MSFT");
        let err = runner.run(job.clone()).await.unwrap_err();

        match err {
            BacktestError::Failed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(runner.work_dir(&job).join(JOB_FILE).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_invalid_output() {
        let root = tempfile::tempdir().unwrap();
        let runner = ProcessBacktestRunner::new("sh", root.path())
            .with_args(vec!["-c".into(), "echo not-json".into()]);
        let err = runner.run(job("TSLA")).await.unwrap_err();
        assert!(matches!(err, BacktestError::InvalidOutput { .. }));
    }
}
