pub mod compose;

use crate::domain::request::{FailurePolicy, OutputFlags, PortfolioRequest};
use crate::domain::series::{NormalizedSeries, SourceTag};
use crate::domain::table::{MergedRow, MergedTable};
use crate::ingest::error::FetchError;
use crate::ingest::strategy::FetchStrategy;
use compose::ComposeOptions;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub ticker: String,
    pub error: String,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.ticker, self.error)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to fetch {ticker}: {cause}")]
    StrictModeAbort {
        ticker: String,
        cause: FetchError,
        failures: Vec<FetchFailure>,
    },

    #[error("All tickers failed: {}", join_failures(.failures))]
    AllTickersFailed { failures: Vec<FetchFailure> },
}

impl PipelineError {
    pub fn failures(&self) -> &[FetchFailure] {
        match self {
            PipelineError::StrictModeAbort { failures, .. } => failures,
            PipelineError::AllTickersFailed { failures } => failures,
        }
    }
}

fn join_failures(failures: &[FetchFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One ticker's rows after close substitution and return computation.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerFrame {
    pub ticker: String,
    pub source: SourceTag,
    pub has_adjusted_close: bool,
    pub rows: Vec<MergedRow>,
}

impl TickerFrame {
    /// Sorts by date first so returns are chronological. `return[i] = close[i] /
    /// close[i-1] - 1`; the first row (and any row after a zero close) gets `None`.
    pub fn prepare(mut series: NormalizedSeries, flags: OutputFlags) -> Self {
        series.sort_and_dedup();
        let has_adjusted_close = series.has_adjusted_close();

        let mut prev_close: Option<f64> = None;
        let mut rows = Vec::with_capacity(series.rows.len());
        for r in series.rows {
            let close = match r.adjusted_close {
                Some(adj) if flags.use_adjclose_as_close => adj,
                _ => r.close,
            };
            let ret = if flags.include_returns {
                prev_close
                    .filter(|p| *p != 0.0)
                    .map(|p| close / p - 1.0)
            } else {
                None
            };
            prev_close = Some(close);

            rows.push(MergedRow {
                date: r.date,
                ticker: series.ticker.clone(),
                open: r.open,
                high: r.high,
                low: r.low,
                close,
                adjusted_close: r.adjusted_close,
                volume: r.volume,
                ret,
            });
        }

        Self {
            ticker: series.ticker,
            source: series.source,
            has_adjusted_close,
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioOutcome {
    pub table: MergedTable,
    pub failures: Vec<FetchFailure>,
    /// Distinct sources actually used, in first-use order.
    pub sources: Vec<SourceTag>,
}

impl PortfolioOutcome {
    pub fn failed_tickers(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.ticker.as_str()).collect()
    }
}

/// Fetches every ticker in request order, one at a time, sleeping `req.sleep` after
/// each ticker whatever its outcome.
pub async fn run_portfolio(
    strategy: &FetchStrategy,
    req: &PortfolioRequest,
) -> Result<PortfolioOutcome, PipelineError> {
    let mut frames = Vec::with_capacity(req.tickers.len());
    let mut failures: Vec<FetchFailure> = Vec::new();
    let mut sources: Vec<SourceTag> = Vec::new();

    for ticker in &req.tickers {
        let result = strategy.fetch(ticker, req.range, req.interval).await;

        if !req.sleep.is_zero() {
            tokio::time::sleep(req.sleep).await;
        }

        match result {
            Ok(series) => {
                tracing::debug!(
                    %ticker,
                    source = %series.source,
                    rows = series.rows.len(),
                    "ticker fetched"
                );
                if !sources.contains(&series.source) {
                    sources.push(series.source);
                }
                frames.push(TickerFrame::prepare(series, req.flags));
            }
            Err(err) => {
                tracing::warn!(%ticker, error = %err, "ticker fetch failed");
                failures.push(FetchFailure {
                    ticker: ticker.clone(),
                    error: err.to_string(),
                });
                if req.policy == FailurePolicy::Strict {
                    return Err(PipelineError::StrictModeAbort {
                        ticker: ticker.clone(),
                        cause: err,
                        failures,
                    });
                }
            }
        }
    }

    if frames.is_empty() {
        return Err(PipelineError::AllTickersFailed { failures });
    }

    let options = ComposeOptions {
        batch_id: Some(req.batch_id.clone()),
        portfolio_id: req.portfolio_id.clone(),
        flags: req.flags,
    };
    let table = compose::compose(frames, &options);

    tracing::info!(
        batch_id = %req.batch_id,
        tickers = req.tickers.len(),
        rows = table.rows.len(),
        failed = failures.len(),
        "portfolio assembled"
    );

    Ok(PortfolioOutcome {
        table,
        failures,
        sources,
    })
}
