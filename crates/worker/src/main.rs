use anyhow::Context;
use clap::Parser;
use std::io::Write;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketslice_core::domain::request::{PortfolioRequest, PortfolioRequestBody};
use marketslice_core::export::csv::export_table_csv;
use marketslice_core::ingest::SourceSet;
use marketslice_core::pipeline;

#[derive(Debug, Parser)]
#[command(name = "marketslice_worker")]
struct Args {
    /// Comma-separated ticker symbols.
    #[arg(long, value_delimiter = ',', required = true)]
    tickers: Vec<String>,

    /// Start date (YYYY-MM-DD or MM/DD/YYYY), inclusive.
    #[arg(long)]
    start: String,

    /// End date (YYYY-MM-DD or MM/DD/YYYY), inclusive.
    #[arg(long)]
    end: String,

    /// 1d, 1wk or 1mo.
    #[arg(long, default_value = "1d")]
    interval: String,

    /// chart, tabular or auto.
    #[arg(long, default_value = "auto")]
    source: String,

    #[arg(long)]
    batch_id: Option<String>,

    #[arg(long)]
    portfolio_id: Option<String>,

    /// Keep going when a ticker fails instead of aborting the run.
    #[arg(long)]
    lenient: bool,

    /// Keep the raw close instead of substituting the adjusted close.
    #[arg(long)]
    raw_close: bool,

    #[arg(long)]
    no_adjclose_column: bool,

    #[arg(long)]
    no_returns: bool,

    #[arg(long, default_value_t = 0.2)]
    sleep_seconds: f64,

    #[arg(long, default_value_t = 3)]
    retries: u32,

    #[arg(long, default_value_t = 1.0)]
    backoff_base_seconds: f64,

    /// Output path; stdout when omitted.
    #[arg(long)]
    out: Option<std::path::PathBuf>,
}

impl Args {
    fn into_request(self, max_tickers_ceiling: usize) -> anyhow::Result<PortfolioRequest> {
        let body = PortfolioRequestBody {
            batch_id: self.batch_id,
            portfolio_id: self.portfolio_id,
            tickers: self.tickers,
            start_date: self.start,
            end_date: self.end,
            interval: self.interval,
            source: self.source,
            use_adjclose_as_close: !self.raw_close,
            include_adjclose_column: !self.no_adjclose_column,
            include_returns: !self.no_returns,
            max_tickers: max_tickers_ceiling,
            sleep_seconds: self.sleep_seconds,
            strict: !self.lenient,
            retries: self.retries,
            backoff_base_seconds: self.backoff_base_seconds,
        };
        body.validate(max_tickers_ceiling)
            .context("invalid portfolio request")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = marketslice_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let out = args.out.clone();
    let req = args.into_request(settings.max_tickers_ceiling)?;

    let sources = SourceSet::from_settings(&settings)?;
    let strategy = sources.strategy_for(&req);

    let outcome = match pipeline::run_portfolio(&strategy, &req).await {
        Ok(outcome) => outcome,
        Err(err) => {
            let err = anyhow::Error::new(err);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(batch_id = %req.batch_id, error = %err, "portfolio run aborted");
            return Err(err);
        }
    };

    for failure in &outcome.failures {
        tracing::warn!(ticker = %failure.ticker, error = %failure.error, "ticker skipped");
    }

    let csv = export_table_csv(&outcome.table)?;
    match &out {
        Some(path) => std::fs::write(path, &csv)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => std::io::stdout()
            .write_all(&csv)
            .context("failed to write CSV to stdout")?,
    }

    tracing::info!(
        batch_id = %req.batch_id,
        rows = outcome.table.rows.len(),
        failed = outcome.failures.len(),
        "portfolio slice written"
    );
    Ok(())
}

fn init_sentry(settings: &marketslice_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
