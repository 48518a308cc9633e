use crate::config::Settings;
use crate::domain::request::{Interval, PortfolioRequest, SourceMode};
use crate::domain::series::NormalizedSeries;
use crate::ingest::chart::ChartSource;
use crate::ingest::error::FetchError;
use crate::ingest::provider::{build_http_client, RetryPolicy, SourceAdapter};
use crate::ingest::tabular::TabularSource;
use crate::time::dates::DateRange;
use std::sync::Arc;

/// Picks the source(s) for every ticker of one request. Only the chart leg is retried.
#[derive(Clone)]
pub struct FetchStrategy {
    mode: SourceMode,
    chart: Arc<dyn SourceAdapter>,
    tabular: Arc<dyn SourceAdapter>,
    retry: RetryPolicy,
}

impl FetchStrategy {
    pub fn new(
        mode: SourceMode,
        chart: Arc<dyn SourceAdapter>,
        tabular: Arc<dyn SourceAdapter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            mode,
            chart,
            tabular,
            retry,
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub async fn fetch(
        &self,
        ticker: &str,
        range: DateRange,
        interval: Interval,
    ) -> Result<NormalizedSeries, FetchError> {
        match self.mode {
            SourceMode::Chart => self.fetch_chart(ticker, range, interval).await,
            SourceMode::Tabular => self.tabular.fetch(ticker, range, interval).await,
            SourceMode::Auto => match self.tabular.fetch(ticker, range, interval).await {
                Ok(series) => Ok(series),
                Err(tabular_err) => {
                    tracing::info!(
                        %ticker,
                        error = %tabular_err,
                        "tabular source failed; falling back to chart"
                    );
                    self.fetch_chart(ticker, range, interval)
                        .await
                        .map_err(|chart_err| FetchError::AllSourcesFailed {
                            tabular: Box::new(tabular_err),
                            chart: Box::new(chart_err),
                        })
                }
            },
        }
    }

    async fn fetch_chart(
        &self,
        ticker: &str,
        range: DateRange,
        interval: Interval,
    ) -> Result<NormalizedSeries, FetchError> {
        let chart = &self.chart;
        self.retry
            .run(ticker, move || chart.fetch(ticker, range, interval))
            .await
    }
}

/// The two process-wide adapters, shared by every request.
#[derive(Clone)]
pub struct SourceSet {
    pub chart: Arc<dyn SourceAdapter>,
    pub tabular: Arc<dyn SourceAdapter>,
}

impl SourceSet {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let http = build_http_client(settings)?;
        Ok(Self {
            chart: Arc::new(ChartSource::from_settings(http.clone(), settings)),
            tabular: Arc::new(TabularSource::from_settings(http, settings)),
        })
    }

    pub fn strategy_for(&self, req: &PortfolioRequest) -> FetchStrategy {
        FetchStrategy::new(
            req.source,
            self.chart.clone(),
            self.tabular.clone(),
            RetryPolicy::from(req.retry),
        )
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::domain::series::{OhlcvRow, SourceTag};
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted source: each ticker pops its next outcome; unscripted tickers get
    /// `EmptyResult`. Every call is recorded.
    pub struct FakeSource {
        tag: SourceTag,
        script: Mutex<HashMap<String, Vec<Result<Vec<(u32, f64)>, FetchError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        pub fn new(tag: SourceTag) -> Self {
            Self {
                tag,
                script: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Closes are `(day of January 2024, close)`.
        pub fn ok(self, ticker: &str, closes: &[(u32, f64)]) -> Self {
            self.push(ticker, Ok(closes.to_vec()))
        }

        pub fn err(self, ticker: &str, err: FetchError) -> Self {
            self.push(ticker, Err(err))
        }

        fn push(self, ticker: &str, outcome: Result<Vec<(u32, f64)>, FetchError>) -> Self {
            self.script
                .lock()
                .unwrap()
                .entry(ticker.to_string())
                .or_default()
                .push(outcome);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub fn rows(closes: &[(u32, f64)]) -> Vec<OhlcvRow> {
        closes
            .iter()
            .map(|&(day, close)| OhlcvRow {
                date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
                open: Some(close - 1.0),
                high: Some(close + 1.0),
                low: Some(close - 2.0),
                close,
                adjusted_close: Some(close * 0.5),
                volume: 1000,
            })
            .collect()
    }

    #[async_trait::async_trait]
    impl SourceAdapter for FakeSource {
        fn source(&self) -> SourceTag {
            self.tag
        }

        async fn fetch(
            &self,
            ticker: &str,
            _range: DateRange,
            _interval: Interval,
        ) -> Result<NormalizedSeries, FetchError> {
            self.calls.lock().unwrap().push(ticker.to_string());
            let outcome = {
                let mut script = self.script.lock().unwrap();
                match script.get_mut(ticker) {
                    Some(queue) if !queue.is_empty() => queue.remove(0),
                    _ => Err(FetchError::EmptyResult),
                }
            };
            outcome.map(|closes| NormalizedSeries::new(ticker, self.tag, rows(&closes)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeSource;
    use super::*;
    use crate::domain::series::SourceTag;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
    }

    fn strategy(
        mode: SourceMode,
        chart: Arc<FakeSource>,
        tabular: Arc<FakeSource>,
        attempts: u32,
    ) -> FetchStrategy {
        FetchStrategy::new(
            mode,
            chart,
            tabular,
            RetryPolicy::new(attempts, Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn auto_prefers_tabular() {
        let chart = Arc::new(FakeSource::new(SourceTag::Chart));
        let tabular = Arc::new(FakeSource::new(SourceTag::Tabular).ok("AAPL", &[(2, 10.0)]));
        let s = strategy(SourceMode::Auto, chart.clone(), tabular.clone(), 3);

        let series = s.fetch("AAPL", range(), Interval::Daily).await.unwrap();
        assert_eq!(series.source, SourceTag::Tabular);
        assert!(chart.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_falls_back_to_retried_chart() {
        let chart = Arc::new(
            FakeSource::new(SourceTag::Chart)
                .err("AAPL", FetchError::UpstreamHttp { status: 500 })
                .ok("AAPL", &[(2, 10.0)]),
        );
        let tabular = Arc::new(
            FakeSource::new(SourceTag::Tabular)
                .err("AAPL", FetchError::SourceUnavailable("down".into())),
        );
        let s = strategy(SourceMode::Auto, chart.clone(), tabular.clone(), 3);

        let series = s.fetch("AAPL", range(), Interval::Daily).await.unwrap();
        assert_eq!(series.source, SourceTag::Chart);
        assert_eq!(chart.calls(), vec!["AAPL", "AAPL"]);
        assert_eq!(tabular.calls(), vec!["AAPL"]);
    }

    /// Tabular leg that answers with a table whose every close is null.
    struct NullCloseTable;

    #[async_trait::async_trait]
    impl SourceAdapter for NullCloseTable {
        fn source(&self) -> SourceTag {
            SourceTag::Tabular
        }

        async fn fetch(
            &self,
            ticker: &str,
            _range: DateRange,
            _interval: Interval,
        ) -> Result<NormalizedSeries, FetchError> {
            let body = "Date,Open,High,Low,Close,Adj Close,Volume\n2024-01-02,1,2,0.5,null,null,10\n";
            crate::ingest::tabular::parse_table(ticker, body)
        }
    }

    #[tokio::test]
    async fn auto_falls_back_when_tabular_has_no_usable_rows() {
        let chart = Arc::new(FakeSource::new(SourceTag::Chart).ok("AAPL", &[(2, 10.0)]));
        let s = FetchStrategy::new(
            SourceMode::Auto,
            chart.clone(),
            Arc::new(NullCloseTable),
            RetryPolicy::new(3, Duration::from_secs(1)),
        );

        let series = s.fetch("AAPL", range(), Interval::Daily).await.unwrap();
        assert_eq!(series.source, SourceTag::Chart);
        assert_eq!(series.rows.len(), 1);
        assert_eq!(chart.calls(), vec!["AAPL"]);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_fails_only_when_both_fail() {
        let chart = Arc::new(FakeSource::new(SourceTag::Chart));
        let tabular = Arc::new(FakeSource::new(SourceTag::Tabular));
        let s = strategy(SourceMode::Auto, chart.clone(), tabular, 2);

        let err = s.fetch("NOPE", range(), Interval::Daily).await.unwrap_err();
        match err {
            FetchError::AllSourcesFailed { tabular, chart } => {
                assert_eq!(*tabular, FetchError::EmptyResult);
                assert!(matches!(*chart, FetchError::UpstreamFetchFailed { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(chart.calls().len(), 2);
    }

    #[tokio::test]
    async fn fixed_tabular_is_not_retried() {
        let chart = Arc::new(FakeSource::new(SourceTag::Chart));
        let tabular = Arc::new(
            FakeSource::new(SourceTag::Tabular).err("X", FetchError::UpstreamHttp { status: 503 }),
        );
        let s = strategy(SourceMode::Tabular, chart.clone(), tabular.clone(), 5);

        let err = s.fetch("X", range(), Interval::Weekly).await.unwrap_err();
        assert_eq!(err, FetchError::UpstreamHttp { status: 503 });
        assert_eq!(tabular.calls().len(), 1);
        assert!(chart.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_chart_uses_full_retry_budget() {
        let chart = Arc::new(FakeSource::new(SourceTag::Chart));
        let tabular = Arc::new(FakeSource::new(SourceTag::Tabular));
        let s = strategy(SourceMode::Chart, chart.clone(), tabular.clone(), 3);

        let err = s.fetch("X", range(), Interval::Monthly).await.unwrap_err();
        assert!(matches!(err, FetchError::UpstreamFetchFailed { .. }));
        assert_eq!(chart.calls().len(), 3);
        assert!(tabular.calls().is_empty());
    }
}
