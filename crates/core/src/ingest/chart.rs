//! Chart-style source: a JSON time-series endpoint keyed by ticker with epoch
//! `period1`/`period2` bounds (Yahoo v8 chart shape).

use crate::config::Settings;
use crate::domain::request::Interval;
use crate::domain::series::{coerce_f64, coerce_volume, NormalizedSeries, OhlcvRow, SourceTag};
use crate::ingest::error::FetchError;
use crate::ingest::provider::{endpoint_url, SourceAdapter};
use crate::time::dates::DateRange;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    result: Option<Vec<ChartData>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    #[serde(default)]
    indicators: Option<Indicators>,
}

#[derive(Debug, Default, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
    #[serde(default)]
    adjclose: Option<Vec<AdjCloseData>>,
}

// Cells stay untyped so that strings and nulls coerce instead of failing the parse.
#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Value>,
    #[serde(default)]
    high: Vec<Value>,
    #[serde(default)]
    low: Vec<Value>,
    #[serde(default)]
    close: Vec<Value>,
    #[serde(default)]
    volume: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct AdjCloseData {
    #[serde(default)]
    adjclose: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct ChartSource {
    http: reqwest::Client,
    base_url: String,
}

impl ChartSource {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn from_settings(http: reqwest::Client, settings: &Settings) -> Self {
        Self::new(http, settings.chart_base_url.clone())
    }

    fn url(&self, ticker: &str) -> Result<reqwest::Url, FetchError> {
        endpoint_url(&self.base_url, &["v8", "finance", "chart", ticker])
    }
}

#[async_trait::async_trait]
impl SourceAdapter for ChartSource {
    fn source(&self) -> SourceTag {
        SourceTag::Chart
    }

    async fn fetch(
        &self,
        ticker: &str,
        range: DateRange,
        interval: Interval,
    ) -> Result<NormalizedSeries, FetchError> {
        let (period1, period2) = range.epoch_bounds();

        let res = self
            .http
            .get(self.url(ticker)?)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", interval.code().to_string()),
                ("events", "div,splits".to_string()),
                ("includeAdjustedClose", "true".to_string()),
            ])
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamHttp {
                status: status.as_u16(),
            });
        }

        let text = res.text().await?;
        parse_chart_body(ticker, &text)
    }
}

pub(crate) fn parse_chart_body(ticker: &str, text: &str) -> Result<NormalizedSeries, FetchError> {
    let resp: ChartResponse = serde_json::from_str(text)
        .map_err(|e| FetchError::MalformedResponse(format!("chart body is not valid JSON: {e}")))?;

    let data = match resp.chart.result {
        Some(result) => result.into_iter().next(),
        None => None,
    };
    let Some(data) = data else {
        let detail = match resp.chart.error {
            Some(err) => format!("{}: {}", err.code, err.description),
            None => "result list is empty".to_string(),
        };
        return Err(FetchError::MalformedResponse(detail));
    };

    let timestamps = data
        .timestamp
        .ok_or_else(|| FetchError::MalformedResponse("no timestamps".into()))?;

    let indicators = data.indicators.unwrap_or_default();
    let quote = indicators.quote.into_iter().next().unwrap_or_default();
    let adj_closes = indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose)
        .unwrap_or_default();

    let cell = |col: &[Value], i: usize| col.get(i).and_then(coerce_f64);

    let mut rows = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let Some(date) = chrono::DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()) else {
            continue;
        };

        // Null close marks a non-trading gap in the feed.
        let Some(close) = cell(&quote.close, i) else {
            continue;
        };

        rows.push(OhlcvRow {
            date,
            open: cell(&quote.open, i),
            high: cell(&quote.high, i),
            low: cell(&quote.low, i),
            close,
            adjusted_close: cell(&adj_closes, i),
            volume: quote.volume.get(i).map(coerce_volume).unwrap_or(0),
        });
    }

    if rows.is_empty() {
        return Err(FetchError::EmptyResult);
    }

    Ok(NormalizedSeries::new(ticker, SourceTag::Chart, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn parses_rows_and_drops_null_closes() {
        let body = json!({
            "chart": {
                "result": [{
                    "meta": {"symbol": "AAPL"},
                    "timestamp": [1704205800, 1704292200, 1704378600, 1704465000],
                    "indicators": {
                        "quote": [{
                            "open":   [187.15, 184.22, null, "181.99"],
                            "high":   [188.44, 185.88, null, 182.76],
                            "low":    [183.89, 183.43, null, 180.17],
                            "close":  [185.64, 184.25, null, 181.18],
                            "volume": [82488700, "58414500", null, -3]
                        }],
                        "adjclose": [{"adjclose": [184.94, 183.56, null, 180.50]}]
                    }
                }],
                "error": null
            }
        });

        let series = parse_chart_body("aapl", &body.to_string()).unwrap();
        assert_eq!(series.ticker, "AAPL");
        assert_eq!(series.source, SourceTag::Chart);
        assert_eq!(series.rows.len(), 3);

        let dates: Vec<NaiveDate> = series.rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(2), day(3), day(5)]);

        let first = &series.rows[0];
        assert_eq!(first.open, Some(187.15));
        assert_eq!(first.close, 185.64);
        assert_eq!(first.adjusted_close, Some(184.94));
        assert_eq!(first.volume, 82_488_700);

        assert_eq!(series.rows[1].volume, 58_414_500);
        assert_eq!(series.rows[2].open, Some(181.99));
        assert_eq!(series.rows[2].volume, 0);
    }

    #[test]
    fn missing_adjclose_block_yields_null_adjusted_close() {
        let body = json!({
            "chart": {"result": [{
                "timestamp": [1704205800],
                "indicators": {"quote": [{
                    "open": [1.0], "high": [2.0], "low": [0.5], "close": [1.5], "volume": [10]
                }]}
            }]}
        });
        let series = parse_chart_body("X", &body.to_string()).unwrap();
        assert_eq!(series.rows.len(), 1);
        assert_eq!(series.rows[0].adjusted_close, None);
        assert!(!series.has_adjusted_close());
    }

    #[test]
    fn all_null_closes_is_empty_result() {
        let body = json!({
            "chart": {"result": [{
                "timestamp": [1704205800, 1704292200],
                "indicators": {"quote": [{
                    "open": [1.0, 1.1], "high": [2.0, 2.1], "low": [0.5, 0.6],
                    "close": [null, null], "volume": [10, 20]
                }]}
            }]}
        });
        let err = parse_chart_body("X", &body.to_string()).unwrap_err();
        assert_eq!(err, FetchError::EmptyResult);

        let no_quote = json!({"chart": {"result": [{"timestamp": [1704205800]}]}});
        let err = parse_chart_body("X", &no_quote.to_string()).unwrap_err();
        assert_eq!(err, FetchError::EmptyResult);
    }

    #[test]
    fn ticker_stays_inside_chart_path() {
        let source = ChartSource::new(reqwest::Client::new(), "https://q.example/");
        let url = source.url("../../v7/finance/quote?symbols=SPY").unwrap();
        assert_eq!(url.query(), None);
        assert!(url.path().starts_with("/v8/finance/chart/"));
        assert_eq!(url.path_segments().map(|s| s.count()), Some(4));

        let url = source.url("^GSPC").unwrap();
        assert_eq!(url.host_str(), Some("q.example"));
        assert!(url.path().starts_with("/v8/finance/chart/"));
    }

    #[test]
    fn empty_result_list_is_malformed() {
        let body = json!({"chart": {"result": [], "error": null}});
        let err = parse_chart_body("X", &body.to_string()).unwrap_err();
        assert_eq!(err, FetchError::MalformedResponse("result list is empty".into()));
    }

    #[test]
    fn upstream_error_description_is_kept() {
        let body = json!({"chart": {"result": null, "error": {
            "code": "Not Found",
            "description": "No data found, symbol may be delisted"
        }}});
        let err = parse_chart_body("BADTICKER", &body.to_string()).unwrap_err();
        match err {
            FetchError::MalformedResponse(msg) => assert!(msg.starts_with("Not Found")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_timestamps_is_malformed() {
        let body = json!({"chart": {"result": [{"indicators": {"quote": [{}]}}]}});
        let err = parse_chart_body("X", &body.to_string()).unwrap_err();
        assert_eq!(err, FetchError::MalformedResponse("no timestamps".into()));
    }

    #[test]
    fn non_json_body_is_malformed() {
        let err = parse_chart_body("X", "<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }
}
