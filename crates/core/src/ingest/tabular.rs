//! Tabular source: a historical-data endpoint returning the full table for a ticker
//! as CSV, filtered server-side by an `MM/DD/YYYY` date range.

use crate::config::Settings;
use crate::domain::request::Interval;
use crate::domain::series::{parse_f64, parse_volume, NormalizedSeries, OhlcvRow, SourceTag};
use crate::ingest::error::FetchError;
use crate::ingest::provider::{endpoint_url, SourceAdapter};
use crate::time::dates::{self, DateRange};

const REQUIRED: [&str; 6] = ["open", "high", "low", "close", "adjclose", "volume"];
const DATE_ALIASES: [&str; 5] = ["date", "datetime", "index", "timestamp", "time"];

#[derive(Debug, Clone)]
pub struct TabularSource {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl TabularSource {
    pub fn new(http: reqwest::Client, base_url: Option<String>) -> Self {
        Self { http, base_url }
    }

    pub fn from_settings(http: reqwest::Client, settings: &Settings) -> Self {
        Self::new(http, settings.tabular_base_url.clone())
    }
}

#[async_trait::async_trait]
impl SourceAdapter for TabularSource {
    fn source(&self) -> SourceTag {
        SourceTag::Tabular
    }

    async fn fetch(
        &self,
        ticker: &str,
        range: DateRange,
        interval: Interval,
    ) -> Result<NormalizedSeries, FetchError> {
        let Some(base_url) = self.base_url.as_deref() else {
            return Err(FetchError::SourceUnavailable(
                "TABULAR_BASE_URL is not configured".into(),
            ));
        };
        let url = endpoint_url(base_url, &["history", ticker])?;

        let res = self
            .http
            .get(url)
            .query(&[
                ("start_date", range.start_slash()),
                ("end_date", range.end_slash()),
                ("interval", interval.code().to_string()),
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
        parse_table(ticker, &text)
    }
}

/// Column keys compare case-insensitively and ignore spaces/underscores, so
/// `Adj Close`, `adj_close` and `adjclose` are the same column.
fn column_key(name: &str) -> String {
    let key: String = name
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    match key.as_str() {
        "adjustedclose" => "adjclose".to_string(),
        _ => key,
    }
}

pub(crate) fn parse_table(ticker: &str, text: &str) -> Result<NormalizedSeries, FetchError> {
    if text.trim().is_empty() {
        return Err(FetchError::EmptyResult);
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| FetchError::MalformedResponse(format!("unreadable table header: {e}")))?
        .clone();
    let keys: Vec<String> = headers.iter().map(column_key).collect();
    let find = |name: &str| keys.iter().position(|k| k == name);

    let missing: Vec<String> = REQUIRED
        .into_iter()
        .filter(|name| find(*name).is_none())
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(FetchError::MissingColumns { names: missing });
    }

    // Whatever the date-bearing column is called; an unnamed index column also counts.
    let date_idx = DATE_ALIASES
        .iter()
        .find_map(|alias| find(*alias))
        .or_else(|| keys.iter().position(|k| k.is_empty()))
        .ok_or_else(|| FetchError::MissingColumns {
            names: vec!["date".to_string()],
        })?;
    let [open, high, low, close, adjclose, volume] = REQUIRED.map(|name| find(name).unwrap_or(0));

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| FetchError::MalformedResponse(format!("unreadable table row: {e}")))?;

        let field = |idx: usize| record.get(idx).unwrap_or("");
        let Some(date) = dates::parse_upstream_date(field(date_idx)) else {
            continue;
        };
        let Some(close_value) = parse_f64(field(close)) else {
            continue;
        };

        rows.push(OhlcvRow {
            date,
            open: parse_f64(field(open)),
            high: parse_f64(field(high)),
            low: parse_f64(field(low)),
            close: close_value,
            adjusted_close: parse_f64(field(adjclose)),
            volume: parse_volume(field(volume)),
        });
    }

    // Header only, or every row dropped for a missing date or close.
    if rows.is_empty() {
        return Err(FetchError::EmptyResult);
    }

    Ok(NormalizedSeries::new(ticker, SourceTag::Tabular, rows))
}
