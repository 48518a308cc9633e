use crate::time::dates::{self, DateRange, InvalidDateFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_TICKERS: usize = 50;
pub const DEFAULT_SLEEP_SECONDS: f64 = 0.2;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_SECONDS: f64 = 1.0;

// Upper bounds on the per-request knobs; one request must not pin a handler for hours.
pub const MAX_RETRIES: u32 = 10;
pub const MAX_SLEEP_SECONDS: f64 = 10.0;
pub const MAX_BACKOFF_BASE_SECONDS: f64 = 30.0;
pub const MAX_TICKER_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("tickers must contain at least 1 valid symbol")]
    EmptyTickers,

    #[error("Too many tickers. Max allowed = {max}")]
    TooManyTickers { count: usize, max: usize },

    #[error("unrecognized interval {0:?} (expected 1d, 1wk or 1mo)")]
    UnknownInterval(String),

    #[error("unrecognized source {0:?} (expected chart, tabular or auto)")]
    UnknownSource(String),

    #[error(transparent)]
    InvalidDateFormat(#[from] InvalidDateFormat),

    #[error("start_date {start} is after end_date {end}")]
    InvertedRange { start: String, end: String },

    #[error("invalid ticker {0:?} (letters, digits and . ^ = - only)")]
    InvalidTicker(String),

    #[error("{field} must be a non-negative finite number")]
    InvalidDuration { field: &'static str },

    #[error("{field} must be at most {max}")]
    ValueTooLarge { field: &'static str, max: String },

    #[error("retries must be at least 1")]
    ZeroRetries,

    #[error("{field} contains characters not allowed in an identifier")]
    InvalidIdentifier { field: &'static str },

    #[error("unknown output column {0:?}")]
    UnknownColumn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

impl Interval {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1d" | "daily" => Ok(Interval::Daily),
            "1wk" | "weekly" => Ok(Interval::Weekly),
            "1mo" | "monthly" => Ok(Interval::Monthly),
            _ => Err(ValidationError::UnknownInterval(raw.to_string())),
        }
    }

    /// Upstream interval code, shared by both sources.
    pub fn code(self) -> &'static str {
        match self {
            Interval::Daily => "1d",
            Interval::Weekly => "1wk",
            Interval::Monthly => "1mo",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceMode {
    Chart,
    Tabular,
    /// Tabular first, chart on any failure.
    Auto,
}

impl SourceMode {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "chart" => Ok(SourceMode::Chart),
            "tabular" => Ok(SourceMode::Tabular),
            "auto" | "fallback" => Ok(SourceMode::Auto),
            _ => Err(ValidationError::UnknownSource(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Strict,
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFlags {
    pub use_adjclose_as_close: bool,
    pub include_adjclose_column: bool,
    pub include_returns: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    pub retries: u32,
    pub backoff_base: Duration,
}

/// A validated request, built from a wire body by [`PortfolioRequestBody::validate`]
/// or [`PortfolioCsvBody::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioRequest {
    pub batch_id: String,
    pub portfolio_id: Option<String>,
    pub tickers: Vec<String>,
    pub range: DateRange,
    pub interval: Interval,
    pub source: SourceMode,
    pub flags: OutputFlags,
    pub policy: FailurePolicy,
    pub sleep: Duration,
    pub retry: RetrySettings,
}

/// Wire shape of `POST /portfolio/ohlcv.csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRequestBody {
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub portfolio_id: Option<String>,
    pub tickers: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default = "default_true")]
    pub use_adjclose_as_close: bool,
    #[serde(default = "default_true")]
    pub include_adjclose_column: bool,
    #[serde(default = "default_true")]
    pub include_returns: bool,

    #[serde(default = "default_max_tickers")]
    pub max_tickers: usize,
    #[serde(default = "default_sleep_seconds")]
    pub sleep_seconds: f64,
    #[serde(default = "default_true")]
    pub strict: bool,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: f64,
}

/// Wire shape of `POST /portfolio/csv`: the optional columns are picked by name and
/// throttling/retry knobs keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioCsvBody {
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub portfolio_id: Option<String>,
    pub tickers: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_true")]
    pub strict: bool,
    #[serde(default)]
    pub columns: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> String {
    "1d".to_string()
}

fn default_source() -> String {
    "auto".to_string()
}

fn default_max_tickers() -> usize {
    DEFAULT_MAX_TICKERS
}

fn default_sleep_seconds() -> f64 {
    DEFAULT_SLEEP_SECONDS
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_backoff_base_seconds() -> f64 {
    DEFAULT_BACKOFF_BASE_SECONDS
}

impl PortfolioRequestBody {
    /// `max_tickers_ceiling` caps whatever limit the caller asks for.
    pub fn validate(self, max_tickers_ceiling: usize) -> Result<PortfolioRequest, ValidationError> {
        let max = self.max_tickers.min(max_tickers_ceiling);
        let tickers = clean_tickers(&self.tickers, max)?;
        let interval = Interval::parse(&self.interval)?;
        let source = SourceMode::parse(&self.source)?;
        let range = parse_range(&self.start_date, &self.end_date)?;

        if self.retries == 0 {
            return Err(ValidationError::ZeroRetries);
        }
        if self.retries > MAX_RETRIES {
            return Err(ValidationError::ValueTooLarge {
                field: "retries",
                max: MAX_RETRIES.to_string(),
            });
        }

        Ok(PortfolioRequest {
            batch_id: resolve_batch_id(self.batch_id)?,
            portfolio_id: clean_identifier(self.portfolio_id, "portfolio_id")?,
            tickers,
            range,
            interval,
            source,
            flags: OutputFlags {
                use_adjclose_as_close: self.use_adjclose_as_close,
                include_adjclose_column: self.include_adjclose_column,
                include_returns: self.include_returns,
            },
            policy: if self.strict {
                FailurePolicy::Strict
            } else {
                FailurePolicy::Lenient
            },
            sleep: seconds(self.sleep_seconds, "sleep_seconds", MAX_SLEEP_SECONDS)?,
            retry: RetrySettings {
                retries: self.retries,
                backoff_base: seconds(
                    self.backoff_base_seconds,
                    "backoff_base_seconds",
                    MAX_BACKOFF_BASE_SECONDS,
                )?,
            },
        })
    }
}

impl PortfolioCsvBody {
    pub fn validate(self, max_tickers_ceiling: usize) -> Result<PortfolioRequest, ValidationError> {
        let max = DEFAULT_MAX_TICKERS.min(max_tickers_ceiling);
        let tickers = clean_tickers(&self.tickers, max)?;
        let interval = Interval::parse(&self.interval)?;
        let source = SourceMode::parse(&self.source)?;
        let range = parse_range(&self.start_date, &self.end_date)?;

        let mut flags = OutputFlags {
            use_adjclose_as_close: true,
            include_adjclose_column: false,
            include_returns: false,
        };
        for column in &self.columns {
            match column.trim().to_ascii_lowercase().as_str() {
                "adjusted_close" | "adjclose" => flags.include_adjclose_column = true,
                "return" | "ret" | "returns" => flags.include_returns = true,
                _ => return Err(ValidationError::UnknownColumn(column.clone())),
            }
        }

        Ok(PortfolioRequest {
            batch_id: resolve_batch_id(self.batch_id)?,
            portfolio_id: clean_identifier(self.portfolio_id, "portfolio_id")?,
            tickers,
            range,
            interval,
            source,
            flags,
            policy: if self.strict {
                FailurePolicy::Strict
            } else {
                FailurePolicy::Lenient
            },
            sleep: Duration::from_secs_f64(DEFAULT_SLEEP_SECONDS),
            retry: RetrySettings {
                retries: DEFAULT_RETRIES,
                backoff_base: Duration::from_secs_f64(DEFAULT_BACKOFF_BASE_SECONDS),
            },
        })
    }
}

/// Trims, uppercases, drops blanks and duplicates (first occurrence wins), then
/// enforces the symbol charset and the size bound.
fn clean_tickers(raw: &[String], max: usize) -> Result<Vec<String>, ValidationError> {
    let mut seen = HashSet::new();
    let tickers: Vec<String> = raw
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect();

    if let Some(bad) = tickers.iter().find(|t| !is_symbol(t)) {
        return Err(ValidationError::InvalidTicker(bad.clone()));
    }

    if tickers.is_empty() {
        return Err(ValidationError::EmptyTickers);
    }
    if tickers.len() > max {
        return Err(ValidationError::TooManyTickers {
            count: tickers.len(),
            max,
        });
    }
    Ok(tickers)
}

/// Tickers land in upstream URL paths and the comma-joined failure header.
fn is_symbol(t: &str) -> bool {
    t.len() <= MAX_TICKER_LEN
        && t.chars().any(|c| c.is_ascii_alphanumeric())
        && t
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || ".^=-".contains(c))
}

fn parse_range(start: &str, end: &str) -> Result<DateRange, ValidationError> {
    let start_date = dates::normalize(start)?;
    let end_date = dates::normalize(end)?;
    if start_date > end_date {
        return Err(ValidationError::InvertedRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok(DateRange::new(start_date, end_date))
}

fn seconds(v: f64, field: &'static str, max: f64) -> Result<Duration, ValidationError> {
    let d = Duration::try_from_secs_f64(v).map_err(|_| ValidationError::InvalidDuration { field })?;
    if v > max {
        return Err(ValidationError::ValueTooLarge {
            field,
            max: max.to_string(),
        });
    }
    Ok(d)
}

fn resolve_batch_id(raw: Option<String>) -> Result<String, ValidationError> {
    Ok(clean_identifier(raw, "batch_id")?.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()))
}

/// Identifiers end up in response headers and the attachment filename.
fn clean_identifier(
    raw: Option<String>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    let Some(id) = raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let allowed = id
        .chars()
        .all(|c| c.is_ascii_graphic() && c != '"' && c != '/' && c != '\\');
    if !allowed {
        return Err(ValidationError::InvalidIdentifier { field });
    }
    Ok(Some(id))
}
