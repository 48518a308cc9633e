use chrono::{Duration, NaiveDate};
use thiserror::Error;

const ISO_FORMAT: &str = "%Y-%m-%d";
const SLASH_FORMAT: &str = "%m/%d/%Y";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid date format: {raw:?} (expected YYYY-MM-DD or MM/DD/YYYY)")]
pub struct InvalidDateFormat {
    pub raw: String,
}

/// Parses a user-supplied date in either `YYYY-MM-DD` or `MM/DD/YYYY`.
pub fn normalize(raw: &str) -> Result<NaiveDate, InvalidDateFormat> {
    let s = raw.trim();
    let format = if s.contains('/') {
        SLASH_FORMAT
    } else {
        ISO_FORMAT
    };
    NaiveDate::parse_from_str(s, format).map_err(|_| InvalidDateFormat {
        raw: raw.to_string(),
    })
}

/// Lenient variant for upstream tables, whose date cells may carry a time suffix
/// (`2024-01-05 00:00:00`, `2024-01-05T00:00:00Z`).
pub fn parse_upstream_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(d) = normalize(s) {
        return Some(d);
    }
    let head = s.get(..10)?;
    normalize(head).ok()
}

/// Inclusive calendar range handed to the source adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn start_slash(&self) -> String {
        self.start.format(SLASH_FORMAT).to_string()
    }

    pub fn end_slash(&self) -> String {
        self.end.format(SLASH_FORMAT).to_string()
    }

    /// UTC-midnight epoch seconds for `[start, end + 1 day)`.
    ///
    /// Epoch-range sources treat the upper bound as exclusive, so the end date is
    /// advanced by one day to keep the requested end date in the result.
    pub fn epoch_bounds(&self) -> (i64, i64) {
        let start = utc_midnight(self.start);
        let end = utc_midnight(self.end + Duration::days(1));
        (start, end)
    }
}

fn utc_midnight(d: NaiveDate) -> i64 {
    d.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}
