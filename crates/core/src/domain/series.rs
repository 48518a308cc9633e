use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which upstream produced a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Chart,
    Tabular,
}

impl SourceTag {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceTag::Chart => "chart",
            SourceTag::Tabular => "tabular",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRow {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub adjusted_close: Option<f64>,
    pub volume: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSeries {
    pub ticker: String,
    pub source: SourceTag,
    pub rows: Vec<OhlcvRow>,
}

impl NormalizedSeries {
    pub fn new(ticker: &str, source: SourceTag, rows: Vec<OhlcvRow>) -> Self {
        Self {
            ticker: ticker.trim().to_uppercase(),
            source,
            rows,
        }
    }

    /// Sorts rows by date (stable) and keeps the first row seen for each date.
    pub fn sort_and_dedup(&mut self) {
        self.rows.sort_by_key(|r| r.date);
        self.rows.dedup_by_key(|r| r.date);
    }

    pub fn has_adjusted_close(&self) -> bool {
        self.rows.iter().any(|r| r.adjusted_close.is_some())
    }
}

/// Lenient numeric coercion used by both adapters: unparseable cells become `None`.
pub fn coerce_f64(v: &serde_json::Value) -> Option<f64> {
    let n = match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_f64(s),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

pub fn parse_f64(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Volume coercion: non-negative integer, `0` when unparseable.
pub fn coerce_volume(v: &serde_json::Value) -> u64 {
    coerce_f64(v).map(volume_from_f64).unwrap_or(0)
}

pub fn parse_volume(s: &str) -> u64 {
    parse_f64(s).map(volume_from_f64).unwrap_or(0)
}

fn volume_from_f64(n: f64) -> u64 {
    if n <= 0.0 {
        0
    } else {
        n.round() as u64
    }
}
