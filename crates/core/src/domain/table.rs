use chrono::NaiveDate;
use serde::Serialize;

/// Output columns in their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    BatchId,
    PortfolioId,
    Date,
    Ticker,
    Open,
    High,
    Low,
    Close,
    AdjustedClose,
    Volume,
    OpenInterest,
    Return,
}

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Column::BatchId => "batch_id",
            Column::PortfolioId => "portfolio_id",
            Column::Date => "date",
            Column::Ticker => "ticker",
            Column::Open => "open",
            Column::High => "high",
            Column::Low => "low",
            Column::Close => "close",
            Column::AdjustedClose => "adjusted_close",
            Column::Volume => "volume",
            Column::OpenInterest => "open_interest",
            Column::Return => "return",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRow {
    pub date: NaiveDate,
    pub ticker: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub adjusted_close: Option<f64>,
    pub volume: u64,
    pub ret: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedTable {
    pub batch_id: Option<String>,
    pub portfolio_id: Option<String>,
    pub columns: Vec<Column>,
    pub rows: Vec<MergedRow>,
}

impl MergedTable {
    pub fn header(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    /// Renders one cell; missing numbers render as an empty cell.
    pub fn cell(&self, row: &MergedRow, column: Column) -> String {
        fn num(v: Option<f64>) -> String {
            v.map(|n| n.to_string()).unwrap_or_default()
        }

        match column {
            Column::BatchId => self.batch_id.clone().unwrap_or_default(),
            Column::PortfolioId => self.portfolio_id.clone().unwrap_or_default(),
            Column::Date => row.date.format("%Y-%m-%d").to_string(),
            Column::Ticker => row.ticker.clone(),
            Column::Open => num(row.open),
            Column::High => num(row.high),
            Column::Low => num(row.low),
            Column::Close => row.close.to_string(),
            Column::AdjustedClose => num(row.adjusted_close),
            Column::Volume => row.volume.to_string(),
            Column::OpenInterest => "0".to_string(),
            Column::Return => num(row.ret),
        }
    }

    pub fn tickers(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for row in &self.rows {
            if out.last() != Some(&row.ticker.as_str()) {
                out.push(&row.ticker);
            }
        }
        out
    }
}
