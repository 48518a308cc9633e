use crate::domain::table::MergedTable;
use anyhow::{Context, Result};

/// Serializes the merged table as UTF-8 CSV: header row, then one row per
/// `(ticker, date)` with standard quoting.
pub fn export_table_csv(table: &MergedTable) -> Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(table.header())?;
    for row in &table.rows {
        wtr.write_record(table.columns.iter().map(|&c| table.cell(row, c)))?;
    }

    wtr.into_inner().context("failed to flush CSV writer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::table::{Column, MergedRow};
    use chrono::NaiveDate;

    fn row(ticker: &str, day: u32, close: f64, ret: Option<f64>) -> MergedRow {
        MergedRow {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            ticker: ticker.to_string(),
            open: Some(close - 1.0),
            high: Some(close + 1.5),
            low: None,
            close,
            adjusted_close: Some(close),
            volume: 1200,
            ret,
        }
    }

    #[test]
    fn writes_header_and_rows() {
        let table = MergedTable {
            batch_id: Some("b,1".to_string()),
            portfolio_id: None,
            columns: vec![
                Column::BatchId,
                Column::Date,
                Column::Ticker,
                Column::Open,
                Column::High,
                Column::Low,
                Column::Close,
                Column::AdjustedClose,
                Column::Volume,
                Column::OpenInterest,
                Column::Return,
            ],
            rows: vec![row("AAPL", 2, 100.0, None), row("AAPL", 3, 110.0, Some(0.1))],
        };

        let out = String::from_utf8(export_table_csv(&table).unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "batch_id,date,ticker,open,high,low,close,adjusted_close,volume,open_interest,return"
        );
        assert_eq!(lines[1], "\"b,1\",2024-01-02,AAPL,99,101.5,,100,100,1200,0,");
        assert_eq!(lines[2], "\"b,1\",2024-01-03,AAPL,109,111.5,,110,110,1200,0,0.1");
        assert_eq!(lines.len(), 3);
    }
}
