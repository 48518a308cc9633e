use crate::domain::request::OutputFlags;
use crate::domain::table::{Column, MergedRow, MergedTable};
use crate::pipeline::TickerFrame;

const BASE_COLUMNS: [Column; 9] = [
    Column::Date,
    Column::Ticker,
    Column::Open,
    Column::High,
    Column::Low,
    Column::Close,
    Column::Volume,
    Column::OpenInterest,
    Column::Return,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOptions {
    pub batch_id: Option<String>,
    pub portfolio_id: Option<String>,
    pub flags: OutputFlags,
}

/// Column list for the given options. Optional columns that no frame can supply
/// are left out rather than rejected.
pub fn columns_for(options: &ComposeOptions, adjusted_close_available: bool) -> Vec<Column> {
    let mut columns = Vec::with_capacity(BASE_COLUMNS.len() + 3);
    if options.batch_id.is_some() {
        columns.push(Column::BatchId);
    }
    if options.portfolio_id.is_some() {
        columns.push(Column::PortfolioId);
    }
    for column in BASE_COLUMNS {
        match column {
            Column::Return if !options.flags.include_returns => continue,
            Column::Volume => {
                if options.flags.include_adjclose_column && adjusted_close_available {
                    columns.push(Column::AdjustedClose);
                }
                columns.push(column);
            }
            _ => columns.push(column),
        }
    }
    columns
}

/// Concatenates the frames and sorts by `(ticker, date)`; the sort is stable so
/// equal keys keep frame order.
pub fn compose(frames: Vec<TickerFrame>, options: &ComposeOptions) -> MergedTable {
    let adjusted_close_available = frames.iter().any(|f| f.has_adjusted_close);
    let columns = columns_for(options, adjusted_close_available);

    let mut rows: Vec<MergedRow> = frames.into_iter().flat_map(|f| f.rows).collect();
    rows.sort_by(|a, b| a.ticker.cmp(&b.ticker).then(a.date.cmp(&b.date)));

    MergedTable {
        batch_id: options.batch_id.clone(),
        portfolio_id: options.portfolio_id.clone(),
        columns,
        rows,
    }
}
