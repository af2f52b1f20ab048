//! Delimited-text trade export parsing.
//!
//! The first line is a header; recognized column-name synonyms map onto
//! canonical fields and everything else is ignored, so exports from
//! different platforms load without per-platform templates.

use tracing::warn;

use crate::domain::entities::platform::Platform;
use crate::domain::entities::trade::{CanonicalTrade, TradeSide};
use crate::domain::errors::ImportError;

use super::{finish_row, parse_number, parse_time, ParsedRow};

const MIN_HEADERS: usize = 5;

pub fn parse(document: &str, platform: Platform) -> Result<Vec<CanonicalTrade>, ImportError> {
    let mut lines = document.lines();

    let headers: Vec<String> = lines
        .next()
        .unwrap_or("")
        .split(',')
        .map(|h| h.trim().to_lowercase())
        .collect();
    if headers.len() < MIN_HEADERS {
        return Err(ImportError::UnrecognizedDocument("CSV"));
    }

    let mut trades = Vec::new();

    for (index, line) in lines.enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let values: Vec<&str> = line.split(',').map(|v| v.trim()).collect();
        if values.len() < headers.len() {
            warn!(line = index + 2, "skipping short row in trade CSV");
            continue;
        }

        let mut row = ParsedRow::default();
        for (header, value) in headers.iter().zip(&values) {
            apply_column(&mut row, header, value);
        }

        match finish_row(row, platform) {
            Some(trade) => trades.push(trade),
            None => warn!(line = index + 2, "skipping invalid row in trade CSV"),
        }
    }

    Ok(trades)
}

fn apply_column(row: &mut ParsedRow, header: &str, value: &str) {
    match header {
        "ticket" | "order" | "id" => row.ticket = value.to_string(),
        "symbol" | "instrument" => row.symbol = value.to_string(),
        "type" | "side" => {
            let side = value.to_lowercase();
            row.side = Some(if side.contains("buy") || side.contains("long") {
                TradeSide::Long
            } else {
                TradeSide::Short
            });
        }
        "volume" | "lots" | "size" => row.quantity = parse_number(value),
        "open price" | "entry price" | "price" => row.entry_price = parse_number(value),
        "close price" | "exit price" => row.exit_price = parse_number(value),
        "open time" | "entry time" => row.open_time = parse_time(value),
        "close time" | "exit time" => row.close_time = parse_time(value),
        "profit" | "pnl" => row.profit = parse_number(value),
        "commission" | "fee" => row.commission = parse_number(value),
        "comment" | "note" => {
            if !value.is_empty() {
                row.comment = Some(value.to_string());
            }
        }
        _ => {}
    }
}
