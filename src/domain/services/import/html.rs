//! MetaTrader HTML statement parsing.
//!
//! MT4/MT5 export account statements as a single HTML table. Rows are
//! located on `<tr` boundaries and cell text is stripped of any remaining
//! markup, so both bare `<td>` and attribute-laden exports parse the same.

use tracing::warn;

use crate::domain::entities::platform::Platform;
use crate::domain::entities::trade::{CanonicalTrade, TradeSide};
use crate::domain::errors::ImportError;

use super::{finish_row, parse_number, parse_time, ParsedRow};

// Cell layout of the closed-trades section: ticket, open time, close time,
// symbol, type, lots, open price, close price, then optional profit,
// commission and comment.
const MIN_CELLS: usize = 8;

pub fn parse(document: &str, platform: Platform) -> Result<Vec<CanonicalTrade>, ImportError> {
    if !document.contains("<tr") {
        return Err(ImportError::UnrecognizedDocument("MetaTrader HTML"));
    }

    let mut trades = Vec::new();

    for row in document.split("<tr").skip(1) {
        let body = match row.find('>') {
            Some(i) => &row[i + 1..],
            None => continue,
        };
        if !body.contains("<td") {
            continue;
        }

        let cells = split_cells(body);
        if cells.len() < MIN_CELLS {
            continue;
        }

        let parsed = ParsedRow {
            ticket: cells[0].clone(),
            symbol: cells[3].clone(),
            side: Some(TradeSide::from_action(&cells[4])),
            quantity: parse_number(&cells[5]),
            entry_price: parse_number(&cells[6]),
            exit_price: parse_number(&cells[7]),
            open_time: parse_time(&cells[1]),
            close_time: parse_time(&cells[2]),
            profit: cells.get(8).map(|c| parse_number(c)).unwrap_or(0.0),
            commission: cells.get(9).map(|c| parse_number(c)).unwrap_or(0.0),
            comment: cells.get(10).cloned().filter(|c| !c.is_empty()),
        };

        match finish_row(parsed, platform) {
            Some(trade) => trades.push(trade),
            None => warn!(ticket = %cells[0], "skipping unparseable statement row"),
        }
    }

    Ok(trades)
}

/// Extracts the text of every `<td>` cell in a row, dropping cells that are
/// empty after markup stripping.
fn split_cells(row: &str) -> Vec<String> {
    let mut cells = Vec::new();

    for fragment in row.split("<td").skip(1) {
        let content = match fragment.find('>') {
            Some(i) => &fragment[i + 1..],
            None => continue,
        };
        let inner = content.split("</td>").next().unwrap_or("");
        let text = decode_entities(&strip_tags(inner)).trim().to_string();
        if !text.is_empty() {
            cells.push(text);
        }
    }

    cells
}

fn strip_tags(fragment: &str) -> String {
    let mut text = String::with_capacity(fragment.len());
    let mut in_tag = false;

    for c in fragment.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    text
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
