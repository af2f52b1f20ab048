//! File/report import.
//!
//! Stateless parsers that turn exported trade documents into canonical
//! trades without touching the network. Document-level problems (wrong
//! format entirely) fail the whole import; a malformed row inside an
//! otherwise parseable document is skipped individually.

pub mod csv;
pub mod html;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::domain::entities::platform::Platform;
use crate::domain::entities::trade::{CanonicalTrade, TradeSide};
use crate::domain::errors::ImportError;

/// Upload formats recognized by the importer, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Html,
    Csv,
}

impl FileFormat {
    pub fn from_file_name(name: &str) -> Result<Self, ImportError> {
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("html") | Some("htm") => Ok(FileFormat::Html),
            Some("csv") | Some("txt") => Ok(FileFormat::Csv),
            Some(other) => Err(ImportError::UnsupportedFormat(other.to_string())),
            None => Err(ImportError::UnsupportedFormat(name.to_string())),
        }
    }
}

/// Parses a whole uploaded document into canonical trades.
pub fn parse_document(
    content: &str,
    format: FileFormat,
    platform: Platform,
) -> Result<Vec<CanonicalTrade>, ImportError> {
    match format {
        FileFormat::Html => html::parse(content, platform),
        FileFormat::Csv => csv::parse(content, platform),
    }
}

/// One row as extracted from a document, before validation.
#[derive(Debug, Default)]
pub(crate) struct ParsedRow {
    pub ticket: String,
    pub symbol: String,
    pub side: Option<TradeSide>,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub open_time: Option<DateTime<Utc>>,
    pub close_time: Option<DateTime<Utc>>,
    pub profit: f64,
    pub commission: f64,
    pub comment: Option<String>,
}

/// Applies the shared row-acceptance rule and fills defaults.
///
/// A row is accepted only when symbol, quantity, entry price and exit price
/// are all present and positive. Missing close time defaults to now, missing
/// open time to close time minus one minute. Rows without a ticket get a
/// deterministic content-derived id so re-importing the same file stays
/// idempotent.
pub(crate) fn finish_row(row: ParsedRow, platform: Platform) -> Option<CanonicalTrade> {
    if row.symbol.is_empty()
        || !(row.quantity > 0.0)
        || !(row.entry_price > 0.0)
        || !(row.exit_price > 0.0)
    {
        return None;
    }

    let close_time = row.close_time.unwrap_or_else(Utc::now);
    let open_time = row
        .open_time
        .unwrap_or_else(|| close_time - Duration::seconds(60));

    let external_id = if row.ticket.is_empty() {
        synthetic_id(&row.symbol, row.entry_price, row.exit_price, close_time)
    } else {
        row.ticket
    };

    Some(CanonicalTrade {
        external_id,
        symbol: row.symbol,
        side: row.side.unwrap_or(TradeSide::Short),
        quantity: row.quantity,
        entry_price: row.entry_price,
        exit_price: row.exit_price,
        entry_time: open_time,
        exit_time: close_time,
        profit: row.profit,
        commission: row.commission,
        swap: 0.0,
        fee: 0.0,
        comment: row.comment,
        platform,
    })
}

fn synthetic_id(symbol: &str, entry_price: f64, exit_price: f64, close_time: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}-{}",
        symbol,
        close_time.timestamp(),
        entry_price,
        exit_price
    )
}

/// Parses the timestamp spellings seen across report exports. Naive values
/// are taken as UTC.
pub(crate) fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y.%m.%d %H:%M:%S",
        "%Y.%m.%d %H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive));
    }

    None
}

/// Lenient numeric parse: reads the leading float prefix, anything else is 0.
pub(crate) fn parse_number(value: &str) -> f64 {
    let value = value.trim();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;

    for (i, c) in value.char_indices() {
        match c {
            '+' | '-' if i == 0 => end = i + 1,
            '0'..='9' => {
                seen_digit = true;
                end = i + 1;
            }
            '.' if !seen_dot => {
                seen_dot = true;
                end = i + 1;
            }
            _ => break,
        }
    }

    if !seen_digit {
        return 0.0;
    }
    value[..end].parse().unwrap_or(0.0)
}
