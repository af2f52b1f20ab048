//! Shared conversion rules for trades entering the journal.
//!
//! Every trade persisted by the reconciler goes through this module, no
//! matter which connector or import path produced it. Connectors translate
//! wire formats into `CanonicalTrade`; everything journal-specific (fees,
//! date, strategy label, notes, tags) is derived here exactly once.

use chrono::{DateTime, Utc};

use crate::domain::entities::platform::Platform;
use crate::domain::entities::trade::CanonicalTrade;

/// Which path brought a trade into the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOrigin {
    /// Connector-driven synchronization (socket push or REST poll).
    Sync,
    /// One-shot file/report upload.
    File,
}

impl ImportOrigin {
    fn strategy_suffix(&self) -> &'static str {
        match self {
            Self::Sync => "Auto Import",
            Self::File => "File Import",
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Self::Sync => "auto-import",
            Self::File => "file-import",
        }
    }
}

/// Journal-side fields derived from a canonical trade.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// Journal date, always the exit time.
    pub date: DateTime<Utc>,
    /// Total costs: `abs(commission) + abs(swap) + abs(fee)`.
    pub fees: f64,
    pub strategy: String,
    pub notes: String,
    pub tags: String,
}

/// Builds the durable fingerprint line embedded into persisted notes.
///
/// Binance trade identifiers are numeric executions rather than tickets,
/// so they carry their own wording. Everything else uses the uppercased
/// platform tag.
pub fn fingerprint(platform: Platform, external_id: &str) -> String {
    match platform {
        Platform::Binance => format!("Binance Trade ID: {}", external_id),
        _ => format!("{} Ticket: {}", platform.tag().to_uppercase(), external_id),
    }
}

pub fn strategy_label(platform: Platform, origin: ImportOrigin) -> String {
    match (platform, origin) {
        (Platform::Binance, ImportOrigin::Sync) => "Binance Import".to_string(),
        _ => format!(
            "{} {}",
            platform.tag().to_uppercase(),
            origin.strategy_suffix()
        ),
    }
}

pub fn tags(platform: Platform, origin: ImportOrigin) -> String {
    format!("{},{}", platform.name(), origin.tag())
}

/// Notes for trades pushed by a terminal bridge, which also carry the
/// server and login they came from.
pub fn terminal_notes(trade: &CanonicalTrade, server: &str, login: i64) -> String {
    let mut notes = format!(
        "{} | Server: {} | Account: {}",
        fingerprint(trade.platform, &trade.external_id),
        server,
        login
    );
    if let Some(comment) = trade.comment.as_deref() {
        if !comment.is_empty() {
            notes.push_str(" | ");
            notes.push_str(comment);
        }
    }
    notes
}

/// Terminal-pushed trades additionally get tagged with their server.
pub fn terminal_tags(platform: Platform, server: &str) -> String {
    format!(
        "{},{},{}",
        platform.name(),
        ImportOrigin::Sync.tag(),
        server.to_lowercase()
    )
}

/// Notes start with the fingerprint so legacy installations can still
/// locate imported trades by substring search.
pub fn notes(trade: &CanonicalTrade) -> String {
    let mut notes = fingerprint(trade.platform, &trade.external_id);
    if let Some(comment) = trade.comment.as_deref() {
        if !comment.is_empty() {
            notes.push_str(" - ");
            notes.push_str(comment);
        }
    }
    notes
}

/// The one shared conversion applied before persisting any imported trade.
pub fn to_journal_entry(trade: &CanonicalTrade, origin: ImportOrigin) -> JournalEntry {
    JournalEntry {
        date: trade.exit_time,
        fees: trade.total_fees(),
        strategy: strategy_label(trade.platform, origin),
        notes: notes(trade),
        tags: tags(trade.platform, origin),
    }
}
