use chrono::{DateTime, Utc};

use crate::domain::entities::platform::Platform;
use crate::domain::errors::TradeValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Long => "LONG",
            TradeSide::Short => "SHORT",
        }
    }

    /// Side from a platform buy/sell string ("buy" substring, any case, means long).
    pub fn from_action(action: &str) -> TradeSide {
        if action.to_lowercase().contains("buy") {
            TradeSide::Long
        } else {
            TradeSide::Short
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized trade record every connector and import path emits.
///
/// `quantity` keeps the platform's own unit (lots for MetaTrader, base-asset
/// units for Binance, contracts for NinjaTrader); units are NOT comparable
/// across platforms and downstream consumers must not aggregate them.
#[derive(Debug, Clone)]
pub struct CanonicalTrade {
    /// Foreign system's unique id (ticket / order / execution id). Stable and
    /// unique per (platform, account); this is the dedup key.
    pub external_id: String,
    /// Instrument in the platform's own spelling.
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Authoritative for ordering; becomes the persisted trade's date.
    pub exit_time: DateTime<Utc>,
    /// Platform-reported P&L, informational only.
    pub profit: f64,
    /// May arrive signed; persisted fees take the absolute value.
    pub commission: f64,
    pub swap: f64,
    pub fee: f64,
    pub comment: Option<String>,
    pub platform: Platform,
}

impl CanonicalTrade {
    /// Rejects zero/negative-value phantom trades before reconciliation.
    pub fn validate(&self) -> Result<(), TradeValidationError> {
        if self.external_id.trim().is_empty() {
            return Err(TradeValidationError::MissingExternalId);
        }
        if self.symbol.trim().is_empty() {
            return Err(TradeValidationError::MissingSymbol);
        }
        if !(self.quantity > 0.0) {
            return Err(TradeValidationError::NonPositiveQuantity(self.quantity));
        }
        if !(self.entry_price > 0.0) {
            return Err(TradeValidationError::NonPositivePrice(self.entry_price));
        }
        if !(self.exit_price > 0.0) {
            return Err(TradeValidationError::NonPositivePrice(self.exit_price));
        }
        Ok(())
    }

    /// Total cost of the trade: each component is charged as a positive fee
    /// regardless of the sign the platform reported it with.
    pub fn total_fees(&self) -> f64 {
        self.commission.abs() + self.swap.abs() + self.fee.abs()
    }
}
