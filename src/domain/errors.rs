use std::time::Duration;
use thiserror::Error;

/// Failures talking to an external trading platform.
///
/// The kinds matter to callers: validation errors are never retried,
/// connection errors feed the reconnect policy, authentication errors are
/// surfaced verbatim so the user fixes credentials instead of burning the
/// rate-limit budget.
#[derive(Debug, Error, Clone)]
pub enum ConnectorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Failed to parse platform message: {0}")]
    MessageParse(String),

    #[error("Max reconnection attempts reached")]
    ReconnectExhausted,
}

impl ConnectorError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, ConnectorError::Authentication(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ConnectorError::Validation(_))
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ConnectorError::Timeout(Duration::from_secs(0))
        } else if let Some(status) = e.status() {
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                ConnectorError::Authentication(e.to_string())
            } else {
                ConnectorError::Connection(e.to_string())
            }
        } else {
            ConnectorError::Connection(e.to_string())
        }
    }
}

/// Why a canonical trade was rejected before reconciliation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TradeValidationError {
    #[error("Trade is missing an external id")]
    MissingExternalId,

    #[error("Trade is missing a symbol")]
    MissingSymbol,

    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(f64),

    #[error("Price must be positive, got {0}")]
    NonPositivePrice(f64),
}

/// Whole-document failures in file import. Row-level problems are recovered
/// locally (skip and warn) and never reach this type.
#[derive(Debug, Error, Clone)]
pub enum ImportError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Document is not a recognizable {0} export")]
    UnrecognizedDocument(&'static str),

    #[error("Failed to read document: {0}")]
    Unreadable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_error_display() {
        let e = ConnectorError::Authentication("bad credentials".to_string());
        assert_eq!(e.to_string(), "Authentication error: bad credentials");
        assert!(e.is_authentication());
    }

    #[test]
    fn test_reconnect_exhausted_message() {
        assert_eq!(
            ConnectorError::ReconnectExhausted.to_string(),
            "Max reconnection attempts reached"
        );
    }

    #[test]
    fn test_trade_validation_display() {
        let e = TradeValidationError::NonPositiveQuantity(0.0);
        assert_eq!(e.to_string(), "Quantity must be positive, got 0");
    }

    #[test]
    fn test_import_error_display() {
        let e = ImportError::UnsupportedFormat("xlsx".to_string());
        assert_eq!(e.to_string(), "Unsupported file format: xlsx");
    }
}
