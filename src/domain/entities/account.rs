use serde::{Deserialize, Serialize};

use crate::domain::entities::platform::Platform;

/// Last-known account state reported by a platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Login / account number in the platform's own format.
    pub id: String,
    pub name: String,
    pub server: String,
    pub currency: String,
    pub balance: f64,
    pub equity: f64,
    #[serde(skip)]
    pub platform: Option<Platform>,
}

impl AccountSnapshot {
    pub fn new(id: impl Into<String>, name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            server: server.into(),
            currency: "USD".to_string(),
            balance: 0.0,
            equity: 0.0,
            platform: None,
        }
    }
}

/// Full snapshot pushed by an inbound MT5 terminal session. Richer than
/// `AccountSnapshot` because the terminal reports margin state too.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalAccount {
    pub login: i64,
    pub name: String,
    pub server: String,
    pub currency: String,
    pub leverage: i64,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    #[serde(rename = "freeMargin")]
    pub free_margin: f64,
    #[serde(rename = "marginLevel")]
    pub margin_level: f64,
}
