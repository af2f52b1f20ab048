use chrono::{DateTime, Utc};

use crate::domain::entities::platform::Platform;

/// Broker connection lifecycle as persisted on the brokers table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl BrokerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerStatus::Disconnected => "disconnected",
            BrokerStatus::Connecting => "connecting",
            BrokerStatus::Connected => "connected",
            BrokerStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> BrokerStatus {
        match s {
            "connecting" => BrokerStatus::Connecting,
            "connected" => BrokerStatus::Connected,
            "error" => BrokerStatus::Error,
            _ => BrokerStatus::Disconnected,
        }
    }
}

impl std::fmt::Display for BrokerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A configured broker account a user syncs trades from.
///
/// One row per (user, platform, account number). Credentials are stored per
/// transport: api_key/api_secret for signed REST platforms, username/password
/// plus server for terminal session logins.
#[derive(Debug, Clone)]
pub struct Broker {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub platform: Platform,
    pub account_id: String,
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub currency: String,
    pub leverage: Option<i64>,
    pub company: Option<String>,
    pub status: BrokerStatus,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

impl Broker {
    pub fn has_api_credentials(&self) -> bool {
        filled(&self.api_key) && filled(&self.api_secret)
    }

    pub fn has_terminal_credentials(&self) -> bool {
        filled(&self.username) && filled(&self.password) && filled(&self.server)
    }
}
