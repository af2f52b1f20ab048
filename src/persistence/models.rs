//! Database Models
//!
//! Persistent data structures for journal trades and broker accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::entities::broker::{Broker, BrokerStatus};
use crate::domain::entities::platform::Platform;

/// Journal trade record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: String,
    pub broker_id: Option<String>,
    pub date: DateTime<Utc>,
    pub symbol: String,
    pub side: String, // "LONG" or "SHORT"
    pub qty: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: Option<DateTime<Utc>>,
    pub fees: f64,
    pub risk: Option<f64>,
    pub strategy: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<String>,
    pub external_id: Option<String>,
    pub platform: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Realized P&L recomputed from prices, never trusted from the platform.
    pub fn pnl(&self) -> f64 {
        let direction = if self.side == "LONG" { 1.0 } else { -1.0 };
        let gross = (self.exit_price - self.entry_price) * self.qty * direction;
        gross - self.fees
    }
}

/// Broker account record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BrokerRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub platform: String,
    pub account_id: String,
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub currency: String,
    pub leverage: Option<i64>,
    pub company: Option<String>,
    pub status: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BrokerRecord> for Broker {
    type Error = String;

    fn try_from(record: BrokerRecord) -> Result<Self, Self::Error> {
        let platform: Platform = record.platform.parse()?;
        Ok(Broker {
            id: record.id,
            user_id: record.user_id,
            name: record.name,
            platform,
            account_id: record.account_id,
            server: record.server,
            username: record.username,
            password: record.password,
            api_key: record.api_key,
            api_secret: record.api_secret,
            currency: record.currency,
            leverage: record.leverage,
            company: record.company,
            status: BrokerStatus::parse(&record.status),
            last_sync: record.last_sync,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Create trade input
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub id: String,
    pub user_id: String,
    pub broker_id: Option<String>,
    pub date: DateTime<Utc>,
    pub symbol: String,
    pub side: String,
    pub qty: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: Option<DateTime<Utc>>,
    pub fees: f64,
    pub strategy: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<String>,
    pub external_id: Option<String>,
    pub platform: Option<String>,
}

/// Create broker input
#[derive(Debug, Clone)]
pub struct NewBroker {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub platform: String,
    pub account_id: String,
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub currency: String,
    pub leverage: Option<i64>,
    pub company: Option<String>,
}

/// Update broker input (full replace of editable fields)
#[derive(Debug, Clone)]
pub struct UpdateBroker {
    pub name: String,
    pub platform: String,
    pub account_id: String,
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub currency: String,
    pub leverage: Option<i64>,
    pub company: Option<String>,
}
