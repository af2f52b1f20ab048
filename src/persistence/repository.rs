//! Database Repository
//!
//! Data access layer for journal trades and broker accounts.

use super::models::*;
use super::{DatabaseError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, error};

/// Journal trade repository
pub struct TradeRepository {
    pool: DbPool,
}

impl TradeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new trade
    pub async fn create(&self, trade: NewTrade) -> Result<TradeRecord, DatabaseError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, TradeRecord>(
            r#"
            INSERT INTO trades (
                id, user_id, broker_id, date, symbol, side, qty,
                entry_price, exit_price, entry_time, fees, strategy,
                notes, tags, external_id, platform, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)
            RETURNING *
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.user_id)
        .bind(&trade.broker_id)
        .bind(trade.date)
        .bind(&trade.symbol)
        .bind(&trade.side)
        .bind(trade.qty)
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.entry_time)
        .bind(trade.fees)
        .bind(&trade.strategy)
        .bind(&trade.notes)
        .bind(&trade.tags)
        .bind(&trade.external_id)
        .bind(&trade.platform)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create trade: {}", e);
            DatabaseError::QueryError(format!("Failed to create trade: {}", e))
        })?;

        debug!("Created trade: {} for {}", record.id, record.symbol);
        Ok(record)
    }

    /// Find an already-imported trade by its dedup identity.
    ///
    /// Exact match on (user, platform, external id), additionally scoped to
    /// one broker account when `broker_id` is given.
    pub async fn find_duplicate(
        &self,
        user_id: &str,
        broker_id: Option<&str>,
        platform: &str,
        external_id: &str,
    ) -> Result<Option<TradeRecord>, DatabaseError> {
        let query = match broker_id {
            Some(_) => {
                "SELECT * FROM trades
                 WHERE user_id = ?1 AND platform = ?2 AND external_id = ?3 AND broker_id = ?4
                 LIMIT 1"
            }
            None => {
                "SELECT * FROM trades
                 WHERE user_id = ?1 AND platform = ?2 AND external_id = ?3
                 LIMIT 1"
            }
        };

        let mut q = sqlx::query_as::<_, TradeRecord>(query)
            .bind(user_id)
            .bind(platform)
            .bind(external_id);
        if let Some(broker_id) = broker_id {
            q = q.bind(broker_id);
        }

        let record = q.fetch_optional(&self.pool).await.map_err(|e| {
            error!("Failed to look up duplicate trade {}: {}", external_id, e);
            DatabaseError::QueryError(format!("Failed to look up duplicate: {}", e))
        })?;

        Ok(record)
    }

    /// Get recent trades for a user (last N by journal date)
    pub async fn get_recent(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<TradeRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE user_id = ?1 ORDER BY date DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get recent trades: {}", e);
            DatabaseError::QueryError(format!("Failed to get recent trades: {}", e))
        })?;

        Ok(records)
    }

    /// Count trades attached to a broker account
    pub async fn count_for_broker(&self, broker_id: &str) -> Result<i64, DatabaseError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM trades WHERE broker_id = ?1")
            .bind(broker_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to count trades for broker {}: {}", broker_id, e);
                DatabaseError::QueryError(format!("Failed to count trades: {}", e))
            })?;

        let count: i64 = row.get("count");
        Ok(count)
    }
}

/// Broker account repository
pub struct BrokerRepository {
    pool: DbPool,
}

impl BrokerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a new broker account
    pub async fn create(&self, broker: NewBroker) -> Result<BrokerRecord, DatabaseError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, BrokerRecord>(
            r#"
            INSERT INTO brokers (
                id, user_id, name, platform, account_id, server, username,
                password, api_key, api_secret, currency, leverage, company,
                status, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'disconnected', ?14, ?14)
            RETURNING *
            "#,
        )
        .bind(&broker.id)
        .bind(&broker.user_id)
        .bind(&broker.name)
        .bind(&broker.platform)
        .bind(&broker.account_id)
        .bind(&broker.server)
        .bind(&broker.username)
        .bind(&broker.password)
        .bind(&broker.api_key)
        .bind(&broker.api_secret)
        .bind(&broker.currency)
        .bind(broker.leverage)
        .bind(&broker.company)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create broker: {}", e);
            DatabaseError::QueryError(format!("Failed to create broker: {}", e))
        })?;

        debug!("Created broker: {} ({})", record.name, record.id);
        Ok(record)
    }

    /// Get a broker by ID, scoped to its owner
    pub async fn get(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<BrokerRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, BrokerRecord>(
            "SELECT * FROM brokers WHERE id = ?1 AND user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get broker {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to get broker: {}", e))
        })?;

        Ok(record)
    }

    /// List a user's brokers, newest first
    pub async fn list(&self, user_id: &str) -> Result<Vec<BrokerRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, BrokerRecord>(
            "SELECT * FROM brokers WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list brokers: {}", e);
            DatabaseError::QueryError(format!("Failed to list brokers: {}", e))
        })?;

        Ok(records)
    }

    /// Find another broker registered for the same platform account.
    ///
    /// Used to reject duplicate registrations; `exclude_id` skips the broker
    /// being edited during updates.
    pub async fn find_by_account(
        &self,
        user_id: &str,
        platform: &str,
        account_id: &str,
        exclude_id: Option<&str>,
    ) -> Result<Option<BrokerRecord>, DatabaseError> {
        let query = match exclude_id {
            Some(_) => {
                "SELECT * FROM brokers
                 WHERE user_id = ?1 AND platform = ?2 AND account_id = ?3 AND id != ?4
                 LIMIT 1"
            }
            None => {
                "SELECT * FROM brokers
                 WHERE user_id = ?1 AND platform = ?2 AND account_id = ?3
                 LIMIT 1"
            }
        };

        let mut q = sqlx::query_as::<_, BrokerRecord>(query)
            .bind(user_id)
            .bind(platform)
            .bind(account_id);
        if let Some(exclude_id) = exclude_id {
            q = q.bind(exclude_id);
        }

        let record = q.fetch_optional(&self.pool).await.map_err(|e| {
            error!("Failed to look up broker account {}: {}", account_id, e);
            DatabaseError::QueryError(format!("Failed to look up broker account: {}", e))
        })?;

        Ok(record)
    }

    /// Replace a broker's editable fields
    pub async fn update(
        &self,
        id: &str,
        update: UpdateBroker,
    ) -> Result<BrokerRecord, DatabaseError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, BrokerRecord>(
            r#"
            UPDATE brokers
            SET name = ?1, platform = ?2, account_id = ?3, server = ?4,
                username = ?5, password = ?6, api_key = ?7, api_secret = ?8,
                currency = ?9, leverage = ?10, company = ?11, updated_at = ?12
            WHERE id = ?13
            RETURNING *
            "#,
        )
        .bind(&update.name)
        .bind(&update.platform)
        .bind(&update.account_id)
        .bind(&update.server)
        .bind(&update.username)
        .bind(&update.password)
        .bind(&update.api_key)
        .bind(&update.api_secret)
        .bind(&update.currency)
        .bind(update.leverage)
        .bind(&update.company)
        .bind(now)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update broker {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to update broker: {}", e))
        })?;

        debug!("Updated broker: {}", id);
        Ok(record)
    }

    /// Set a broker's connection status
    pub async fn update_status(&self, id: &str, status: &str) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let rows_affected = sqlx::query(
            "UPDATE brokers SET status = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update broker status {}: {}", id, e);
            DatabaseError::QueryError(format!("Failed to update broker status: {}", e))
        })?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!(
                "Broker not found: {}",
                id
            )));
        }

        debug!("Broker {} status -> {}", id, status);
        Ok(())
    }

    /// Record the time of the last synchronization attempt
    pub async fn touch_last_sync(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE brokers SET last_sync = ?1, updated_at = ?1 WHERE id = ?2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to touch last_sync for {}: {}", id, e);
                DatabaseError::QueryError(format!("Failed to touch last_sync: {}", e))
            })?;

        Ok(())
    }

    /// Delete a broker; its trades stay behind with broker_id detached
    pub async fn delete(&self, id: &str) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query("DELETE FROM brokers WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete broker {}: {}", id, e);
                DatabaseError::QueryError(format!("Failed to delete broker: {}", e))
            })?
            .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!(
                "Broker not found: {}",
                id
            )));
        }

        debug!("Deleted broker: {}", id);
        Ok(())
    }
}
