//! Trade reconciliation: the single write path for imported trades.
//!
//! Every connector, file upload and terminal push funnels through here.
//! A trade is validated, checked against already-imported trades by its
//! (user, platform, external id) identity, then persisted with the shared
//! journal conversion applied. The duplicate check and the insert run under
//! one lock so two imports of the same trade cannot interleave.

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::entities::trade::CanonicalTrade;
use crate::domain::errors::TradeValidationError;
use crate::domain::services::conversion::{self, ImportOrigin, JournalEntry};
use crate::persistence::models::{NewTrade, TradeRecord};
use crate::persistence::repository::TradeRepository;
use crate::persistence::{DatabaseError, DbPool};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Invalid trade: {0}")]
    Invalid(#[from] TradeValidationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// What happened to one offered trade.
#[derive(Debug)]
pub enum ImportOutcome {
    Imported(TradeRecord),
    /// An identical trade already exists; nothing was written.
    Duplicate(TradeRecord),
}

/// Batch result, reported back to sync callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub total: usize,
}

pub struct TradeReconciler {
    trades: TradeRepository,
    import_lock: Mutex<()>,
}

impl TradeReconciler {
    pub fn new(pool: DbPool) -> Self {
        Self {
            trades: TradeRepository::new(pool),
            import_lock: Mutex::new(()),
        }
    }

    /// Import one trade using the standard journal conversion for `origin`.
    pub async fn import_trade(
        &self,
        user_id: &str,
        broker_id: Option<&str>,
        trade: &CanonicalTrade,
        origin: ImportOrigin,
    ) -> Result<ImportOutcome, ReconcileError> {
        let entry = conversion::to_journal_entry(trade, origin);
        self.import_with_entry(user_id, broker_id, trade, &entry)
            .await
    }

    /// Import one trade with a caller-built journal entry. Used by the
    /// terminal ingest path, whose notes and tags also carry the server.
    pub async fn import_with_entry(
        &self,
        user_id: &str,
        broker_id: Option<&str>,
        trade: &CanonicalTrade,
        entry: &JournalEntry,
    ) -> Result<ImportOutcome, ReconcileError> {
        trade.validate()?;

        let platform = trade.platform.name();
        let _guard = self.import_lock.lock().await;

        if let Some(existing) = self
            .trades
            .find_duplicate(user_id, broker_id, platform, &trade.external_id)
            .await?
        {
            debug!(
                "Duplicate trade detected, skipping: {} {}",
                platform, trade.external_id
            );
            return Ok(ImportOutcome::Duplicate(existing));
        }

        let record = self
            .trades
            .create(NewTrade {
                id: new_trade_id(),
                user_id: user_id.to_string(),
                broker_id: broker_id.map(|id| id.to_string()),
                date: entry.date,
                symbol: trade.symbol.clone(),
                side: trade.side.as_str().to_string(),
                qty: trade.quantity,
                entry_price: trade.entry_price,
                exit_price: trade.exit_price,
                entry_time: Some(trade.entry_time),
                fees: entry.fees,
                strategy: Some(entry.strategy.clone()),
                notes: Some(entry.notes.clone()),
                tags: Some(entry.tags.clone()),
                external_id: Some(trade.external_id.clone()),
                platform: Some(platform.to_string()),
            })
            .await?;

        info!(
            "Trade imported: {} {} {} @ {}",
            platform, trade.symbol, trade.external_id, record.id
        );
        Ok(ImportOutcome::Imported(record))
    }

    /// Import a batch, counting duplicates and invalid rows as skipped.
    pub async fn import_batch(
        &self,
        user_id: &str,
        broker_id: Option<&str>,
        trades: &[CanonicalTrade],
        origin: ImportOrigin,
    ) -> Result<ImportSummary, ReconcileError> {
        let mut summary = ImportSummary {
            total: trades.len(),
            ..Default::default()
        };

        for trade in trades {
            match self.import_trade(user_id, broker_id, trade, origin).await {
                Ok(ImportOutcome::Imported(_)) => summary.imported += 1,
                Ok(ImportOutcome::Duplicate(_)) => summary.skipped += 1,
                Err(ReconcileError::Invalid(e)) => {
                    warn!(
                        "Skipping invalid trade {} {}: {}",
                        trade.platform.name(),
                        trade.external_id,
                        e
                    );
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }
}

fn new_trade_id() -> String {
    format!(
        "trade_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::platform::Platform;
    use crate::domain::entities::trade::TradeSide;
    use crate::persistence::init_database;
    use chrono::{TimeZone, Utc};

    fn trade(external_id: &str, platform: Platform) -> CanonicalTrade {
        CanonicalTrade {
            external_id: external_id.to_string(),
            symbol: "EURUSD".to_string(),
            side: TradeSide::Long,
            quantity: 0.1,
            entry_price: 1.1000,
            exit_price: 1.1050,
            entry_time: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            exit_time: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            profit: 50.0,
            commission: -7.0,
            swap: 0.0,
            fee: 0.0,
            comment: None,
            platform,
        }
    }

    #[tokio::test]
    async fn test_second_import_is_a_duplicate() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let reconciler = TradeReconciler::new(pool);

        let t = trade("1001", Platform::Mt4);
        let first = reconciler
            .import_trade("demo", None, &t, ImportOrigin::Sync)
            .await
            .unwrap();
        assert!(matches!(first, ImportOutcome::Imported(_)));

        let second = reconciler
            .import_trade("demo", None, &t, ImportOrigin::Sync)
            .await
            .unwrap();
        match second {
            ImportOutcome::Duplicate(existing) => {
                assert_eq!(existing.external_id.as_deref(), Some("1001"));
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_same_ticket_different_platform_both_import() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let reconciler = TradeReconciler::new(pool);

        let mt4 = trade("1001", Platform::Mt4);
        let mt5 = trade("1001", Platform::Mt5);
        let summary = reconciler
            .import_batch(
                "demo",
                None,
                &[mt4, mt5],
                ImportOrigin::Sync,
            )
            .await
            .unwrap();

        assert_eq!(summary.imported, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.total, 2);
    }

    #[tokio::test]
    async fn test_batch_counts_duplicates_and_invalid_as_skipped() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let reconciler = TradeReconciler::new(pool);

        let good = trade("2001", Platform::Mt5);
        let dup = trade("2001", Platform::Mt5);
        let mut invalid = trade("2002", Platform::Mt5);
        invalid.quantity = 0.0;

        let summary = reconciler
            .import_batch("demo", None, &[good, dup, invalid], ImportOrigin::Sync)
            .await
            .unwrap();

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.total, 3);
    }

    #[tokio::test]
    async fn test_persisted_record_carries_journal_fields() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let reconciler = TradeReconciler::new(pool);

        let mut t = trade("3001", Platform::Mt4);
        t.comment = Some("news spike".to_string());

        let outcome = reconciler
            .import_trade("demo", None, &t, ImportOrigin::Sync)
            .await
            .unwrap();
        let record = match outcome {
            ImportOutcome::Imported(record) => record,
            other => panic!("expected import, got {:?}", other),
        };

        assert_eq!(record.date, t.exit_time);
        assert_eq!(record.entry_time, Some(t.entry_time));
        assert_eq!(record.side, "LONG");
        assert!((record.fees - 7.0).abs() < 1e-9);
        assert_eq!(record.strategy.as_deref(), Some("MT4 Auto Import"));
        assert_eq!(
            record.notes.as_deref(),
            Some("MT4 Ticket: 3001 - news spike")
        );
        assert_eq!(record.tags.as_deref(), Some("mt4,auto-import"));
        assert_eq!(record.platform.as_deref(), Some("mt4"));
    }

    #[tokio::test]
    async fn test_broker_scoped_dedup_ignores_unattached_twin() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let reconciler = TradeReconciler::new(pool);

        let t = trade("4001", Platform::Binance);
        reconciler
            .import_trade("demo", None, &t, ImportOrigin::Sync)
            .await
            .unwrap();

        // Same identity but scoped to a broker account: not a duplicate.
        let outcome = reconciler
            .import_trade("demo", Some("broker-1"), &t, ImportOrigin::Sync)
            .await
            .unwrap();
        assert!(matches!(outcome, ImportOutcome::Imported(_)));
    }
}
