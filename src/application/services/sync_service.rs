//! Sync orchestration: credential sync and per-broker API sync.
//!
//! The credential path takes a terminal login straight from the request,
//! connects through the matching connector, pulls history and hands every
//! trade to the reconciler. Attempts are bounded per client IP so a script
//! cannot burn a broker's session budget with bad passwords. The per-broker
//! path syncs a stored Binance account by API key and persists the status
//! transition on the broker row.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::services::reconciler::{ImportSummary, ReconcileError, TradeReconciler};
use crate::config::AppConfig;
use crate::domain::entities::account::AccountSnapshot;
use crate::domain::entities::broker::{Broker, BrokerStatus};
use crate::domain::entities::platform::Platform;
use crate::domain::errors::ConnectorError;
use crate::domain::services::conversion::ImportOrigin;
use crate::infrastructure::connector_factory::{ConnectorCredentials, ConnectorFactory};
use crate::persistence::repository::BrokerRepository;
use crate::persistence::{DatabaseError, DbPool};
use crate::rate_limit::ConnectionRateLimiter;

/// How far back a sync reaches when the caller gives no start date.
const DEFAULT_HISTORY_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Too many sync attempts, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("{0}")]
    Validation(String),

    #[error("Broker not found: {0}")]
    BrokerNotFound(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Credential sync input as received from the HTTP layer.
#[derive(Debug, Clone)]
pub struct CredentialSyncRequest {
    pub platform: Platform,
    pub server: String,
    pub login: String,
    pub password: String,
    pub start_date: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CredentialSyncOutcome {
    pub account: Option<AccountSnapshot>,
    pub summary: ImportSummary,
}

#[derive(Debug)]
pub struct BrokerSyncOutcome {
    pub summary: ImportSummary,
}

pub struct SyncService {
    config: AppConfig,
    brokers: BrokerRepository,
    reconciler: Arc<TradeReconciler>,
    sync_limiter: ConnectionRateLimiter,
}

impl SyncService {
    pub fn new(config: AppConfig, pool: DbPool, reconciler: Arc<TradeReconciler>) -> Self {
        let sync_limiter =
            ConnectionRateLimiter::new(config.sync_max_attempts, config.sync_window());
        Self {
            config,
            brokers: BrokerRepository::new(pool),
            reconciler,
            sync_limiter,
        }
    }

    /// Attempts left for a caller before the window closes.
    pub fn remaining_attempts(&self, client_ip: &str) -> u32 {
        self.sync_limiter.remaining_attempts(&sync_key(client_ip))
    }

    /// Connect with caller-supplied terminal credentials, pull history and
    /// import it. One attempt is consumed per call, allowed or not.
    pub async fn credential_sync(
        &self,
        user_id: &str,
        client_ip: &str,
        request: &CredentialSyncRequest,
    ) -> Result<CredentialSyncOutcome, SyncError> {
        let key = sync_key(client_ip);
        if !self.sync_limiter.check(&key) {
            let retry_after = self.sync_limiter.time_until_reset(&key);
            warn!("Sync rate limit hit for {}", client_ip);
            return Err(SyncError::RateLimited { retry_after });
        }

        validate_credentials(request)?;

        let credentials = ConnectorCredentials {
            login: Some(request.login.clone()),
            password: Some(request.password.clone()),
            server: Some(request.server.clone()),
            ..Default::default()
        };
        let connector = ConnectorFactory::create(request.platform, &credentials, &self.config)?;

        connector.connect().await?;

        let to = Utc::now();
        let from = request
            .start_date
            .unwrap_or_else(|| to - ChronoDuration::days(DEFAULT_HISTORY_DAYS));

        let result = async {
            let mut events = connector.subscribe_events();
            let mut trades = connector.request_trade_history(from, to).await?;

            // Socket bridges answer a history request with pushed events
            // instead of a direct reply, so give them a drain window.
            if matches!(request.platform, Platform::Mt4 | Platform::NinjaTrader) {
                drain_trade_events(&mut events, &mut trades, Duration::from_secs(3)).await;
            }

            let summary = self
                .reconciler
                .import_batch(user_id, None, &trades, ImportOrigin::Sync)
                .await?;
            Ok::<ImportSummary, SyncError>(summary)
        }
        .await;

        let account = connector.account_info().await;
        connector.disconnect().await;

        let summary = result?;
        info!(
            "Credential sync for {} on {}: {} imported, {} skipped of {}",
            request.login, request.server, summary.imported, summary.skipped, summary.total
        );

        Ok(CredentialSyncOutcome { account, summary })
    }

    /// Sync a stored broker account through its API-key connector. Only
    /// Binance has that path; terminal platforms sync by credential instead.
    pub async fn sync_broker(
        &self,
        user_id: &str,
        broker_id: &str,
    ) -> Result<BrokerSyncOutcome, SyncError> {
        let broker = self.get_broker(user_id, broker_id).await?;

        if broker.platform != Platform::Binance {
            return Err(SyncError::Validation(format!(
                "API sync is not available for {}; use credential sync instead",
                broker.platform
            )));
        }
        if !broker.has_api_credentials() {
            return Err(SyncError::Validation(
                "Broker has no API key/secret configured".to_string(),
            ));
        }

        self.brokers
            .update_status(broker_id, BrokerStatus::Connecting.as_str())
            .await?;

        match self.run_broker_sync(user_id, &broker).await {
            Ok(summary) => {
                self.brokers
                    .update_status(broker_id, BrokerStatus::Connected.as_str())
                    .await?;
                self.brokers.touch_last_sync(broker_id, Utc::now()).await?;
                info!(
                    "Broker {} synced: {} imported, {} skipped of {}",
                    broker_id, summary.imported, summary.skipped, summary.total
                );
                Ok(BrokerSyncOutcome { summary })
            }
            Err(e) => {
                warn!("Broker {} sync failed: {}", broker_id, e);
                self.brokers
                    .update_status(broker_id, BrokerStatus::Error.as_str())
                    .await?;
                Err(e)
            }
        }
    }

    /// Drive a fresh `connect()` for a stored broker and persist the
    /// resulting status. Returns the status the broker ended up in.
    pub async fn reconnect_broker(
        &self,
        user_id: &str,
        broker_id: &str,
    ) -> Result<BrokerStatus, SyncError> {
        let broker = self.get_broker(user_id, broker_id).await?;

        self.brokers
            .update_status(broker_id, BrokerStatus::Connecting.as_str())
            .await?;

        let credentials = ConnectorCredentials::from_broker(&broker);
        let attempt = async {
            let connector = ConnectorFactory::create(broker.platform, &credentials, &self.config)?;
            connector.connect().await?;
            connector.disconnect().await;
            Ok::<(), SyncError>(())
        }
        .await;

        let status = match attempt {
            Ok(()) => BrokerStatus::Connected,
            Err(e) => {
                warn!("Broker {} reconnect failed: {}", broker_id, e);
                BrokerStatus::Error
            }
        };
        self.brokers
            .update_status(broker_id, status.as_str())
            .await?;
        Ok(status)
    }

    async fn get_broker(&self, user_id: &str, broker_id: &str) -> Result<Broker, SyncError> {
        let record = self
            .brokers
            .get(broker_id, user_id)
            .await?
            .ok_or_else(|| SyncError::BrokerNotFound(broker_id.to_string()))?;
        Broker::try_from(record).map_err(SyncError::Validation)
    }

    async fn run_broker_sync(
        &self,
        user_id: &str,
        broker: &Broker,
    ) -> Result<ImportSummary, SyncError> {
        let credentials = ConnectorCredentials::from_broker(broker);
        let connector = ConnectorFactory::create(broker.platform, &credentials, &self.config)?;

        connector.connect().await?;

        let to = Utc::now();
        let from = to - ChronoDuration::days(DEFAULT_HISTORY_DAYS);
        let result = async {
            let trades = connector.request_trade_history(from, to).await?;
            let summary = self
                .reconciler
                .import_batch(user_id, Some(&broker.id), &trades, ImportOrigin::Sync)
                .await?;
            Ok::<ImportSummary, SyncError>(summary)
        }
        .await;

        connector.disconnect().await;
        result
    }
}

/// Collects TradeClosed events until the stream stays quiet for `idle`.
async fn drain_trade_events(
    events: &mut tokio::sync::broadcast::Receiver<crate::domain::repositories::platform_connector::ConnectorEvent>,
    trades: &mut Vec<crate::domain::entities::trade::CanonicalTrade>,
    idle: Duration,
) {
    use crate::domain::repositories::platform_connector::ConnectorEvent;

    loop {
        match tokio::time::timeout(idle, events.recv()).await {
            Ok(Ok(ConnectorEvent::TradeClosed(trade))) => trades.push(trade),
            Ok(Ok(_)) => continue,
            Ok(Err(_)) | Err(_) => break,
        }
    }
}

fn sync_key(client_ip: &str) -> String {
    format!("broker_sync_{}", client_ip)
}

/// Terminal credential sanity checks, applied before any network call.
fn validate_credentials(request: &CredentialSyncRequest) -> Result<(), SyncError> {
    let login_ok = (6..=10).contains(&request.login.len())
        && request.login.bytes().all(|b| b.is_ascii_digit());
    if !login_ok {
        return Err(SyncError::Validation(
            "Login must be a 6-10 digit account number".to_string(),
        ));
    }

    let server_ok = !request.server.is_empty()
        && request
            .server
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.');
    if !server_ok {
        return Err(SyncError::Validation(
            "Server name may only contain letters, digits, '-' and '.'".to_string(),
        ));
    }

    if request.password.len() < 6 {
        return Err(SyncError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }

    Ok(())
}
