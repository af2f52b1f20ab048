//! cTrader connector (REST polling).
//!
//! No persistent socket: `connect` verifies the access token against the
//! account endpoint, then a background task re-fetches the trailing hour of
//! closed positions on a fixed cadence and pushes anything it finds as
//! TradeClosed events. The poll runs inside one task, so a slow fetch can
//! never overlap the next one; overrun ticks are skipped.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::entities::account::AccountSnapshot;
use crate::domain::entities::platform::Platform;
use crate::domain::entities::trade::{CanonicalTrade, TradeSide};
use crate::domain::errors::ConnectorError;
use crate::domain::repositories::platform_connector::{
    ConnectorEvent, ConnectorResult, PlatformConnector, PlatformStatus,
};

const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct CTraderConnectorConfig {
    pub api_base: String,
    pub access_token: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
}

struct CTraderShared {
    connected: Mutex<bool>,
    account: Mutex<Option<AccountSnapshot>>,
    last_error: Mutex<Option<String>>,
    events: broadcast::Sender<ConnectorEvent>,
}

pub struct CTraderConnector {
    config: CTraderConnectorConfig,
    client: reqwest::Client,
    shared: Arc<CTraderShared>,
    poll_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CTraderConnector {
    pub fn new(config: CTraderConnectorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            shared: Arc::new(CTraderShared {
                connected: Mutex::new(false),
                account: Mutex::new(None),
                last_error: Mutex::new(None),
                events,
            }),
            poll_task: Mutex::new(None),
        }
    }

    async fn spawn_poller(&self) {
        let shared = self.shared.clone();
        let client = self.client.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately

            loop {
                ticker.tick().await;
                let to = Utc::now();
                let from = to - ChronoDuration::hours(1);

                match fetch_history(&client, &config, from, to).await {
                    Ok(trades) => {
                        for trade in trades {
                            let _ = shared.events.send(ConnectorEvent::TradeClosed(trade));
                        }
                    }
                    Err(e) => {
                        warn!("cTrader connector: poll failed: {}", e);
                        *shared.last_error.lock().await = Some(e.to_string());
                    }
                }
            }
        });

        if let Some(previous) = self.poll_task.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn status_snapshot(&self) -> PlatformStatus {
        PlatformStatus {
            connected: *self.shared.connected.lock().await,
            platform: Platform::CTrader,
            last_update: Utc::now(),
            error: self.shared.last_error.lock().await.clone(),
        }
    }
}

#[async_trait]
impl PlatformConnector for CTraderConnector {
    fn platform(&self) -> Platform {
        Platform::CTrader
    }

    async fn connect(&self) -> ConnectorResult<bool> {
        if self.config.access_token.is_empty() {
            return Err(ConnectorError::Validation(
                "cTrader access token is required".to_string(),
            ));
        }

        let response = match get(&self.client, &self.config, "/v3/accounts/me", &[]).await {
            Ok(response) => response,
            Err(e) => {
                *self.shared.last_error.lock().await = Some(e.to_string());
                return Err(e);
            }
        };

        let snapshot = parse_account(&response["data"]);
        info!("cTrader connector: connected as {}", snapshot.name);
        *self.shared.account.lock().await = Some(snapshot.clone());
        *self.shared.connected.lock().await = true;
        *self.shared.last_error.lock().await = None;

        let _ = self
            .shared
            .events
            .send(ConnectorEvent::AccountUpdated(snapshot));
        let _ = self
            .shared
            .events
            .send(ConnectorEvent::StatusChanged(self.status_snapshot().await));

        self.spawn_poller().await;
        Ok(true)
    }

    async fn disconnect(&self) {
        if let Some(task) = self.poll_task.lock().await.take() {
            task.abort();
        }

        let mut connected = self.shared.connected.lock().await;
        if *connected {
            *connected = false;
            drop(connected);
            let _ = self
                .shared
                .events
                .send(ConnectorEvent::StatusChanged(self.status_snapshot().await));
        }
    }

    async fn request_trade_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ConnectorResult<Vec<CanonicalTrade>> {
        if !*self.shared.connected.lock().await {
            return Err(ConnectorError::Connection(
                "cTrader connector is not connected".to_string(),
            ));
        }
        fetch_history(&self.client, &self.config, from, to).await
    }

    async fn account_info(&self) -> Option<AccountSnapshot> {
        self.shared.account.lock().await.clone()
    }

    async fn status(&self) -> PlatformStatus {
        self.status_snapshot().await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.shared.events.subscribe()
    }
}

async fn get(
    client: &reqwest::Client,
    config: &CTraderConnectorConfig,
    endpoint: &str,
    query: &[(&str, String)],
) -> ConnectorResult<Value> {
    let url = format!("{}{}", config.api_base, endpoint);
    let response = client
        .get(&url)
        .bearer_auth(&config.access_token)
        .query(query)
        .send()
        .await
        .map_err(ConnectorError::from)?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ConnectorError::Authentication(format!(
            "cTrader rejected the access token ({})",
            status.as_u16()
        )));
    }
    if !status.is_success() {
        return Err(ConnectorError::Connection(format!(
            "cTrader API error {}",
            status.as_u16()
        )));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ConnectorError::MessageParse(e.to_string()))
}

async fn fetch_history(
    client: &reqwest::Client,
    config: &CTraderConnectorConfig,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> ConnectorResult<Vec<CanonicalTrade>> {
    let response = get(
        client,
        config,
        "/v3/accounts/me/positions/history",
        &[("from", from.to_rfc3339()), ("to", to.to_rfc3339())],
    )
    .await?;

    let positions = match response["data"].as_array() {
        Some(positions) => positions,
        None => return Ok(Vec::new()),
    };

    Ok(positions.iter().filter_map(parse_position).collect())
}

fn parse_account(data: &Value) -> AccountSnapshot {
    let id = match &data["id"] {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => "ctrader".to_string(),
    };
    let mut snapshot = AccountSnapshot::new(
        id.clone(),
        data["name"].as_str().unwrap_or(&id),
        data["server"].as_str().unwrap_or("cTrader"),
    );
    if let Some(currency) = data["currency"].as_str() {
        snapshot.currency = currency.to_string();
    }
    snapshot.balance = data["balance"].as_f64().unwrap_or(0.0);
    snapshot.equity = data["equity"].as_f64().unwrap_or(0.0);
    snapshot.platform = Some(Platform::CTrader);
    snapshot
}

/// Closed position from the history endpoint. Volume comes in base units of
/// 100,000 per lot; commission and swap are folded into one cost figure the
/// way the platform reports them together.
fn parse_position(data: &Value) -> Option<CanonicalTrade> {
    let external_id = match &data["id"] {
        Value::Number(n) => n.to_string(),
        Value::String(s) if !s.is_empty() => s.clone(),
        _ => return None,
    };

    let entry_time = parse_ctrader_time(&data["createTime"])?;
    let exit_time = parse_ctrader_time(&data["closeTime"])?;

    Some(CanonicalTrade {
        external_id,
        symbol: data["symbol"].as_str()?.to_string(),
        side: TradeSide::from_action(data["side"].as_str().unwrap_or("")),
        quantity: data["volume"].as_f64()? / 100_000.0,
        entry_price: data["entryPrice"].as_f64()?,
        exit_price: data["closePrice"].as_f64()?,
        entry_time,
        exit_time,
        profit: data["grossProfit"].as_f64().unwrap_or(0.0),
        commission: data["commission"].as_f64().unwrap_or(0.0)
            + data["swap"].as_f64().unwrap_or(0.0),
        swap: 0.0,
        fee: 0.0,
        comment: data["comment"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()),
        platform: Platform::CTrader,
    })
}

/// Timestamps arrive as ISO-8601 strings, occasionally as ms epochs.
fn parse_ctrader_time(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(text) = value.as_str() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Some(parsed.with_timezone(&Utc));
        }
        debug!("cTrader connector: unparseable timestamp: {}", text);
        return None;
    }
    value
        .as_i64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn position() -> Value {
        json!({
            "id": 7711001,
            "symbol": "EURUSD",
            "side": "BUY",
            "volume": 10000.0,
            "entryPrice": 1.0850,
            "closePrice": 1.0875,
            "createTime": "2024-01-01T09:00:00Z",
            "closeTime": "2024-01-01T10:00:00Z",
            "grossProfit": 25.0,
            "commission": -0.7,
            "swap": -0.3,
            "comment": "scalp"
        })
    }

    #[test]
    fn test_parse_position_converts_volume_to_lots() {
        let trade = parse_position(&position()).unwrap();
        assert_eq!(trade.external_id, "7711001");
        assert_eq!(trade.side, TradeSide::Long);
        assert!((trade.quantity - 0.1).abs() < 1e-9);
        assert_eq!(trade.entry_price, 1.0850);
        assert_eq!(trade.exit_price, 1.0875);
        assert_eq!(trade.profit, 25.0);
        // commission and swap fold into one platform-reported cost
        assert!((trade.commission - (-1.0)).abs() < 1e-9);
        assert_eq!(trade.swap, 0.0);
        assert_eq!(trade.comment.as_deref(), Some("scalp"));
        assert_eq!(trade.platform, Platform::CTrader);
    }

    #[test]
    fn test_parse_position_accepts_epoch_millis() {
        let mut value = position();
        value["createTime"] = json!(1_704_099_600_000i64);
        value["closeTime"] = json!(1_704_103_200_000i64);

        let trade = parse_position(&value).unwrap();
        assert_eq!(trade.entry_time.timestamp(), 1_704_099_600);
        assert_eq!(trade.exit_time.timestamp(), 1_704_103_200);
    }

    #[test]
    fn test_parse_position_rejects_missing_fields() {
        let value = json!({ "id": 1, "symbol": "EURUSD" });
        assert!(parse_position(&value).is_none());
    }

    #[test]
    fn test_parse_account_snapshot() {
        let data = json!({
            "id": 40112,
            "name": "Live Account",
            "currency": "EUR",
            "balance": 5000.0,
            "equity": 5100.0
        });

        let snapshot = parse_account(&data);
        assert_eq!(snapshot.id, "40112");
        assert_eq!(snapshot.name, "Live Account");
        assert_eq!(snapshot.server, "cTrader");
        assert_eq!(snapshot.currency, "EUR");
        assert_eq!(snapshot.platform, Some(Platform::CTrader));
    }

    #[tokio::test]
    async fn test_connect_requires_token() {
        let connector = CTraderConnector::new(CTraderConnectorConfig {
            api_base: "https://api.ctrader.invalid".to_string(),
            access_token: String::new(),
            request_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(30),
        });

        let err = connector.connect().await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_history_requires_connection() {
        let connector = CTraderConnector::new(CTraderConnectorConfig {
            api_base: "https://api.ctrader.invalid".to_string(),
            access_token: "token".to_string(),
            request_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(30),
        });

        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert!(connector.request_trade_history(from, to).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let connector = CTraderConnector::new(CTraderConnectorConfig {
            api_base: "https://api.ctrader.invalid".to_string(),
            access_token: "token".to_string(),
            request_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(30),
        });

        connector.disconnect().await;
        connector.disconnect().await;
        assert!(!connector.status().await.connected);
    }
}
