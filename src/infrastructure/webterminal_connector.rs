//! MT5 WebTerminal connector (REST polling).
//!
//! Alternate transport for MT5 accounts: a web terminal process exposes a
//! small HTTP API. `connect` pings the terminal, logs in for a session id,
//! then a background task asks for "new trades since watermark" every few
//! seconds. The watermark starts one minute back and advances to the newest
//! close time seen, so a trade is only pushed once. Polls run in one task
//! and overrun ticks are skipped, never run concurrently.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::domain::entities::account::AccountSnapshot;
use crate::domain::entities::platform::Platform;
use crate::domain::entities::trade::{CanonicalTrade, TradeSide};
use crate::domain::errors::ConnectorError;
use crate::domain::repositories::platform_connector::{
    ConnectorEvent, ConnectorResult, PlatformConnector, PlatformStatus,
};

const EVENT_CHANNEL_CAPACITY: usize = 100;
const INITIAL_WATERMARK_BACKOFF_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct WebTerminalConnectorConfig {
    pub api_base: String,
    pub login: i64,
    pub password: String,
    pub server: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
}

struct WebTerminalShared {
    connected: Mutex<bool>,
    session_id: Mutex<Option<String>>,
    account: Mutex<Option<AccountSnapshot>>,
    last_error: Mutex<Option<String>>,
    /// Unix-seconds close time of the newest trade already pushed.
    watermark: Mutex<i64>,
    events: broadcast::Sender<ConnectorEvent>,
}

pub struct WebTerminalConnector {
    config: WebTerminalConnectorConfig,
    client: reqwest::Client,
    shared: Arc<WebTerminalShared>,
    poll_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WebTerminalConnector {
    pub fn new(config: WebTerminalConnectorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            shared: Arc::new(WebTerminalShared {
                connected: Mutex::new(false),
                session_id: Mutex::new(None),
                account: Mutex::new(None),
                last_error: Mutex::new(None),
                watermark: Mutex::new(0),
                events,
            }),
            poll_task: Mutex::new(None),
        }
    }

    async fn authenticate(&self) -> ConnectorResult<String> {
        let url = format!("{}/api/auth", self.config.api_base);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "login": self.config.login,
                "password": self.config.password,
                "server": self.config.server,
            }))
            .send()
            .await
            .map_err(ConnectorError::from)?;

        let ok = response.status().is_success();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::MessageParse(e.to_string()))?;

        if !ok || body["success"].as_bool() != Some(true) {
            let message = body["message"]
                .as_str()
                .unwrap_or("WebTerminal rejected the login")
                .to_string();
            return Err(ConnectorError::Authentication(message));
        }

        body["sessionId"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ConnectorError::MessageParse("Auth response carried no session id".to_string())
            })
    }

    async fn fetch_account(&self, session_id: &str) -> Option<AccountSnapshot> {
        let url = format!("{}/api/account", self.config.api_base);
        let response = self
            .client
            .get(&url)
            .header("Session-Id", session_id)
            .send()
            .await
            .ok()?;
        let body: Value = response.json().await.ok()?;

        if body["success"].as_bool() != Some(true) {
            return None;
        }
        let account = &body["account"];
        let login = account["login"].as_i64()?;

        let mut snapshot = AccountSnapshot::new(
            login.to_string(),
            account["name"].as_str().unwrap_or(""),
            account["server"].as_str().unwrap_or(&self.config.server),
        );
        if let Some(currency) = account["currency"].as_str() {
            snapshot.currency = currency.to_string();
        }
        snapshot.balance = account["balance"].as_f64().unwrap_or(0.0);
        snapshot.equity = account["equity"].as_f64().unwrap_or(0.0);
        snapshot.platform = Some(Platform::Mt5);
        Some(snapshot)
    }

    async fn spawn_poller(&self, session_id: String) {
        let shared = self.shared.clone();
        let client = self.client.clone();
        let config = self.config.clone();
        *self.shared.watermark.lock().await =
            Utc::now().timestamp() - INITIAL_WATERMARK_BACKOFF_SECS;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let from = *shared.watermark.lock().await;

                match fetch_new_trades(&client, &config, &session_id, from).await {
                    Ok(trades) => {
                        let mut watermark = shared.watermark.lock().await;
                        for trade in trades {
                            *watermark = (*watermark).max(trade.exit_time.timestamp());
                            let _ = shared.events.send(ConnectorEvent::TradeClosed(trade));
                        }
                    }
                    Err(e) => {
                        warn!("WebTerminal connector: poll failed: {}", e);
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
            // Reports as MT5: the web terminal is a transport, not a platform.
            connected: *self.shared.connected.lock().await,
            platform: Platform::Mt5,
            last_update: Utc::now(),
            error: self.shared.last_error.lock().await.clone(),
        }
    }
}

#[async_trait]
impl PlatformConnector for WebTerminalConnector {
    fn platform(&self) -> Platform {
        Platform::Mt5
    }

    async fn connect(&self) -> ConnectorResult<bool> {
        if self.config.password.is_empty() {
            return Err(ConnectorError::Validation(
                "WebTerminal login and password are required".to_string(),
            ));
        }

        // Reachability first, so a down terminal reads as a connection
        // problem rather than bad credentials.
        let ping = format!("{}/api/ping", self.config.api_base);
        if let Err(e) = self.client.get(&ping).send().await {
            let error = ConnectorError::from(e);
            *self.shared.last_error.lock().await = Some(error.to_string());
            return Err(error);
        }

        let session_id = match self.authenticate().await {
            Ok(session_id) => session_id,
            Err(e) => {
                *self.shared.last_error.lock().await = Some(e.to_string());
                return Err(e);
            }
        };

        info!(
            "WebTerminal connector: authenticated login {} on {}",
            self.config.login, self.config.server
        );

        if let Some(snapshot) = self.fetch_account(&session_id).await {
            *self.shared.account.lock().await = Some(snapshot.clone());
            let _ = self
                .shared
                .events
                .send(ConnectorEvent::AccountUpdated(snapshot));
        }

        *self.shared.session_id.lock().await = Some(session_id.clone());
        *self.shared.connected.lock().await = true;
        *self.shared.last_error.lock().await = None;
        let _ = self
            .shared
            .events
            .send(ConnectorEvent::StatusChanged(self.status_snapshot().await));

        self.spawn_poller(session_id).await;
        Ok(true)
    }

    async fn disconnect(&self) {
        if let Some(task) = self.poll_task.lock().await.take() {
            task.abort();
        }
        *self.shared.session_id.lock().await = None;

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
        let session_id = self.shared.session_id.lock().await.clone();
        let Some(session_id) = session_id else {
            return Err(ConnectorError::Connection(
                "WebTerminal connector is not connected".to_string(),
            ));
        };

        let url = format!("{}/api/history", self.config.api_base);
        let response = self
            .client
            .post(&url)
            .header("Session-Id", &session_id)
            .json(&json!({ "from": from.timestamp(), "to": to.timestamp() }))
            .send()
            .await
            .map_err(ConnectorError::from)?;

        let ok = response.status().is_success();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::MessageParse(e.to_string()))?;

        if !ok || body["success"].as_bool() != Some(true) {
            return Err(ConnectorError::Connection(
                body["message"]
                    .as_str()
                    .unwrap_or("WebTerminal history request failed")
                    .to_string(),
            ));
        }

        Ok(body["trades"]
            .as_array()
            .map(|trades| trades.iter().filter_map(parse_trade).collect())
            .unwrap_or_default())
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

async fn fetch_new_trades(
    client: &reqwest::Client,
    config: &WebTerminalConnectorConfig,
    session_id: &str,
    from_secs: i64,
) -> ConnectorResult<Vec<CanonicalTrade>> {
    let url = format!("{}/api/trades/new", config.api_base);
    let response = client
        .post(&url)
        .header("Session-Id", session_id)
        .json(&json!({ "from": from_secs }))
        .send()
        .await
        .map_err(ConnectorError::from)?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| ConnectorError::MessageParse(e.to_string()))?;

    if body["success"].as_bool() != Some(true) {
        return Err(ConnectorError::Connection(
            body["message"]
                .as_str()
                .unwrap_or("WebTerminal new-trades request failed")
                .to_string(),
        ));
    }

    Ok(body["trades"]
        .as_array()
        .map(|trades| trades.iter().filter_map(parse_trade).collect())
        .unwrap_or_default())
}

/// Deal payload from the web terminal. Volume arrives in mini lots; type is
/// either the numeric MT5 code or the spelled-out deal type.
fn parse_trade(data: &Value) -> Option<CanonicalTrade> {
    let external_id = match (&data["ticket"], &data["position"]) {
        (Value::Number(n), _) => n.to_string(),
        (Value::String(s), _) if !s.is_empty() => s.clone(),
        (_, Value::Number(n)) => n.to_string(),
        _ => return None,
    };

    let side = if data["type"].as_i64() == Some(0)
        || data["type"].as_str() == Some("DEAL_TYPE_BUY")
    {
        TradeSide::Long
    } else {
        TradeSide::Short
    };

    let entry_price = data["price_open"]
        .as_f64()
        .or_else(|| data["price"].as_f64())?;
    let exit_price = data["price_close"]
        .as_f64()
        .or_else(|| data["price"].as_f64())?;

    let entry_time = Utc.timestamp_opt(data["time_open"].as_i64()?, 0).single()?;
    let exit_secs = data["time_close"]
        .as_i64()
        .or_else(|| data["time"].as_i64())?;
    let exit_time = Utc.timestamp_opt(exit_secs, 0).single()?;

    Some(CanonicalTrade {
        external_id,
        symbol: data["symbol"].as_str()?.to_string(),
        side,
        quantity: data["volume"].as_f64()? / 100.0,
        entry_price,
        exit_price,
        entry_time,
        exit_time,
        profit: data["profit"].as_f64().unwrap_or(0.0),
        commission: data["commission"].as_f64().unwrap_or(0.0),
        swap: data["swap"].as_f64().unwrap_or(0.0),
        fee: data["fee"].as_f64().unwrap_or(0.0),
        comment: data["comment"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()),
        platform: Platform::Mt5,
    })
}
