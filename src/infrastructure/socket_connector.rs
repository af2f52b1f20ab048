//! WebSocket connector for terminal bridges (MT4, MT5, NinjaTrader).
//!
//! One connector instance owns one background session task. The task holds
//! the socket, dispatches inbound messages into broadcast events and runs
//! the reconnection schedule, so there is never more than one reconnect
//! cycle in flight per instance. History requests are fired over the socket;
//! the bridge answers with per-trade messages that surface as TradeClosed
//! events rather than a direct reply.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::domain::entities::account::AccountSnapshot;
use crate::domain::entities::platform::Platform;
use crate::domain::entities::trade::{CanonicalTrade, TradeSide};
use crate::domain::errors::ConnectorError;
use crate::domain::repositories::platform_connector::{
    ConnectionState, ConnectorEvent, ConnectorResult, PlatformConnector, PlatformStatus,
};

const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct SocketConnectorConfig {
    pub endpoint: String,
    /// Account name sent with NinjaTrader requests; unused by MetaTrader.
    pub account: String,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
}

impl SocketConnectorConfig {
    /// Delay before reconnection attempt `n` (1-indexed): base × n.
    fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay * attempt
    }
}

#[derive(Debug)]
enum SocketCommand {
    RequestHistory {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

enum SessionOutcome {
    /// Disconnect was requested; no reconnect.
    Shutdown,
    /// Handshake never completed.
    ConnectFailed(String),
    /// Connected, then the session ended (clean close carries no error).
    Dropped(Option<String>),
}

/// State shared between the connector handle and its session task.
struct SocketShared {
    platform: Platform,
    state: Mutex<ConnectionState>,
    account: Mutex<Option<AccountSnapshot>>,
    last_error: Mutex<Option<String>>,
    events: broadcast::Sender<ConnectorEvent>,
}

impl SocketShared {
    async fn transition(&self, next: ConnectionState, error: Option<String>) {
        {
            let mut state = self.state.lock().await;
            let mut last_error = self.last_error.lock().await;
            if *state == next && *last_error == error {
                return;
            }
            *state = next;
            *last_error = error.clone();
        }
        let _ = self.events.send(ConnectorEvent::StatusChanged(PlatformStatus {
            connected: next == ConnectionState::Connected,
            platform: self.platform,
            last_update: Utc::now(),
            error,
        }));
    }

    async fn update_account(&self, snapshot: AccountSnapshot) {
        *self.account.lock().await = Some(snapshot.clone());
        let _ = self.events.send(ConnectorEvent::AccountUpdated(snapshot));
    }

    fn emit_trade(&self, trade: CanonicalTrade) {
        let _ = self.events.send(ConnectorEvent::TradeClosed(trade));
    }
}

pub struct SocketConnector {
    config: SocketConnectorConfig,
    shared: Arc<SocketShared>,
    command_tx: Mutex<Option<mpsc::Sender<SocketCommand>>>,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
}

impl SocketConnector {
    pub fn new(platform: Platform, config: SocketConnectorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            shared: Arc::new(SocketShared {
                platform,
                state: Mutex::new(ConnectionState::Disconnected),
                account: Mutex::new(None),
                last_error: Mutex::new(None),
                events,
            }),
            command_tx: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.shared.state.lock().await
    }

    async fn stop_session(&self) {
        if let Some(shutdown) = self.shutdown_tx.lock().await.take() {
            let _ = shutdown.send(());
        }
        *self.command_tx.lock().await = None;
    }
}

#[async_trait]
impl PlatformConnector for SocketConnector {
    fn platform(&self) -> Platform {
        self.shared.platform
    }

    async fn connect(&self) -> ConnectorResult<bool> {
        let endpoint = url::Url::parse(&self.config.endpoint).map_err(|e| {
            ConnectorError::Validation(format!(
                "Invalid bridge endpoint {}: {}",
                self.config.endpoint, e
            ))
        })?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ConnectorError::Validation(format!(
                "Bridge endpoint must be a ws:// or wss:// URL, got {}",
                self.config.endpoint
            )));
        }

        self.stop_session().await;
        self.shared
            .transition(ConnectionState::Connecting, None)
            .await;

        let (command_tx, command_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (first_tx, first_rx) = oneshot::channel();

        *self.command_tx.lock().await = Some(command_tx);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let shared = self.shared.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            run_socket(shared, config, command_rx, shutdown_rx, first_tx).await;
        });

        match first_rx.await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(message)) => Err(ConnectorError::Connection(message)),
            Err(_) => Err(ConnectorError::Connection(
                "Connection task exited before completing the handshake".to_string(),
            )),
        }
    }

    async fn disconnect(&self) {
        self.stop_session().await;
        self.shared
            .transition(ConnectionState::Disconnected, None)
            .await;
    }

    async fn request_trade_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ConnectorResult<Vec<CanonicalTrade>> {
        if self.connection_state().await != ConnectionState::Connected {
            return Err(ConnectorError::Connection(format!(
                "{} bridge is not connected",
                self.shared.platform.tag()
            )));
        }

        let command_tx = self.command_tx.lock().await.clone();
        let Some(command_tx) = command_tx else {
            return Err(ConnectorError::Connection(format!(
                "{} bridge is not connected",
                self.shared.platform.tag()
            )));
        };

        command_tx
            .send(SocketCommand::RequestHistory { from, to })
            .await
            .map_err(|_| {
                ConnectorError::Connection(format!(
                    "{} session ended before the request was sent",
                    self.shared.platform.tag()
                ))
            })?;

        // Trades come back as TradeClosed events.
        Ok(Vec::new())
    }

    async fn account_info(&self) -> Option<AccountSnapshot> {
        self.shared.account.lock().await.clone()
    }

    async fn status(&self) -> PlatformStatus {
        PlatformStatus {
            connected: self.connection_state().await == ConnectionState::Connected,
            platform: self.shared.platform,
            last_update: Utc::now(),
            error: self.shared.last_error.lock().await.clone(),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.shared.events.subscribe()
    }
}

async fn run_socket(
    shared: Arc<SocketShared>,
    config: SocketConnectorConfig,
    mut command_rx: mpsc::Receiver<SocketCommand>,
    mut shutdown_rx: broadcast::Receiver<()>,
    first_tx: oneshot::Sender<Result<(), String>>,
) {
    let tag = shared.platform.tag();
    let mut first_result = Some(first_tx);
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            shared
                .transition(ConnectionState::Reconnecting, None)
                .await;
            info!(
                "{} connector: attempting to reconnect ({}/{})",
                tag, attempt, config.max_reconnect_attempts
            );

            let delay = config.reconnect_delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => {
                    shared.transition(ConnectionState::Disconnected, None).await;
                    return;
                }
            }
        }

        let outcome = run_session(
            &shared,
            &config,
            &mut command_rx,
            &mut shutdown_rx,
            &mut first_result,
        )
        .await;

        let had_connected = match outcome {
            SessionOutcome::Shutdown => {
                shared.transition(ConnectionState::Disconnected, None).await;
                return;
            }
            SessionOutcome::ConnectFailed(message) => {
                error!("{} connector: failed to connect: {}", tag, message);
                shared
                    .transition(ConnectionState::Disconnected, Some(message))
                    .await;
                false
            }
            SessionOutcome::Dropped(error) => {
                match &error {
                    Some(message) => warn!("{} connector: connection lost: {}", tag, message),
                    None => info!("{} connector: connection closed", tag),
                }
                shared
                    .transition(ConnectionState::Disconnected, error)
                    .await;
                true
            }
        };

        attempt = if had_connected { 1 } else { attempt + 1 };
        if attempt > config.max_reconnect_attempts {
            error!("{} connector: max reconnection attempts reached", tag);
            shared
                .transition(
                    ConnectionState::Failed,
                    Some("Max reconnection attempts reached".to_string()),
                )
                .await;
            return;
        }
    }
}

async fn run_session(
    shared: &SocketShared,
    config: &SocketConnectorConfig,
    command_rx: &mut mpsc::Receiver<SocketCommand>,
    shutdown_rx: &mut broadcast::Receiver<()>,
    first_result: &mut Option<oneshot::Sender<Result<(), String>>>,
) -> SessionOutcome {
    let tag = shared.platform.tag();

    let handshake = tokio::select! {
        result = tokio::time::timeout(config.connect_timeout, connect_async(&config.endpoint)) => result,
        _ = shutdown_rx.recv() => return SessionOutcome::Shutdown,
    };

    let (stream, _) = match handshake {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            let message = format!("Failed to connect: {}", e);
            if let Some(tx) = first_result.take() {
                let _ = tx.send(Err(message.clone()));
            }
            return SessionOutcome::ConnectFailed(message);
        }
        Err(_) => {
            let message = format!(
                "Connection to {} timed out after {:?}",
                config.endpoint, config.connect_timeout
            );
            if let Some(tx) = first_result.take() {
                let _ = tx.send(Err(message.clone()));
            }
            return SessionOutcome::ConnectFailed(message);
        }
    };

    info!("{} connector: connected to {}", tag, config.endpoint);
    shared.transition(ConnectionState::Connected, None).await;
    if let Some(tx) = first_result.take() {
        let _ = tx.send(Ok(()));
    }

    let (mut write, mut read) = stream.split();

    for request in startup_requests(shared.platform, &config.account) {
        if let Err(e) = write.send(Message::Text(request)).await {
            return SessionOutcome::Dropped(Some(format!(
                "Failed to send startup request: {}",
                e
            )));
        }
    }

    loop {
        tokio::select! {
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_text_message(shared, &text).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("{} connector: close frame: {:?}", tag, frame);
                        return SessionOutcome::Dropped(None);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            return SessionOutcome::Dropped(Some(format!("Failed to send pong: {}", e)));
                        }
                    }
                    Some(Ok(other)) => {
                        debug!("{} connector: ignoring message: {:?}", tag, other);
                    }
                    Some(Err(e)) => {
                        return SessionOutcome::Dropped(Some(format!("WebSocket read error: {}", e)));
                    }
                    None => return SessionOutcome::Dropped(None),
                }
            }
            Some(command) = command_rx.recv() => {
                match command {
                    SocketCommand::RequestHistory { from, to } => {
                        if let Some(request) =
                            build_history_request(shared.platform, &config.account, from, to)
                        {
                            if let Err(e) = write.send(Message::Text(request)).await {
                                return SessionOutcome::Dropped(Some(format!(
                                    "Failed to send history request: {}",
                                    e
                                )));
                            }
                        }
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionOutcome::Shutdown;
            }
        }
    }
}

async fn handle_text_message(shared: &SocketShared, text: &str) {
    let data: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "{} connector: received invalid JSON: {}",
                shared.platform.tag(),
                e
            );
            return;
        }
    };

    match shared.platform {
        Platform::Mt4 | Platform::Mt5 => handle_terminal_message(shared, &data).await,
        Platform::NinjaTrader => handle_ninja_message(shared, &data).await,
        _ => {}
    }
}

/// MetaTrader bridge messages: `{"type": ..., "payload": {...}}`.
async fn handle_terminal_message(shared: &SocketShared, data: &Value) {
    let tag = shared.platform.tag();
    match data["type"].as_str() {
        Some("account_info") => {
            if let Some(snapshot) = parse_terminal_account(shared.platform, &data["payload"]) {
                shared.update_account(snapshot).await;
            } else {
                warn!("{} connector: account_info payload incomplete", tag);
            }
        }
        Some("account_update") => {
            let merged = {
                let current = shared.account.lock().await.clone();
                merge_account_update(shared.platform, current, &data["payload"])
            };
            if let Some(snapshot) = merged {
                shared.update_account(snapshot).await;
            }
        }
        Some("trade_closed") => {
            match parse_terminal_trade(shared.platform, &data["payload"]) {
                Some(trade) => shared.emit_trade(trade),
                None => warn!("{} connector: dropping malformed trade_closed", tag),
            }
        }
        Some("trade_opened") => {
            // Open positions never import; only log them.
            debug!("{} connector: trade opened: {}", tag, data["payload"]);
        }
        Some(other) => {
            debug!("{} connector: unknown message type: {}", tag, other);
        }
        None => {
            debug!("{} connector: message without type tag", tag);
        }
    }
}

/// NinjaTrader messages: `{"command": ..., ...}` with flat fields.
async fn handle_ninja_message(shared: &SocketShared, data: &Value) {
    match data["command"].as_str() {
        Some("ACCOUNTUPDATE") => {
            if let Some(snapshot) = parse_ninja_account(data) {
                shared.update_account(snapshot).await;
            }
        }
        Some("EXECUTION") => {
            if data["orderState"].as_str() == Some("Filled") {
                match parse_ninja_execution(data) {
                    Some(trade) => shared.emit_trade(trade),
                    None => warn!("NinjaTrader connector: dropping malformed execution"),
                }
            }
        }
        Some("EXECUTIONS") => {
            if let Some(executions) = data["executions"].as_array() {
                for execution in executions {
                    match parse_ninja_execution(execution) {
                        Some(trade) => shared.emit_trade(trade),
                        None => {
                            warn!("NinjaTrader connector: dropping malformed execution")
                        }
                    }
                }
            }
        }
        Some(other) => {
            debug!("NinjaTrader connector: unknown command: {}", other);
        }
        None => {
            debug!("NinjaTrader connector: message without command tag");
        }
    }
}

/// Messages sent right after the handshake: an account-info request, plus
/// the NinjaTrader subscriptions for ongoing account and execution pushes.
fn startup_requests(platform: Platform, account: &str) -> Vec<String> {
    match platform {
        Platform::Mt4 | Platform::Mt5 => vec![r#"{"type":"get_account_info"}"#.to_string()],
        Platform::NinjaTrader => ["ACCOUNTDATA", "SUBSCRIBEACCOUNTDATA", "SUBSCRIBEEXECUTIONS"]
            .iter()
            .map(|command| {
                json!({
                    "command": command,
                    "parameters": { "account": account }
                })
                .to_string()
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn build_history_request(
    platform: Platform,
    account: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Option<String> {
    match platform {
        Platform::Mt4 | Platform::Mt5 => Some(
            json!({
                "type": "get_trade_history",
                "from": from.timestamp(),
                "to": to.timestamp()
            })
            .to_string(),
        ),
        Platform::NinjaTrader => Some(
            json!({
                "command": "GETEXECUTIONS",
                "parameters": {
                    "account": account,
                    "fromDate": from.to_rfc3339(),
                    "toDate": to.to_rfc3339()
                }
            })
            .to_string(),
        ),
        _ => None,
    }
}

fn parse_terminal_account(platform: Platform, payload: &Value) -> Option<AccountSnapshot> {
    let login = id_string(&payload["login"])?;
    Some(AccountSnapshot {
        id: login.clone(),
        name: payload["name"].as_str().unwrap_or(&login).to_string(),
        server: payload["server"].as_str()?.to_string(),
        currency: payload["currency"].as_str().unwrap_or("USD").to_string(),
        balance: payload["balance"].as_f64().unwrap_or(0.0),
        equity: payload["equity"].as_f64().unwrap_or(0.0),
        platform: Some(platform),
    })
}

/// Partial account payloads update only the fields they carry.
fn merge_account_update(
    platform: Platform,
    current: Option<AccountSnapshot>,
    payload: &Value,
) -> Option<AccountSnapshot> {
    let mut snapshot = match current {
        Some(snapshot) => snapshot,
        // First contact through an update message: needs the full payload.
        None => return parse_terminal_account(platform, payload),
    };

    if let Some(login) = id_string(&payload["login"]) {
        snapshot.id = login;
    }
    if let Some(name) = payload["name"].as_str() {
        snapshot.name = name.to_string();
    }
    if let Some(server) = payload["server"].as_str() {
        snapshot.server = server.to_string();
    }
    if let Some(currency) = payload["currency"].as_str() {
        snapshot.currency = currency.to_string();
    }
    if let Some(balance) = payload["balance"].as_f64() {
        snapshot.balance = balance;
    }
    if let Some(equity) = payload["equity"].as_f64() {
        snapshot.equity = equity;
    }
    Some(snapshot)
}

/// MetaTrader closed-trade payload. MT4 and MT5 bridges use different field
/// spellings for the same data.
fn parse_terminal_trade(platform: Platform, payload: &Value) -> Option<CanonicalTrade> {
    let (side_field, quantity_field, entry_price_field, exit_price_field) = match platform {
        Platform::Mt4 => ("cmd", "lots", "open_price", "close_price"),
        _ => ("type", "volume", "price_open", "price_close"),
    };
    let (entry_time_field, exit_time_field) = match platform {
        Platform::Mt4 => ("open_time", "close_time"),
        _ => ("time_open", "time_close"),
    };

    let external_id = id_string(&payload["ticket"])?;
    let entry_time = Utc
        .timestamp_opt(payload[entry_time_field].as_i64()?, 0)
        .single()?;
    let exit_time = Utc
        .timestamp_opt(payload[exit_time_field].as_i64()?, 0)
        .single()?;

    Some(CanonicalTrade {
        external_id,
        symbol: payload["symbol"].as_str()?.to_string(),
        // 0=BUY, 1=SELL
        side: if payload[side_field].as_i64()? == 0 {
            TradeSide::Long
        } else {
            TradeSide::Short
        },
        quantity: payload[quantity_field].as_f64()?,
        entry_price: payload[entry_price_field].as_f64()?,
        exit_price: payload[exit_price_field].as_f64()?,
        entry_time,
        exit_time,
        profit: payload["profit"].as_f64().unwrap_or(0.0),
        commission: payload["commission"].as_f64().unwrap_or(0.0),
        swap: payload["swap"].as_f64().unwrap_or(0.0),
        fee: 0.0,
        comment: non_empty_string(&payload["comment"]),
        platform,
    })
}

fn parse_ninja_account(data: &Value) -> Option<AccountSnapshot> {
    let account = data["account"].as_str()?.to_string();
    Some(AccountSnapshot {
        id: account.clone(),
        name: account,
        server: "NinjaTrader".to_string(),
        currency: data["currency"].as_str().unwrap_or("USD").to_string(),
        balance: data["cashValue"].as_f64().unwrap_or(0.0),
        equity: data["realizedPnL"].as_f64().unwrap_or(0.0),
        platform: Some(Platform::NinjaTrader),
    })
}

/// A NinjaTrader execution is a single fill: one price stands in for both
/// entry and exit, and the feed reports commission where P&L would be.
fn parse_ninja_execution(data: &Value) -> Option<CanonicalTrade> {
    let external_id = id_string(&data["orderId"]).or_else(|| id_string(&data["executionId"]))?;
    let time = parse_execution_time(&data["time"])?;
    let price = data["price"].as_f64()?;
    let commission = data["commission"].as_f64().unwrap_or(0.0);

    Some(CanonicalTrade {
        external_id,
        symbol: data["instrument"].as_str()?.to_string(),
        side: if data["orderAction"].as_str() == Some("BUY") {
            TradeSide::Long
        } else {
            TradeSide::Short
        },
        quantity: data["quantity"].as_f64()?,
        entry_price: price,
        exit_price: price,
        entry_time: time,
        exit_time: time,
        profit: commission,
        commission,
        swap: 0.0,
        fee: 0.0,
        comment: non_empty_string(&data["name"]),
        platform: Platform::NinjaTrader,
    })
}

/// Execution timestamps arrive as ISO strings, occasionally as ms epochs.
fn parse_execution_time(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(text) = value.as_str() {
        return DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| t.with_timezone(&Utc));
    }
    value
        .as_i64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Ids arrive as numbers from MetaTrader and strings from NinjaTrader.
fn id_string(value: &Value) -> Option<String> {
    if let Some(n) = value.as_i64() {
        return Some(n.to_string());
    }
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn non_empty_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
