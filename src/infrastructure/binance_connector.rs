//! Binance spot connector (signed REST).
//!
//! Binance has no "all my trades" endpoint, so history probes a fixed list
//! of liquid trading pairs one by one. A 400-class answer for a pair means
//! the account never traded it and is swallowed; any other failure is logged
//! as a genuine fault without aborting the remaining probes.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::domain::entities::account::AccountSnapshot;
use crate::domain::entities::platform::Platform;
use crate::domain::entities::trade::{CanonicalTrade, TradeSide};
use crate::domain::errors::ConnectorError;
use crate::domain::repositories::platform_connector::{
    ConnectorEvent, ConnectorResult, PlatformConnector, PlatformStatus,
};

const EVENT_CHANNEL_CAPACITY: usize = 100;
const TRADES_PER_SYMBOL: u32 = 500;

/// Pairs probed during history sync. The spot API only answers per symbol,
/// so this list bounds the sweep to the pairs retail accounts actually use.
pub const PROBE_SYMBOLS: [&str; 15] = [
    "BTCUSDT", "ETHUSDT", "BNBUSDT", "ADAUSDT", "DOTUSDT", "XRPUSDT", "LTCUSDT", "LINKUSDT",
    "BCHUSDT", "XLMUSDT", "UNIUSDT", "DOGEUSDT", "SOLUSDT", "MATICUSDT", "AVAXUSDT",
];

#[derive(Debug, Clone)]
pub struct BinanceConnectorConfig {
    pub api_base: String,
    pub api_key: String,
    pub api_secret: String,
    pub request_timeout: Duration,
}

/// Failure from one Binance API call, keeping the HTTP status so probe
/// errors can be classified.
#[derive(Debug, Clone)]
pub struct BinanceApiError {
    pub status: Option<u16>,
    pub message: String,
}

impl BinanceApiError {
    /// True for the 400-class answers Binance gives for pairs the account
    /// has no history with (bad symbol, no permission for the pair).
    pub fn is_client_rejection(&self) -> bool {
        matches!(self.status, Some(status) if (400..500).contains(&status))
    }

    fn into_connector_error(self) -> ConnectorError {
        match self.status {
            Some(401) | Some(403) => ConnectorError::Authentication(self.message),
            _ => ConnectorError::Connection(self.message),
        }
    }
}

/// The subset of the Binance REST surface the connector touches. Split out
/// so tests can substitute a fake without a network.
#[async_trait]
pub trait BinanceApi: Send + Sync {
    async fn ping(&self) -> Result<(), BinanceApiError>;
    async fn account(&self) -> Result<Value, BinanceApiError>;
    async fn my_trades(&self, symbol: &str, limit: u32) -> Result<Vec<Value>, BinanceApiError>;
}

/// reqwest-backed implementation against the real API.
pub struct BinanceHttpApi {
    config: BinanceConnectorConfig,
    client: reqwest::Client,
}

impl BinanceHttpApi {
    pub fn new(config: BinanceConnectorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn request(&self, endpoint: &str, query: &str, signed: bool) -> Result<Value, BinanceApiError> {
        let url = if signed {
            // The timestamp is part of the signed payload and must be fresh
            // on every call; Binance rejects stale ones.
            let query = if query.is_empty() {
                format!("timestamp={}", Utc::now().timestamp_millis())
            } else {
                format!("{}&timestamp={}", query, Utc::now().timestamp_millis())
            };
            let signature = sign_query(&self.config.api_secret, &query);
            format!(
                "{}{}?{}&signature={}",
                self.config.api_base, endpoint, query, signature
            )
        } else if query.is_empty() {
            format!("{}{}", self.config.api_base, endpoint)
        } else {
            format!("{}{}?{}", self.config.api_base, endpoint, query)
        };

        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .map_err(|e| BinanceApiError {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BinanceApiError {
                status: Some(status.as_u16()),
                message: format!("Binance API error {}: {}", status.as_u16(), body),
            });
        }

        response.json::<Value>().await.map_err(|e| BinanceApiError {
            status: None,
            message: format!("Invalid Binance response: {}", e),
        })
    }
}

#[async_trait]
impl BinanceApi for BinanceHttpApi {
    async fn ping(&self) -> Result<(), BinanceApiError> {
        self.request("/v3/ping", "", false).await.map(|_| ())
    }

    async fn account(&self) -> Result<Value, BinanceApiError> {
        self.request("/v3/account", "", true).await
    }

    async fn my_trades(&self, symbol: &str, limit: u32) -> Result<Vec<Value>, BinanceApiError> {
        let query = format!("symbol={}&limit={}", symbol, limit);
        let value = self.request("/v3/myTrades", &query, true).await?;
        match value {
            Value::Array(trades) => Ok(trades),
            other => Err(BinanceApiError {
                status: None,
                message: format!("Expected a trade array, got: {}", other),
            }),
        }
    }
}

/// HMAC-SHA256 over the canonical query string, hex encoded.
pub fn sign_query(secret: &str, query: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub struct BinanceConnector {
    api: Arc<dyn BinanceApi>,
    has_credentials: bool,
    connected: Mutex<bool>,
    account: Mutex<Option<AccountSnapshot>>,
    last_error: Mutex<Option<String>>,
    events: broadcast::Sender<ConnectorEvent>,
}

impl BinanceConnector {
    pub fn new(config: BinanceConnectorConfig) -> Self {
        let has_credentials = !config.api_key.is_empty() && !config.api_secret.is_empty();
        Self::with_api(Arc::new(BinanceHttpApi::new(config)), has_credentials)
    }

    pub fn with_api(api: Arc<dyn BinanceApi>, has_credentials: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            has_credentials,
            connected: Mutex::new(false),
            account: Mutex::new(None),
            last_error: Mutex::new(None),
            events,
        }
    }

    async fn record_error(&self, message: Option<String>) {
        *self.last_error.lock().await = message;
    }
}

#[async_trait]
impl PlatformConnector for BinanceConnector {
    fn platform(&self) -> Platform {
        Platform::Binance
    }

    async fn connect(&self) -> ConnectorResult<bool> {
        if !self.has_credentials {
            return Err(ConnectorError::Validation(
                "Binance API key and secret are required".to_string(),
            ));
        }

        if let Err(e) = self.api.ping().await {
            self.record_error(Some(e.message.clone())).await;
            return Err(ConnectorError::Connection(e.message));
        }

        // The account call verifies the key pair actually signs.
        let account = match self.api.account().await {
            Ok(value) => value,
            Err(e) => {
                self.record_error(Some(e.message.clone())).await;
                return Err(e.into_connector_error());
            }
        };

        let snapshot = parse_account(&account);
        info!(
            "Binance connector: account verified ({})",
            snapshot.name
        );
        *self.account.lock().await = Some(snapshot.clone());
        *self.connected.lock().await = true;
        self.record_error(None).await;
        let _ = self.events.send(ConnectorEvent::AccountUpdated(snapshot));
        let _ = self
            .events
            .send(ConnectorEvent::StatusChanged(self.status().await));

        Ok(true)
    }

    async fn disconnect(&self) {
        let mut connected = self.connected.lock().await;
        if *connected {
            *connected = false;
            drop(connected);
            let _ = self
                .events
                .send(ConnectorEvent::StatusChanged(self.status().await));
        }
    }

    async fn request_trade_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ConnectorResult<Vec<CanonicalTrade>> {
        if !*self.connected.lock().await {
            return Err(ConnectorError::Connection(
                "Binance connector is not connected".to_string(),
            ));
        }

        let mut trades = Vec::new();
        for symbol in PROBE_SYMBOLS {
            match self.api.my_trades(symbol, TRADES_PER_SYMBOL).await {
                Ok(symbol_trades) => {
                    if !symbol_trades.is_empty() {
                        debug!(
                            "Binance connector: {} trades for {}",
                            symbol_trades.len(),
                            symbol
                        );
                    }
                    trades.extend(symbol_trades.iter().filter_map(parse_trade).filter(
                        |trade: &CanonicalTrade| trade.exit_time >= from && trade.exit_time <= to,
                    ));
                }
                Err(e) if e.is_client_rejection() => {
                    // Account never traded this pair.
                    debug!("Binance connector: no history for {}: {}", symbol, e.message);
                }
                Err(e) => {
                    warn!(
                        "Binance connector: probe failed for {}: {}",
                        symbol, e.message
                    );
                }
            }
        }

        Ok(trades)
    }

    async fn account_info(&self) -> Option<AccountSnapshot> {
        self.account.lock().await.clone()
    }

    async fn status(&self) -> PlatformStatus {
        PlatformStatus {
            connected: *self.connected.lock().await,
            platform: Platform::Binance,
            last_update: Utc::now(),
            error: self.last_error.lock().await.clone(),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.events.subscribe()
    }
}

fn parse_account(value: &Value) -> AccountSnapshot {
    let mut snapshot = AccountSnapshot::new(
        "binance",
        value["accountType"].as_str().unwrap_or("SPOT"),
        "Binance",
    );
    snapshot.currency = "USDT".to_string();
    snapshot.platform = Some(Platform::Binance);

    // Spot accounts report per-asset balances; the USDT line stands in for
    // an account balance where one exists.
    if let Some(balances) = value["balances"].as_array() {
        if let Some(usdt) = balances
            .iter()
            .find(|b| b["asset"].as_str() == Some("USDT"))
        {
            let free = number(&usdt["free"]);
            let locked = number(&usdt["locked"]);
            snapshot.balance = free + locked;
            snapshot.equity = snapshot.balance;
        }
    }

    snapshot
}

/// A spot fill is a single execution: one price fills both entry and exit.
fn parse_trade(value: &Value) -> Option<CanonicalTrade> {
    let external_id = match &value["id"] {
        Value::Number(n) => n.to_string(),
        Value::String(s) if !s.is_empty() => s.clone(),
        _ => match &value["orderId"] {
            Value::Number(n) => n.to_string(),
            _ => return None,
        },
    };

    let side = match value["side"].as_str() {
        Some(action) => TradeSide::from_action(action),
        None if value["isBuyer"].as_bool() == Some(true) => TradeSide::Long,
        None => TradeSide::Short,
    };

    let quantity = match value.get("qty") {
        Some(qty) => number(qty),
        None => number(&value["executedQty"]),
    };
    let price = number(&value["price"]);
    let time = Utc.timestamp_millis_opt(value["time"].as_i64()?).single()?;

    Some(CanonicalTrade {
        external_id,
        symbol: value["symbol"].as_str()?.to_string(),
        side,
        quantity,
        entry_price: price,
        exit_price: price,
        entry_time: time,
        exit_time: time,
        profit: 0.0,
        commission: number(&value["commission"]),
        swap: 0.0,
        fee: 0.0,
        comment: None,
        platform: Platform::Binance,
    })
}

/// Binance reports numbers as strings.
fn number(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.parse().unwrap_or(0.0),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Canned per-symbol answers, counting every probe made.
    struct FakeApi {
        responses: HashMap<&'static str, Result<Vec<Value>, BinanceApiError>>,
        probes: AtomicUsize,
        account_result: Result<Value, BinanceApiError>,
    }

    impl FakeApi {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
                probes: AtomicUsize::new(0),
                account_result: Ok(json!({
                    "accountType": "SPOT",
                    "balances": [
                        { "asset": "USDT", "free": "1200.50", "locked": "100.00" },
                        { "asset": "BTC", "free": "0.5", "locked": "0" }
                    ]
                })),
            }
        }
    }

    #[async_trait]
    impl BinanceApi for FakeApi {
        async fn ping(&self) -> Result<(), BinanceApiError> {
            Ok(())
        }

        async fn account(&self) -> Result<Value, BinanceApiError> {
            self.account_result.clone()
        }

        async fn my_trades(&self, symbol: &str, _limit: u32) -> Result<Vec<Value>, BinanceApiError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(symbol)
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn fill(id: u64, symbol: &str, time_ms: i64) -> Value {
        json!({
            "id": id,
            "orderId": id * 10,
            "symbol": symbol,
            "side": "BUY",
            "qty": "0.5",
            "price": "42000.00",
            "commission": "0.0005",
            "time": time_ms
        })
    }

    async fn connected(api: FakeApi) -> BinanceConnector {
        let connector = BinanceConnector::with_api(Arc::new(api), true);
        connector.connect().await.unwrap();
        connector
    }

    #[test]
    fn test_signature_matches_known_vector() {
        // Reference vector from the Binance API documentation.
        let signature = sign_query(
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j",
            "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559",
        );
        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_client_rejection_classification() {
        let not_traded = BinanceApiError {
            status: Some(400),
            message: "Invalid symbol".to_string(),
        };
        assert!(not_traded.is_client_rejection());

        let outage = BinanceApiError {
            status: Some(502),
            message: "Bad gateway".to_string(),
        };
        assert!(!outage.is_client_rejection());

        let transport = BinanceApiError {
            status: None,
            message: "connection reset".to_string(),
        };
        assert!(!transport.is_client_rejection());
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let connector = BinanceConnector::with_api(Arc::new(FakeApi::new()), false);
        let err = connector.connect().await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_connect_maps_auth_rejection() {
        let mut api = FakeApi::new();
        api.account_result = Err(BinanceApiError {
            status: Some(401),
            message: "Invalid API-key".to_string(),
        });

        let connector = BinanceConnector::with_api(Arc::new(api), true);
        let err = connector.connect().await.unwrap_err();
        assert!(err.is_authentication());
        assert!(!connector.status().await.connected);
    }

    #[tokio::test]
    async fn test_connect_reads_usdt_balance() {
        let connector = connected(FakeApi::new()).await;

        let snapshot = connector.account_info().await.unwrap();
        assert_eq!(snapshot.name, "SPOT");
        assert_eq!(snapshot.currency, "USDT");
        assert!((snapshot.balance - 1300.50).abs() < 1e-9);
        assert!(connector.status().await.connected);
    }

    #[tokio::test]
    async fn test_history_swallows_client_rejections_and_keeps_probing() {
        let mut api = FakeApi::new();
        api.responses.insert(
            "BTCUSDT",
            Ok(vec![fill(1, "BTCUSDT", 1_704_103_200_000)]),
        );
        api.responses.insert(
            "ETHUSDT",
            Err(BinanceApiError {
                status: Some(400),
                message: "Invalid symbol".to_string(),
            }),
        );
        api.responses.insert(
            "BNBUSDT",
            Err(BinanceApiError {
                status: Some(500),
                message: "Internal error".to_string(),
            }),
        );
        api.responses.insert(
            "SOLUSDT",
            Ok(vec![fill(2, "SOLUSDT", 1_704_106_800_000)]),
        );

        let connector = connected(api).await;
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        let trades = connector.request_trade_history(from, to).await.unwrap();

        // Both error classes are survived; the sweep keeps going.
        assert_eq!(trades.len(), 2);
        assert!(trades.iter().any(|t| t.external_id == "1"));
        assert!(trades.iter().any(|t| t.external_id == "2"));
    }

    #[tokio::test]
    async fn test_all_symbols_probed_despite_errors() {
        let mut api = FakeApi::new();
        for symbol in PROBE_SYMBOLS {
            api.responses.insert(
                symbol,
                Err(BinanceApiError {
                    status: Some(503),
                    message: "unavailable".to_string(),
                }),
            );
        }
        let api = Arc::new(api);
        let connector = BinanceConnector::with_api(api.clone(), true);
        connector.connect().await.unwrap();

        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let trades = connector.request_trade_history(from, to).await.unwrap();

        assert!(trades.is_empty());
        assert_eq!(api.probes.load(Ordering::SeqCst), PROBE_SYMBOLS.len());
    }

    #[tokio::test]
    async fn test_history_filters_by_window() {
        let mut api = FakeApi::new();
        api.responses.insert(
            "BTCUSDT",
            Ok(vec![
                fill(1, "BTCUSDT", 1_704_103_200_000), // inside
                fill(2, "BTCUSDT", 1_706_900_000_000), // after the window
            ]),
        );

        let connector = connected(api).await;
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let trades = connector.request_trade_history(from, to).await.unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].external_id, "1");
    }

    #[tokio::test]
    async fn test_history_requires_connection() {
        let connector = BinanceConnector::with_api(Arc::new(FakeApi::new()), true);
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert!(connector.request_trade_history(from, to).await.is_err());
    }

    #[test]
    fn test_parse_trade_fields() {
        let trade = parse_trade(&fill(42, "BTCUSDT", 1_704_103_200_000)).unwrap();
        assert_eq!(trade.external_id, "42");
        assert_eq!(trade.side, TradeSide::Long);
        assert_eq!(trade.quantity, 0.5);
        assert_eq!(trade.entry_price, 42000.0);
        assert_eq!(trade.exit_price, 42000.0);
        assert_eq!(trade.commission, 0.0005);
        assert_eq!(trade.exit_time.timestamp(), 1_704_103_200);
        assert_eq!(trade.platform, Platform::Binance);
    }

    #[test]
    fn test_parse_trade_falls_back_to_is_buyer_and_order_id() {
        let value = json!({
            "orderId": 9001,
            "symbol": "ETHUSDT",
            "isBuyer": false,
            "executedQty": "2.0",
            "price": "2500.0",
            "commission": "0.001",
            "time": 1_704_103_200_000i64
        });

        let trade = parse_trade(&value).unwrap();
        assert_eq!(trade.external_id, "9001");
        assert_eq!(trade.side, TradeSide::Short);
        assert_eq!(trade.quantity, 2.0);
    }
}
