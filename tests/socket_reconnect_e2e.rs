//! Socket connector lifecycle tests against real TCP endpoints: a port that
//! refuses connections for the retry schedule, and a short-lived in-process
//! bridge for the event flow.

use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use tradesync::domain::entities::platform::Platform;
use tradesync::domain::repositories::platform_connector::{
    ConnectionState, ConnectorEvent, PlatformConnector,
};
use tradesync::infrastructure::socket_connector::{SocketConnector, SocketConnectorConfig};

fn config(endpoint: &str) -> SocketConnectorConfig {
    SocketConnectorConfig {
        endpoint: endpoint.to_string(),
        account: String::new(),
        reconnect_base_delay: Duration::from_millis(10),
        max_reconnect_attempts: 3,
        connect_timeout: Duration::from_millis(500),
    }
}

async fn wait_for_state(connector: &SocketConnector, wanted: ConnectionState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if connector.connection_state().await == wanted {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "connector never reached {:?}, stuck at {:?}",
                wanted,
                connector.connection_state().await
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_unreachable_bridge_exhausts_retries_and_fails() {
    // Port 9 (discard) is not listening; every attempt is refused.
    let connector = SocketConnector::new(Platform::Mt4, config("ws://127.0.0.1:9"));
    let mut events = connector.subscribe_events();

    let result = connector.connect().await;
    assert!(result.is_err());

    wait_for_state(&connector, ConnectionState::Failed).await;

    let status = connector.status().await;
    assert!(!status.connected);
    assert_eq!(
        status.error.as_deref(),
        Some("Max reconnection attempts reached")
    );

    // The event stream never claims a live connection and ends on the
    // terminal failure status.
    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let ConnectorEvent::StatusChanged(status) = event {
            assert!(!status.connected);
            if status.error.as_deref() == Some("Max reconnection attempts reached") {
                saw_failure = true;
            }
        }
    }
    assert!(saw_failure);

    // No session is alive, so history requests are rejected outright.
    let history = connector
        .request_trade_history(Utc::now() - chrono::Duration::days(1), Utc::now())
        .await;
    assert!(history.is_err());
}

#[tokio::test]
async fn test_rejects_non_websocket_endpoint() {
    for endpoint in ["http://localhost:8080", "not a url"] {
        let connector = SocketConnector::new(Platform::Mt5, config(endpoint));
        let error = connector.connect().await.unwrap_err();
        assert!(error.is_validation(), "accepted endpoint {}", endpoint);
        assert_eq!(
            connector.connection_state().await,
            ConnectionState::Disconnected
        );
    }
}

#[tokio::test]
async fn test_bridge_session_delivers_account_and_trade_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());

    // One-shot bridge: answer the account request, push a closed trade,
    // then go away for good.
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

        let request = socket.next().await.unwrap().unwrap();
        assert!(request.to_text().unwrap().contains("get_account_info"));

        let account = json!({
            "type": "account_info",
            "payload": {
                "login": 5012345,
                "name": "Demo Account",
                "server": "MetaQuotes-Demo",
                "currency": "USD",
                "balance": 10000.0,
                "equity": 10050.0
            }
        });
        socket
            .send(Message::Text(account.to_string()))
            .await
            .unwrap();

        let trade = json!({
            "type": "trade_closed",
            "payload": {
                "ticket": 777,
                "symbol": "EURUSD",
                "type": 0,
                "volume": 0.2,
                "price_open": 1.1000,
                "price_close": 1.1040,
                "time_open": 1_704_103_200,
                "time_close": 1_704_106_800,
                "profit": 80.0,
                "commission": -1.4,
                "swap": 0.0,
                "comment": "session test"
            }
        });
        socket.send(Message::Text(trade.to_string())).await.unwrap();
        socket.close(None).await.unwrap();
    });

    let connector = SocketConnector::new(Platform::Mt5, config(&endpoint));
    let mut events = connector.subscribe_events();

    assert!(connector.connect().await.unwrap());

    let mut account_seen = false;
    let mut trade_seen = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !(account_seen && trade_seen) {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("bridge events never arrived")
            .unwrap();
        match event {
            ConnectorEvent::AccountUpdated(snapshot) => {
                assert_eq!(snapshot.id, "5012345");
                assert_eq!(snapshot.server, "MetaQuotes-Demo");
                assert_eq!(snapshot.platform, Some(Platform::Mt5));
                account_seen = true;
            }
            ConnectorEvent::TradeClosed(trade) => {
                assert_eq!(trade.external_id, "777");
                assert_eq!(trade.symbol, "EURUSD");
                assert!((trade.quantity - 0.2).abs() < 1e-9);
                assert_eq!(trade.platform, Platform::Mt5);
                trade_seen = true;
            }
            ConnectorEvent::StatusChanged(_) => {}
        }
    }

    // The bridge is gone; the retry schedule runs out against a closed
    // listener.
    wait_for_state(&connector, ConnectionState::Failed).await;

    // Disconnect on a failed connector resets it to a clean idle state.
    connector.disconnect().await;
    assert_eq!(
        connector.connection_state().await,
        ConnectionState::Disconnected
    );
    assert!(connector.status().await.error.is_none());
}
