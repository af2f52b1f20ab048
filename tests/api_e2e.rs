//! End-to-end API tests over the full router with an in-memory database.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use tradesync::application::handlers::{self, AppState};
use tradesync::config::AppConfig;
use tradesync::persistence::init_database;

async fn app() -> Router {
    let pool = init_database("sqlite::memory:").await.unwrap();
    handlers::router(AppState::new(AppConfig::default(), pool))
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn trade_message(ticket: i64) -> Value {
    json!({
        "type": "trade",
        "appId": "ea-1",
        "timestamp": 1_704_103_200_000i64,
        "account": { "login": 5012345, "server": "MetaQuotes-Demo" },
        "trade": {
            "ticket": ticket,
            "symbol": "EURUSD",
            "type": 0,
            "volume": 0.1,
            "openPrice": 1.1000,
            "closePrice": 1.1050,
            "openTime": 1_704_099_600,
            "closeTime": 1_704_103_200,
            "profit": 50.0,
            "commission": -3.5,
            "swap": 0.0,
            "fee": 0.0,
            "comment": "tp hit",
            "positionId": 99
        }
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = app().await;
    let (status, body) = send_json(&app, "GET", "/health", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_ingest_account_heartbeat_and_listing() {
    let app = app().await;

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/ingest",
        json!({
            "type": "account",
            "appId": "ea-1",
            "account": {
                "login": 5012345,
                "name": "Demo Account",
                "server": "MetaQuotes-Demo",
                "currency": "USD",
                "leverage": 100,
                "balance": 10000.0,
                "equity": 10125.5,
                "margin": 250.0,
                "freeMargin": 9875.5,
                "marginLevel": 4050.2
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/ingest",
        json!({ "type": "heartbeat", "appId": "ea-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, listing) = send_json(&app, "GET", "/api/ingest", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["totalConnections"], 1);
    assert_eq!(listing["onlineConnections"], 1);
    assert_eq!(listing["connections"][0]["appId"], "ea-1");
    assert_eq!(listing["connections"][0]["status"], "active");

    // disconnect keeps the entry, marked inactive
    send_json(
        &app,
        "POST",
        "/api/ingest",
        json!({ "type": "disconnect", "appId": "ea-1" }),
    )
    .await;
    let (_, listing) = send_json(&app, "GET", "/api/ingest", Value::Null).await;
    assert_eq!(listing["totalConnections"], 1);
    assert_eq!(listing["connections"][0]["status"], "inactive");
}

#[tokio::test]
async fn test_ingest_trade_dedup_round_trip() {
    let app = app().await;

    let (status, first) = send_json(&app, "POST", "/api/ingest", trade_message(42)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["message"], "Trade imported successfully");

    let (status, second) = send_json(&app, "POST", "/api/ingest", trade_message(42)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["success"], true);
    assert_eq!(second["message"], "Trade already exists");
    assert_eq!(second["tradeId"], first["tradeId"]);

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/ingest",
        json!({ "type": "celebrate", "appId": "ea-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_broker_crud_flow() {
    let app = app().await;

    let broker = json!({
        "name": "IC Markets Demo",
        "platform": "mt5",
        "accountId": "5012345",
        "server": "ICMarkets-Demo",
        "password": "secret-pass",
        "currency": "USD",
        "leverage": 100
    });

    let (status, created) = send_json(&app, "POST", "/api/brokers", broker.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "disconnected");
    assert!(created.get("password").is_none());
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = send_json(&app, "POST", "/api/brokers", broker).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, listing) = send_json(&app, "GET", "/api/brokers", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing.as_array().unwrap().len(), 1);
    assert_eq!(listing[0]["tradesCount"], 0);

    let (status, fetched) =
        send_json(&app, "GET", &format!("/api/brokers/{}", id), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["accountId"], "5012345");

    let (status, _) =
        send_json(&app, "DELETE", &format!("/api/brokers/{}", id), Value::Null).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(&app, "GET", &format!("/api/brokers/{}", id), Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_broker_sync_requires_api_platform() {
    let app = app().await;

    let (_, created) = send_json(
        &app,
        "POST",
        "/api/brokers",
        json!({
            "name": "Terminal account",
            "platform": "mt4",
            "accountId": "111111"
        }),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/api/brokers/{}/sync", id),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = send_json(&app, "POST", "/api/brokers/ghost/sync", Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_credential_sync_validation_and_rate_limit() {
    let app = app().await;

    let bad = json!({
        "platform": "mt5",
        "server": "MetaQuotes-Demo",
        "login": "12",
        "password": "secret-pass"
    });

    for _ in 0..5 {
        let (status, body) = send_json(&app, "POST", "/api/sync", bad.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    let (status, body) = send_json(&app, "POST", "/api/sync", bad).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["remaining_attempts"], 0);
    assert!(body["retry_after_minutes"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_csv_import_and_reimport() {
    let app = app().await;

    let csv = "Order,Instrument,Side,Lots,Entry Price,Exit Price,Close Time,PnL,Fee\n\
               1001,EURUSD,buy,0.1,1.1000,1.1050,2024-01-01T10:00:00,50,0.5\n";

    let boundary = "tradesync-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"platform\"\r\n\r\nmt4\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"trades.csv\"\r\n\
         Content-Type: text/csv\r\n\r\n{csv}\r\n--{b}--\r\n",
        b = boundary,
        csv = csv
    );

    let request = || {
        Request::builder()
            .method("POST")
            .uri("/api/import")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body.clone()))
            .unwrap()
    };

    let (status, first) = send(&app, request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], true);
    assert_eq!(first["trades_imported"], 1);
    assert_eq!(first["total_trades"], 1);
    assert_eq!(first["duplicates_skipped"], 0);

    // idempotent re-import
    let (status, second) = send(&app, request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["trades_imported"], 0);
    assert_eq!(second["duplicates_skipped"], 1);
}

#[tokio::test]
async fn test_unsupported_upload_extension() {
    let app = app().await;

    let boundary = "tradesync-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"trades.xlsx\"\r\n\
         Content-Type: application/octet-stream\r\n\r\nnot really a spreadsheet\r\n--{b}--\r\n",
        b = boundary
    );

    let request = Request::builder()
        .method("POST")
        .uri("/api/import")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, response) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["success"], false);
}
