//! Broker account management routes.
//!
//! CRUD over the brokers table plus the two connector-driven actions
//! (reconnect, API sync). A broker is one platform account; registering the
//! same (platform, account number) twice is rejected. Deleting a broker
//! detaches its trades instead of deleting them, the journal outlives the
//! connection that filled it.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::{error_response, sync_error_status, ApiError, AppState};
use crate::domain::entities::platform::Platform;
use crate::persistence::models::{BrokerRecord, NewBroker, UpdateBroker};
use crate::persistence::repository::{BrokerRepository, TradeRepository};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerBody {
    pub name: String,
    pub platform: String,
    pub account_id: String,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub leverage: Option<i64>,
    #[serde(default)]
    pub company: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl BrokerBody {
    fn validate(&self) -> Result<Platform, ApiError> {
        if self.name.trim().is_empty() {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "Broker name is required",
            ));
        }
        if self.account_id.trim().is_empty() {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "Account number is required",
            ));
        }
        self.platform
            .parse()
            .map_err(|e: String| error_response(StatusCode::BAD_REQUEST, e))
    }
}

/// POST /api/brokers
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<BrokerBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let platform = body.validate()?;
    let repo = BrokerRepository::new(state.pool.clone());
    let user_id = &state.config.default_user_id;

    let existing = repo
        .find_by_account(user_id, platform.name(), &body.account_id, None)
        .await
        .map_err(internal)?;
    if existing.is_some() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "A broker for this platform and account number already exists",
        ));
    }

    let record = repo
        .create(NewBroker {
            id: new_broker_id(),
            user_id: user_id.clone(),
            name: body.name,
            platform: platform.name().to_string(),
            account_id: body.account_id,
            server: body.server,
            username: body.username,
            password: body.password,
            api_key: body.api_key,
            api_secret: body.api_secret,
            currency: body.currency,
            leverage: body.leverage,
            company: body.company,
        })
        .await
        .map_err(internal)?;

    Ok((StatusCode::CREATED, Json(broker_json(&record, None))))
}

/// GET /api/brokers
pub async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let repo = BrokerRepository::new(state.pool.clone());
    let trades = TradeRepository::new(state.pool.clone());

    let records = repo
        .list(&state.config.default_user_id)
        .await
        .map_err(internal)?;

    let mut brokers = Vec::with_capacity(records.len());
    for record in records {
        let count = trades.count_for_broker(&record.id).await.map_err(internal)?;
        brokers.push(broker_json(&record, Some(count)));
    }

    Ok(Json(Value::Array(brokers)))
}

/// GET /api/brokers/:id
pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let repo = BrokerRepository::new(state.pool.clone());
    let record = repo
        .get(&id, &state.config.default_user_id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;

    let trades = TradeRepository::new(state.pool.clone());
    let count = trades.count_for_broker(&record.id).await.map_err(internal)?;

    Ok(Json(broker_json(&record, Some(count))))
}

/// PUT /api/brokers/:id
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<BrokerBody>,
) -> Result<Json<Value>, ApiError> {
    let platform = body.validate()?;
    let repo = BrokerRepository::new(state.pool.clone());
    let user_id = &state.config.default_user_id;

    repo.get(&id, user_id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;

    let duplicate = repo
        .find_by_account(user_id, platform.name(), &body.account_id, Some(&id))
        .await
        .map_err(internal)?;
    if duplicate.is_some() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Another broker for this platform and account number already exists",
        ));
    }

    let record = repo
        .update(
            &id,
            UpdateBroker {
                name: body.name,
                platform: platform.name().to_string(),
                account_id: body.account_id,
                server: body.server,
                username: body.username,
                password: body.password,
                api_key: body.api_key,
                api_secret: body.api_secret,
                currency: body.currency,
                leverage: body.leverage,
                company: body.company,
            },
        )
        .await
        .map_err(internal)?;

    Ok(Json(broker_json(&record, None)))
}

/// DELETE /api/brokers/:id
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let repo = BrokerRepository::new(state.pool.clone());

    repo.get(&id, &state.config.default_user_id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;

    repo.delete(&id).await.map_err(internal)?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/brokers/:id/reconnect
pub async fn reconnect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = state
        .sync
        .reconnect_broker(&state.config.default_user_id, &id)
        .await
        .map_err(|e| error_response(sync_error_status(&e), e.to_string()))?;

    Ok(Json(json!({
        "success": status == crate::domain::entities::broker::BrokerStatus::Connected,
        "status": status.as_str(),
    })))
}

/// POST /api/brokers/:id/sync
pub async fn sync_broker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .sync
        .sync_broker(&state.config.default_user_id, &id)
        .await
        .map_err(|e| error_response(sync_error_status(&e), e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Imported {} of {} trades ({} already existed)",
            outcome.summary.imported, outcome.summary.total, outcome.summary.skipped
        ),
        "imported_count": outcome.summary.imported,
        "skipped_count": outcome.summary.skipped,
        "total_trades": outcome.summary.total,
    })))
}

/// Broker as exposed over the API. Stored secrets never leave the service;
/// the response only says whether they are set.
fn broker_json(record: &BrokerRecord, trades_count: Option<i64>) -> Value {
    let mut value = json!({
        "id": record.id,
        "name": record.name,
        "platform": record.platform,
        "accountId": record.account_id,
        "server": record.server,
        "username": record.username,
        "hasPassword": record.password.as_deref().is_some_and(|s| !s.is_empty()),
        "hasApiKey": record.api_key.as_deref().is_some_and(|s| !s.is_empty()),
        "currency": record.currency,
        "leverage": record.leverage,
        "company": record.company,
        "status": record.status,
        "lastSync": record.last_sync,
        "createdAt": record.created_at,
        "updatedAt": record.updated_at,
    });
    if let Some(count) = trades_count {
        value["tradesCount"] = json!(count);
    }
    value
}

fn new_broker_id() -> String {
    format!(
        "broker_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

fn not_found() -> ApiError {
    error_response(StatusCode::NOT_FOUND, "Broker not found")
}

fn internal(e: crate::persistence::DatabaseError) -> ApiError {
    error!("Broker route database error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::persistence::init_database;

    async fn state() -> AppState {
        let pool = init_database("sqlite::memory:").await.unwrap();
        AppState::new(AppConfig::default(), pool)
    }

    fn body(name: &str, platform: &str, account_id: &str) -> BrokerBody {
        BrokerBody {
            name: name.to_string(),
            platform: platform.to_string(),
            account_id: account_id.to_string(),
            server: Some("Demo-Server".to_string()),
            username: None,
            password: Some("secret-pass".to_string()),
            api_key: None,
            api_secret: None,
            currency: "USD".to_string(),
            leverage: Some(100),
            company: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let state = state().await;
        let (status, Json(created)) = create(
            State(state.clone()),
            Json(body("IC Markets", "mt5", "5012345")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "disconnected");
        assert_eq!(created["hasPassword"], true);
        assert!(created.get("password").is_none());

        let Json(listing) = list(State(state)).await.unwrap();
        let brokers = listing.as_array().unwrap();
        assert_eq!(brokers.len(), 1);
        assert_eq!(brokers[0]["accountId"], "5012345");
        assert_eq!(brokers[0]["tradesCount"], 0);
    }

    #[tokio::test]
    async fn test_duplicate_account_rejected() {
        let state = state().await;
        create(
            State(state.clone()),
            Json(body("IC Markets", "mt5", "5012345")),
        )
        .await
        .unwrap();

        let (status, Json(response)) = create(
            State(state.clone()),
            Json(body("Same account again", "mt5", "5012345")),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["success"], false);

        // same account on another platform is fine
        let result = create(State(state), Json(body("MT4 twin", "mt4", "5012345"))).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_validation_rejects_blank_name_and_unknown_platform() {
        let state = state().await;

        let (status, _) = create(State(state.clone()), Json(body("  ", "mt5", "1")))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = create(State(state), Json(body("Name", "etrade", "1")))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_checks_duplicate_excluding_self() {
        let state = state().await;
        let (_, Json(first)) = create(
            State(state.clone()),
            Json(body("First", "mt5", "111111")),
        )
        .await
        .unwrap();
        create(State(state.clone()), Json(body("Second", "mt5", "222222")))
            .await
            .unwrap();

        let id = first["id"].as_str().unwrap().to_string();

        // renaming without changing the account is allowed
        let updated = update(
            State(state.clone()),
            Path(id.clone()),
            Json(body("First renamed", "mt5", "111111")),
        )
        .await
        .unwrap();
        assert_eq!(updated.0["name"], "First renamed");

        // taking the second broker's account is not
        let (status, _) = update(
            State(state),
            Path(id),
            Json(body("First", "mt5", "222222")),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_fetch_and_delete_unknown_broker() {
        let state = state().await;

        let (status, _) = fetch(State(state.clone()), Path("ghost".to_string()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = remove(State(state), Path("ghost".to_string()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sync_route_maps_validation_errors() {
        let state = state().await;
        let (_, Json(created)) = create(
            State(state.clone()),
            Json(body("Terminal account", "mt5", "333333")),
        )
        .await
        .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        // MT5 has no API-key sync path
        let (status, Json(response)) = sync_broker(State(state), Path(id)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["success"], false);
    }
}
