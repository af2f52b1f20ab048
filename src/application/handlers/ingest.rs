//! Inbound terminal push endpoint.
//!
//! MT5 terminals (an EA with a tiny HTTP client) push tagged messages here:
//! ping, heartbeat, disconnect, account snapshots and closed trades. Trades
//! go through the reconciler, so a terminal re-sending a ticket gets a
//! success answer with the existing trade id instead of a duplicate row.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{error_response, ApiError, AppState};
use crate::application::services::reconciler::{ImportOutcome, ReconcileError};
use crate::domain::entities::account::TerminalAccount;
use crate::domain::entities::platform::Platform;
use crate::domain::entities::trade::{CanonicalTrade, TradeSide};
use crate::domain::services::conversion::{self, ImportOrigin, JournalEntry};

/// POST /api/ingest — dispatch by the message's `type` tag.
pub async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let app_id = body["appId"].as_str().unwrap_or("").to_string();

    match body["type"].as_str() {
        Some("ping") => {
            info!("Terminal ping from {}", app_id);
            Ok(Json(json!({
                "success": true,
                "message": "Pong",
                "timestamp": Utc::now().timestamp_millis(),
                "serverTime": Utc::now().to_rfc3339(),
            })))
        }
        Some("heartbeat") => {
            state.registry.touch(&app_id).await;
            Ok(Json(json!({ "success": true, "message": "Heartbeat received" })))
        }
        Some("disconnect") => {
            state.registry.mark_inactive(&app_id).await;
            Ok(Json(json!({ "success": true, "message": "Disconnect acknowledged" })))
        }
        Some("account") => handle_account(&state, &app_id, &body).await,
        Some("trade") => handle_trade(&state, &app_id, &body).await,
        _ => Err(error_response(
            StatusCode::BAD_REQUEST,
            "Unknown message type",
        )),
    }
}

async fn handle_account(
    state: &AppState,
    app_id: &str,
    body: &Value,
) -> Result<Json<Value>, ApiError> {
    let account: TerminalAccount = serde_json::from_value(body["account"].clone())
        .map_err(|e| {
            warn!("Rejected account message from {}: {}", app_id, e);
            error_response(StatusCode::BAD_REQUEST, "Invalid account data format")
        })?;

    let echoed = body["account"].clone();
    state.registry.upsert_account(app_id, account).await;

    Ok(Json(json!({
        "success": true,
        "message": "Account info received",
        "account": echoed,
    })))
}

async fn handle_trade(
    state: &AppState,
    app_id: &str,
    body: &Value,
) -> Result<Json<Value>, ApiError> {
    let (Some(trade_data), Some(account)) = (body.get("trade"), body.get("account")) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Missing trade or account data",
        ));
    };

    let trade = parse_pushed_trade(trade_data).ok_or_else(|| {
        warn!("Rejected trade message from {}", app_id);
        error_response(StatusCode::BAD_REQUEST, "Invalid trade data format")
    })?;

    let login = account["login"].as_i64().unwrap_or(0);
    let server = account["server"].as_str().unwrap_or("").to_string();

    // a pushed trade is as good as a heartbeat
    state.registry.touch(app_id).await;

    let entry = JournalEntry {
        date: trade.exit_time,
        fees: trade.total_fees(),
        strategy: conversion::strategy_label(trade.platform, ImportOrigin::Sync),
        notes: conversion::terminal_notes(&trade, &server, login),
        tags: conversion::terminal_tags(trade.platform, &server),
    };

    let outcome = state
        .reconciler
        .import_with_entry(&state.config.default_user_id, None, &trade, &entry)
        .await
        .map_err(|e| match e {
            ReconcileError::Invalid(e) => {
                error_response(StatusCode::BAD_REQUEST, e.to_string())
            }
            ReconcileError::Database(e) => {
                tracing::error!("Trade ingest failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to import trade")
            }
        })?;

    match outcome {
        ImportOutcome::Imported(record) => Ok(Json(json!({
            "success": true,
            "tradeId": record.id,
            "message": "Trade imported successfully",
            "trade": {
                "id": record.id,
                "symbol": record.symbol,
                "side": record.side,
                "pnl": trade.profit,
            },
        }))),
        ImportOutcome::Duplicate(existing) => Ok(Json(json!({
            "success": true,
            "message": "Trade already exists",
            "tradeId": existing.id,
        }))),
    }
}

/// GET /api/ingest — registry listing with per-session liveness.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let now = Utc::now();
    let connections: Vec<Value> = state
        .registry
        .snapshot()
        .await
        .into_iter()
        .map(|(app_id, record)| {
            json!({
                "appId": app_id,
                "account": {
                    "login": record.account.login,
                    "server": record.account.server,
                    "currency": record.account.currency,
                    "balance": record.account.balance,
                    "equity": record.account.equity,
                },
                "lastHeartbeat": record.last_heartbeat.to_rfc3339(),
                "secondsSinceHeartbeat": (now - record.last_heartbeat).num_seconds(),
                "status": record.status.as_str(),
                "isOnline": record.is_online_at(now),
            })
        })
        .collect();

    let online = connections
        .iter()
        .filter(|c| c["isOnline"].as_bool() == Some(true))
        .count();

    Json(json!({
        "success": true,
        "totalConnections": connections.len(),
        "onlineConnections": online,
        "connections": connections,
    }))
}

/// Terminal trade payload: MT5 field spellings, Unix-second times, type
/// 0 = buy.
fn parse_pushed_trade(data: &Value) -> Option<CanonicalTrade> {
    let ticket = data["ticket"].as_i64()?;
    let entry_time = Utc.timestamp_opt(data["openTime"].as_i64()?, 0).single()?;
    let exit_time = Utc.timestamp_opt(data["closeTime"].as_i64()?, 0).single()?;

    Some(CanonicalTrade {
        external_id: ticket.to_string(),
        symbol: data["symbol"].as_str()?.to_string(),
        side: if data["type"].as_i64()? == 0 {
            TradeSide::Long
        } else {
            TradeSide::Short
        },
        quantity: data["volume"].as_f64()?,
        entry_price: data["openPrice"].as_f64()?,
        exit_price: data["closePrice"].as_f64()?,
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
