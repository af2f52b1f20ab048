//! Credential sync endpoint.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_response, sync_error_status, ApiError, AppState};
use crate::application::services::sync_service::{CredentialSyncRequest, SyncError};
use crate::domain::entities::platform::Platform;

#[derive(Debug, Deserialize)]
pub struct SyncRequestBody {
    pub platform: String,
    pub server: String,
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
}

/// POST /api/sync — connect with terminal credentials and import history.
pub async fn credential_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SyncRequestBody>,
) -> Result<Json<Value>, ApiError> {
    let platform: Platform = body
        .platform
        .parse()
        .map_err(|e: String| error_response(axum::http::StatusCode::BAD_REQUEST, e))?;

    let client_ip = client_ip(&headers);
    let request = CredentialSyncRequest {
        platform,
        server: body.server,
        login: body.login,
        password: body.password,
        start_date: body.start_date,
    };

    let outcome = state
        .sync
        .credential_sync(&state.config.default_user_id, &client_ip, &request)
        .await
        .map_err(|e| {
            let status = sync_error_status(&e);
            let mut body = json!({ "success": false, "error": e.to_string() });
            if let SyncError::RateLimited { retry_after } = &e {
                body["remaining_attempts"] = json!(0);
                body["retry_after_minutes"] = json!(retry_after.as_secs().div_ceil(60));
            }
            (status, Json(body))
        })?;

    Ok(Json(json!({
        "success": true,
        "accountInfo": outcome.account,
        "tradesImported": outcome.summary.imported,
        "totalTrades": outcome.summary.total,
        "message": format!(
            "Imported {} of {} trades ({} already existed)",
            outcome.summary.imported, outcome.summary.total, outcome.summary.skipped
        ),
    })))
}

/// Caller identity for the per-IP attempt budget. Proxied deployments put
/// the real address in X-Forwarded-For.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::persistence::init_database;
    use axum::http::StatusCode;

    async fn state() -> AppState {
        let pool = init_database("sqlite::memory:").await.unwrap();
        AppState::new(AppConfig::default(), pool)
    }

    fn body(login: &str) -> SyncRequestBody {
        SyncRequestBody {
            platform: "mt5".to_string(),
            server: "MetaQuotes-Demo".to_string(),
            login: login.to_string(),
            password: "secret-pass".to_string(),
            start_date: None,
        }
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "local");

        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.9");
    }

    #[tokio::test]
    async fn test_unknown_platform_is_bad_request() {
        let state = state().await;
        let mut request = body("5012345");
        request.platform = "etrade".to_string();

        let (status, _) = credential_sync(State(state), HeaderMap::new(), Json(request))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_login_is_bad_request() {
        let state = state().await;
        let (status, Json(response)) =
            credential_sync(State(state), HeaderMap::new(), Json(body("12")))
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["success"], false);
    }

    #[tokio::test]
    async fn test_rate_limit_answer_carries_retry_after() {
        let state = state().await;
        for _ in 0..5 {
            let _ = credential_sync(
                State(state.clone()),
                HeaderMap::new(),
                Json(body("12")),
            )
            .await;
        }

        let (status, Json(response)) =
            credential_sync(State(state), HeaderMap::new(), Json(body("12")))
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response["remaining_attempts"], 0);
        assert!(response["retry_after_minutes"].as_u64().unwrap() > 0);
    }
}
