//! File/report upload endpoint.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use super::{error_response, ApiError, AppState};
use crate::application::services::reconciler::ReconcileError;
use crate::domain::entities::platform::Platform;
use crate::domain::services::conversion::ImportOrigin;
use crate::domain::services::import::{self, FileFormat};

/// POST /api/import — multipart upload of an HTML or CSV trade report.
pub async fn import_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut file_name: Option<String> = None;
    let mut content: Option<String> = None;
    let mut platform: Option<Platform> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, format!("Malformed upload: {}", e))
    })? {
        match field.name() {
            Some("file") => {
                file_name = field.file_name().map(|s| s.to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    error_response(StatusCode::BAD_REQUEST, format!("Unreadable file: {}", e))
                })?;
                content = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            Some("platform") => {
                let value = field.text().await.map_err(|e| {
                    error_response(StatusCode::BAD_REQUEST, format!("Malformed upload: {}", e))
                })?;
                platform = Some(value.parse().map_err(|e: String| {
                    error_response(StatusCode::BAD_REQUEST, e)
                })?);
            }
            _ => {}
        }
    }

    let (Some(file_name), Some(content)) = (file_name, content) else {
        return Err(error_response(StatusCode::BAD_REQUEST, "No file uploaded"));
    };
    let platform = platform.unwrap_or(Platform::Mt5);

    let format = FileFormat::from_file_name(&file_name)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    let trades = import::parse_document(&content, format, platform)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    let summary = state
        .reconciler
        .import_batch(
            &state.config.default_user_id,
            None,
            &trades,
            ImportOrigin::File,
        )
        .await
        .map_err(|e| match e {
            ReconcileError::Invalid(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
            ReconcileError::Database(e) => {
                tracing::error!("File import failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to import file")
            }
        })?;

    info!(
        "File import {} ({}): {} imported, {} skipped of {}",
        file_name,
        platform.name(),
        summary.imported,
        summary.skipped,
        summary.total
    );

    Ok(Json(json!({
        "success": true,
        "trades_imported": summary.imported,
        "duplicates_skipped": summary.skipped,
        "total_trades": summary.total,
        "message": format!(
            "Imported {} of {} trades from {}",
            summary.imported, summary.total, file_name
        ),
    })))
}
