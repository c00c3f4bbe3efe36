//! Notification document routes used by the display layer.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use ping_common::error::AppError;
use ping_common::types::{NotificationKind, NotificationRecord};

use crate::state::AppState;

/// Longest message accepted for an internal notification.
const MAX_MESSAGE_LEN: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications", post(create_notification))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/{id}/read", post(mark_read))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateNotification {
    pub kind: NotificationKind,
    pub message: String,
}

/// GET /api/notifications — Records newest-first, optionally only unread ones.
async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<NotificationRecord>>, AppError> {
    let mut records = state.store.load().await?;
    if query.unread {
        records.retain(|r| !r.read);
    }
    Ok(Json(records))
}

/// POST /api/notifications — Raise a `system` or `task` notification.
async fn create_notification(
    State(state): State<AppState>,
    Json(params): Json<CreateNotification>,
) -> Result<(StatusCode, Json<NotificationRecord>), AppError> {
    if params.kind == NotificationKind::Email {
        return Err(AppError::Validation(
            "email notifications are raised by the inbox poller".to_string(),
        ));
    }

    let message = params.message.trim();
    if message.is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }
    if message.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::Validation(format!(
            "message exceeds {MAX_MESSAGE_LEN} characters"
        )));
    }

    let record = NotificationRecord::internal(params.kind, message);
    state.store.push(record.clone()).await?;
    tracing::info!(id = %record.id, kind = %record.kind, "Notification raised");

    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /api/notifications/:id/read — Mark one record read.
async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.store.mark_read(&id).await? {
        Ok(Json(json!({"id": id, "read": true})))
    } else {
        Err(AppError::NotFound(format!("Notification {} not found", id)))
    }
}

/// POST /api/notifications/read-all — Mark every record read.
async fn mark_all_read(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state.store.mark_all_read().await?;
    Ok(Json(json!({"updated": updated})))
}
