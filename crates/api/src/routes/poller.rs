//! Inbox poller control routes.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use ping_common::error::AppError;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/poller", get(poller_status))
        .route("/api/poller/start", post(start_poller))
        .route("/api/poller/stop", post(stop_poller))
        .route("/api/poller/check", post(force_check))
}

/// GET /api/poller — Current state and schedule.
///
/// Reads the state channel, so it answers while a forced check holds the poller.
async fn poller_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let poller_state = *state.poller_state.borrow();
    Json(json!({
        "state": poller_state,
        "source": state.config.source.to_string(),
        "interval_secs": state.config.poll_interval_secs,
        "notifications_path": state.config.notifications_path.display().to_string()
    }))
}

/// POST /api/poller/start — Acquire a session and start polling.
async fn start_poller(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let mut poller = state.poller.lock().await;
    poller.start().await?;
    Ok(Json(json!({"state": poller.state()})))
}

/// POST /api/poller/stop — Stop polling; idempotent.
async fn stop_poller(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut poller = state.poller.lock().await;
    poller.stop().await;
    Json(json!({"state": poller.state()}))
}

/// POST /api/poller/check — Re-baseline the inbox and run a cycle now.
async fn force_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let poller = state.poller.lock().await;
    if !poller.is_running() {
        return Err(AppError::Poller("inbox poller is not running".to_string()));
    }

    let completed = poller.force_check().await;
    Ok(Json(json!({"completed": completed})))
}
