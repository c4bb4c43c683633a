//! API Routes

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::Error;
use crate::models::ApiResponse;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Rooms
        .route("/api/rooms", get(list_rooms))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/:id", get(get_room))
        .route("/api/rooms/:id", delete(delete_room))
        .route("/api/rooms/:id/refresh-roster", post(refresh_roster))
        // Sync
        .route("/api/sync", post(trigger_sync))
        .route("/api/sync/status", get(sync_status))
        .with_state(state)
}

// ========================================
// Room Handlers
// ========================================

async fn list_rooms(State(state): State<AppState>) -> impl IntoResponse {
    let rooms = state.registry.describe_all().await;
    Json(ApiResponse::success(rooms))
}

async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let snapshot = state
        .registry
        .describe(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("room {} not registered", id)))?;
    Ok(Json(ApiResponse::success(snapshot)))
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
    room_id: String,
    source_locator: String,
    display_code: String,
}

async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, Error> {
    state
        .registry
        .create(&req.room_id, &req.source_locator, &req.display_code)
        .await?;

    let snapshot = state.registry.describe(&req.room_id).await;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn delete_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    state.registry.remove(&id).await?;
    Ok(Json(ApiResponse::success(json!({ "room_id": id }))))
}

async fn refresh_roster(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let entries = state.registry.refresh_roster(&id).await?;
    Ok(Json(ApiResponse::success(json!({
        "room_id": id,
        "entries": entries
    }))))
}

// ========================================
// Sync Handlers
// ========================================

async fn trigger_sync(State(state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let summary = state.sync.sync_once().await?;
    Ok(Json(ApiResponse::success(summary)))
}

async fn sync_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.sync.state().await))
}
