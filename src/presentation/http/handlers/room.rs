//! Room Handlers

use axum::{
    extract::{Path, Query, State},
    http::header::AUTHORIZATION,
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::ChatMessage;
use crate::presentation::websocket::handler::validate_token;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Create-room request body.
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    /// Users enrolled alongside the creator
    pub participant_ids: Vec<i64>,
}

/// Create-room response body.
#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub id: i64,
    pub name: String,
    pub member_ids: Vec<i64>,
}

/// `POST /api/rooms`
pub async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<RoomResponse>, AppError> {
    let creator_id = bearer_user(&headers, &state.settings.jwt.secret)?;

    if request.name.trim().is_empty() {
        return Err(AppError::BadRequest("Room name must not be empty".into()));
    }

    let room = state
        .room_service
        .create(request.name, creator_id, request.participant_ids)
        .await?;

    Ok(Json(RoomResponse {
        id: room.id,
        name: room.name,
        member_ids: room.member_ids,
    }))
}

/// History query parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// `GET /api/rooms/{id}/messages`
pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let _user_id = bearer_user(&headers, &state.settings.jwt.secret)?;

    let messages = state
        .messages
        .list_room_messages(room_id, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(messages))
}

/// Pull the acting user out of a `Bearer` token.
fn bearer_user(headers: &HeaderMap, secret: &str) -> Result<i64, AppError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))?;
    validate_token(token, secret)
}
