//! WebSocket Connection Handler
//!
//! Upgrade endpoint: validates the JWT from the query string, resolves the
//! account, and hands the socket to the session loops.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use super::session::{run_session, SessionIdentity};
use crate::shared::error::AppError;
use crate::startup::AppState;

/// JWT claims for token validation
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Upgrade query parameters.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
    /// Room to join for the lifetime of this connection
    room: Option<i64>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let user_id = validate_token(&query.token, &state.settings.jwt.secret)?;

    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Unknown user".into()))?;

    let identity = SessionIdentity {
        user_id,
        username: user.visible_name().to_string(),
    };
    let router = state.router.clone();
    let hub = state.hub.clone();
    let chat_settings = state.settings.chat.clone();

    Ok(ws.on_upgrade(move |socket| {
        run_session(socket, identity, query.room, router, hub, chat_settings)
    }))
}

/// Validate a JWT and return the user id it names.
pub fn validate_token(token: &str, secret: &str) -> Result<i64, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;

    token_data
        .claims
        .sub
        .parse::<i64>()
        .map_err(|_| AppError::Unauthorized("Invalid user id in token".into()))
}
