//! Movie Handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::domain::Movie;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// `GET /api/movies/{id}`
pub async fn get_movie(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Movie>, AppError> {
    let movie = state
        .movies
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", id)))?;

    Ok(Json(movie))
}

/// List query parameters.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// `GET /api/movies`
pub async fn list_recent(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Movie>>, AppError> {
    let movies = state.movies.list_recent(query.limit.unwrap_or(20)).await?;
    Ok(Json(movies))
}
