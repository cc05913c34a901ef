//! Movie Repository Implementation
//!
//! PostgreSQL implementation of catalogue reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Movie, MovieRepository};
use crate::shared::error::AppError;

/// PostgreSQL movie repository implementation.
pub struct PgMovieRepository {
    pool: PgPool,
}

impl PgMovieRepository {
    /// Creates a new PgMovieRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for movie queries.
#[derive(Debug, sqlx::FromRow)]
struct MovieRow {
    id: i64,
    title: String,
    overview: Option<String>,
    poster_url: Option<String>,
    blur_hash: Option<String>,
    release_year: Option<i32>,
    created_at: DateTime<Utc>,
}

impl MovieRow {
    fn into_movie(self) -> Movie {
        Movie {
            id: self.id,
            title: self.title,
            overview: self.overview,
            poster_url: self.poster_url,
            blur_hash: self.blur_hash,
            release_year: self.release_year,
            created_at: self.created_at,
        }
    }
}

#[async_trait]
impl MovieRepository for PgMovieRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Movie>, AppError> {
        let row = sqlx::query_as::<_, MovieRow>(
            r#"
            SELECT id, title, overview, poster_url, blur_hash, release_year, created_at
            FROM movies
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_movie()))
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Movie>, AppError> {
        // Cap limit to prevent excessive queries
        let limit = limit.clamp(1, 100);

        let rows = sqlx::query_as::<_, MovieRow>(
            r#"
            SELECT id, title, overview, poster_url, blur_hash, release_year, created_at
            FROM movies
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_movie()).collect())
    }
}
