//! Movie entity and repository trait.
//!
//! Maps to the `movies` table. Movie metadata is read-mostly glue around the
//! chat core; writes happen through an ingestion job outside this service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// A movie known to the catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movie {
    /// Primary key
    pub id: i64,

    pub title: String,

    /// Short synopsis
    pub overview: Option<String>,

    /// Poster image URL
    pub poster_url: Option<String>,

    /// Compact placeholder hash for the poster, computed off-process
    pub blur_hash: Option<String>,

    pub release_year: Option<i32>,

    pub created_at: DateTime<Utc>,
}

/// Movie repository contract, implemented in the infrastructure layer.
#[async_trait]
pub trait MovieRepository: Send + Sync {
    /// Find a movie by id. Returns None if the movie does not exist.
    async fn find_by_id(&self, id: i64) -> Result<Option<Movie>, AppError>;

    /// List the most recently added movies, newest first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<Movie>, AppError>;
}
