//! User Repository Implementation
//!
//! PostgreSQL implementation of user account reads and the received-message
//! watermark update used by read receipts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{User, UserRepository};
use crate::shared::error::AppError;

/// PostgreSQL user repository implementation.
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Creates a new PgUserRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for user queries.
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
    fcm_token: Option<String>,
    notifications_enabled: bool,
    last_received_message_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> User {
        User {
            id: self.id,
            username: self.username,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            fcm_token: self.fcm_token,
            notifications_enabled: self.notifications_enabled,
            last_received_message_at: self.last_received_message_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, display_name, avatar_url, fcm_token,
                   notifications_enabled, last_received_message_at,
                   created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_user()))
    }

    /// The watermark only moves forward; an out-of-order receipt is a no-op.
    async fn update_received_message_time(
        &self,
        user_id: i64,
        received_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET last_received_message_at = $2, updated_at = NOW()
            WHERE id = $1
              AND (last_received_message_at IS NULL OR last_received_message_at < $2)
            "#,
        )
        .bind(user_id)
        .bind(received_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
