//! User entity and repository trait.
//!
//! Maps to the `users` table in the database schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Represents a user account.
///
/// Maps to the `users` table:
/// - id: BIGINT PRIMARY KEY
/// - username: VARCHAR(32) NOT NULL UNIQUE
/// - display_name: VARCHAR(64) NULL
/// - avatar_url: TEXT NULL
/// - fcm_token: TEXT NULL
/// - notifications_enabled: BOOLEAN NOT NULL DEFAULT TRUE
/// - last_received_message_at: TIMESTAMPTZ NULL
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// - updated_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Primary key
    pub id: i64,

    /// Username (unique)
    pub username: String,

    /// Optional display name shown in chats and notifications
    pub display_name: Option<String>,

    /// Avatar image URL
    pub avatar_url: Option<String>,

    /// Device token for push delivery; None when no device registered
    pub fcm_token: Option<String>,

    /// Whether the user accepts push notifications
    pub notifications_enabled: bool,

    /// Watermark of the newest message the user has acknowledged receiving
    pub last_received_message_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Name to show in chat traffic and notifications.
    pub fn visible_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// User repository contract, implemented in the infrastructure layer.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find a user by id. Returns None if the user does not exist.
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError>;

    /// Move the received-message watermark for a user forward.
    async fn update_received_message_time(
        &self,
        user_id: i64,
        received_at: DateTime<Utc>,
    ) -> Result<(), AppError>;
}
