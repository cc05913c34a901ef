//! Message Repository Implementation
//!
//! PostgreSQL implementation of chat message persistence for both
//! one-to-one and room-addressed traffic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{ChatMessage, ChatPartner, MessageRepository, NewMessage};
use crate::shared::error::AppError;

/// PostgreSQL message repository implementation.
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    /// Creates a new PgMessageRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for message queries.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    room_id: Option<i64>,
    sender_id: i64,
    receiver_id: Option<i64>,
    body: String,
    sent_at: DateTime<Utc>,
    read_at: Option<DateTime<Utc>>,
}

/// Internal row type for the chat-partners query.
#[derive(Debug, sqlx::FromRow)]
struct PartnerRow {
    partner_id: i64,
    partner_name: String,
    last_body: String,
    last_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            body: self.body,
            sent_at: self.sent_at,
            read_at: self.read_at,
        }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn save(&self, message: NewMessage) -> Result<ChatMessage, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (room_id, sender_id, receiver_id, body, sent_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, room_id, sender_id, receiver_id, body, sent_at, read_at
            "#,
        )
        .bind(message.room_id)
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(&message.body)
        .bind(message.sent_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_message())
    }

    async fn list_room_messages(
        &self,
        room_id: i64,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let limit = limit.clamp(1, 100);

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, room_id, sender_id, receiver_id, body, sent_at, read_at
            FROM messages
            WHERE room_id = $1
            ORDER BY sent_at DESC
            LIMIT $2
            "#,
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_message()).collect())
    }

    async fn list_between(
        &self,
        user_a: i64,
        user_b: i64,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let limit = limit.clamp(1, 100);

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, room_id, sender_id, receiver_id, body, sent_at, read_at
            FROM messages
            WHERE room_id IS NULL
              AND ((sender_id = $1 AND receiver_id = $2)
                OR (sender_id = $2 AND receiver_id = $1))
            ORDER BY sent_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_message()).collect())
    }

    async fn list_chat_partners(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ChatPartner>, AppError> {
        let limit = limit.clamp(1, 100);

        let rows = sqlx::query_as::<_, PartnerRow>(
            r#"
            SELECT DISTINCT ON (partner_id)
                   CASE WHEN m.sender_id = $1 THEN m.receiver_id ELSE m.sender_id END AS partner_id,
                   COALESCE(u.display_name, u.username) AS partner_name,
                   m.body AS last_body,
                   m.sent_at AS last_at
            FROM messages m
            JOIN users u
              ON u.id = CASE WHEN m.sender_id = $1 THEN m.receiver_id ELSE m.sender_id END
            WHERE m.room_id IS NULL
              AND (m.sender_id = $1 OR m.receiver_id = $1)
            ORDER BY partner_id, m.sent_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut partners: Vec<ChatPartner> = rows
            .into_iter()
            .map(|r| ChatPartner {
                partner_id: r.partner_id,
                partner_name: r.partner_name,
                last_body: r.last_body,
                last_at: r.last_at,
            })
            .collect();
        // DISTINCT ON orders by partner; the list itself should read
        // most-recent-conversation-first.
        partners.sort_by(|a, b| b.last_at.cmp(&a.last_at));

        Ok(partners)
    }

    async fn mark_read(
        &self,
        sender_id: i64,
        receiver_id: i64,
        read_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE messages
            SET read_at = $3
            WHERE room_id IS NULL
              AND sender_id = $1 AND receiver_id = $2
              AND read_at IS NULL
              AND sent_at <= $3
            "#,
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(read_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
