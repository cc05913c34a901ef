//! Chat message entity and repository trait.
//!
//! Maps to the `messages` table. `room_id` is NULL for one-to-one traffic;
//! room-addressed messages carry the room id and no receiver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// A persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Primary key (database-assigned)
    pub id: i64,

    /// Room the message was addressed to; None for one-to-one messages
    pub room_id: Option<i64>,

    pub sender_id: i64,

    /// Receiver for one-to-one messages; None for room messages
    pub receiver_id: Option<i64>,

    pub body: String,

    pub sent_at: DateTime<Utc>,

    /// When the receiver acknowledged the message; None until read
    pub read_at: Option<DateTime<Utc>>,
}

/// Fields needed to persist a new message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: Option<i64>,
    pub sender_id: i64,
    pub receiver_id: Option<i64>,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// One chat partner with the latest message exchanged, for the chats list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPartner {
    pub partner_id: i64,
    pub partner_name: String,
    pub last_body: String,
    pub last_at: DateTime<Utc>,
}

/// Message repository contract, implemented in the infrastructure layer.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist a message and return it with its assigned id.
    async fn save(&self, message: NewMessage) -> Result<ChatMessage, AppError>;

    /// List messages in a room, newest first.
    async fn list_room_messages(
        &self,
        room_id: i64,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, AppError>;

    /// List one-to-one messages exchanged between two users, newest first.
    async fn list_between(
        &self,
        user_a: i64,
        user_b: i64,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, AppError>;

    /// List the users this user has one-to-one chats with, most recent
    /// conversation first.
    async fn list_chat_partners(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ChatPartner>, AppError>;

    /// Mark one-to-one messages from `sender_id` to `receiver_id` as read.
    async fn mark_read(
        &self,
        sender_id: i64,
        receiver_id: i64,
        read_at: DateTime<Utc>,
    ) -> Result<(), AppError>;
}
