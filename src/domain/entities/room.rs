//! Room entity and repository trait.
//!
//! Maps to the `rooms` and `room_members` tables. A room is a named group of
//! users addressed together; live membership of connected sessions is the
//! hub's concern, not the database's.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// A persisted chat room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    /// Primary key (database-assigned)
    pub id: i64,

    pub name: String,

    pub created_by: i64,

    /// User ids enrolled in the room
    pub member_ids: Vec<i64>,

    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a room.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub created_by: i64,
    pub member_ids: Vec<i64>,
}

/// Room repository contract, implemented in the infrastructure layer.
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Create a room with its initial members and return it with its id.
    async fn create(&self, room: NewRoom) -> Result<Room, AppError>;

    /// Find a room by id. Returns None if the room does not exist.
    async fn find_by_id(&self, id: i64) -> Result<Option<Room>, AppError>;
}
