//! Room Repository Implementation
//!
//! PostgreSQL implementation of room creation and lookup. Room creation
//! inserts the room and its initial membership in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{NewRoom, Room, RoomRepository};
use crate::shared::error::AppError;

/// PostgreSQL room repository implementation.
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    /// Creates a new PgRoomRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for room queries.
#[derive(Debug, sqlx::FromRow)]
struct RoomRow {
    id: i64,
    name: String,
    created_by: i64,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn create(&self, room: NewRoom) -> Result<Room, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, RoomRow>(
            r#"
            INSERT INTO rooms (name, created_by)
            VALUES ($1, $2)
            RETURNING id, name, created_by, created_at
            "#,
        )
        .bind(&room.name)
        .bind(room.created_by)
        .fetch_one(&mut *tx)
        .await?;

        for member_id in &room.member_ids {
            sqlx::query(
                r#"
                INSERT INTO room_members (room_id, user_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(row.id)
            .bind(member_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Room {
            id: row.id,
            name: row.name,
            created_by: row.created_by,
            member_ids: room.member_ids,
            created_at: row.created_at,
        })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Room>, AppError> {
        let row = sqlx::query_as::<_, RoomRow>(
            r#"
            SELECT id, name, created_by, created_at
            FROM rooms
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let member_ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM room_members
            WHERE room_id = $1
            ORDER BY user_id
            "#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Room {
            id: row.id,
            name: row.name,
            created_by: row.created_by,
            member_ids,
            created_at: row.created_at,
        }))
    }
}
