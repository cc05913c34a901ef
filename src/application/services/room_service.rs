//! Room Service
//!
//! Room creation: persist the room, then bind it into the hub so whichever
//! participants are currently connected become present members.

use std::sync::Arc;

use crate::domain::{NewRoom, Room, RoomRepository};
use crate::presentation::websocket::HubHandle;
use crate::shared::error::AppError;

/// Creates rooms and keeps the hub in sync.
pub struct RoomService {
    rooms: Arc<dyn RoomRepository>,
    hub: HubHandle,
}

impl RoomService {
    pub fn new(rooms: Arc<dyn RoomRepository>, hub: HubHandle) -> Self {
        Self { rooms, hub }
    }

    /// Create a room enrolling the creator and the given participants.
    ///
    /// The hub is only told about the room once persistence succeeds; a
    /// failed insert leaves no trace in the registries.
    pub async fn create(
        &self,
        name: String,
        created_by: i64,
        mut participant_ids: Vec<i64>,
    ) -> Result<Room, AppError> {
        if !participant_ids.contains(&created_by) {
            participant_ids.push(created_by);
        }

        let room = self
            .rooms
            .create(NewRoom {
                name,
                created_by,
                member_ids: participant_ids,
            })
            .await?;

        self.hub.bind_room(room.id, room.member_ids.clone()).await;
        tracing::info!(room_id = room.id, members = room.member_ids.len(), "Room created");

        Ok(room)
    }
}
