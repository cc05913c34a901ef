//! # Domain Entities
//!
//! Core domain entities representing the main business objects of the
//! service. All entities map directly to their corresponding database tables.
//!
//! ## Entities
//!
//! - **User**: Account, profile, and push-delivery preferences
//! - **Movie**: Catalogue metadata users chat about
//! - **ChatMessage**: A persisted one-to-one or room message
//! - **Room**: A named group of users addressed together
//!
//! ## Repository Traits
//!
//! Each entity has an associated repository trait defining data access
//! operations. These traits are implemented in the infrastructure layer,
//! following the dependency inversion principle.

mod message;
mod movie;
mod room;
mod user;

pub use message::{ChatMessage, ChatPartner, MessageRepository, NewMessage};
pub use movie::{Movie, MovieRepository};
pub use room::{NewRoom, Room, RoomRepository};
pub use user::{User, UserRepository};
