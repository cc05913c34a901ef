//! Real-time Messaging Layer
//!
//! The presence hub, per-connection session loops, the inbound message
//! router, and the wire envelope they share.

pub mod envelope;
pub mod handler;
pub mod hub;
pub mod router;
pub mod session;

pub use envelope::{Action, Envelope, NO_ROOM};
pub use handler::ws_handler;
pub use hub::{DeliveryOutcome, DirectMessage, Hub, HubHandle, SessionHandle};
pub use router::MessageRouter;
pub use session::{run_session, SessionIdentity};
