//! Notification Subsystem
//!
//! Broker-carried notification events and the fan-out worker pool that
//! turns them into push notifications.

mod fanout;

pub use fanout::NotificationFanout;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A domain event carried on the `notification` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NotificationEvent {
    /// A message for a receiver who was offline when it was sent.
    NewMessage {
        message_id: i64,
        sender_id: i64,
        receiver_id: i64,
        /// Truncated message body shown in the notification
        preview: String,
        sent_at: DateTime<Utc>,
    },
    /// Someone started following a user.
    NewFollow {
        follower_id: i64,
        followee_id: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn event_round_trips_with_kind_tag() {
        let event = NotificationEvent::NewMessage {
            message_id: 42,
            sender_id: 1,
            receiver_id: 2,
            preview: "you free friday?".into(),
            sent_at: "2026-02-01T09:30:00Z".parse().unwrap(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"new-message""#));

        let decoded: NotificationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn unknown_kind_fails_to_decode() {
        let result: Result<NotificationEvent, _> =
            serde_json::from_str(r#"{"kind":"new-reaction","user_id":1}"#);
        assert!(result.is_err());
    }
}
