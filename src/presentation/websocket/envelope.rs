//! Wire Envelope
//!
//! The JSON contract shared between connected clients, the hub, and
//! broker-carried events: an `action` string plus exactly one populated
//! payload field per action. Absent payloads are omitted from the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved room id signaling one-to-one traffic.
pub const NO_ROOM: i64 = -1;

/// Envelope actions as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "send-new-message")]
    SendNewMessage,
    #[serde(rename = "receive-new-message")]
    ReceiveNewMessage,
    #[serde(rename = "new-message-send-result")]
    NewMessageSendResult,
    #[serde(rename = "message-read")]
    MessageRead,
    #[serde(rename = "receive-message-state")]
    ReceiveMessageState,
    #[serde(rename = "action-error")]
    ActionError,
    #[serde(rename = "new-follow-notification")]
    NewFollowNotification,
    #[serde(rename = "new-message-notification")]
    NewMessageNotification,
    #[serde(rename = "update-profile-images")]
    UpdateProfileImages,
    #[serde(rename = "update-profile")]
    UpdateProfile,
    #[serde(rename = "single-chats-list")]
    SingleChatsList,
    #[serde(rename = "single-chat-messages")]
    SingleChatMessages,
    #[serde(rename = "notification-settings")]
    NotificationSettings,
    #[serde(rename = "user-status")]
    UserStatus,
}

/// A chat message as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Room the message addresses, or [`NO_ROOM`] for one-to-one
    pub room_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    /// Receiver for one-to-one messages; ignored for room traffic
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub receiver_id: Option<i64>,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// Result of a send attempt, returned to the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResultPayload {
    pub message_id: i64,
    /// Delivered to a live session
    pub delivered: bool,
    /// Queued for offline delivery through the broker
    pub queued: bool,
}

/// Read receipt from a receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceiptPayload {
    /// Original sender whose messages were read
    pub sender_id: i64,
    /// The user acknowledging them
    pub receiver_id: i64,
    pub read_at: DateTime<Utc>,
}

/// Message-state change pushed back to the original sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStatePayload {
    pub user_id: i64,
    pub state: String,
    pub at: DateTime<Utc>,
}

/// Error sent in reply to a rejected client action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub message: String,
}

/// A new follower event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowNotificationPayload {
    pub follower_id: i64,
    pub follower_name: String,
}

/// An offline-message notification event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNotificationPayload {
    pub sender_id: i64,
    pub receiver_id: i64,
    /// Truncated message body shown in the notification
    pub preview: String,
    pub sent_at: DateTime<Utc>,
}

/// Profile image change fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileImagesPayload {
    pub user_id: i64,
    pub avatar_url: Option<String>,
    pub blur_hash: Option<String>,
}

/// Profile field change fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePayload {
    pub user_id: i64,
    pub display_name: Option<String>,
}

/// Summary of one chat partner for the chats list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummaryPayload {
    pub partner_id: i64,
    pub partner_name: String,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
}

/// The chats list for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatsListPayload {
    pub chats: Vec<ChatSummaryPayload>,
}

/// A page of one-to-one history with a partner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagesPayload {
    pub partner_id: i64,
    pub messages: Vec<MessagePayload>,
}

/// Notification preference change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettingsPayload {
    pub user_id: i64,
    pub enabled: bool,
}

/// Presence query and its answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatusPayload {
    pub user_id: i64,
    /// Absent in the query, populated in the answer
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub online: Option<bool>,
}

/// The wire envelope: an action plus exactly one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: Action,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<MessagePayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub send_result: Option<SendResultPayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub read_receipt: Option<ReadReceiptPayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message_state: Option<MessageStatePayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorPayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub follow_notification: Option<FollowNotificationPayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message_notification: Option<MessageNotificationPayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub profile_images: Option<ProfileImagesPayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub profile: Option<ProfilePayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chats_list: Option<ChatsListPayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chat_messages: Option<ChatMessagesPayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notification_settings: Option<NotificationSettingsPayload>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_status: Option<UserStatusPayload>,
}

impl Envelope {
    fn bare(action: Action) -> Self {
        Self {
            action,
            message: None,
            send_result: None,
            read_receipt: None,
            message_state: None,
            error: None,
            follow_notification: None,
            message_notification: None,
            profile_images: None,
            profile: None,
            chats_list: None,
            chat_messages: None,
            notification_settings: None,
            user_status: None,
        }
    }

    pub fn send_new_message(message: MessagePayload) -> Self {
        Self {
            message: Some(message),
            ..Self::bare(Action::SendNewMessage)
        }
    }

    pub fn message_read(receipt: ReadReceiptPayload) -> Self {
        Self {
            read_receipt: Some(receipt),
            ..Self::bare(Action::MessageRead)
        }
    }

    pub fn receive_new_message(message: MessagePayload) -> Self {
        Self {
            message: Some(message),
            ..Self::bare(Action::ReceiveNewMessage)
        }
    }

    pub fn send_result(message_id: i64, delivered: bool, queued: bool) -> Self {
        Self {
            send_result: Some(SendResultPayload {
                message_id,
                delivered,
                queued,
            }),
            ..Self::bare(Action::NewMessageSendResult)
        }
    }

    pub fn message_state(user_id: i64, state: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            message_state: Some(MessageStatePayload {
                user_id,
                state: state.into(),
                at,
            }),
            ..Self::bare(Action::ReceiveMessageState)
        }
    }

    pub fn action_error(code: u16, message: impl Into<String>) -> Self {
        Self {
            error: Some(ErrorPayload {
                code,
                message: message.into(),
            }),
            ..Self::bare(Action::ActionError)
        }
    }

    pub fn single_chats_list(chats: ChatsListPayload) -> Self {
        Self {
            chats_list: Some(chats),
            ..Self::bare(Action::SingleChatsList)
        }
    }

    pub fn single_chat_messages(messages: ChatMessagesPayload) -> Self {
        Self {
            chat_messages: Some(messages),
            ..Self::bare(Action::SingleChatMessages)
        }
    }

    pub fn user_status(user_id: i64, online: Option<bool>) -> Self {
        Self {
            user_status: Some(UserStatusPayload { user_id, online }),
            ..Self::bare(Action::UserStatus)
        }
    }

    /// Decode one wire frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(room_id: i64) -> MessagePayload {
        MessagePayload {
            room_id,
            sender_id: 1,
            sender_name: "ada".into(),
            receiver_id: Some(2),
            body: "seen Dune yet?".into(),
            sent_at: "2026-01-10T12:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn action_strings_match_the_wire_contract() {
        let env = Envelope::receive_new_message(message(NO_ROOM));
        let json = env.encode().unwrap();
        assert!(json.contains(r#""action":"receive-new-message""#));

        let env = Envelope::action_error(400, "bad");
        assert!(env.encode().unwrap().contains(r#""action":"action-error""#));
    }

    #[test]
    fn round_trip_preserves_action_and_payload() {
        let env = Envelope {
            message: Some(message(7)),
            ..Envelope::bare(Action::SendNewMessage)
        };

        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn absent_payloads_are_omitted() {
        let json = Envelope::user_status(9, None).encode().unwrap();
        assert!(!json.contains("send_result"));
        assert!(!json.contains("message_state"));
        assert!(!json.contains("online"));
    }

    #[test]
    fn unknown_action_fails_to_decode() {
        let result = Envelope::decode(r#"{"action":"start-voice-call"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn one_to_one_uses_the_reserved_room_sentinel() {
        let env = Envelope::receive_new_message(message(NO_ROOM));
        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded.message.unwrap().room_id, -1);
    }
}
