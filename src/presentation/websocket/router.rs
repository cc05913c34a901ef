//! Message Router
//!
//! Classifies inbound envelopes and drives them through the hub. A message
//! with the reserved room sentinel goes through the direct-delivery path
//! (registry lookup by receiver id); anything else is room-addressed.

use std::sync::Arc;

use chrono::Utc;

use super::envelope::{
    Action, ChatMessagesPayload, ChatsListPayload, ChatSummaryPayload, Envelope, MessagePayload,
    NO_ROOM,
};
use super::hub::{DeliveryOutcome, DirectMessage, HubHandle, SessionHandle};
use crate::domain::{MessageRepository, NewMessage, UserRepository};
use crate::infrastructure::broker::{topology, EventPublisher};
use crate::shared::reporting::ErrorReporter;

/// Routes inbound traffic from every session.
pub struct MessageRouter {
    hub: HubHandle,
    messages: Arc<dyn MessageRepository>,
    users: Arc<dyn UserRepository>,
    publisher: Arc<dyn EventPublisher>,
    reporter: Arc<dyn ErrorReporter>,
}

impl MessageRouter {
    pub fn new(
        hub: HubHandle,
        messages: Arc<dyn MessageRepository>,
        users: Arc<dyn UserRepository>,
        publisher: Arc<dyn EventPublisher>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            hub,
            messages,
            users,
            publisher,
            reporter,
        }
    }

    /// Handle one inbound envelope from a session.
    pub async fn route(&self, session: &SessionHandle, envelope: Envelope) {
        match envelope.action {
            Action::SendNewMessage => self.handle_send(session, envelope).await,
            Action::MessageRead => self.handle_read(session, envelope).await,
            Action::UserStatus => self.handle_status(session, envelope).await,
            Action::SingleChatsList => self.handle_chats_list(session).await,
            Action::SingleChatMessages => self.handle_chat_messages(session, envelope).await,
            other => {
                tracing::debug!(
                    user_id = session.user_id,
                    action = ?other,
                    "Unsupported inbound action"
                );
                Self::reply(session, Envelope::action_error(400, "unsupported action"));
            }
        }
    }

    async fn handle_send(&self, session: &SessionHandle, envelope: Envelope) {
        let Some(payload) = envelope.message else {
            Self::reply(session, Envelope::action_error(400, "missing message payload"));
            return;
        };

        // Identity and timestamps come from the server, not the client.
        let sent_at = Utc::now();

        if payload.room_id == NO_ROOM {
            let Some(receiver_id) = payload.receiver_id else {
                Self::reply(session, Envelope::action_error(400, "missing receiver"));
                return;
            };

            let outcome = self
                .hub
                .single_deliver(DirectMessage {
                    sender_id: session.user_id,
                    sender_name: session.username.clone(),
                    receiver_id,
                    body: payload.body,
                    sent_at,
                })
                .await;

            let reply = match outcome {
                DeliveryOutcome::Delivered { message_id } => {
                    Envelope::send_result(message_id, true, false)
                }
                DeliveryOutcome::Offline { message_id, queued } => {
                    Envelope::send_result(message_id, false, queued)
                }
                DeliveryOutcome::Failed => {
                    Envelope::action_error(500, "message could not be stored")
                }
            };
            Self::reply(session, reply);
            return;
        }

        // Room-addressed: persist, then fan out to the live members.
        let saved = match self
            .messages
            .save(NewMessage {
                room_id: Some(payload.room_id),
                sender_id: session.user_id,
                receiver_id: None,
                body: payload.body.clone(),
                sent_at,
            })
            .await
        {
            Ok(saved) => saved,
            Err(err) => {
                self.reporter.report("router", &err);
                Self::reply(session, Envelope::action_error(500, "message could not be stored"));
                return;
            }
        };

        let broadcast = Envelope::receive_new_message(MessagePayload {
            room_id: payload.room_id,
            sender_id: session.user_id,
            sender_name: session.username.clone(),
            receiver_id: None,
            body: payload.body,
            sent_at,
        });
        self.hub.broadcast(payload.room_id, broadcast).await;

        Self::reply(session, Envelope::send_result(saved.id, true, false));
    }

    /// A read receipt: advance the acting user's watermark, mark the
    /// messages read, then tell the original sender, through the hub when
    /// they are online or via the message-state queue when they are not.
    async fn handle_read(&self, session: &SessionHandle, envelope: Envelope) {
        let Some(receipt) = envelope.read_receipt else {
            Self::reply(session, Envelope::action_error(400, "missing read receipt"));
            return;
        };

        let read_at = Utc::now();

        if let Err(err) = self
            .users
            .update_received_message_time(session.user_id, read_at)
            .await
        {
            self.reporter.report("router", &err);
            Self::reply(session, Envelope::action_error(500, "receipt not recorded"));
            return;
        }
        if let Err(err) = self
            .messages
            .mark_read(receipt.sender_id, session.user_id, read_at)
            .await
        {
            self.reporter.report("router", &err);
            Self::reply(session, Envelope::action_error(500, "receipt not recorded"));
            return;
        }

        let state = Envelope::message_state(session.user_id, "read", read_at);
        let delivered = self.hub.notify_user(receipt.sender_id, state).await;
        if !delivered {
            let event = serde_json::json!({
                "user_id": session.user_id,
                "counterpart_id": receipt.sender_id,
                "state": "read",
                "at": read_at,
            });
            if let Err(err) = self
                .publisher
                .publish_json(
                    topology::MESSAGE_STATE_EXCHANGE,
                    topology::MESSAGE_STATE_KEY,
                    &event,
                )
                .await
            {
                self.reporter.report("router", &err);
            }
        }
    }

    /// Answer a chats-list query with this user's one-to-one conversations.
    async fn handle_chats_list(&self, session: &SessionHandle) {
        let partners = match self
            .messages
            .list_chat_partners(session.user_id, 50)
            .await
        {
            Ok(partners) => partners,
            Err(err) => {
                self.reporter.report("router", &err);
                Self::reply(session, Envelope::action_error(500, "chats unavailable"));
                return;
            }
        };

        let chats = partners
            .into_iter()
            .map(|partner| ChatSummaryPayload {
                partner_id: partner.partner_id,
                partner_name: partner.partner_name,
                last_message: partner.last_body,
                last_message_at: partner.last_at,
            })
            .collect();
        Self::reply(
            session,
            Envelope::single_chats_list(ChatsListPayload { chats }),
        );
    }

    /// Answer a history query for one one-to-one conversation.
    async fn handle_chat_messages(&self, session: &SessionHandle, envelope: Envelope) {
        let Some(query) = envelope.chat_messages else {
            Self::reply(session, Envelope::action_error(400, "missing chat query"));
            return;
        };

        let partner_name = match self.users.find_by_id(query.partner_id).await {
            Ok(Some(partner)) => partner.visible_name().to_string(),
            Ok(None) => {
                Self::reply(session, Envelope::action_error(404, "unknown chat partner"));
                return;
            }
            Err(err) => {
                self.reporter.report("router", &err);
                Self::reply(session, Envelope::action_error(500, "history unavailable"));
                return;
            }
        };

        let history = match self
            .messages
            .list_between(session.user_id, query.partner_id, 50)
            .await
        {
            Ok(history) => history,
            Err(err) => {
                self.reporter.report("router", &err);
                Self::reply(session, Envelope::action_error(500, "history unavailable"));
                return;
            }
        };

        let messages = history
            .into_iter()
            .map(|message| MessagePayload {
                room_id: NO_ROOM,
                sender_name: if message.sender_id == session.user_id {
                    session.username.clone()
                } else {
                    partner_name.clone()
                },
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
                body: message.body,
                sent_at: message.sent_at,
            })
            .collect();
        Self::reply(
            session,
            Envelope::single_chat_messages(ChatMessagesPayload {
                partner_id: query.partner_id,
                messages,
            }),
        );
    }

    async fn handle_status(&self, session: &SessionHandle, envelope: Envelope) {
        let Some(query) = envelope.user_status else {
            Self::reply(session, Envelope::action_error(400, "missing status query"));
            return;
        };

        let online = self.hub.status(query.user_id).await;
        Self::reply(session, Envelope::user_status(query.user_id, Some(online)));
    }

    /// Replies go straight to the acting session's mailbox; a full mailbox
    /// drops the reply rather than stalling the reader.
    fn reply(session: &SessionHandle, envelope: Envelope) {
        if session.mailbox.try_send(envelope).is_err() {
            tracing::warn!(user_id = session.user_id, "Reply dropped, mailbox unavailable");
        }
    }
}
