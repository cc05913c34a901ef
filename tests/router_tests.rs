//! Message Router Integration Tests
//!
//! Covers inbound classification: the reserved room sentinel routes through
//! direct delivery, real room ids fan out, read receipts update the
//! watermark and reach the counterpart, and status queries are answered.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use reelchat::domain::{
    ChatMessage, ChatPartner, MessageRepository, NewMessage, User, UserRepository,
};
use reelchat::infrastructure::broker::{BrokerError, EventPublisher};
use reelchat::presentation::websocket::{
    Action, Envelope, Hub, MessageRouter, SessionHandle, NO_ROOM,
};
use reelchat::presentation::websocket::envelope::{
    MessagePayload, ReadReceiptPayload, UserStatusPayload,
};
use reelchat::shared::error::AppError;
use reelchat::shared::reporting::TracingReporter;

#[derive(Default)]
struct StubMessages {
    next_id: AtomicI64,
    saved: Mutex<Vec<NewMessage>>,
    read_marks: Mutex<Vec<(i64, i64)>>,
}

#[async_trait]
impl MessageRepository for StubMessages {
    async fn save(&self, message: NewMessage) -> Result<ChatMessage, AppError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.saved.lock().push(message.clone());
        Ok(ChatMessage {
            id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            body: message.body,
            sent_at: message.sent_at,
            read_at: None,
        })
    }

    async fn list_room_messages(
        &self,
        _room_id: i64,
        _limit: i64,
    ) -> Result<Vec<ChatMessage>, AppError> {
        Ok(Vec::new())
    }

    async fn list_between(
        &self,
        _user_a: i64,
        _user_b: i64,
        _limit: i64,
    ) -> Result<Vec<ChatMessage>, AppError> {
        Ok(Vec::new())
    }

    async fn list_chat_partners(
        &self,
        _user_id: i64,
        _limit: i64,
    ) -> Result<Vec<ChatPartner>, AppError> {
        Ok(vec![ChatPartner {
            partner_id: 5,
            partner_name: "user-5".into(),
            last_body: "see you there".into(),
            last_at: Utc::now(),
        }])
    }

    async fn mark_read(
        &self,
        sender_id: i64,
        receiver_id: i64,
        _read_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.read_marks.lock().push((sender_id, receiver_id));
        Ok(())
    }
}

#[derive(Default)]
struct StubUsers {
    watermarks: Mutex<Vec<i64>>,
}

#[async_trait]
impl UserRepository for StubUsers {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        Ok(Some(User {
            id,
            username: format!("user-{id}"),
            display_name: None,
            avatar_url: None,
            fcm_token: None,
            notifications_enabled: true,
            last_received_message_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }))
    }

    async fn update_received_message_time(
        &self,
        user_id: i64,
        _received_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.watermarks.lock().push(user_id);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, String, serde_json::Value)>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_json(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), BrokerError> {
        self.published
            .lock()
            .push((exchange.to_string(), routing_key.to_string(), payload.clone()));
        Ok(())
    }
}

struct Fixture {
    router: MessageRouter,
    hub: reelchat::presentation::websocket::HubHandle,
    messages: Arc<StubMessages>,
    users: Arc<StubUsers>,
    publisher: Arc<RecordingPublisher>,
}

fn fixture() -> Fixture {
    let messages = Arc::new(StubMessages::default());
    let users = Arc::new(StubUsers::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let hub = Hub::spawn(
        messages.clone(),
        publisher.clone(),
        Arc::new(TracingReporter),
    );
    let router = MessageRouter::new(
        hub.clone(),
        messages.clone(),
        users.clone(),
        publisher.clone(),
        Arc::new(TracingReporter),
    );
    Fixture {
        router,
        hub,
        messages,
        users,
        publisher,
    }
}

fn session(user_id: i64) -> (SessionHandle, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(10);
    let handle = SessionHandle {
        user_id,
        username: format!("user-{user_id}"),
        session_id: Uuid::new_v4(),
        mailbox: tx,
        cancel: CancellationToken::new(),
    };
    (handle, rx)
}

fn outbound_message(room_id: i64, receiver_id: Option<i64>, body: &str) -> Envelope {
    Envelope::send_new_message(MessagePayload {
        room_id,
        sender_id: 0, // the router must overwrite client-supplied identity
        sender_name: "spoofed".into(),
        receiver_id,
        body: body.into(),
        sent_at: Utc::now(),
    })
}

async fn recv(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for envelope")
        .expect("mailbox closed")
}

#[tokio::test]
async fn sentinel_room_routes_as_direct_delivery() {
    let fx = fixture();
    let (sender, mut sender_rx) = session(1);
    let (receiver, mut receiver_rx) = session(2);
    fx.hub.connect(sender.clone()).await;
    fx.hub.connect(receiver).await;

    fx.router
        .route(&sender, outbound_message(NO_ROOM, Some(2), "hi"))
        .await;

    // Receiver sees the message with server-stamped sender identity
    let delivered = recv(&mut receiver_rx).await;
    assert_eq!(delivered.action, Action::ReceiveNewMessage);
    let payload = delivered.message.unwrap();
    assert_eq!(payload.sender_id, 1);
    assert_eq!(payload.sender_name, "user-1");
    assert_eq!(payload.room_id, NO_ROOM);

    // Sender gets a positive send result
    let result = recv(&mut sender_rx).await;
    assert_eq!(result.action, Action::NewMessageSendResult);
    let result = result.send_result.unwrap();
    assert!(result.delivered);
    assert!(!result.queued);

    // Persisted as a one-to-one message
    let saved = fx.messages.saved.lock();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].room_id, None);
    assert_eq!(saved[0].receiver_id, Some(2));
}

#[tokio::test]
async fn room_message_is_persisted_then_fanned_out() {
    let fx = fixture();
    let (sender, mut sender_rx) = session(1);
    let (member, mut member_rx) = session(2);
    fx.hub.connect(sender.clone()).await;
    fx.hub.connect(member).await;
    fx.hub.bind_room(8, vec![1, 2]).await;

    fx.router
        .route(&sender, outbound_message(8, None, "movie night?"))
        .await;

    // Both members receive the broadcast, sender included
    let delivered = recv(&mut member_rx).await;
    assert_eq!(delivered.action, Action::ReceiveNewMessage);
    assert_eq!(delivered.message.unwrap().room_id, 8);

    // The sender's mailbox holds the send result and the broadcast copy, in
    // hub-processing order but without a guaranteed interleaving.
    let mut sender_actions = vec![recv(&mut sender_rx).await.action, recv(&mut sender_rx).await.action];
    sender_actions.sort_by_key(|action| format!("{action:?}"));
    assert!(sender_actions.contains(&Action::NewMessageSendResult));
    assert!(sender_actions.contains(&Action::ReceiveNewMessage));

    let saved = fx.messages.saved.lock();
    assert_eq!(saved[0].room_id, Some(8));
    assert_eq!(saved[0].receiver_id, None);
}

#[tokio::test]
async fn read_receipt_updates_watermark_and_reaches_online_sender() {
    let fx = fixture();
    let (reader, _reader_rx) = session(2);
    let (original_sender, mut sender_rx) = session(1);
    fx.hub.connect(reader.clone()).await;
    fx.hub.connect(original_sender).await;

    fx.router
        .route(
            &reader,
            Envelope::message_read(ReadReceiptPayload {
                sender_id: 1,
                receiver_id: 2,
                read_at: Utc::now(),
            }),
        )
        .await;

    assert_eq!(*fx.users.watermarks.lock(), vec![2]);
    assert_eq!(*fx.messages.read_marks.lock(), vec![(1, 2)]);

    let state = recv(&mut sender_rx).await;
    assert_eq!(state.action, Action::ReceiveMessageState);
    let state = state.message_state.unwrap();
    assert_eq!(state.user_id, 2);
    assert_eq!(state.state, "read");

    // Online counterpart: nothing goes through the broker
    assert!(fx.publisher.published.lock().is_empty());
}

#[tokio::test]
async fn read_receipt_for_offline_sender_rides_the_broker() {
    let fx = fixture();
    let (reader, _reader_rx) = session(2);
    fx.hub.connect(reader.clone()).await;
    // User 1 is offline

    fx.router
        .route(
            &reader,
            Envelope::message_read(ReadReceiptPayload {
                sender_id: 1,
                receiver_id: 2,
                read_at: Utc::now(),
            }),
        )
        .await;

    let published = fx.publisher.published.lock();
    assert_eq!(published.len(), 1);
    let (exchange, routing_key, payload) = &published[0];
    assert_eq!(exchange, "message-state");
    assert_eq!(routing_key, "message.state");
    assert_eq!(payload["state"], "read");
    assert_eq!(payload["counterpart_id"], 1);
}

#[tokio::test]
async fn status_query_is_answered_from_the_registry() {
    let fx = fixture();
    let (asker, mut asker_rx) = session(1);
    let (online, _online_rx) = session(2);
    fx.hub.connect(asker.clone()).await;
    fx.hub.connect(online).await;

    fx.router
        .route(&asker, Envelope::user_status(2, None))
        .await;
    let answer = recv(&mut asker_rx).await;
    assert_eq!(
        answer.user_status,
        Some(UserStatusPayload {
            user_id: 2,
            online: Some(true),
        })
    );

    fx.router
        .route(&asker, Envelope::user_status(99, None))
        .await;
    let answer = recv(&mut asker_rx).await;
    assert_eq!(answer.user_status.unwrap().online, Some(false));
}

#[tokio::test]
async fn chats_list_query_is_answered_with_conversations() {
    let fx = fixture();
    let (asker, mut asker_rx) = session(1);
    fx.hub.connect(asker.clone()).await;

    // A chats-list query is a bare action on the wire
    let query = Envelope::decode(r#"{"action":"single-chats-list"}"#).unwrap();
    fx.router.route(&asker, query).await;

    let answer = recv(&mut asker_rx).await;
    assert_eq!(answer.action, Action::SingleChatsList);
    let chats = answer.chats_list.unwrap().chats;
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].partner_id, 5);
    assert_eq!(chats[0].last_message, "see you there");
}

#[tokio::test]
async fn unsupported_inbound_action_gets_an_error_reply() {
    let fx = fixture();
    let (sender, mut sender_rx) = session(1);
    fx.hub.connect(sender.clone()).await;

    // Server-to-client action arriving inbound
    fx.router
        .route(&sender, Envelope::send_result(1, true, false))
        .await;

    let reply = recv(&mut sender_rx).await;
    assert_eq!(reply.action, Action::ActionError);
    assert_eq!(reply.error.unwrap().code, 400);
}

#[tokio::test]
async fn missing_payload_is_rejected() {
    let fx = fixture();
    let (sender, mut sender_rx) = session(1);
    fx.hub.connect(sender.clone()).await;

    fx.router
        .route(&sender, Envelope::user_status(1, None))
        .await;
    // Consume the legitimate status answer first
    recv(&mut sender_rx).await;

    let mut envelope = Envelope::send_new_message(MessagePayload {
        room_id: NO_ROOM,
        sender_id: 1,
        sender_name: "user-1".into(),
        receiver_id: Some(2),
        body: "x".into(),
        sent_at: Utc::now(),
    });
    envelope.message = None;
    fx.router.route(&sender, envelope).await;

    let reply = recv(&mut sender_rx).await;
    assert_eq!(reply.action, Action::ActionError);
}
