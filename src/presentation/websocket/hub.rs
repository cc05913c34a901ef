//! Presence Hub
//!
//! In-memory registry of connected sessions and rooms, mutated exclusively
//! by one event-loop task. Every registry change is a command sent through
//! the hub's queues; request handlers never touch the maps directly.
//!
//! Rooms store user ids only. Member sessions are resolved against the
//! global registry at delivery time, so a member who reconnects is picked up
//! without any room bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::envelope::{Envelope, MessagePayload, NO_ROOM};
use crate::domain::{MessageRepository, NewMessage};
use crate::infrastructure::broker::{topology, EventPublisher};
use crate::infrastructure::notification::NotificationEvent;
use crate::shared::reporting::ErrorReporter;

/// Capacity of the hub's command and single-delivery queues.
const HUB_QUEUE_CAPACITY: usize = 256;

/// What a live session exposes to the hub: identity, its outbound mailbox,
/// and the token that tears its loops down.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub user_id: i64,
    pub username: String,
    pub session_id: Uuid,
    pub mailbox: mpsc::Sender<Envelope>,
    pub cancel: CancellationToken,
}

/// A one-to-one message on its way through the hub.
#[derive(Debug, Clone)]
pub struct DirectMessage {
    pub sender_id: i64,
    pub sender_name: String,
    pub receiver_id: i64,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// How a one-to-one delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Persisted and handed to the receiver's live session.
    Delivered { message_id: i64 },
    /// Receiver offline: persisted, and queued through the broker when
    /// `queued` is true (a false means the notification publish failed).
    Offline { message_id: i64, queued: bool },
    /// Persistence failed; nothing was delivered or queued.
    Failed,
}

struct RoomState {
    members: HashSet<i64>,
}

struct SingleDeliver {
    message: DirectMessage,
    reply: oneshot::Sender<DeliveryOutcome>,
}

enum HubCommand {
    Connect {
        session: SessionHandle,
    },
    Disconnect {
        user_id: i64,
        session_id: Uuid,
    },
    BindRoom {
        room_id: i64,
        participants: Vec<i64>,
    },
    Register {
        user_id: i64,
        room_id: i64,
    },
    Unregister {
        user_id: i64,
        room_id: i64,
    },
    Broadcast {
        room_id: i64,
        envelope: Envelope,
    },
    NotifyUser {
        user_id: i64,
        envelope: Envelope,
        reply: oneshot::Sender<bool>,
    },
    Status {
        user_id: i64,
        reply: oneshot::Sender<bool>,
    },
}

/// Cheap-to-clone handle for sending commands into the hub loop.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    singles: mpsc::Sender<SingleDeliver>,
}

impl HubHandle {
    async fn send(&self, command: HubCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::warn!("Hub loop is gone, command dropped");
        }
    }

    /// Register a session in the global registry. A prior session for the
    /// same user is evicted: its loops are cancelled and its registry entry
    /// replaced.
    pub async fn connect(&self, session: SessionHandle) {
        self.send(HubCommand::Connect { session }).await;
    }

    /// Remove a session from every registry it appears in. A stale
    /// `session_id` (the user already reconnected) is a no-op.
    pub async fn disconnect(&self, user_id: i64, session_id: Uuid) {
        self.send(HubCommand::Disconnect {
            user_id,
            session_id,
        })
        .await;
    }

    /// Register a freshly created room and add whichever participants are
    /// currently connected.
    pub async fn bind_room(&self, room_id: i64, participants: Vec<i64>) {
        self.send(HubCommand::BindRoom {
            room_id,
            participants,
        })
        .await;
    }

    /// Add a user to a room, if the room exists and they are not a member.
    pub async fn register(&self, user_id: i64, room_id: i64) {
        self.send(HubCommand::Register { user_id, room_id }).await;
    }

    /// Remove a user from a room, announcing the departure to the members
    /// left behind.
    pub async fn unregister(&self, user_id: i64, room_id: i64) {
        self.send(HubCommand::Unregister { user_id, room_id }).await;
    }

    /// Fan an envelope out to every connected member of a room.
    pub async fn broadcast(&self, room_id: i64, envelope: Envelope) {
        self.send(HubCommand::Broadcast { room_id, envelope }).await;
    }

    /// Route a one-to-one message: persist, then deliver live or queue for
    /// offline delivery through the broker.
    pub async fn single_deliver(&self, message: DirectMessage) -> DeliveryOutcome {
        let (reply, rx) = oneshot::channel();
        if self
            .singles
            .send(SingleDeliver { message, reply })
            .await
            .is_err()
        {
            tracing::warn!("Hub loop is gone, delivery dropped");
            return DeliveryOutcome::Failed;
        }
        rx.await.unwrap_or(DeliveryOutcome::Failed)
    }

    /// Push an envelope to one user without persistence. Returns whether the
    /// user had a live session.
    pub async fn notify_user(&self, user_id: i64, envelope: Envelope) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::NotifyUser {
            user_id,
            envelope,
            reply,
        })
        .await;
        rx.await.unwrap_or(false)
    }

    /// Whether the user currently has a live session.
    pub async fn status(&self, user_id: i64) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Status { user_id, reply }).await;
        rx.await.unwrap_or(false)
    }
}

/// The hub event loop and its registries.
pub struct Hub {
    commands: mpsc::Receiver<HubCommand>,
    singles: mpsc::Receiver<SingleDeliver>,
    clients: HashMap<i64, SessionHandle>,
    rooms: HashMap<i64, RoomState>,
    messages: Arc<dyn MessageRepository>,
    publisher: Arc<dyn EventPublisher>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Hub {
    /// Start the hub loop and return its handle.
    pub fn spawn(
        messages: Arc<dyn MessageRepository>,
        publisher: Arc<dyn EventPublisher>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> HubHandle {
        let (command_tx, command_rx) = mpsc::channel(HUB_QUEUE_CAPACITY);
        let (single_tx, single_rx) = mpsc::channel(HUB_QUEUE_CAPACITY);

        let hub = Hub {
            commands: command_rx,
            singles: single_rx,
            clients: HashMap::new(),
            rooms: HashMap::new(),
            messages,
            publisher,
            reporter,
        };
        tokio::spawn(hub.run());

        HubHandle {
            commands: command_tx,
            singles: single_tx,
        }
    }

    async fn run(mut self) {
        let mut singles_open = true;
        loop {
            // Registry mutations drain before deliveries, so a delivery
            // always sees the effects of every command sent before it.
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                single = self.singles.recv(), if singles_open => {
                    match single {
                        Some(single) => self.handle_single(single).await,
                        None => singles_open = false,
                    }
                }
            }
        }
        tracing::info!("Hub loop stopped");
    }

    async fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connect { session } => {
                let user_id = session.user_id;
                if let Some(previous) = self.clients.insert(user_id, session) {
                    tracing::info!(
                        user_id,
                        evicted_session = %previous.session_id,
                        "Duplicate connect, evicting prior session"
                    );
                    previous.cancel.cancel();
                } else {
                    tracing::debug!(user_id, "Session connected");
                }
            }
            HubCommand::Disconnect {
                user_id,
                session_id,
            } => {
                let is_current = self
                    .clients
                    .get(&user_id)
                    .map(|session| session.session_id == session_id)
                    .unwrap_or(false);
                if !is_current {
                    // A newer session already replaced this one.
                    return;
                }
                if let Some(session) = self.clients.remove(&user_id) {
                    session.cancel.cancel();
                }
                for room in self.rooms.values_mut() {
                    room.members.remove(&user_id);
                }
                tracing::debug!(user_id, "Session disconnected");
            }
            HubCommand::BindRoom {
                room_id,
                participants,
            } => {
                let members: HashSet<i64> = participants
                    .into_iter()
                    .filter(|id| self.clients.contains_key(id))
                    .collect();
                tracing::debug!(room_id, present = members.len(), "Room bound");
                self.rooms.insert(room_id, RoomState { members });
            }
            HubCommand::Register { user_id, room_id } => {
                match self.rooms.get_mut(&room_id) {
                    Some(room) => {
                        if room.members.insert(user_id) {
                            tracing::debug!(user_id, room_id, "Joined room");
                        }
                    }
                    None => {
                        tracing::debug!(user_id, room_id, "Register ignored, unknown room");
                    }
                }
            }
            HubCommand::Unregister { user_id, room_id } => {
                let Some(room) = self.rooms.get_mut(&room_id) else {
                    return;
                };
                if !room.members.remove(&user_id) {
                    return;
                }
                tracing::debug!(user_id, room_id, "Left room");
                if !room.members.is_empty() {
                    let notice = Envelope::user_status(user_id, Some(false));
                    self.fan_out(room_id, notice);
                }
            }
            HubCommand::Broadcast { room_id, envelope } => {
                self.fan_out(room_id, envelope);
            }
            HubCommand::NotifyUser {
                user_id,
                envelope,
                reply,
            } => {
                let delivered = match self.clients.get(&user_id) {
                    Some(session) => Self::deliver(session, envelope),
                    None => false,
                };
                let _ = reply.send(delivered);
            }
            HubCommand::Status { user_id, reply } => {
                let _ = reply.send(self.clients.contains_key(&user_id));
            }
        }
    }

    /// One-to-one delivery: look the receiver up directly in the global
    /// registry (rooms are bypassed), persist, then deliver or queue.
    async fn handle_single(&mut self, SingleDeliver { message, reply }: SingleDeliver) {
        let saved = match self
            .messages
            .save(NewMessage {
                room_id: None,
                sender_id: message.sender_id,
                receiver_id: Some(message.receiver_id),
                body: message.body.clone(),
                sent_at: message.sent_at,
            })
            .await
        {
            Ok(saved) => saved,
            Err(err) => {
                self.reporter.report("hub", &err);
                let _ = reply.send(DeliveryOutcome::Failed);
                return;
            }
        };

        let outcome = match self.clients.get(&message.receiver_id) {
            Some(receiver) => {
                let envelope = Envelope::receive_new_message(MessagePayload {
                    room_id: NO_ROOM,
                    sender_id: message.sender_id,
                    sender_name: message.sender_name.clone(),
                    receiver_id: Some(message.receiver_id),
                    body: message.body.clone(),
                    sent_at: message.sent_at,
                });
                Self::deliver(receiver, envelope);
                DeliveryOutcome::Delivered {
                    message_id: saved.id,
                }
            }
            None => {
                // Durable fallback: the receiver is offline, so the message
                // rides the broker to the notification fan-out.
                let queued = self.queue_offline_notification(&message, saved.id).await;
                DeliveryOutcome::Offline {
                    message_id: saved.id,
                    queued,
                }
            }
        };

        let _ = reply.send(outcome);
    }

    async fn queue_offline_notification(&self, message: &DirectMessage, message_id: i64) -> bool {
        let event = NotificationEvent::NewMessage {
            message_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            preview: message.body.chars().take(120).collect(),
            sent_at: message.sent_at,
        };
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(err) => {
                self.reporter.report("hub", &err);
                return false;
            }
        };

        match self
            .publisher
            .publish_json(
                topology::NOTIFICATION_EXCHANGE,
                topology::NOTIFICATION_KEY,
                &payload,
            )
            .await
        {
            Ok(()) => true,
            Err(err) => {
                self.reporter.report("hub", &err);
                false
            }
        }
    }

    fn fan_out(&self, room_id: i64, envelope: Envelope) {
        let Some(room) = self.rooms.get(&room_id) else {
            tracing::debug!(room_id, "Broadcast to unknown room dropped");
            return;
        };
        for member_id in &room.members {
            if let Some(session) = self.clients.get(member_id) {
                Self::deliver(session, envelope.clone());
            }
        }
    }

    /// Non-blocking mailbox hand-off. A full mailbox drops the envelope for
    /// that receiver only; the loop never blocks on one slow client.
    fn deliver(session: &SessionHandle, envelope: Envelope) -> bool {
        match session.mailbox.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    user_id = session.user_id,
                    "Mailbox full, dropping envelope"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(user_id = session.user_id, "Mailbox closed");
                false
            }
        }
    }
}
