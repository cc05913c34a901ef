//! Connection Session
//!
//! One WebSocket connection and its two loops: a writer draining the bounded
//! mailbox with a keep-alive ping, and a reader decoding envelopes under an
//! idle deadline. The session registers with the hub on start and tears
//! itself out of every registry on exit.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::envelope::Envelope;
use super::hub::{HubHandle, SessionHandle};
use super::router::MessageRouter;
use crate::config::ChatSettings;

/// Authenticated identity carried into a session.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub user_id: i64,
    pub username: String,
}

/// Drive one connection until it closes, errors, times out, or is evicted.
pub async fn run_session(
    socket: WebSocket,
    identity: SessionIdentity,
    room: Option<i64>,
    router: Arc<MessageRouter>,
    hub: HubHandle,
    settings: ChatSettings,
) {
    let session_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let (mailbox_tx, mailbox_rx) = mpsc::channel(settings.mailbox_capacity);

    let handle = SessionHandle {
        user_id: identity.user_id,
        username: identity.username.clone(),
        session_id,
        mailbox: mailbox_tx,
        cancel: cancel.clone(),
    };

    tracing::info!(
        user_id = identity.user_id,
        session_id = %session_id,
        room = ?room,
        "Session starting"
    );

    hub.connect(handle.clone()).await;
    if let Some(room_id) = room {
        hub.register(identity.user_id, room_id).await;
    }

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(outbound_loop(
        sink,
        mailbox_rx,
        cancel.clone(),
        settings.clone(),
    ));

    inbound_loop(stream, &handle, router.as_ref(), &settings).await;

    // Teardown: leave the room (announcing the departure), drop out of the
    // global registry, then stop the writer.
    if let Some(room_id) = room {
        hub.unregister(identity.user_id, room_id).await;
    }
    hub.disconnect(identity.user_id, session_id).await;
    cancel.cancel();
    let _ = writer.await;

    tracing::info!(
        user_id = identity.user_id,
        session_id = %session_id,
        "Session ended"
    );
}

/// Drain the mailbox onto the socket, pinging on a fixed interval shorter
/// than the peer's read timeout. Ends when the mailbox closes, a write
/// fails, or the session is cancelled; always closes the socket on the way
/// out.
async fn outbound_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut mailbox: mpsc::Receiver<Envelope>,
    cancel: CancellationToken,
    settings: ChatSettings,
) {
    let mut ping = interval(settings.ping_interval());
    ping.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            envelope = mailbox.recv() => {
                match envelope {
                    Some(envelope) => {
                        let text = match envelope.encode() {
                            Ok(text) => text,
                            Err(err) => {
                                tracing::error!(error = %err, "Envelope encode failed");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}

/// Decode one envelope per text frame and forward it to the router. Every
/// successful read or keep-alive acknowledgment extends the idle deadline;
/// a malformed frame gets an error reply but keeps the session alive.
async fn inbound_loop(
    mut stream: SplitStream<WebSocket>,
    session: &SessionHandle,
    router: &MessageRouter,
    settings: &ChatSettings,
) {
    let read_timeout = settings.read_timeout();
    let mut deadline = Instant::now() + read_timeout;

    loop {
        tokio::select! {
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        deadline = Instant::now() + read_timeout;
                        match Envelope::decode(&text) {
                            Ok(envelope) => router.route(session, envelope).await,
                            Err(err) => {
                                tracing::debug!(
                                    user_id = session.user_id,
                                    error = %err,
                                    "Malformed envelope"
                                );
                                let _ = session
                                    .mailbox
                                    .try_send(Envelope::action_error(400, "malformed envelope"));
                            }
                        }
                    }
                    // Pings are answered by the socket layer; both directions
                    // count as liveness.
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        deadline = Instant::now() + read_timeout;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(user_id = session.user_id, "Connection closed");
                        break;
                    }
                    Some(Ok(_)) => {} // binary frames are not part of the protocol
                    Some(Err(err)) => {
                        tracing::debug!(user_id = session.user_id, error = %err, "Read error");
                        break;
                    }
                }
            }
            _ = sleep_until(deadline) => {
                tracing::info!(user_id = session.user_id, "Idle deadline elapsed");
                break;
            }
            _ = session.cancel.cancelled() => break,
        }
    }
}
