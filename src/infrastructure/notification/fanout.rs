//! Notification Fan-out
//!
//! A pool of consumers on the `notification` queue. Each event resolves the
//! acting user's profile (cache first, repository on miss) and hands a push
//! item to the batching dispatcher. Workers run under the shared supervisor,
//! so a worker that dies is restarted and the pool keeps its size.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::NotificationEvent;
use crate::config::BrokerSettings;
use crate::domain::UserRepository;
use crate::infrastructure::broker::{
    topology, Broker, ConsumerHandler, HandlerOutcome, QueueConfig,
};
use crate::infrastructure::cache::{Cache, CachedUser, UserCache};
use crate::infrastructure::push::{DispatcherHandle, PushItem};
use crate::shared::reporting::ErrorReporter;
use crate::shared::supervision::supervise;

/// Backoff base between worker restarts.
const WORKER_RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// The notification worker pool.
pub struct NotificationFanout;

impl NotificationFanout {
    /// Spawn the configured number of supervised fan-out workers.
    pub fn start<C: Cache + 'static>(
        broker: Broker,
        settings: &BrokerSettings,
        cache: Arc<UserCache<C>>,
        users: Arc<dyn UserRepository>,
        push: DispatcherHandle,
        reporter: Arc<dyn ErrorReporter>,
    ) {
        let handler: Arc<dyn ConsumerHandler> = Arc::new(NotificationHandler {
            cache,
            users,
            push,
        });
        let max_in_flight = settings.max_in_flight;
        let token = broker.shutdown_token();

        for worker in 0..settings.notification_workers.max(1) {
            let broker = broker.clone();
            let handler = handler.clone();
            let token = token.clone();
            let reporter = reporter.clone();

            tokio::spawn(async move {
                supervise(
                    "notification-worker",
                    token.clone(),
                    reporter,
                    WORKER_RESTART_BACKOFF,
                    move || {
                        let broker = broker.clone();
                        let handler = handler.clone();
                        let token = token.clone();
                        async move {
                            let config = QueueConfig {
                                queue: topology::NOTIFICATION_QUEUE.to_string(),
                                concurrent: true,
                                max_in_flight,
                            };
                            broker.consume(token, config, handler).await?;
                            Ok(())
                        }
                    },
                )
                .await;
                tracing::debug!(worker, "Notification worker stopped");
            });
        }
    }
}

struct NotificationHandler<C: Cache> {
    cache: Arc<UserCache<C>>,
    users: Arc<dyn UserRepository>,
    push: DispatcherHandle,
}

impl<C: Cache> NotificationHandler<C> {
    /// Cache-first profile resolution; a cache outage degrades to a
    /// repository read instead of failing the delivery.
    async fn resolve_profile(&self, user_id: i64) -> Result<Option<CachedUser>, HandlerOutcome> {
        match self.cache.get(user_id).await {
            Ok(Some(cached)) => return Ok(Some(cached)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(user_id, error = %err, "Profile cache read failed");
            }
        }

        let user = match self.users.find_by_id(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return Ok(None),
            Err(err) => {
                tracing::warn!(user_id, error = %err, "Profile lookup failed");
                return Err(HandlerOutcome::Retry);
            }
        };

        let cached = CachedUser::from(&user);
        if let Err(err) = self.cache.set(&cached).await {
            tracing::warn!(user_id, error = %err, "Profile cache write failed");
        }
        Ok(Some(cached))
    }

    async fn handle_event(&self, event: NotificationEvent) -> HandlerOutcome {
        let (actor_id, recipient_id, body) = match &event {
            NotificationEvent::NewMessage {
                sender_id,
                receiver_id,
                preview,
                ..
            } => (*sender_id, *receiver_id, preview.clone()),
            NotificationEvent::NewFollow {
                follower_id,
                followee_id,
            } => (*follower_id, *followee_id, "started following you".to_string()),
        };

        let recipient = match self.users.find_by_id(recipient_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::debug!(recipient_id, "Notification for unknown user dropped");
                return HandlerOutcome::Drop;
            }
            Err(err) => {
                tracing::warn!(recipient_id, error = %err, "Recipient lookup failed");
                return HandlerOutcome::Retry;
            }
        };

        if !recipient.notifications_enabled {
            return HandlerOutcome::Ack;
        }
        let Some(device_token) = recipient.fcm_token else {
            return HandlerOutcome::Ack;
        };

        let actor = match self.resolve_profile(actor_id).await {
            Ok(Some(actor)) => actor,
            Ok(None) => {
                tracing::debug!(actor_id, "Notification from unknown user dropped");
                return HandlerOutcome::Drop;
            }
            Err(outcome) => return outcome,
        };

        self.push.enqueue(PushItem {
            device_token,
            title: actor.visible_name().to_string(),
            body,
            data: serde_json::to_value(&event).ok(),
        });

        HandlerOutcome::Ack
    }
}

#[async_trait]
impl<C: Cache> ConsumerHandler for NotificationHandler<C> {
    async fn handle(&self, body: &[u8], _redelivered: bool) -> HandlerOutcome {
        // An undecodable event stays undecodable; redelivery cannot help.
        let event: NotificationEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "Undecodable notification event dropped");
                return HandlerOutcome::Drop;
            }
        };

        self.handle_event(event).await
    }
}
