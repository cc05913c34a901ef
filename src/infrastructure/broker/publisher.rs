//! Publisher
//!
//! Serializes outbound events onto the shared producer channel. There is no
//! automatic retry: callers inspect the error and decide whether to retry,
//! buffer, or drop.

use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::types::FieldTable;
use lapin::BasicProperties;
use uuid::Uuid;

use super::error::BrokerError;
use super::supervisor::BrokerInner;

/// Optional message metadata for a publish.
#[derive(Debug, Default, Clone)]
pub struct PublishOpts {
    pub content_type: Option<&'static str>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
    pub headers: Option<FieldTable>,
}

/// Seam between the routing layer and the broker, so offline delivery can be
/// exercised in tests without an AMQP server.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a JSON event to an exchange with the given routing key.
    async fn publish_json(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), BrokerError>;
}

/// Publisher over the broker's producer channel pool.
///
/// The pool holds several pre-created channels but only the first carries
/// traffic; publishing through one channel keeps per-queue FIFO ordering
/// intact.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<BrokerInner>,
}

impl Publisher {
    pub(super) fn new(inner: Arc<BrokerInner>) -> Self {
        Self { inner }
    }

    /// Publish a raw body to an exchange.
    ///
    /// Fails with [`BrokerError::Unavailable`] if no setup cycle has ever
    /// completed (the consumer channel doubles as the liveness proxy) or if
    /// the broker is mid-reconnect. Cancelled publishes fail with
    /// [`BrokerError::Cancelled`].
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        opts: PublishOpts,
    ) -> Result<(), BrokerError> {
        if *self.inner.ready_rx.borrow() == 0 {
            return Err(BrokerError::Unavailable);
        }

        let channel = {
            let state = self.inner.state.read();
            let active = state.as_ref().ok_or(BrokerError::Unavailable)?;
            active
                .producer_channels
                .first()
                .cloned()
                .ok_or(BrokerError::Unavailable)?
        };

        let mut properties = BasicProperties::default()
            .with_content_type(opts.content_type.unwrap_or("application/json").into())
            .with_message_id(
                opts.message_id
                    .unwrap_or_else(|| Uuid::new_v4().to_string())
                    .into(),
            );
        if let Some(priority) = opts.priority {
            properties = properties.with_priority(priority);
        }
        if let Some(correlation_id) = opts.correlation_id {
            properties = properties.with_correlation_id(correlation_id.into());
        }
        if let Some(headers) = opts.headers {
            properties = properties.with_headers(headers);
        }

        let shutdown = self.inner.shutdown.clone();
        self.inner
            .tracker
            .track_future(async move {
                tokio::select! {
                    result = channel.basic_publish(
                        exchange,
                        routing_key,
                        BasicPublishOptions::default(),
                        body,
                        properties,
                    ) => {
                        result?;
                        Ok(())
                    }
                    _ = shutdown.cancelled() => Err(BrokerError::Cancelled),
                }
            })
            .await
    }
}

#[async_trait]
impl EventPublisher for Publisher {
    async fn publish_json(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), BrokerError> {
        let body = serde_json::to_vec(payload)?;
        self.publish(exchange, routing_key, &body, PublishOpts::default())
            .await
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").finish_non_exhaustive()
    }
}
