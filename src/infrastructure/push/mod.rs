//! Push Notification Delivery
//!
//! Buffered, batched hand-off to the push provider. Delivery is
//! best-effort: a full buffer drops the newest item rather than blocking
//! the producer.

mod dispatcher;
mod fcm;

pub use dispatcher::{DispatcherHandle, PushDispatcher};
pub use fcm::FcmSender;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One push notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushItem {
    /// Device token of the recipient
    pub device_token: String,
    pub title: String,
    pub body: String,
    /// Opaque payload forwarded to the client app
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Provider-facing delivery contract.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Deliver one batch. Implementations report per-batch failure; items
    /// are not retried individually.
    async fn send_batch(&self, items: Vec<PushItem>) -> anyhow::Result<()>;
}
