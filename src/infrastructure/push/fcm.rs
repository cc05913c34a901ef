//! FCM Sender
//!
//! Thin HTTP client around the FCM legacy send endpoint.

use async_trait::async_trait;
use serde_json::json;

use super::{PushItem, PushSender};
use crate::config::PushSettings;

/// FCM-backed push sender.
pub struct FcmSender {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

impl FcmSender {
    pub fn new(settings: &PushSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint.clone(),
            server_key: settings.server_key.clone(),
        }
    }
}

#[async_trait]
impl PushSender for FcmSender {
    async fn send_batch(&self, items: Vec<PushItem>) -> anyhow::Result<()> {
        // FCM has no true batch endpoint on the legacy API; one request per
        // item, failures logged per item and the batch reported as a whole.
        let mut failed = 0usize;

        for item in &items {
            let payload = json!({
                "to": item.device_token,
                "notification": {
                    "title": item.title,
                    "body": item.body,
                },
                "data": item.data,
            });

            let result = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("key={}", self.server_key))
                .json(&payload)
                .send()
                .await
                .and_then(|response| response.error_for_status());

            if let Err(err) = result {
                failed += 1;
                tracing::warn!(error = %err, "Push delivery failed");
            }
        }

        if failed > 0 {
            anyhow::bail!("{failed} of {} push deliveries failed", items.len());
        }
        Ok(())
    }
}
