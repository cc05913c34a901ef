//! Push Dispatcher
//!
//! Buffers push items and flushes them to the provider in batches, either
//! when the buffer reaches the configured size or on a fixed interval,
//! whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::{PushItem, PushSender};

/// Capacity of the dispatcher's intake queue.
const QUEUE_CAPACITY: usize = 1024;

/// Handle for enqueueing push items.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<PushItem>,
}

impl DispatcherHandle {
    /// Enqueue an item for batched delivery. Non-blocking; a full queue
    /// drops the item with a warning, push delivery is best-effort.
    pub fn enqueue(&self, item: PushItem) {
        if let Err(err) = self.tx.try_send(item) {
            tracing::warn!(error = %err, "Push queue full, dropping notification");
        }
    }
}

/// Batching worker between notification consumers and the push provider.
pub struct PushDispatcher {
    sender: Arc<dyn PushSender>,
    batch_size: usize,
    flush_interval: Duration,
}

impl PushDispatcher {
    pub fn new(sender: Arc<dyn PushSender>, batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            sender,
            batch_size: batch_size.max(1),
            flush_interval,
        }
    }

    /// Spawn the dispatch worker. The returned handle feeds it; the worker
    /// flushes any remaining buffer when the token fires, then exits.
    pub fn spawn(self, token: CancellationToken) -> DispatcherHandle {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(self.run(rx, token));
        DispatcherHandle { tx }
    }

    async fn run(self, mut rx: mpsc::Receiver<PushItem>, token: CancellationToken) {
        let mut buffer: Vec<PushItem> = Vec::with_capacity(self.batch_size);
        let mut ticker = interval(self.flush_interval);
        ticker.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                item = rx.recv() => {
                    match item {
                        Some(item) => {
                            buffer.push(item);
                            if buffer.len() >= self.batch_size {
                                self.flush(&mut buffer).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut buffer).await;
                }
                _ = token.cancelled() => break,
            }
        }

        // Final flush of whatever is left
        self.flush(&mut buffer).await;
        tracing::debug!("Push dispatcher stopped");
    }

    async fn flush(&self, buffer: &mut Vec<PushItem>) {
        if buffer.is_empty() {
            return;
        }

        let batch = std::mem::take(buffer);
        let size = batch.len();
        if let Err(err) = self.sender.send_batch(batch).await {
            tracing::warn!(error = %err, batch_size = size, "Push batch delivery failed");
        } else {
            tracing::debug!(batch_size = size, "Push batch delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        batches: Mutex<Vec<Vec<PushItem>>>,
    }

    #[async_trait]
    impl PushSender for RecordingSender {
        async fn send_batch(&self, items: Vec<PushItem>) -> anyhow::Result<()> {
            self.batches.lock().push(items);
            Ok(())
        }
    }

    fn item(n: usize) -> PushItem {
        PushItem {
            device_token: format!("device-{n}"),
            title: "New message".into(),
            body: format!("message {n}"),
            data: None,
        }
    }

    #[tokio::test]
    async fn flushes_when_batch_size_reached() {
        let sender = Arc::new(RecordingSender::default());
        let token = CancellationToken::new();
        let handle = PushDispatcher::new(sender.clone(), 3, Duration::from_secs(600))
            .spawn(token.clone());

        for n in 0..3 {
            handle.enqueue(item(n));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let batches = sender.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn flushes_partial_batch_on_interval() {
        let sender = Arc::new(RecordingSender::default());
        let token = CancellationToken::new();
        let handle = PushDispatcher::new(sender.clone(), 100, Duration::from_millis(20))
            .spawn(token.clone());

        handle.enqueue(item(0));
        handle.enqueue(item(1));

        tokio::time::sleep(Duration::from_millis(80)).await;
        token.cancel();

        let batches = sender.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn flushes_remainder_on_shutdown() {
        let sender = Arc::new(RecordingSender::default());
        let token = CancellationToken::new();
        let handle = PushDispatcher::new(sender.clone(), 100, Duration::from_secs(600))
            .spawn(token.clone());

        handle.enqueue(item(0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let batches = sender.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }
}
