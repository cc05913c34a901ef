//! Broker Connection Supervisor
//!
//! Owns the two physical AMQP connections (one dedicated to consuming, one
//! to producing), reconnects forever on failure, redeclares topology after
//! every successful connect, and signals readiness to waiting dependents.

use std::sync::Arc;
use std::time::Duration;

use lapin::options::BasicQosOptions;
use lapin::{Channel, Connection, ConnectionProperties};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::error::BrokerError;
use super::publisher::Publisher;
use super::topology;
use crate::config::BrokerSettings;
use crate::shared::reporting::ErrorReporter;

/// Live connection state, replaced wholesale on every reconnect.
pub(super) struct Active {
    pub(super) consume_conn: Connection,
    pub(super) produce_conn: Connection,
    pub(super) consumer_channel: Channel,
    pub(super) producer_channels: Vec<Channel>,
}

/// State shared between the supervisor, publishers, and consumer runtimes.
pub(super) struct BrokerInner {
    pub(super) settings: BrokerSettings,
    pub(super) reporter: Arc<dyn ErrorReporter>,
    pub(super) state: RwLock<Option<Active>>,
    /// Setup generation; 0 means no setup has ever completed.
    pub(super) ready_tx: watch::Sender<u64>,
    pub(super) ready_rx: watch::Receiver<u64>,
    /// Counts in-flight publishes and consumer-handler executions so
    /// shutdown can drain them before force-closing.
    pub(super) tracker: TaskTracker,
    /// Cancels in-flight broker operations on shutdown.
    pub(super) shutdown: CancellationToken,
}

/// Handle to the supervised broker client.
///
/// Constructed once at startup and passed down explicitly; there is no
/// process-global broker instance.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    /// Create a broker client. Nothing connects until [`Broker::run`] is
    /// spawned.
    pub fn new(
        settings: BrokerSettings,
        reporter: Arc<dyn ErrorReporter>,
        shutdown: CancellationToken,
    ) -> Self {
        let (ready_tx, ready_rx) = watch::channel(0);
        Self {
            inner: Arc::new(BrokerInner {
                settings,
                reporter,
                state: RwLock::new(None),
                ready_tx,
                ready_rx,
                tracker: TaskTracker::new(),
                shutdown,
            }),
        }
    }

    /// A publisher bound to this broker's shared producer channel.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.inner.clone())
    }

    /// Token cancelled when the broker shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Wait until at least one connect-and-setup cycle has completed.
    ///
    /// Waiters that subscribe before setup completes are all released by the
    /// same generation bump; later callers return immediately.
    pub async fn wait_ready(&self) -> Result<(), BrokerError> {
        let mut rx = self.inner.ready_rx.clone();
        loop {
            if *rx.borrow_and_update() > 0 {
                return Ok(());
            }
            rx.changed().await.map_err(|_| BrokerError::Unavailable)?;
        }
    }

    /// The dedicated consumer channel, waiting for setup if necessary.
    ///
    /// Returns `Unavailable` when called mid-reconnect; callers run under a
    /// supervisor and simply retry.
    pub async fn consumer_channel(&self) -> Result<Channel, BrokerError> {
        self.wait_ready().await?;
        self.inner
            .state
            .read()
            .as_ref()
            .map(|active| active.consumer_channel.clone())
            .ok_or(BrokerError::Unavailable)
    }

    /// Consume a queue on the dedicated consumer channel, waiting for setup
    /// if necessary. Handler executions count toward the shutdown drain.
    pub async fn consume(
        &self,
        token: CancellationToken,
        config: super::consumer::QueueConfig,
        handler: Arc<dyn super::consumer::ConsumerHandler>,
    ) -> Result<(), BrokerError> {
        let channel = self.consumer_channel().await?;
        super::consumer::consume(token, channel, config, handler, self.inner.tracker.clone()).await
    }

    /// Supervision loop. Never returns until the shutdown token fires, at
    /// which point it drains in-flight work and force-closes everything.
    pub async fn run(&self) {
        let shutdown = self.inner.shutdown.clone();
        let reconnect_delay = self.inner.settings.reconnect_delay();
        let failure_threshold = self.inner.settings.failure_threshold;
        let mut consecutive_failures: u32 = 0;

        while !shutdown.is_cancelled() {
            match self.connect_and_setup().await {
                Ok(mut conn_errors) => {
                    consecutive_failures = 0;

                    // Park until a connection reports closure or we shut down.
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        err = conn_errors.recv() => {
                            if let Some(err) = err {
                                tracing::warn!(error = %err, "Broker connection lost, reconnecting");
                            }
                            *self.inner.state.write() = None;
                        }
                    }
                }
                Err(err) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        error = %err,
                        consecutive_failures,
                        "Broker connect failed"
                    );
                    // Escalate once per failure streak, when it crosses the threshold.
                    if consecutive_failures == failure_threshold + 1 {
                        self.inner.reporter.report("broker-supervisor", &err);
                    }

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                }
            }
        }

        self.close(self.inner.settings.shutdown_grace()).await;
    }

    /// Dial both connections, set up channels, declare topology, and signal
    /// readiness. Returns a receiver that yields when either connection
    /// reports an error.
    async fn connect_and_setup(&self) -> Result<mpsc::Receiver<lapin::Error>, BrokerError> {
        let uri = &self.inner.settings.uri;

        let consume_conn = Connection::connect(uri, ConnectionProperties::default()).await?;
        let produce_conn = Connection::connect(uri, ConnectionProperties::default()).await?;

        let (err_tx, err_rx) = mpsc::channel(4);
        for conn in [&consume_conn, &produce_conn] {
            let tx = err_tx.clone();
            conn.on_error(move |err| {
                let _ = tx.try_send(err);
            });
        }

        let consumer_channel = consume_conn.create_channel().await?;
        consumer_channel
            .basic_qos(self.inner.settings.prefetch, BasicQosOptions::default())
            .await?;

        let mut producer_channels = Vec::with_capacity(self.inner.settings.producer_channels);
        for _ in 0..self.inner.settings.producer_channels {
            producer_channels.push(produce_conn.create_channel().await?);
        }

        // Best-effort; failures are reported and do not abort setup.
        topology::declare_all(&consumer_channel, self.inner.reporter.as_ref()).await;

        *self.inner.state.write() = Some(Active {
            consume_conn,
            produce_conn,
            consumer_channel,
            producer_channels,
        });

        self.inner.ready_tx.send_modify(|generation| *generation += 1);
        tracing::info!(
            generation = *self.inner.ready_rx.borrow(),
            "Broker connected and topology declared"
        );

        Ok(err_rx)
    }

    /// Drain in-flight work, then force-close every channel and connection.
    ///
    /// Waits for the completion tracker or the grace deadline, whichever
    /// comes first. Close errors are reported, not propagated.
    pub async fn close(&self, grace: Duration) {
        if !drain_with_deadline(&self.inner.tracker, grace).await {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Shutdown grace elapsed with work still in flight, closing anyway"
            );
        }

        let active = self.inner.state.write().take();
        if let Some(active) = active {
            for channel in &active.producer_channels {
                if let Err(err) = channel.close(200, "shutdown").await {
                    tracing::warn!(error = %err, "Producer channel close failed");
                }
            }
            if let Err(err) = active.consumer_channel.close(200, "shutdown").await {
                tracing::warn!(error = %err, "Consumer channel close failed");
            }
            if let Err(err) = active.produce_conn.close(200, "shutdown").await {
                tracing::warn!(error = %err, "Producer connection close failed");
            }
            if let Err(err) = active.consume_conn.close(200, "shutdown").await {
                tracing::warn!(error = %err, "Consumer connection close failed");
            }
        }

        tracing::info!("Broker closed");
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("ready_generation", &*self.inner.ready_rx.borrow())
            .finish_non_exhaustive()
    }
}

/// Wait for all tracked in-flight work, bounded by the grace deadline.
/// Returns whether the tracker fully drained.
async fn drain_with_deadline(tracker: &TaskTracker, grace: Duration) -> bool {
    tracker.close();
    timeout(grace, tracker.wait()).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn drain_waits_for_in_flight_work() {
        let tracker = TaskTracker::new();
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let completed = completed.clone();
            tracker.spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(drain_with_deadline(&tracker, Duration::from_secs(2)).await);
        assert_eq!(completed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn drain_gives_up_at_the_deadline() {
        let tracker = TaskTracker::new();
        let completed = Arc::new(AtomicUsize::new(0));

        let slow = completed.clone();
        tracker.spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            slow.fetch_add(1, Ordering::SeqCst);
        });

        let started = tokio::time::Instant::now();
        assert!(!drain_with_deadline(&tracker, Duration::from_millis(30)).await);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }
}
