//! Consumer Runtime
//!
//! Subscribes to a queue and drives a handler per delivery, with the
//! acknowledgment performed exactly once per delivery attempt based on the
//! handler's outcome. Concurrent execution is bounded by a semaphore sized
//! independently of the server-side prefetch.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::error::BrokerError;

/// What the handler decided about one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Handled successfully.
    Ack,
    /// Permanent failure (e.g. unparseable payload); redelivery cannot help.
    Drop,
    /// Transient failure; worth another attempt.
    Retry,
}

/// Per-delivery handler contract.
///
/// The runtime owns the acknowledgment; handlers only report an outcome and
/// must be safe to run concurrently when the queue is configured for it.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn handle(&self, body: &[u8], redelivered: bool) -> HandlerOutcome;
}

/// Subscription configuration for one queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub queue: String,
    /// Run handlers as independent tasks instead of inline.
    pub concurrent: bool,
    /// Cap on concurrently executing handlers when `concurrent` is set.
    pub max_in_flight: usize,
}

/// How to acknowledge one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckDecision {
    Ack,
    NackRequeue,
    NackDeadLetter,
}

/// Map a handler outcome to an acknowledgment.
///
/// Retries are bounded to two attempts: a transient failure requeues once,
/// and a failure on the redelivered attempt routes the message to the
/// dead-letter queue instead of looping forever.
fn decide(outcome: HandlerOutcome, redelivered: bool) -> AckDecision {
    match outcome {
        HandlerOutcome::Ack | HandlerOutcome::Drop => AckDecision::Ack,
        HandlerOutcome::Retry if !redelivered => AckDecision::NackRequeue,
        HandlerOutcome::Retry => AckDecision::NackDeadLetter,
    }
}

async fn acknowledge(delivery: &Delivery, decision: AckDecision) {
    let result = match decision {
        AckDecision::Ack => delivery.ack(BasicAckOptions::default()).await,
        AckDecision::NackRequeue => {
            delivery
                .nack(BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await
        }
        AckDecision::NackDeadLetter => {
            delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                })
                .await
        }
    };

    if let Err(err) = result {
        tracing::warn!(error = %err, decision = ?decision, "Acknowledgment failed");
    }
}

/// Consume a queue until the token fires and buffered deliveries drain.
///
/// The subscription is cancelled (`basic_cancel`) exactly once when the
/// token fires; deliveries already buffered client-side are still handled
/// before the stream ends. Handler executions register with `tracker` so
/// broker shutdown can wait for them.
pub async fn consume(
    token: CancellationToken,
    channel: Channel,
    config: QueueConfig,
    handler: Arc<dyn ConsumerHandler>,
    tracker: TaskTracker,
) -> Result<(), BrokerError> {
    let consumer_tag = format!("{}-{}", config.queue, Uuid::new_v4());
    let mut consumer = channel
        .basic_consume(
            &config.queue,
            &consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    tracing::info!(queue = %config.queue, consumer_tag = %consumer_tag, "Consuming");

    let semaphore = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            _ = token.cancelled(), if !cancel_requested => {
                cancel_requested = true;
                tracing::debug!(queue = %config.queue, "Cancelling subscription, draining");
                if let Err(err) = channel
                    .basic_cancel(&consumer_tag, BasicCancelOptions::default())
                    .await
                {
                    tracing::warn!(error = %err, "Subscription cancel failed");
                }
            }
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let handler = handler.clone();
                        let work = async move {
                            let redelivered = delivery.redelivered;
                            let outcome = handler.handle(&delivery.data, redelivered).await;
                            acknowledge(&delivery, decide(outcome, redelivered)).await;
                        };

                        if config.concurrent {
                            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                break;
                            };
                            tracker.spawn(async move {
                                let _permit = permit;
                                work.await;
                            });
                        } else {
                            tracker.track_future(work).await;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(queue = %config.queue, error = %err, "Consume stream error");
                        return Err(err.into());
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!(queue = %config.queue, "Consumer drained");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(HandlerOutcome::Ack, false => AckDecision::Ack)]
    #[test_case(HandlerOutcome::Ack, true => AckDecision::Ack)]
    #[test_case(HandlerOutcome::Drop, false => AckDecision::Ack)]
    #[test_case(HandlerOutcome::Drop, true => AckDecision::Ack)]
    #[test_case(HandlerOutcome::Retry, false => AckDecision::NackRequeue)]
    #[test_case(HandlerOutcome::Retry, true => AckDecision::NackDeadLetter)]
    fn outcome_mapping(outcome: HandlerOutcome, redelivered: bool) -> AckDecision {
        decide(outcome, redelivered)
    }

    /// Redelivery is bounded: however many times a failing handler runs, the
    /// second attempt always dead-letters instead of requeueing again.
    #[test]
    fn poison_message_never_requeues_twice() {
        assert_eq!(decide(HandlerOutcome::Retry, false), AckDecision::NackRequeue);
        for _ in 0..100 {
            assert_eq!(
                decide(HandlerOutcome::Retry, true),
                AckDecision::NackDeadLetter
            );
        }
    }
}
