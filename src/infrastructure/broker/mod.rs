//! Message Broker Client
//!
//! Resilient AMQP client: a connection supervisor owning two physical
//! connections, idempotent topology declaration, a producer channel pool
//! with a publisher, and a consumer runtime with bounded concurrency and
//! bounded redelivery.
//!
//! Delivery semantics are at-least-once; idempotency is the consumer's
//! concern.

mod consumer;
mod error;
mod publisher;
mod supervisor;
pub mod topology;

pub use consumer::{consume, ConsumerHandler, HandlerOutcome, QueueConfig};
pub use error::BrokerError;
pub use publisher::{EventPublisher, PublishOpts, Publisher};
pub use supervisor::Broker;
