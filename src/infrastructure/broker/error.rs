//! Broker Error Types

/// Errors surfaced by the broker client.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// No channel has been established yet; the broker was never reachable
    /// or is mid-reconnect.
    #[error("Broker unavailable")]
    Unavailable,

    /// The operation was cancelled by shutdown before completing.
    #[error("Broker operation cancelled")]
    Cancelled,

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
