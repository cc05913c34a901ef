//! Broker Topology
//!
//! The fixed set of exchanges, queues, and bindings this service relies on.
//! The whole table is redeclared after every successful (re)connect, so
//! every declaration must be idempotent; a declaration that fails is
//! reported and the remaining declarations are still attempted.

use async_trait::async_trait;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};

use super::error::BrokerError;
use crate::shared::reporting::ErrorReporter;

/// Exchange names.
pub const CHAT_EXCHANGE: &str = "chat";
pub const MESSAGE_STATE_EXCHANGE: &str = "message-state";
pub const NOTIFICATION_EXCHANGE: &str = "notification";
pub const BLUR_HASH_EXCHANGE: &str = "blur-hash";
pub const EMAIL_EXCHANGE: &str = "email";
pub const DEAD_LETTER_EXCHANGE: &str = "dead-letter";

/// Queue names.
pub const SINGLE_CHAT_QUEUE: &str = "single-chat";
pub const GROUP_CHAT_QUEUE: &str = "group-chat";
pub const MESSAGE_STATE_QUEUE: &str = "message-state";
pub const NOTIFICATION_QUEUE: &str = "notification";
pub const BLUR_HASH_QUEUE: &str = "blur-hash";
pub const EMAIL_QUEUE: &str = "email";
pub const DEAD_LETTER_QUEUE: &str = "dead-letter";

/// Routing keys.
pub const SINGLE_CHAT_KEY: &str = "chat.single";
pub const GROUP_CHAT_KEY: &str = "chat.group";
pub const MESSAGE_STATE_KEY: &str = "message.state";
pub const NOTIFICATION_KEY: &str = "notification";
pub const BLUR_HASH_KEY: &str = "blur-hash";
pub const EMAIL_KEY: &str = "email";

/// The exchange kind for a topology entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyExchangeKind {
    Topic,
    Direct,
}

impl From<TopologyExchangeKind> for ExchangeKind {
    fn from(kind: TopologyExchangeKind) -> Self {
        match kind {
            TopologyExchangeKind::Topic => ExchangeKind::Topic,
            TopologyExchangeKind::Direct => ExchangeKind::Direct,
        }
    }
}

/// One exchange/queue/binding triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyEntry {
    pub exchange: &'static str,
    pub kind: TopologyExchangeKind,
    pub queue: &'static str,
    pub routing_key: &'static str,
}

/// The full topology table.
pub const TOPOLOGY: [TopologyEntry; 6] = [
    TopologyEntry {
        exchange: CHAT_EXCHANGE,
        kind: TopologyExchangeKind::Topic,
        queue: SINGLE_CHAT_QUEUE,
        routing_key: SINGLE_CHAT_KEY,
    },
    TopologyEntry {
        exchange: CHAT_EXCHANGE,
        kind: TopologyExchangeKind::Topic,
        queue: GROUP_CHAT_QUEUE,
        routing_key: GROUP_CHAT_KEY,
    },
    TopologyEntry {
        exchange: MESSAGE_STATE_EXCHANGE,
        kind: TopologyExchangeKind::Direct,
        queue: MESSAGE_STATE_QUEUE,
        routing_key: MESSAGE_STATE_KEY,
    },
    TopologyEntry {
        exchange: NOTIFICATION_EXCHANGE,
        kind: TopologyExchangeKind::Direct,
        queue: NOTIFICATION_QUEUE,
        routing_key: NOTIFICATION_KEY,
    },
    TopologyEntry {
        exchange: BLUR_HASH_EXCHANGE,
        kind: TopologyExchangeKind::Direct,
        queue: BLUR_HASH_QUEUE,
        routing_key: BLUR_HASH_KEY,
    },
    TopologyEntry {
        exchange: EMAIL_EXCHANGE,
        kind: TopologyExchangeKind::Direct,
        queue: EMAIL_QUEUE,
        routing_key: EMAIL_KEY,
    },
];

/// Abstraction over the declaration operations, so the declaration pass can
/// be exercised without a live broker.
#[async_trait]
pub trait TopologyDeclarator: Send + Sync {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: TopologyExchangeKind,
    ) -> Result<(), BrokerError>;

    /// `dead_letter_to` routes rejected deliveries to the named exchange.
    async fn declare_queue(
        &self,
        name: &str,
        dead_letter_to: Option<&str>,
    ) -> Result<(), BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;
}

#[async_trait]
impl TopologyDeclarator for Channel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: TopologyExchangeKind,
    ) -> Result<(), BrokerError> {
        self.exchange_declare(
            name,
            kind.into(),
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }

    async fn declare_queue(
        &self,
        name: &str,
        dead_letter_to: Option<&str>,
    ) -> Result<(), BrokerError> {
        let mut args = FieldTable::default();
        if let Some(exchange) = dead_letter_to {
            args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(exchange.into()),
            );
        }

        self.queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            args,
        )
        .await?;
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }
}

/// Declare the full topology: exchanges, then queues, then bindings.
///
/// Best-effort: a failed declaration is reported and counted, and the pass
/// moves on to the next one. Returns the number of failed declarations.
pub async fn declare_all<D: TopologyDeclarator + ?Sized>(
    declarator: &D,
    reporter: &dyn ErrorReporter,
) -> usize {
    let mut failures = 0;

    // The dead-letter sink comes first so the consumer queues can point at it.
    if let Err(err) = declarator
        .declare_exchange(DEAD_LETTER_EXCHANGE, TopologyExchangeKind::Direct)
        .await
    {
        reporter.report("topology", &err);
        failures += 1;
    }
    for entry in &TOPOLOGY {
        if let Err(err) = declarator.declare_exchange(entry.exchange, entry.kind).await {
            reporter.report("topology", &err);
            failures += 1;
        }
    }

    if let Err(err) = declarator.declare_queue(DEAD_LETTER_QUEUE, None).await {
        reporter.report("topology", &err);
        failures += 1;
    }
    for entry in &TOPOLOGY {
        if let Err(err) = declarator
            .declare_queue(entry.queue, Some(DEAD_LETTER_EXCHANGE))
            .await
        {
            reporter.report("topology", &err);
            failures += 1;
        }
    }

    // Dead-lettered messages keep their original routing key, so the sink
    // queue binds to every key in the table.
    for entry in &TOPOLOGY {
        if let Err(err) = declarator
            .bind_queue(DEAD_LETTER_QUEUE, DEAD_LETTER_EXCHANGE, entry.routing_key)
            .await
        {
            reporter.report("topology", &err);
            failures += 1;
        }
    }
    for entry in &TOPOLOGY {
        if let Err(err) = declarator
            .bind_queue(entry.queue, entry.exchange, entry.routing_key)
            .await
        {
            reporter.report("topology", &err);
            failures += 1;
        }
    }

    if failures > 0 {
        tracing::warn!(failures, "Topology declared with failures");
    } else {
        tracing::debug!("Topology declared");
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::reporting::test_support::RecordingReporter;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    /// Declarator that records declarations into idempotent sets, mimicking a
    /// broker where re-declaring an existing entity succeeds.
    #[derive(Default)]
    struct RecordingDeclarator {
        exchanges: Mutex<BTreeSet<String>>,
        queues: Mutex<BTreeSet<String>>,
        bindings: Mutex<BTreeSet<(String, String, String)>>,
        fail_exchange: Option<&'static str>,
    }

    #[async_trait]
    impl TopologyDeclarator for RecordingDeclarator {
        async fn declare_exchange(
            &self,
            name: &str,
            _kind: TopologyExchangeKind,
        ) -> Result<(), BrokerError> {
            if self.fail_exchange == Some(name) {
                return Err(BrokerError::Unavailable);
            }
            self.exchanges.lock().insert(name.to_string());
            Ok(())
        }

        async fn declare_queue(
            &self,
            name: &str,
            _dead_letter_to: Option<&str>,
        ) -> Result<(), BrokerError> {
            self.queues.lock().insert(name.to_string());
            Ok(())
        }

        async fn bind_queue(
            &self,
            queue: &str,
            exchange: &str,
            routing_key: &str,
        ) -> Result<(), BrokerError> {
            self.bindings.lock().insert((
                queue.to_string(),
                exchange.to_string(),
                routing_key.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn declaring_twice_is_idempotent() {
        let declarator = RecordingDeclarator::default();
        let reporter = RecordingReporter::default();

        assert_eq!(declare_all(&declarator, &reporter).await, 0);
        let exchanges_once = declarator.exchanges.lock().clone();
        let queues_once = declarator.queues.lock().clone();
        let bindings_once = declarator.bindings.lock().clone();

        // Simulated reconnect
        assert_eq!(declare_all(&declarator, &reporter).await, 0);

        assert_eq!(*declarator.exchanges.lock(), exchanges_once);
        assert_eq!(*declarator.queues.lock(), queues_once);
        assert_eq!(*declarator.bindings.lock(), bindings_once);
        assert!(reporter.reports.lock().is_empty());
    }

    #[tokio::test]
    async fn declares_expected_entities() {
        let declarator = RecordingDeclarator::default();
        let reporter = RecordingReporter::default();

        declare_all(&declarator, &reporter).await;

        let exchanges = declarator.exchanges.lock().clone();
        assert_eq!(exchanges.len(), 6); // 5 application exchanges + dead-letter
        assert!(exchanges.contains("chat"));
        assert!(exchanges.contains("dead-letter"));

        let queues = declarator.queues.lock().clone();
        assert_eq!(queues.len(), 7);
        assert!(queues.contains("single-chat"));
        assert!(queues.contains("group-chat"));

        assert!(declarator.bindings.lock().contains(&(
            "single-chat".to_string(),
            "chat".to_string(),
            "chat.single".to_string()
        )));
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_rest() {
        let declarator = RecordingDeclarator {
            fail_exchange: Some("chat"),
            ..Default::default()
        };
        let reporter = RecordingReporter::default();

        let failures = declare_all(&declarator, &reporter).await;

        // "chat" appears twice in the table, so it fails twice
        assert_eq!(failures, 2);
        assert_eq!(reporter.reports.lock().len(), 2);
        // Everything after the failed exchange was still declared
        assert!(declarator.exchanges.lock().contains("notification"));
        assert_eq!(declarator.queues.lock().len(), 7);
    }
}
