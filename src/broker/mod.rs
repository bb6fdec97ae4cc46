//! Message broker abstraction.
//!
//! The ingester, updater and gateway only talk to each other through queues.
//! Backends:
//! - In-memory (single process, tests and standalone mode)
//! - AMQP via RabbitMQ (requires the `amqp-broker` feature)

#[cfg(feature = "amqp-broker")]
mod amqp;
mod memory;
pub mod messages;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

#[cfg(feature = "amqp-broker")]
pub use amqp::AmqpBroker;
pub use memory::InMemoryBroker;

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors from broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker connection error: {0}")]
    Connection(String),
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Consume failed: {0}")]
    Consume(String),
    #[error("Acknowledge failed: {0}")]
    Ack(String),
    #[error("Message codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A message body plus the routing metadata used for request/reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    /// Queue the receiver should answer on.
    pub reply_to: Option<String>,
    /// Token the answer must carry back.
    pub correlation_id: Option<String>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Serialize `value` as a JSON message body.
    pub fn json<T: serde::Serialize>(value: &T) -> BrokerResult<Self> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn with_correlation_id(mut self, token: impl Into<String>) -> Self {
        self.correlation_id = Some(token.into());
        self
    }
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledge: Send {
    /// Mark the delivery as consumed.
    async fn ack(self: Box<Self>) -> BrokerResult<()>;

    /// Give the delivery back; `requeue` asks the broker to redeliver it.
    async fn reject(self: Box<Self>, requeue: bool) -> BrokerResult<()>;
}

/// A received message that must be acknowledged or rejected.
///
/// Dropping it unsettled leaves redelivery to the broker.
pub struct Delivery {
    pub message: Message,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(message: Message, acker: Box<dyn Acknowledge>) -> Self {
        Self { message, acker }
    }

    pub async fn ack(self) -> BrokerResult<()> {
        self.acker.ack().await
    }

    pub async fn reject(self, requeue: bool) -> BrokerResult<()> {
        self.acker.reject(requeue).await
    }
}

/// Stream of deliveries from one queue.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` once the subscription is closed.
    ///
    /// Must be cancel safe: dropping the future before it completes loses
    /// no message, so callers can race several subscriptions.
    async fn next(&mut self) -> Option<BrokerResult<Delivery>>;
}

/// Queue operations the broker roles need.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Make sure a named queue exists.
    async fn declare_queue(&self, name: &str) -> BrokerResult<()>;

    /// Declare a private, broker-named queue for replies and return its name.
    /// It disappears together with its consumer.
    async fn declare_reply_queue(&self) -> BrokerResult<String>;

    /// Publish to a queue by name (default exchange).
    async fn publish(&self, queue: &str, message: Message) -> BrokerResult<()>;

    /// Start consuming a queue with manual acknowledgement.
    async fn subscribe(&self, queue: &str) -> BrokerResult<Box<dyn Subscription>>;
}
