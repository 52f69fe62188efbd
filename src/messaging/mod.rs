//! Broker abstraction
//!
//! Two narrow traits sit between the job pipeline and the broker:
//!
//! - [`BrokerConnection`] owns one transport connection and hands out channels
//! - [`QueueChannel`] declares a queue, publishes, subscribes and settles
//!   deliveries with ack/reject
//!
//! [`amqp`] implements them over RabbitMQ; [`memory`] is an in-process double
//! that records every disposition, used by the tests.

pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use amqp::{AmqpChannel, AmqpConnection, AmqpSubscription};
pub use memory::{Disposition, MemoryBroker, MemoryChannel, MemoryConnection, MemorySubscription};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Failed to open channel: {0}")]
    Channel(String),

    #[error("Failed to declare queue '{queue}': {reason}")]
    Declare { queue: String, reason: String },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Failed to settle delivery {tag}: {reason}")]
    Settle { tag: DeliveryTag, reason: String },

    #[error("Unknown delivery tag {0}")]
    UnknownDeliveryTag(DeliveryTag),

    #[error("Failed to close connection: {0}")]
    Close(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Broker-assigned delivery identifier, scoped to the channel it arrived on
pub type DeliveryTag = u64;

/// Reference to a declared queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    pub name: String,
    pub durable: bool,
}

/// One message handed to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
    /// Set when the broker delivered this message before and it was never settled
    pub redelivered: bool,
}

/// Subscription parameters
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Unacknowledged deliveries the broker may push ahead of acks
    pub prefetch: u16,
    pub manual_ack: bool,
    pub consumer_tag: String,
}

impl SubscribeOptions {
    /// Prefetch 1 with manual acknowledgment: one job in flight at a time
    pub fn one_at_a_time() -> Self {
        Self {
            prefetch: 1,
            manual_ack: true,
            consumer_tag: format!("mediaq-{}", Uuid::new_v4()),
        }
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self::one_at_a_time()
    }
}

/// Transport connection to the broker
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    type Channel: QueueChannel;

    fn is_connected(&self) -> bool;

    /// Open a logical channel. Fails with [`BrokerError::NotConnected`] after close.
    async fn create_channel(&self) -> Result<Self::Channel>;

    /// Close the connection. Calling it on a closed connection is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Close if open, then connect again. Channels opened before are dead and
    /// must be re-created.
    async fn reconnect(&mut self) -> Result<()>;
}

/// Logical channel bound to one connection
#[async_trait]
pub trait QueueChannel: Send + Sync {
    type Subscription: Subscription;

    /// Declare (or look up) a queue. Idempotent for identical flags; the
    /// broker refuses a conflicting durability flag.
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<QueueHandle>;

    async fn publish(&self, queue: &QueueHandle, payload: &[u8], persistent: bool) -> Result<()>;

    async fn subscribe(
        &self,
        queue: &QueueHandle,
        options: SubscribeOptions,
    ) -> Result<Self::Subscription>;

    async fn ack(&self, tag: DeliveryTag) -> Result<()>;

    async fn reject(&self, tag: DeliveryTag, requeue: bool) -> Result<()>;
}

/// Stream of deliveries for one consumer
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` once the channel is closed.
    ///
    /// Dropping the returned future before it resolves loses no message.
    async fn next_delivery(&mut self) -> Option<Result<Delivery>>;
}
