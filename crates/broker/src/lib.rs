//! A small abstraction over the message broker the core consumes from and publishes
//! to, with a real AMQP-backed implementation and an in-memory double for tests.
//!
//! The core never talks to `lapin` directly; it only sees [`Broker`] and [`Consumer`].
//! That keeps the join/barrier/recovery logic (the part worth testing thoroughly)
//! runnable without a real broker.

mod amqp;
mod memory;

pub use amqp::AmqpBroker;
pub use memory::MemoryBroker;

use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("amqp connection error: {0}")]
    Connection(#[from] lapin::Error),

    #[error("consumer for queue '{0}' was closed")]
    ConsumerClosed(String),
}

/// Where a published packet is routed: a direct queue, or a fanout exchange.
#[derive(Debug, Clone)]
pub enum Destination {
    Queue(String),
    Exchange(String),
}

/// A broker connection capable of declaring topology, consuming from a queue, and
/// publishing to a queue or exchange.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares `queue`, creating it if it doesn't already exist.
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Declares `exchange` as a fanout exchange and binds `queue` to it.
    async fn declare_fanout(&self, exchange: &str, queue: &str) -> Result<(), BrokerError>;

    /// Starts consuming `queue` with the given per-consumer prefetch count.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Box<dyn Consumer>, BrokerError>;

    /// Publishes `body` to a queue (direct routing key) or to a fanout exchange.
    async fn publish(&self, destination: &Destination, body: Vec<u8>) -> Result<(), BrokerError>;
}

/// A single consumer's stream of deliveries from one queue.
#[async_trait]
pub trait Consumer: Send {
    /// Awaits the next delivery, or `None` once the consumer is closed (shutdown).
    async fn recv(&mut self) -> Result<Option<Delivery>, BrokerError>;
}

/// One inbound message. Acknowledge it once its effects (state mutation, downstream
/// publish) are durable; a delivery that is never acked will be redelivered once the
/// channel is closed or the broker's own timeout elapses.
pub struct Delivery {
    pub body: Vec<u8>,
    pub queue: String,
    ack: AckHandle,
}

enum AckHandle {
    Amqp(lapin::message::Delivery),
    Memory,
}

impl Delivery {
    /// Acknowledges the delivery. Requeuing a packet is not a broker-level verb here:
    /// the caller acks the original delivery and republishes its body to the tail of
    /// `queue` via [`Broker::publish`], matching §5's "never nack-and-drop" rule.
    pub async fn ack(&self) -> Result<(), BrokerError> {
        match &self.ack {
            AckHandle::Amqp(delivery) => {
                delivery
                    .ack(lapin::options::BasicAckOptions::default())
                    .await?;
            }
            AckHandle::Memory => {}
        }
        Ok(())
    }
}
