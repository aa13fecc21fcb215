use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};

use crate::{AckHandle, Broker, BrokerError, Consumer, Delivery, Destination};

/// An AMQP-backed [`Broker`], talking to a RabbitMQ-compatible server through `lapin`.
/// Every call that needs a channel opens its own: per §5, each consumer loop owns a
/// broker channel and channels are never shared across loops.
pub struct AmqpBroker {
    connection: Connection,
}

impl AmqpBroker {
    pub async fn connect(uri: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        Ok(AmqpBroker { connection })
    }

    async fn channel(&self) -> Result<Channel, BrokerError> {
        Ok(self.connection.create_channel().await?)
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let channel = self.channel().await?;
        channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await?;
        Ok(())
    }

    async fn declare_fanout(&self, exchange: &str, queue: &str) -> Result<(), BrokerError> {
        let channel = self.channel().await?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await?;
        channel
            .queue_bind(
                queue,
                exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Box<dyn Consumer>, BrokerError> {
        let channel = self.channel().await?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer_tag = format!("review-filter-{queue}");
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(Box::new(AmqpConsumer {
            queue: queue.to_string(),
            consumer,
        }))
    }

    async fn publish(&self, destination: &Destination, body: Vec<u8>) -> Result<(), BrokerError> {
        let channel = self.channel().await?;
        let (exchange, routing_key) = match destination {
            Destination::Queue(queue) => ("", queue.as_str()),
            Destination::Exchange(exchange) => (exchange.as_str(), ""),
        };
        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default(),
            )
            .await?
            .await?;
        Ok(())
    }
}

struct AmqpConsumer {
    queue: String,
    consumer: lapin::Consumer,
}

#[async_trait]
impl Consumer for AmqpConsumer {
    async fn recv(&mut self) -> Result<Option<Delivery>, BrokerError> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(Delivery {
                body: delivery.data.clone(),
                queue: self.queue.clone(),
                ack: AckHandle::Amqp(delivery),
            })),
            Some(Err(err)) => Err(err.into()),
            None => Ok(None),
        }
    }
}
