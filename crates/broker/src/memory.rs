use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::{AckHandle, Broker, BrokerError, Consumer, Delivery, Destination};

/// An in-process [`Broker`] double, used by the core's integration tests. Queues are
/// unbounded MPSC channels; fanout exchanges are modeled as a set of bound queues that
/// every publish fans out to. There is no redelivery-on-crash here (tests drive
/// recovery by reopening the `Store` directly), but requeue-to-tail behaves exactly
/// like the real broker: publishing republishes to the back of the queue.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>,
    receivers: Mutex<HashMap<String, mpsc::UnboundedReceiver<Vec<u8>>>>,
    fanouts: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryBroker::default())
    }

    async fn sender_for(&self, queue: &str) -> mpsc::UnboundedSender<Vec<u8>> {
        let mut queues = self.queues.lock().await;
        if let Some(sender) = queues.get(queue) {
            return sender.clone();
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        queues.insert(queue.to_string(), sender.clone());
        self.receivers
            .lock()
            .await
            .insert(queue.to_string(), receiver);
        sender
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.sender_for(queue).await;
        Ok(())
    }

    async fn declare_fanout(&self, exchange: &str, queue: &str) -> Result<(), BrokerError> {
        self.sender_for(queue).await;
        self.fanouts
            .lock()
            .await
            .entry(exchange.to_string())
            .or_default()
            .push(queue.to_string());
        Ok(())
    }

    async fn consume(&self, queue: &str, _prefetch: u16) -> Result<Box<dyn Consumer>, BrokerError> {
        self.sender_for(queue).await;
        let receiver = self
            .receivers
            .lock()
            .await
            .remove(queue)
            .ok_or_else(|| BrokerError::ConsumerClosed(queue.to_string()))?;
        Ok(Box::new(MemoryConsumer {
            queue: queue.to_string(),
            receiver,
        }))
    }

    async fn publish(&self, destination: &Destination, body: Vec<u8>) -> Result<(), BrokerError> {
        match destination {
            Destination::Queue(queue) => {
                let sender = self.sender_for(queue).await;
                let _ = sender.send(body);
            }
            Destination::Exchange(exchange) => {
                let bound = self
                    .fanouts
                    .lock()
                    .await
                    .get(exchange)
                    .cloned()
                    .unwrap_or_default();
                for queue in bound {
                    let sender = self.sender_for(&queue).await;
                    let _ = sender.send(body.clone());
                }
            }
        }
        Ok(())
    }
}

struct MemoryConsumer {
    queue: String,
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn recv(&mut self) -> Result<Option<Delivery>, BrokerError> {
        Ok(self.receiver.recv().await.map(|body| Delivery {
            body,
            queue: self.queue.clone(),
            ack: AckHandle::Memory,
        }))
    }
}
