//! In-memory broker for single-process operation and tests.
//!
//! Each queue is an unbounded channel with at most one consumer. Messages
//! published before anyone subscribes are buffered, and can also be taken
//! out with [`InMemoryBroker::drain`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{Acknowledge, Broker, BrokerError, BrokerResult, Delivery, Message, Subscription};

struct Queue {
    tx: mpsc::UnboundedSender<Message>,
    /// Taken by the first subscriber.
    rx: Option<mpsc::UnboundedReceiver<Message>>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    queues: Arc<Mutex<HashMap<String, Queue>>>,
    reply_seq: Arc<AtomicU64>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every buffered message of an unconsumed queue.
    pub async fn drain(&self, queue: &str) -> Vec<Message> {
        let mut queues = self.queues.lock().await;
        let mut drained = Vec::new();
        if let Some(rx) = queues.get_mut(queue).and_then(|q| q.rx.as_mut()) {
            while let Ok(message) = rx.try_recv() {
                drained.push(message);
            }
        }
        drained
    }

    async fn sender(&self, queue: &str) -> mpsc::UnboundedSender<Message> {
        let mut queues = self.queues.lock().await;
        queues
            .entry(queue.to_string())
            .or_insert_with(Queue::new)
            .tx
            .clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_queue(&self, name: &str) -> BrokerResult<()> {
        self.sender(name).await;
        Ok(())
    }

    async fn declare_reply_queue(&self) -> BrokerResult<String> {
        let seq = self.reply_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("reply.{}", seq);
        self.declare_queue(&name).await?;
        Ok(name)
    }

    async fn publish(&self, queue: &str, message: Message) -> BrokerResult<()> {
        self.sender(queue)
            .await
            .send(message)
            .map_err(|_| BrokerError::Publish(format!("queue '{}' is closed", queue)))
    }

    async fn subscribe(&self, queue: &str) -> BrokerResult<Box<dyn Subscription>> {
        let mut queues = self.queues.lock().await;
        let entry = queues.entry(queue.to_string()).or_insert_with(Queue::new);
        let rx = entry.rx.take().ok_or_else(|| {
            BrokerError::Consume(format!("queue '{}' already has a consumer", queue))
        })?;
        Ok(Box::new(MemorySubscription {
            tx: entry.tx.clone(),
            rx,
        }))
    }
}

struct MemorySubscription {
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<BrokerResult<Delivery>> {
        let message = self.rx.recv().await?;
        let acker = MemoryAcker {
            tx: self.tx.clone(),
            message: message.clone(),
        };
        Some(Ok(Delivery::new(message, Box::new(acker))))
    }
}

struct MemoryAcker {
    tx: mpsc::UnboundedSender<Message>,
    message: Message,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(self: Box<Self>) -> BrokerResult<()> {
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> BrokerResult<()> {
        if requeue {
            self.tx
                .send(self.message)
                .map_err(|_| BrokerError::Ack("queue is closed".to_string()))?;
        }
        Ok(())
    }
}
