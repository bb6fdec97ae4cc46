//! Scripted broker for tests that need to see publish and ack ordering.
//!
//! Subscriptions hand out the messages queued with [`ScriptedBroker::push`]
//! and then close. Every publish and settlement is recorded in one log.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Acknowledge, Broker, BrokerError, BrokerResult, Delivery, Message, Subscription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Published(String),
    Acked(String),
    Rejected(String),
}

#[derive(Default)]
struct State {
    inbox: HashMap<String, VecDeque<Message>>,
    published: HashMap<String, Vec<Message>>,
    failures: HashMap<String, usize>,
    events: Vec<Event>,
}

#[derive(Clone, Default)]
pub struct ScriptedBroker {
    state: Arc<Mutex<State>>,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Queue a message for the next subscriber of `queue`.
    pub fn push(&self, queue: &str, message: Message) {
        self.state()
            .inbox
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
    }

    /// Make the next `times` publishes to `queue` fail.
    pub fn fail_publish(&self, queue: &str, times: usize) {
        self.state().failures.insert(queue.to_string(), times);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn published(&self, queue: &str) -> Vec<Message> {
        self.state()
            .published
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for ScriptedBroker {
    async fn declare_queue(&self, _name: &str) -> BrokerResult<()> {
        Ok(())
    }

    async fn declare_reply_queue(&self) -> BrokerResult<String> {
        Ok("reply.scripted".to_string())
    }

    async fn publish(&self, queue: &str, message: Message) -> BrokerResult<()> {
        let mut state = self.state();
        if let Some(left) = state.failures.get_mut(queue) {
            if *left > 0 {
                *left -= 1;
                return Err(BrokerError::Publish(format!("'{}' refused", queue)));
            }
        }
        state.events.push(Event::Published(queue.to_string()));
        state
            .published
            .entry(queue.to_string())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> BrokerResult<Box<dyn Subscription>> {
        let pending = self.state().inbox.remove(queue).unwrap_or_default();
        Ok(Box::new(ScriptedSubscription {
            queue: queue.to_string(),
            pending,
            broker: self.clone(),
        }))
    }
}

struct ScriptedSubscription {
    queue: String,
    pending: VecDeque<Message>,
    broker: ScriptedBroker,
}

#[async_trait]
impl Subscription for ScriptedSubscription {
    async fn next(&mut self) -> Option<BrokerResult<Delivery>> {
        let message = self.pending.pop_front()?;
        let acker = ScriptedAcker {
            queue: self.queue.clone(),
            broker: self.broker.clone(),
        };
        Some(Ok(Delivery::new(message, Box::new(acker))))
    }
}

struct ScriptedAcker {
    queue: String,
    broker: ScriptedBroker,
}

#[async_trait]
impl Acknowledge for ScriptedAcker {
    async fn ack(self: Box<Self>) -> BrokerResult<()> {
        let this = *self;
        this.broker.state().events.push(Event::Acked(this.queue));
        Ok(())
    }

    async fn reject(self: Box<Self>, _requeue: bool) -> BrokerResult<()> {
        let this = *self;
        this.broker.state().events.push(Event::Rejected(this.queue));
        Ok(())
    }
}
