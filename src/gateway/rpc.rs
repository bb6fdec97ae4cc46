//! Request/reply over the broker.
//!
//! One reply queue per process. A dispatcher task consumes it and hands each
//! reply to the caller registered under its correlation token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::GatewayError;
use crate::broker::{Broker, BrokerResult, Message, Subscription};

/// Sends one request and waits for its reply body.
///
/// Callers bound the wait themselves; dropping the returned future must
/// release everything the call registered.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(&self, payload: Vec<u8>) -> Result<Vec<u8>, GatewayError>;
}

type Waiters = Arc<Mutex<HashMap<String, oneshot::Sender<Vec<u8>>>>>;

fn lock(waiters: &Waiters) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Vec<u8>>>> {
    waiters.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a waiter on every exit path of a call.
struct PendingGuard {
    waiters: Waiters,
    token: String,
}

impl PendingGuard {
    fn register(waiters: &Waiters, token: String, tx: oneshot::Sender<Vec<u8>>) -> Self {
        lock(waiters).insert(token.clone(), tx);
        Self {
            waiters: Arc::clone(waiters),
            token,
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.waiters).remove(&self.token);
    }
}

/// [`RpcClient`] that publishes to the request queue and listens on a
/// private reply queue.
pub struct BrokerRpc {
    broker: Arc<dyn Broker>,
    request_queue: String,
    reply_queue: String,
    waiters: Waiters,
    /// Cleared when the dispatcher stops; no reply can arrive after that.
    listening: Arc<AtomicBool>,
    dispatcher: JoinHandle<()>,
}

impl BrokerRpc {
    /// Declare the queues and start the reply dispatcher.
    pub async fn start(
        broker: Arc<dyn Broker>,
        request_queue: impl Into<String>,
    ) -> BrokerResult<Self> {
        let request_queue = request_queue.into();
        broker.declare_queue(&request_queue).await?;
        let reply_queue = broker.declare_reply_queue().await?;
        let replies = broker.subscribe(&reply_queue).await?;

        let waiters = Waiters::default();
        let listening = Arc::new(AtomicBool::new(true));
        let dispatcher = tokio::spawn(dispatch(
            replies,
            Arc::clone(&waiters),
            Arc::clone(&listening),
        ));
        tracing::debug!(reply_queue = %reply_queue, "Reply dispatcher started");

        Ok(Self {
            broker,
            request_queue,
            reply_queue,
            waiters,
            listening,
            dispatcher,
        })
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// Whether replies are still being received.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Calls currently waiting for a reply.
    pub fn pending(&self) -> usize {
        lock(&self.waiters).len()
    }
}

impl Drop for BrokerRpc {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[async_trait]
impl RpcClient for BrokerRpc {
    async fn call(&self, payload: Vec<u8>) -> Result<Vec<u8>, GatewayError> {
        let token = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let _pending = PendingGuard::register(&self.waiters, token.clone(), tx);
        // Checked after registering: a dispatcher stopping later still
        // closes this waiter.
        if !self.is_listening() {
            return Err(GatewayError::ReplyChannelClosed);
        }

        let message = Message::new(payload)
            .with_reply_to(self.reply_queue.clone())
            .with_correlation_id(token);
        self.broker.publish(&self.request_queue, message).await?;

        rx.await.map_err(|_| GatewayError::ReplyChannelClosed)
    }
}

async fn dispatch(
    mut replies: Box<dyn Subscription>,
    waiters: Waiters,
    listening: Arc<AtomicBool>,
) {
    while let Some(delivery) = replies.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::error!("Reply consumer failed: {}", e);
                break;
            }
        };

        let waiter = delivery
            .message
            .correlation_id
            .as_deref()
            .and_then(|token| lock(&waiters).remove(token));
        match waiter {
            Some(tx) => {
                // The caller may have given up in the meantime.
                let _ = tx.send(delivery.message.body.clone());
            }
            None => tracing::debug!(
                token = ?delivery.message.correlation_id,
                "Discarding reply nobody is waiting for"
            ),
        }

        if let Err(e) = delivery.ack().await {
            tracing::error!("Failed to acknowledge reply: {}", e);
            break;
        }
    }

    // Refuse new calls, then wake every remaining caller with a closed channel.
    listening.store(false, Ordering::SeqCst);
    tracing::warn!("Reply dispatcher stopped, gateway calls will fail");
    lock(&waiters).clear();
}
