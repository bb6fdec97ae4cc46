//! Request ingester: the coalescing step.
//!
//! For every incoming request the ingester hashes the payload and checks the
//! status store. A miss creates the record and publishes one discovery
//! message; a hit joins the work already tracked. Either way the caller gets
//! the current snapshot on its reply queue, and only then is the request
//! acknowledged.

use std::sync::Arc;

use thiserror::Error;

use crate::broker::messages::DiscoveryMessage;
use crate::broker::{Broker, BrokerError, Message};
use crate::config::QueueNames;
use crate::models::{RequestHash, RequestRecord};
use crate::query::Query;
use crate::store::{StatusStore, StoreError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// What the ingester did with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First sighting: record created and discovery published.
    Created(RequestHash),
    /// Joined work already tracked under this hash.
    Joined(RequestHash),
    /// Joined a record whose discovery had failed, and sent it now.
    Resumed(RequestHash),
    /// Not a well-formed request; consumed without a reply.
    Dropped,
}

pub struct Ingester {
    store: Arc<dyn StatusStore>,
    broker: Arc<dyn Broker>,
    queues: QueueNames,
}

impl Ingester {
    pub fn new(store: Arc<dyn StatusStore>, broker: Arc<dyn Broker>, queues: QueueNames) -> Self {
        Self {
            store,
            broker,
            queues,
        }
    }

    /// Process one request message, replying on its reply queue.
    ///
    /// Errors are transport failures; the message must not be acknowledged.
    pub async fn handle(&self, message: &Message) -> Result<IngestOutcome, IngestError> {
        let query = match Query::decode(&message.body) {
            Ok(query) => query,
            Err(e) => {
                tracing::warn!("Dropping request that is not a query: {}", e);
                return Ok(IngestOutcome::Dropped);
            }
        };

        let hash = query.hash();
        let (record, outcome) = match self.store.lookup(&hash).await? {
            Some(record) if record.discovery_pending => self.resume(&query, record).await?,
            Some(record) => (record, IngestOutcome::Joined(hash)),
            None => self.start(&query, hash).await?,
        };

        self.reply(message, &record).await?;
        Ok(outcome)
    }

    async fn publish_discovery(&self, query: &Query, hash: &RequestHash) -> Result<(), IngestError> {
        let discovery = DiscoveryMessage::new(hash.clone(), query.as_bytes());
        self.broker
            .publish(&self.queues.discovery, Message::json(&discovery)?)
            .await?;
        Ok(())
    }

    /// Create the record for a new hash and send out the discovery work order.
    ///
    /// Losing the create to another ingester turns this into a join. If the
    /// discovery cannot be published the record is flagged, so the
    /// redelivered request sends it instead of joining work that never started.
    async fn start(
        &self,
        query: &Query,
        hash: RequestHash,
    ) -> Result<(RequestRecord, IngestOutcome), IngestError> {
        match self.store.create(RequestRecord::new(hash.clone())).await {
            Ok(mut record) => {
                if let Err(e) = self.publish_discovery(query, &hash).await {
                    record.discovery_pending = true;
                    record.touch();
                    if let Err(save_err) = self.store.save(&hash, record).await {
                        tracing::error!(
                            hash = %hash,
                            "Failed to flag pending discovery: {}",
                            save_err
                        );
                    }
                    return Err(e);
                }
                tracing::info!(hash = %hash, "New request, discovery published");
                Ok((record, IngestOutcome::Created(hash)))
            }
            Err(StoreError::AlreadyExists(_)) => {
                tracing::debug!(hash = %hash, "Lost create race, joining existing record");
                let record = self.store.lookup(&hash).await?.ok_or_else(|| {
                    StoreError::Backend(format!("record {} vanished after create conflict", hash))
                })?;
                Ok((record, IngestOutcome::Joined(hash)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Publish the discovery a previous attempt failed to send.
    async fn resume(
        &self,
        query: &Query,
        mut record: RequestRecord,
    ) -> Result<(RequestRecord, IngestOutcome), IngestError> {
        let hash = record.hash.clone();
        self.publish_discovery(query, &hash).await?;

        record.discovery_pending = false;
        record.touch();
        let record = self.store.save(&hash, record).await?;
        tracing::info!(hash = %hash, "Pending discovery published");
        Ok((record, IngestOutcome::Resumed(hash)))
    }

    async fn reply(&self, inbound: &Message, record: &RequestRecord) -> Result<(), IngestError> {
        let Some(reply_to) = inbound.reply_to.as_deref() else {
            tracing::warn!(hash = %record.hash, "Request has no reply queue, not answering");
            return Ok(());
        };

        let mut reply = Message::json(&record.snapshot())?;
        if let Some(token) = &inbound.correlation_id {
            reply = reply.with_correlation_id(token.clone());
        }
        self.broker.publish(reply_to, reply).await?;
        Ok(())
    }

    /// Consume the request queue until it closes.
    ///
    /// Any store or broker failure stops the consumer; the message being
    /// processed stays unacknowledged and will be redelivered.
    pub async fn run(&self) -> Result<(), IngestError> {
        self.broker.declare_queue(&self.queues.request).await?;
        self.broker.declare_queue(&self.queues.discovery).await?;

        let mut requests = self.broker.subscribe(&self.queues.request).await?;
        tracing::info!("Ready to process requests from '{}'", self.queues.request);

        while let Some(delivery) = requests.next().await {
            let delivery = delivery?;
            let outcome = self.handle(&delivery.message).await?;
            tracing::debug!(?outcome, "Request processed");
            delivery.ack().await?;
        }

        tracing::info!("Request queue closed");
        Ok(())
    }
}

/// Consume a discovery queue no worker listens on, logging and acking each
/// order. Returns how many were consumed once the queue closes.
///
/// Used when every role runs in one process on a private broker.
pub async fn discard_discovery(broker: &dyn Broker, queue: &str) -> Result<usize, IngestError> {
    broker.declare_queue(queue).await?;
    let mut orders = broker.subscribe(queue).await?;
    let mut discarded = 0;

    while let Some(delivery) = orders.next().await {
        let delivery = delivery?;
        match serde_json::from_slice::<DiscoveryMessage>(&delivery.message.body) {
            Ok(order) => tracing::info!(hash = %order.hash, "No workers attached, discarding discovery"),
            Err(e) => tracing::warn!("Discarding unreadable discovery message: {}", e),
        }
        delivery.ack().await?;
        discarded += 1;
    }

    Ok(discarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::broker::testing::{Event, ScriptedBroker};
    use crate::broker::InMemoryBroker;
    use crate::models::Snapshot;
    use crate::store::{InMemoryStatusStore, StoreResult};

    const QUERY: &[u8] = br#"{"op":"ResultTTree","tree":"dudetree","source":{"op":"EventDataset"}}"#;

    fn setup() -> (Ingester, InMemoryStatusStore, InMemoryBroker) {
        let store = InMemoryStatusStore::new();
        let broker = InMemoryBroker::new();
        let ingester = Ingester::new(
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
            QueueNames::default(),
        );
        (ingester, store, broker)
    }

    fn request(token: &str) -> Message {
        Message::new(QUERY)
            .with_reply_to("reply.test")
            .with_correlation_id(token)
    }

    #[tokio::test]
    async fn first_request_creates_record_and_discovery() {
        let (ingester, store, broker) = setup();

        let outcome = ingester.handle(&request("c1")).await.unwrap();
        let hash = Query::decode(QUERY).unwrap().hash();
        assert_eq!(outcome, IngestOutcome::Created(hash.clone()));

        let record = store.lookup(&hash).await.unwrap().unwrap();
        assert_eq!(record.phase.as_str(), "waiting_for_data");
        assert_eq!(record.jobs, -1);
        assert!(!record.done);

        let discovery = broker.drain("find_did").await;
        assert_eq!(discovery.len(), 1);
        let msg: DiscoveryMessage = serde_json::from_slice(&discovery[0].body).unwrap();
        assert_eq!(msg.hash, hash);
        let payload = msg.decode_payload().unwrap();
        assert_eq!(Query::decode(&payload).unwrap().hash(), hash);

        let replies = broker.drain("reply.test").await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].correlation_id.as_deref(), Some("c1"));
        let snapshot: Snapshot = serde_json::from_slice(&replies[0].body).unwrap();
        assert_eq!(snapshot.phase.as_str(), "waiting_for_data");
        assert!(snapshot.files.is_empty());
    }

    #[tokio::test]
    async fn repeated_request_joins_without_new_discovery() {
        let (ingester, _store, broker) = setup();

        ingester.handle(&request("c1")).await.unwrap();
        let outcome = ingester.handle(&request("c2")).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Joined(_)));

        assert_eq!(broker.drain("find_did").await.len(), 1);
        let replies = broker.drain("reply.test").await;
        let tokens: Vec<_> = replies
            .iter()
            .map(|m| m.correlation_id.clone().unwrap())
            .collect();
        assert_eq!(tokens, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn malformed_request_is_dropped_silently() {
        let (ingester, store, broker) = setup();

        let message = Message::new(&b"not json"[..])
            .with_reply_to("reply.test")
            .with_correlation_id("c1");
        assert_eq!(
            ingester.handle(&message).await.unwrap(),
            IngestOutcome::Dropped
        );
        assert!(store.is_empty().await);
        assert!(broker.drain("reply.test").await.is_empty());
        assert!(broker.drain("find_did").await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_equal_requests_publish_one_discovery() {
        let (ingester, _store, broker) = setup();

        let (r1, r2) = (request("c1"), request("c2"));
        let (a, b) = tokio::join!(ingester.handle(&r1), ingester.handle(&r2));
        let outcomes = [a.unwrap(), b.unwrap()];
        let created = outcomes
            .iter()
            .filter(|o| matches!(o, IngestOutcome::Created(_)))
            .count();
        assert_eq!(created, 1);
        assert_eq!(broker.drain("find_did").await.len(), 1);
        assert_eq!(broker.drain("reply.test").await.len(), 2);
    }

    /// Reports a miss on the first lookup even though another writer got there first.
    struct RacingStore {
        inner: InMemoryStatusStore,
        raced: AtomicBool,
    }

    #[async_trait]
    impl StatusStore for RacingStore {
        async fn lookup(&self, hash: &RequestHash) -> StoreResult<Option<RequestRecord>> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.lookup(hash).await
        }

        async fn save(
            &self,
            hash: &RequestHash,
            record: RequestRecord,
        ) -> StoreResult<RequestRecord> {
            self.inner.save(hash, record).await
        }

        async fn create(&self, record: RequestRecord) -> StoreResult<RequestRecord> {
            self.inner.create(record).await
        }
    }

    #[tokio::test]
    async fn lost_create_race_becomes_join() {
        let inner = InMemoryStatusStore::new();
        let hash = Query::decode(QUERY).unwrap().hash();
        let mut winner = RequestRecord::new(hash.clone());
        winner.phase = crate::models::Phase::new("running");
        inner.create(winner).await.unwrap();

        let broker = InMemoryBroker::new();
        let ingester = Ingester::new(
            Arc::new(RacingStore {
                inner,
                raced: AtomicBool::new(false),
            }),
            Arc::new(broker.clone()),
            QueueNames::default(),
        );

        let outcome = ingester.handle(&request("c1")).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Joined(hash));
        assert!(broker.drain("find_did").await.is_empty());

        let replies = broker.drain("reply.test").await;
        let snapshot: Snapshot = serde_json::from_slice(&replies[0].body).unwrap();
        assert_eq!(snapshot.phase.as_str(), "running");
    }

    #[tokio::test]
    async fn run_publishes_reply_before_ack() {
        let broker = ScriptedBroker::new();
        broker.push("as_request", request("c1"));
        let ingester = Ingester::new(
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(broker.clone()),
            QueueNames::default(),
        );

        ingester.run().await.unwrap();
        assert_eq!(
            broker.events(),
            vec![
                Event::Published("find_did".to_string()),
                Event::Published("reply.test".to_string()),
                Event::Acked("as_request".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_reply_leaves_request_unacked() {
        let broker = ScriptedBroker::new();
        broker.push("as_request", request("c1"));
        broker.fail_publish("reply.test", 1);
        let ingester = Ingester::new(
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(broker.clone()),
            QueueNames::default(),
        );

        assert!(matches!(ingester.run().await, Err(IngestError::Broker(_))));
        assert!(!broker
            .events()
            .iter()
            .any(|e| matches!(e, Event::Acked(_) | Event::Rejected(_))));
    }

    #[tokio::test]
    async fn failed_discovery_is_sent_on_redelivery() {
        let store = InMemoryStatusStore::new();
        let broker = ScriptedBroker::new();
        broker.fail_publish("find_did", 1);
        let ingester = Ingester::new(
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
            QueueNames::default(),
        );
        let hash = Query::decode(QUERY).unwrap().hash();

        assert!(ingester.handle(&request("c1")).await.is_err());
        assert!(store.lookup(&hash).await.unwrap().unwrap().discovery_pending);
        assert!(broker.published("reply.test").is_empty());

        // The broker redelivers the same request.
        let outcome = ingester.handle(&request("c1")).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Resumed(hash.clone()));
        assert_eq!(broker.published("find_did").len(), 1);
        assert!(!store.lookup(&hash).await.unwrap().unwrap().discovery_pending);

        // Later requests join as usual.
        let outcome = ingester.handle(&request("c2")).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Joined(hash));
        assert_eq!(broker.published("find_did").len(), 1);
        assert_eq!(broker.published("reply.test").len(), 2);
    }

    #[tokio::test]
    async fn unattended_discovery_is_consumed() {
        let broker = ScriptedBroker::new();
        let order = DiscoveryMessage::new("h".into(), QUERY);
        broker.push("find_did", Message::json(&order).unwrap());
        broker.push("find_did", Message::new("garbage"));

        let discarded = discard_discovery(&broker, "find_did").await.unwrap();
        assert_eq!(discarded, 2);
        assert_eq!(
            broker.events(),
            vec![
                Event::Acked("find_did".to_string()),
                Event::Acked("find_did".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn run_answers_queued_requests() {
        let (ingester, store, broker) = setup();
        broker.publish("as_request", request("c1")).await.unwrap();

        let handle = tokio::spawn(async move { ingester.run().await });
        let reply = loop {
            let replies = broker.drain("reply.test").await;
            if let Some(reply) = replies.into_iter().next() {
                break reply;
            }
            tokio::task::yield_now().await;
        };
        handle.abort();

        assert_eq!(reply.correlation_id.as_deref(), Some("c1"));
        assert_eq!(store.len().await, 1);
    }
}
