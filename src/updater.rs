//! State updater: applies worker progress events to stored records.
//!
//! One consumer reads the three event queues and applies events strictly one
//! after another. Events for a hash the store does not know are logged and
//! dropped, never retried.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::broker::messages::{AddFileEvent, ChangePhaseEvent, SetJobCountEvent};
use crate::broker::{Broker, BrokerError, Subscription};
use crate::config::QueueNames;
use crate::models::{FileEntry, Phase, PhasePolicy, RequestRecord};
use crate::store::{StatusStore, StoreError};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// What happened to one progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The record was updated and saved.
    Applied(RequestRecord),
    /// No record exists for the event's hash.
    Unknown,
    /// The phase policy refused the transition.
    Refused,
    /// The body did not decode as the expected event.
    Malformed,
}

/// The three progress event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    AddFile,
    ChangePhase,
    SetJobCount,
}

impl ProgressKind {
    pub fn queue<'a>(&self, queues: &'a QueueNames) -> &'a str {
        match self {
            Self::AddFile => &queues.add_file,
            Self::ChangePhase => &queues.change_phase,
            Self::SetJobCount => &queues.set_job_count,
        }
    }
}

pub struct StateUpdater {
    store: Arc<dyn StatusStore>,
    broker: Arc<dyn Broker>,
    queues: QueueNames,
    policy: Arc<dyn PhasePolicy>,
}

impl StateUpdater {
    pub fn new(
        store: Arc<dyn StatusStore>,
        broker: Arc<dyn Broker>,
        queues: QueueNames,
        policy: Arc<dyn PhasePolicy>,
    ) -> Self {
        Self {
            store,
            broker,
            queues,
            policy,
        }
    }

    /// Record an output file and recompute completion.
    pub async fn add_file(&self, event: &AddFileEvent) -> Result<UpdateOutcome, UpdateError> {
        let Some(mut record) = self.store.lookup(&event.hash).await? else {
            tracing::warn!(
                hash = %event.hash,
                "No entry for hash, ignoring added file {}",
                event.file_reference
            );
            return Ok(UpdateOutcome::Unknown);
        };

        record.add_file(FileEntry::new(&event.file_reference, &event.tree_name));
        record.refresh_done();
        record.touch();
        let record = self.store.save(&event.hash, record).await?;

        tracing::debug!(
            hash = %event.hash,
            files = record.files.len(),
            jobs = record.jobs,
            done = record.done,
            "File added"
        );
        Ok(UpdateOutcome::Applied(record))
    }

    /// Move a record to another phase. Files, jobs and `done` are untouched.
    pub async fn change_phase(
        &self,
        event: &ChangePhaseEvent,
    ) -> Result<UpdateOutcome, UpdateError> {
        let Some(mut record) = self.store.lookup(&event.hash).await? else {
            tracing::warn!(
                hash = %event.hash,
                "No entry for hash, ignoring phase change to {}",
                event.phase
            );
            return Ok(UpdateOutcome::Unknown);
        };

        let phase = Phase::new(&event.phase);
        if !self.policy.allows(&record.phase, &phase) {
            tracing::warn!(
                hash = %event.hash,
                "Refusing phase change {} -> {}",
                record.phase,
                phase
            );
            return Ok(UpdateOutcome::Refused);
        }

        record.phase = phase;
        record.touch();
        let record = self.store.save(&event.hash, record).await?;
        tracing::debug!(hash = %event.hash, phase = %record.phase, "Phase changed");
        Ok(UpdateOutcome::Applied(record))
    }

    /// Set the expected job count.
    ///
    /// `done` is deliberately left alone: completion is only re-evaluated
    /// when the next file arrives.
    pub async fn set_job_count(
        &self,
        event: &SetJobCountEvent,
    ) -> Result<UpdateOutcome, UpdateError> {
        let Some(mut record) = self.store.lookup(&event.hash).await? else {
            tracing::warn!(
                hash = %event.hash,
                "No entry for hash, ignoring job count {}",
                event.jobs
            );
            return Ok(UpdateOutcome::Unknown);
        };

        record.jobs = event.jobs;
        record.touch();
        let record = self.store.save(&event.hash, record).await?;
        tracing::debug!(hash = %event.hash, jobs = record.jobs, "Job count set");
        Ok(UpdateOutcome::Applied(record))
    }

    /// Decode a raw message body of the given kind and apply it.
    pub async fn handle(
        &self,
        kind: ProgressKind,
        body: &[u8],
    ) -> Result<UpdateOutcome, UpdateError> {
        match kind {
            ProgressKind::AddFile => match decode::<AddFileEvent>(kind, body) {
                Some(event) => self.add_file(&event).await,
                None => Ok(UpdateOutcome::Malformed),
            },
            ProgressKind::ChangePhase => match decode::<ChangePhaseEvent>(kind, body) {
                Some(event) => self.change_phase(&event).await,
                None => Ok(UpdateOutcome::Malformed),
            },
            ProgressKind::SetJobCount => match decode::<SetJobCountEvent>(kind, body) {
                Some(event) => self.set_job_count(&event).await,
                None => Ok(UpdateOutcome::Malformed),
            },
        }
    }

    async fn subscribe(&self, kind: ProgressKind) -> Result<Box<dyn Subscription>, UpdateError> {
        let queue = kind.queue(&self.queues);
        self.broker.declare_queue(queue).await?;
        let events = self.broker.subscribe(queue).await?;
        tracing::info!("Listening for {:?} events on '{}'", kind, queue);
        Ok(events)
    }

    /// Consume all three event queues until one fails or every queue closes.
    ///
    /// Events are applied one at a time across the queues: each lookup and
    /// save finishes, and the event is acknowledged, before the next event
    /// is taken from any queue.
    pub async fn run(&self) -> Result<(), UpdateError> {
        let mut files = self.subscribe(ProgressKind::AddFile).await?;
        let mut phases = self.subscribe(ProgressKind::ChangePhase).await?;
        let mut job_counts = self.subscribe(ProgressKind::SetJobCount).await?;
        let (mut files_open, mut phases_open, mut jobs_open) = (true, true, true);

        while files_open || phases_open || jobs_open {
            let (kind, next) = tokio::select! {
                next = files.next(), if files_open => (ProgressKind::AddFile, next),
                next = phases.next(), if phases_open => (ProgressKind::ChangePhase, next),
                next = job_counts.next(), if jobs_open => (ProgressKind::SetJobCount, next),
            };

            let Some(delivery) = next else {
                tracing::info!("Queue '{}' closed", kind.queue(&self.queues));
                match kind {
                    ProgressKind::AddFile => files_open = false,
                    ProgressKind::ChangePhase => phases_open = false,
                    ProgressKind::SetJobCount => jobs_open = false,
                }
                continue;
            };

            let delivery = delivery?;
            let outcome = self.handle(kind, &delivery.message.body).await?;
            tracing::trace!(?kind, ?outcome, "Event processed");
            delivery.ack().await?;
        }

        Ok(())
    }
}

fn decode<T: DeserializeOwned>(kind: ProgressKind, body: &[u8]) -> Option<T> {
    match serde_json::from_slice(body) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Dropping malformed {:?} event: {}", kind, e);
            None
        }
    }
}
