//! Gateway: the synchronous front door.
//!
//! `submit` validates a raw request, sends it through an [`RpcClient`] and
//! returns the snapshot the ingester answered with. The wait is bounded by a
//! deadline and can be cancelled.

mod rpc;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::broker::BrokerError;
use crate::config::{DEFAULT_MAX_REQUEST_BYTES, DEFAULT_RPC_TIMEOUT_SECS};
use crate::models::Snapshot;
use crate::query::{Query, QueryError, ACCEPTED_OUTPUT_OP};

pub use rpc::{BrokerRpc, RpcClient};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Request of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("Malformed request: {0}")]
    Malformed(String),
    #[error("Unsupported request: must end in {expected}, found {found}")]
    DisallowedShape {
        expected: &'static str,
        found: String,
    },
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Broker error: {0}")]
    Transport(#[from] BrokerError),
    #[error("Reply channel closed before an answer arrived")]
    ReplyChannelClosed,
    #[error("Unreadable reply: {0}")]
    BadReply(#[source] serde_json::Error),
}

impl From<QueryError> for GatewayError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Malformed(msg) => Self::Malformed(msg),
            QueryError::DisallowedShape { expected, found } => {
                Self::DisallowedShape { expected, found }
            }
        }
    }
}

impl GatewayError {
    /// Whether the caller sent something we refuse, as opposed to the
    /// system failing to answer.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::TooLarge { .. } | Self::Malformed(_) | Self::DisallowedShape { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub max_request_bytes: usize,
    pub reply_timeout: Duration,
    /// Prepended to each returned file reference.
    pub file_prefix: Option<String>,
    /// Produces an extra `local_files` list from the unprefixed files.
    pub local_file_prefix: Option<String>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            reply_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
            file_prefix: None,
            local_file_prefix: None,
        }
    }
}

pub struct Gateway {
    rpc: Arc<dyn RpcClient>,
    options: GatewayOptions,
}

impl Gateway {
    pub fn new(rpc: Arc<dyn RpcClient>, options: GatewayOptions) -> Self {
        Self { rpc, options }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    pub async fn submit(&self, request: &[u8]) -> Result<Snapshot, GatewayError> {
        self.submit_with_cancel(request, None).await
    }

    /// Submit a request, giving up when `cancel` turns true.
    ///
    /// A dropped cancel sender means the call can no longer be cancelled;
    /// the deadline still applies.
    pub async fn submit_with_cancel(
        &self,
        request: &[u8],
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Snapshot, GatewayError> {
        let limit = self.options.max_request_bytes;
        if request.len() > limit {
            return Err(GatewayError::TooLarge {
                size: request.len(),
                limit,
            });
        }

        let query = Query::decode(request)?;
        query.ensure_output(ACCEPTED_OUTPUT_OP)?;
        let hash = query.hash();
        tracing::debug!(hash = %hash, "Submitting request");

        let deadline = self.options.reply_timeout;
        let reply = tokio::select! {
            reply = self.rpc.call(query.as_bytes().to_vec()) => reply?,
            _ = tokio::time::sleep(deadline) => {
                tracing::warn!(hash = %hash, "No reply within {:?}", deadline);
                return Err(GatewayError::Timeout(deadline));
            }
            _ = cancelled(cancel) => {
                tracing::debug!(hash = %hash, "Request cancelled by caller");
                return Err(GatewayError::Cancelled);
            }
        };

        let snapshot: Snapshot = serde_json::from_slice(&reply).map_err(GatewayError::BadReply)?;
        Ok(self.rewrite_files(snapshot))
    }

    /// Apply the configured file prefixes.
    pub fn rewrite_files(&self, mut snapshot: Snapshot) -> Snapshot {
        if let Some(prefix) = &self.options.local_file_prefix {
            snapshot.local_files = Some(
                snapshot
                    .files
                    .iter()
                    .map(|entry| entry.with_prefix(prefix))
                    .collect(),
            );
        }
        if let Some(prefix) = &self.options.file_prefix {
            snapshot.files = snapshot
                .files
                .iter()
                .map(|entry| entry.with_prefix(prefix))
                .collect();
        }
        snapshot
    }
}

async fn cancelled(cancel: Option<watch::Receiver<bool>>) {
    match cancel {
        Some(mut rx) => {
            if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}
