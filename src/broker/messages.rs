//! JSON bodies exchanged over the broker queues.
//!
//! Progress events accept the field names older workers send
//! (`file`, `treename`, `njobs`) as aliases.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::models::RequestHash;

/// Work order sent to downstream workers the first time a request is seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    pub hash: RequestHash,
    /// Base64 of the canonical request payload.
    #[serde(alias = "ast")]
    pub payload: String,
}

impl DiscoveryMessage {
    pub fn new(hash: RequestHash, payload: &[u8]) -> Self {
        Self {
            hash,
            payload: base64::engine::general_purpose::STANDARD.encode(payload),
        }
    }

    pub fn decode_payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.payload)
    }
}

/// A worker produced an output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddFileEvent {
    pub hash: RequestHash,
    #[serde(alias = "file")]
    pub file_reference: String,
    #[serde(alias = "treename")]
    pub tree_name: String,
}

/// A worker moved a request to another phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePhaseEvent {
    pub hash: RequestHash,
    pub phase: String,
}

/// A worker knows how many jobs a request needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetJobCountEvent {
    pub hash: RequestHash,
    #[serde(alias = "njobs")]
    pub jobs: i64,
}
