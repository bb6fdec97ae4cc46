//! Request payloads: decoding, shape checks and content hashing.
//!
//! A request is a JSON tree of operation nodes. Every node is an object whose
//! `op` field names the operation; the outermost node is the final (output)
//! operation. Beyond that the payload is opaque to the broker.

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::RequestHash;

/// The only output operation the gateway currently accepts.
pub const ACCEPTED_OUTPUT_OP: &str = "ResultTTree";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Malformed request: {0}")]
    Malformed(String),
    #[error("Unsupported request: must end in {expected}, found {found}")]
    DisallowedShape {
        expected: &'static str,
        found: String,
    },
}

/// A decoded, well-formed request.
#[derive(Debug, Clone)]
pub struct Query {
    value: Value,
    canonical: Vec<u8>,
}

impl Query {
    /// Decode raw payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, QueryError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| QueryError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Wrap an already-parsed value, checking that it is an operation node.
    pub fn from_value(value: Value) -> Result<Self, QueryError> {
        if operation_of(&value).is_none() {
            return Err(QueryError::Malformed(
                "request is not an operation object".to_string(),
            ));
        }
        // Without `preserve_order` object keys serialize sorted, so equal
        // trees produce identical bytes.
        let canonical =
            serde_json::to_vec(&value).map_err(|e| QueryError::Malformed(e.to_string()))?;
        Ok(Self { value, canonical })
    }

    /// Name of the outermost (output) operation.
    pub fn operation(&self) -> &str {
        operation_of(&self.value).unwrap_or_default()
    }

    /// Reject requests whose output operation is not `expected`.
    pub fn ensure_output(&self, expected: &'static str) -> Result<(), QueryError> {
        let found = self.operation();
        if found == expected {
            Ok(())
        } else {
            Err(QueryError::DisallowedShape {
                expected,
                found: found.to_string(),
            })
        }
    }

    /// Deterministic content hash; equal requests hash equally.
    pub fn hash(&self) -> RequestHash {
        let mut hasher = Sha256::new();
        hasher.update(&self.canonical);
        RequestHash::new(hex::encode(hasher.finalize()))
    }

    /// Canonical serialized form, used as the wire payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.canonical
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl From<&Query> for RequestHash {
    fn from(query: &Query) -> Self {
        query.hash()
    }
}

fn operation_of(value: &Value) -> Option<&str> {
    value.as_object()?.get("op")?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jet_pt_query() -> Value {
        json!({
            "op": "ResultTTree",
            "filename": "output.root",
            "tree": "dudetree",
            "columns": ["JetPt"],
            "source": {
                "op": "Select",
                "lambda": "lambda j: j.pt()/1000.0",
                "source": {"op": "EventDataset", "url": "localds://mc16_13TeV.311309"}
            }
        })
    }

    #[test]
    fn key_order_does_not_change_hash() {
        let a = Query::decode(br#"{"op":"ResultTTree","tree":"t","source":{"op":"X"}}"#).unwrap();
        let b = Query::decode(br#"{"source":{"op":"X"},"tree":"t","op":"ResultTTree"}"#).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_requests_hash_differently() {
        let a = Query::from_value(jet_pt_query()).unwrap();
        let mut other = jet_pt_query();
        other["tree"] = json!("othertree");
        let b = Query::from_value(other).unwrap();
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash().as_str().len(), 64);
    }

    #[test]
    fn accepted_output_passes() {
        let q = Query::from_value(jet_pt_query()).unwrap();
        assert_eq!(q.operation(), ACCEPTED_OUTPUT_OP);
        q.ensure_output(ACCEPTED_OUTPUT_OP).unwrap();
    }

    #[test]
    fn other_output_is_disallowed_not_malformed() {
        let mut value = jet_pt_query();
        value["op"] = json!("ResultPandasDF");
        let q = Query::from_value(value).unwrap();
        match q.ensure_output(ACCEPTED_OUTPUT_OP) {
            Err(QueryError::DisallowedShape { found, .. }) => assert_eq!(found, "ResultPandasDF"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn non_operation_payloads_are_malformed() {
        assert!(matches!(
            Query::decode(br#"{"hi":"dude","there":"fork"}"#),
            Err(QueryError::Malformed(_))
        ));
        assert!(matches!(Query::decode(b"[1,2,3]"), Err(QueryError::Malformed(_))));
        assert!(matches!(Query::decode(b"\x80\x04junk"), Err(QueryError::Malformed(_))));
    }
}
