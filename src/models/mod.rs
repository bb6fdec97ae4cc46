//! Data models for the request broker.

mod phase;
mod request;

pub use phase::{FreeformPhases, Phase, PhasePolicy, StrictPhases};
pub use request::{FileEntry, RequestHash, RequestRecord, Snapshot, JOBS_UNKNOWN};
