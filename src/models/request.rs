//! Status record for one distinct request, keyed by its content hash.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::Phase;

/// Job count used until a worker reports how many jobs a request needs.
pub const JOBS_UNKNOWN: i64 = -1;

/// Content hash of a canonicalized request payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestHash(String);

impl RequestHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One produced output: a file reference and the tree stored in it.
///
/// Serialized as a two-element array `[file, tree]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct FileEntry {
    pub file: String,
    pub tree: String,
}

impl FileEntry {
    pub fn new(file: impl Into<String>, tree: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            tree: tree.into(),
        }
    }

    /// Copy of this entry with `prefix` prepended to the file reference.
    pub fn with_prefix(&self, prefix: &str) -> Self {
        Self {
            file: format!("{}{}", prefix, self.file),
            tree: self.tree.clone(),
        }
    }
}

impl From<(String, String)> for FileEntry {
    fn from((file, tree): (String, String)) -> Self {
        Self { file, tree }
    }
}

impl From<FileEntry> for (String, String) {
    fn from(entry: FileEntry) -> Self {
        (entry.file, entry.tree)
    }
}

/// Persisted status of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub hash: RequestHash,
    pub phase: Phase,
    pub done: bool,
    /// Expected number of jobs; [`JOBS_UNKNOWN`] (or 0) until reported.
    pub jobs: i64,
    /// Outputs in arrival order. Holds no duplicates.
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Set when the record exists but its discovery message was never sent.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub discovery_pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RequestRecord {
    /// First state of a request that has never been seen before.
    pub fn new(hash: RequestHash) -> Self {
        let now = Utc::now();
        Self {
            hash,
            phase: Phase::waiting_for_data(),
            done: false,
            jobs: JOBS_UNKNOWN,
            files: Vec::new(),
            log: None,
            message: None,
            discovery_pending: false,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Add an output unless an equal one is already recorded.
    /// Returns whether the entry was new.
    pub fn add_file(&mut self, entry: FileEntry) -> bool {
        if self.files.contains(&entry) {
            return false;
        }
        self.files.push(entry);
        true
    }

    /// Recompute `done` from the file count and the expected job count.
    ///
    /// When the record becomes complete its phase moves to `done`. When a
    /// raised job count makes it incomplete again, a `done` phase moves back
    /// to `running`, so `phase` and `done` never contradict each other.
    pub fn refresh_done(&mut self) {
        let was_done = self.done;
        self.done = self.files.len() as i64 >= self.jobs;
        if self.done && !was_done {
            self.phase = Phase::done();
        } else if !self.done && was_done && self.phase.is_done() {
            self.phase = Phase::new(Phase::RUNNING);
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            files: self.files.clone(),
            phase: self.phase.clone(),
            done: self.done,
            jobs: self.jobs,
            log: self.log.clone(),
            message: self.message.clone(),
            local_files: None,
        }
    }
}

/// Current view of a record as returned to callers. Not a completion promise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub files: Vec<FileEntry>,
    pub phase: Phase,
    pub done: bool,
    pub jobs: i64,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Files rewritten with the local prefix, when one is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_files: Option<Vec<FileEntry>>,
}
