//! Lifecycle phase labels and the policy deciding which changes are allowed.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-text lifecycle label of a request (`waiting_for_data`, `running`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Phase(String);

impl Phase {
    pub const WAITING_FOR_DATA: &'static str = "waiting_for_data";
    pub const RUNNING: &'static str = "running";
    pub const DOWNLOADING: &'static str = "downloading";
    pub const DONE: &'static str = "done";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn waiting_for_data() -> Self {
        Self::new(Self::WAITING_FOR_DATA)
    }

    pub fn done() -> Self {
        Self::new(Self::DONE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_done(&self) -> bool {
        self.0 == Self::DONE
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decides whether a `change_phase` event may move a record between phases.
pub trait PhasePolicy: Send + Sync {
    fn allows(&self, from: &Phase, to: &Phase) -> bool;
}

/// Accepts every transition; phases are plain labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeformPhases;

impl PhasePolicy for FreeformPhases {
    fn allows(&self, _from: &Phase, _to: &Phase) -> bool {
        true
    }
}

/// Only allows transitions listed in a table. Staying in a phase is always allowed.
#[derive(Debug, Clone)]
pub struct StrictPhases {
    transitions: HashMap<String, HashSet<String>>,
}

impl StrictPhases {
    pub fn empty() -> Self {
        Self {
            transitions: HashMap::new(),
        }
    }

    pub fn with_transition(mut self, from: &str, to: &str) -> Self {
        self.transitions
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self
    }
}

impl Default for StrictPhases {
    fn default() -> Self {
        Self::empty()
            .with_transition(Phase::WAITING_FOR_DATA, Phase::RUNNING)
            .with_transition(Phase::WAITING_FOR_DATA, Phase::DOWNLOADING)
            .with_transition(Phase::WAITING_FOR_DATA, Phase::DONE)
            .with_transition(Phase::RUNNING, Phase::DOWNLOADING)
            .with_transition(Phase::RUNNING, Phase::DONE)
            .with_transition(Phase::DOWNLOADING, Phase::RUNNING)
            .with_transition(Phase::DOWNLOADING, Phase::DONE)
    }
}

impl PhasePolicy for StrictPhases {
    fn allows(&self, from: &Phase, to: &Phase) -> bool {
        from == to
            || self
                .transitions
                .get(from.as_str())
                .is_some_and(|targets| targets.contains(to.as_str()))
    }
}
