//! Loop state types and stage transitions.
//!
//! [`LoopState`] is the ephemeral working memory threaded through one
//! run of the Observe -> Reason -> Act -> Evaluate loop. It is created
//! fresh when a run starts, passed by value through each stage, and
//! discarded once the incident resolves or the run aborts. The action
//! audit is durably mirrored into incident metadata after each
//! iteration so a crash never loses it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::executor::ActionOutcome;

/// Observation sentinel used when the signal source is unavailable.
/// The loop can still reason about the absence of data.
pub const NO_DATA_SENTINEL: &str = "no recent signal data";

/// One of the four loop stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Observe,
    Reason,
    Act,
    Evaluate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Observe => write!(f, "observe"),
            Stage::Reason => write!(f, "reason"),
            Stage::Act => write!(f, "act"),
            Stage::Evaluate => write!(f, "evaluate"),
        }
    }
}

/// One proposed action and, once executed, its outcome.
///
/// The executor's result annotates the same entry rather than becoming
/// a new list element: the action and its outcome travel as a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub proposed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ActionOutcome>,
}

impl ActionRecord {
    #[must_use]
    pub fn new(proposed: impl Into<String>) -> Self {
        Self {
            proposed: proposed.into(),
            outcome: None,
        }
    }

    /// Rendered audit form, e.g.
    /// `"restart upstream service (outcome: simulated restart)"`.
    #[must_use]
    pub fn render(&self) -> String {
        match &self.outcome {
            Some(outcome) if outcome.success => {
                format!("{} (outcome: {})", self.proposed, outcome.detail)
            }
            Some(outcome) => format!("{} (outcome: failed - {})", self.proposed, outcome.detail),
            None => self.proposed.clone(),
        }
    }
}

/// SHA-256 fingerprint of a proposed action, used by the
/// repeated-action guard and mirrored into incident metadata.
#[must_use]
pub fn action_fingerprint(action: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(action.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Ephemeral working memory for one run over one incident.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopState {
    /// Current best-known observation text, most recent lines first.
    pub logs: String,
    /// Latest diagnosed root cause, overwritten each reason step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    /// Append-only audit of everything attempted on this run.
    pub actions: Vec<ActionRecord>,
    /// Set only by evaluate; false by default.
    pub resolved: bool,
    /// Completed observe -> evaluate cycles.
    pub iteration: u32,
}

impl LoopState {
    /// Create a fresh state for a new run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the current observation carries any signal. Empty or
    /// whitespace-only logs mean there is nothing to reason about.
    #[must_use]
    pub fn has_signal(&self) -> bool {
        !self.logs.trim().is_empty()
    }

    /// The most recently proposed action, if any.
    #[must_use]
    pub fn last_action(&self) -> Option<&ActionRecord> {
        self.actions.last()
    }

    /// Append a newly proposed action to the audit.
    pub fn push_action(&mut self, proposed: impl Into<String>) {
        self.actions.push(ActionRecord::new(proposed));
    }

    /// Annotate the most recent action with its executor outcome.
    pub fn annotate_last(&mut self, outcome: ActionOutcome) {
        if let Some(record) = self.actions.last_mut() {
            record.outcome = Some(outcome);
        }
    }

    /// Rendered audit entries, oldest first.
    #[must_use]
    pub fn rendered_actions(&self) -> Vec<String> {
        self.actions.iter().map(ActionRecord::render).collect()
    }
}
