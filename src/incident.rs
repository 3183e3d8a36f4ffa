//! Incident record types.
//!
//! An [`Incident`] is the unit of work tracked through the self-healing
//! loop. The record's field contract is the only persistence surface the
//! loop controller depends on; storage technology lives behind the
//! [`crate::store::IncidentStore`] trait.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Metadata keys reserved by the loop controller.
///
/// The loop durably mirrors its working state into `Incident.metadata`
/// under these keys so a crash never loses the audit trail, and so an
/// escalated incident stays visible with its history attached.
pub mod meta {
    /// Rendered audit entries, one per proposed action.
    pub const ACTIONS: &str = "actions";
    /// Completed observe -> evaluate cycles of the last run.
    pub const ITERATION: &str = "iteration";
    /// Latest diagnosed root cause.
    pub const LAST_ISSUE: &str = "last_issue";
    /// SHA-256 fingerprint of the most recent proposed action.
    pub const LAST_ACTION_FINGERPRINT: &str = "last_action_fingerprint";
    /// Set when automated remediation could not proceed safely.
    pub const NEEDS_REVIEW: &str = "needs_review";
    /// Why the run escalated.
    pub const ESCALATION_REASON: &str = "escalation_reason";
    /// Last few stage-local failure notes.
    pub const ERRORS: &str = "errors";
    /// Set when a run was cancelled between stages.
    pub const CANCELLED: &str = "cancelled";
    /// Soft-lock lease stamped at claim time.
    pub const LEASE_EXPIRES_AT: &str = "lease_expires_at";
    /// Stamped when a stale lease was reclaimed.
    pub const RECLAIMED_AT: &str = "reclaimed_at";
    /// Stamped when the loop declared resolution.
    pub const RESOLVED_AT: &str = "resolved_at";
}

/// Provenance of the signal that created an incident. Immutable after
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Manual,
    Slack,
    Log,
    Github,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalType::Manual => write!(f, "manual"),
            SignalType::Slack => write!(f, "slack"),
            SignalType::Log => write!(f, "log"),
            SignalType::Github => write!(f, "github"),
        }
    }
}

/// Severity levels for incoming incidents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Lifecycle status, mutated exclusively through the incident store.
///
/// Transitions are monotonic: queued -> processing -> resolved.
/// processing -> queued is permitted only as an explicit requeue
/// (escalation, cancellation, or lease reclaim).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Queued,
    Processing,
    Resolved,
}

impl IncidentStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `explicit_requeue` marks the processing -> queued edge used by
    /// escalation, cancellation, and lease reclaim; it is never taken
    /// implicitly.
    #[must_use]
    pub fn can_transition(self, next: IncidentStatus, explicit_requeue: bool) -> bool {
        match (self, next) {
            (a, b) if a == b => true,
            (IncidentStatus::Queued, IncidentStatus::Processing)
            | (IncidentStatus::Processing, IncidentStatus::Resolved) => true,
            (IncidentStatus::Processing, IncidentStatus::Queued) => explicit_requeue,
            _ => false,
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Queued => write!(f, "queued"),
            IncidentStatus::Processing => write!(f, "processing"),
            IncidentStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// A unit of detected or reported trouble tracked through the
/// self-healing loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Opaque unique identifier, assigned at creation.
    pub id: String,
    /// Provenance; immutable after creation.
    pub signal_type: SignalType,
    /// Free text, set at creation, never mutated by the loop.
    pub title: String,
    /// Free text, set at creation, never mutated by the loop.
    pub description: String,
    /// Optional foreign reference to a monitored repository; immutable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    pub severity: Severity,
    pub status: IncidentStatus,
    /// Provenance reference carried by log/Slack signals (source id,
    /// message timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Refreshed on every status or loop-state mutation.
    pub updated_at: DateTime<Utc>,
    /// Open mapping for loop-local additions without schema migration.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Incident {
    /// Create a new queued incident.
    #[must_use]
    pub fn new(
        signal_type: SignalType,
        title: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            signal_type,
            title: title.into(),
            description: description.into(),
            repo_id: None,
            severity,
            status: IncidentStatus::Queued,
            source_ref: None,
            created_at: now,
            updated_at: now,
            metadata: Map::new(),
        }
    }

    /// Associate the incident with a monitored repository.
    #[must_use]
    pub fn with_repo(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = Some(repo_id.into());
        self
    }

    /// Attach a provenance reference.
    #[must_use]
    pub fn with_source_ref(mut self, source_ref: impl Into<String>) -> Self {
        self.source_ref = Some(source_ref.into());
        self
    }

    /// Insert a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this incident carries the needs-review escalation marker.
    #[must_use]
    pub fn needs_review(&self) -> bool {
        self.metadata
            .get(meta::NEEDS_REVIEW)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Metadata value as a string, if present.
    #[must_use]
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_incident_is_queued() {
        let incident = Incident::new(
            SignalType::Log,
            "Log alert (error)",
            "ERROR: service unreachable; connection timeout",
            Severity::High,
        );
        assert_eq!(incident.status, IncidentStatus::Queued);
        assert_eq!(incident.signal_type, SignalType::Log);
        assert!(!incident.id.is_empty());
        assert!(incident.metadata.is_empty());
    }

    #[test]
    fn test_status_monotonic_transitions() {
        use IncidentStatus::{Processing, Queued, Resolved};

        assert!(Queued.can_transition(Processing, false));
        assert!(Processing.can_transition(Resolved, false));
        assert!(Queued.can_transition(Queued, false));

        // Requeue only when explicit
        assert!(!Processing.can_transition(Queued, false));
        assert!(Processing.can_transition(Queued, true));

        // Resolved is terminal
        assert!(!Resolved.can_transition(Processing, false));
        assert!(!Resolved.can_transition(Queued, true));
        assert!(!Queued.can_transition(Resolved, false));
    }

    #[test]
    fn test_needs_review_marker() {
        let incident = Incident::new(SignalType::Manual, "t", "d", Severity::Medium);
        assert!(!incident.needs_review());

        let escalated = incident.with_metadata(meta::NEEDS_REVIEW, Value::Bool(true));
        assert!(escalated.needs_review());
    }

    #[test]
    fn test_serde_round_trip_uses_lowercase_tags() {
        let incident = Incident::new(SignalType::Github, "t", "d", Severity::Critical)
            .with_repo("repo-1")
            .with_source_ref("delivery-9");
        let json = serde_json::to_string(&incident).unwrap();
        assert!(json.contains("\"signal_type\":\"github\""));
        assert!(json.contains("\"severity\":\"critical\""));
        assert!(json.contains("\"status\":\"queued\""));

        let back: Incident = serde_json::from_str(&json).unwrap();
        assert_eq!(back.repo_id.as_deref(), Some("repo-1"));
        assert_eq!(back.source_ref.as_deref(), Some("delivery-9"));
    }
}
