//! Signal ingestion: normalizing external events into incidents.
//!
//! Adapters for the four signal sources (manual report, log alert,
//! Slack relay, GitHub webhook) each produce a typed request that
//! normalizes into an [`Incident`] creation. The HTTP surface that
//! receives these payloads is an external collaborator; this module
//! owns only the normalization contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::incident::{Incident, Severity, SignalType};

/// A manually filed issue report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualIssueRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    /// Email/Slack handle of the reporter.
    #[serde(default)]
    pub reporter: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_severity() -> Severity {
    Severity::Medium
}

/// A log alert forwarded by a log source webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSignalRequest {
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A message relayed from a monitored Slack channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackSignalRequest {
    pub team_id: String,
    pub channel_id: String,
    pub message_ts: String,
    #[serde(default)]
    pub user: Option<String>,
    pub text: String,
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A GitHub webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubEventRequest {
    pub delivery_id: String,
    pub event: String,
    pub payload: Value,
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

/// Map a log level string onto incident severity.
#[must_use]
pub fn log_level_to_severity(level: Option<&str>) -> Severity {
    match level.unwrap_or("").to_ascii_lowercase().as_str() {
        "debug" | "info" => Severity::Low,
        "warn" | "warning" => Severity::Medium,
        "error" => Severity::High,
        "critical" | "fatal" => Severity::Critical,
        _ => Severity::Medium,
    }
}

impl ManualIssueRequest {
    /// Normalize into an incident creation.
    #[must_use]
    pub fn into_incident(self) -> Incident {
        let mut incident = Incident::new(
            SignalType::Manual,
            self.title,
            self.description,
            self.severity,
        );
        if let Some(repo_id) = self.repo_id {
            incident = incident.with_repo(repo_id);
        }
        if let Some(reporter) = self.reporter {
            incident = incident.with_metadata("reporter", Value::String(reporter));
        }
        if !self.tags.is_empty() {
            incident = incident.with_metadata("tags", json!(self.tags));
        }
        incident
    }
}

impl LogSignalRequest {
    #[must_use]
    pub fn into_incident(self) -> Incident {
        let severity = log_level_to_severity(self.level.as_deref());
        let title = format!("Log alert ({})", self.level.as_deref().unwrap_or("info"));
        let mut incident = Incident::new(SignalType::Log, title, self.message, severity)
            .with_metadata(
                "occurred_at",
                Value::String(self.occurred_at.to_rfc3339()),
            );
        if let Some(repo_id) = self.repo_id {
            incident = incident.with_repo(repo_id);
        }
        if let Some(source_id) = self.source_id {
            incident = incident.with_source_ref(source_id);
        }
        if !self.metadata.is_empty() {
            incident = incident.with_metadata("raw", Value::Object(self.metadata));
        }
        incident
    }
}

impl SlackSignalRequest {
    #[must_use]
    pub fn into_incident(self) -> Incident {
        // Slack escalations arrive from humans who already judged the
        // situation worth raising.
        let mut incident = Incident::new(
            SignalType::Slack,
            "Slack escalation",
            self.text,
            Severity::High,
        )
        .with_source_ref(self.message_ts.clone())
        .with_metadata("team_id", Value::String(self.team_id))
        .with_metadata("channel_id", Value::String(self.channel_id))
        .with_metadata(
            "occurred_at",
            Value::String(self.occurred_at.to_rfc3339()),
        );
        if let Some(repo_id) = self.repo_id {
            incident = incident.with_repo(repo_id);
        }
        if let Some(user) = self.user {
            incident = incident.with_metadata("user", Value::String(user));
        }
        if let Some(thread_ts) = self.thread_ts {
            incident = incident.with_metadata("thread_ts", Value::String(thread_ts));
        }
        if !self.metadata.is_empty() {
            incident = incident.with_metadata("raw", Value::Object(self.metadata));
        }
        incident
    }
}

impl GithubEventRequest {
    /// Normalize into an incident creation.
    ///
    /// Only a summary of the payload crosses into the incident record;
    /// commit ingestion for retrieval context is an external concern.
    #[must_use]
    pub fn into_incident(self) -> Incident {
        let summary = self
            .payload
            .get("head_commit")
            .and_then(|c| c.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("GitHub webhook event")
            .to_string();
        let mut incident = Incident::new(
            SignalType::Github,
            format!("GitHub {} event", self.event),
            summary,
            Severity::Medium,
        )
        .with_source_ref(self.delivery_id)
        .with_metadata("event", Value::String(self.event))
        .with_metadata(
            "received_at",
            Value::String(self.received_at.to_rfc3339()),
        );
        if let Some(repo_id) = self.repo_id {
            incident = incident.with_repo(repo_id);
        }
        incident
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentStatus;

    #[test]
    fn test_log_level_to_severity() {
        assert_eq!(log_level_to_severity(Some("debug")), Severity::Low);
        assert_eq!(log_level_to_severity(Some("info")), Severity::Low);
        assert_eq!(log_level_to_severity(Some("WARN")), Severity::Medium);
        assert_eq!(log_level_to_severity(Some("warning")), Severity::Medium);
        assert_eq!(log_level_to_severity(Some("error")), Severity::High);
        assert_eq!(log_level_to_severity(Some("critical")), Severity::Critical);
        assert_eq!(log_level_to_severity(Some("fatal")), Severity::Critical);
        assert_eq!(log_level_to_severity(Some("unknown")), Severity::Medium);
        assert_eq!(log_level_to_severity(None), Severity::Medium);
    }

    #[test]
    fn test_manual_request_normalization() {
        let request = ManualIssueRequest {
            title: "Checkout latency".into(),
            description: "p99 spiked after the last deploy".into(),
            repo_id: Some("repo-1".into()),
            severity: Severity::High,
            reporter: Some("oncall@example.com".into()),
            tags: vec!["latency".into()],
        };
        let incident = request.into_incident();
        assert_eq!(incident.signal_type, SignalType::Manual);
        assert_eq!(incident.status, IncidentStatus::Queued);
        assert_eq!(incident.severity, Severity::High);
        assert_eq!(incident.repo_id.as_deref(), Some("repo-1"));
        assert_eq!(incident.meta_str("reporter"), Some("oncall@example.com"));
    }

    #[test]
    fn test_log_request_derives_title_and_severity() {
        let request = LogSignalRequest {
            repo_id: None,
            source_id: Some("loki-prod".into()),
            message: "ERROR: service unreachable; connection timeout".into(),
            level: Some("error".into()),
            occurred_at: Utc::now(),
            metadata: Map::new(),
        };
        let incident = request.into_incident();
        assert_eq!(incident.title, "Log alert (error)");
        assert_eq!(incident.severity, Severity::High);
        assert_eq!(incident.source_ref.as_deref(), Some("loki-prod"));
    }

    #[test]
    fn test_slack_request_is_high_severity() {
        let request = SlackSignalRequest {
            team_id: "T1".into(),
            channel_id: "C1".into(),
            message_ts: "1718000000.000100".into(),
            user: Some("U1".into()),
            text: "prod is down".into(),
            repo_id: None,
            occurred_at: Utc::now(),
            thread_ts: None,
            metadata: Map::new(),
        };
        let incident = request.into_incident();
        assert_eq!(incident.severity, Severity::High);
        assert_eq!(incident.title, "Slack escalation");
        assert_eq!(incident.source_ref.as_deref(), Some("1718000000.000100"));
        assert_eq!(incident.meta_str("channel_id"), Some("C1"));
    }

    #[test]
    fn test_github_request_summarizes_head_commit() {
        let request = GithubEventRequest {
            delivery_id: "d-42".into(),
            event: "push".into(),
            payload: json!({"head_commit": {"message": "fix: retry on 503"}}),
            repo_id: Some("repo-2".into()),
            received_at: Utc::now(),
        };
        let incident = request.into_incident();
        assert_eq!(incident.title, "GitHub push event");
        assert_eq!(incident.description, "fix: retry on 503");
        assert_eq!(incident.source_ref.as_deref(), Some("d-42"));
    }
}
