//! Incident context hydration.
//!
//! The [`ContextHydrator`] collaborator assembles a bounded, read-only
//! [`ContextBundle`] for an incident: recent log windows, related Slack
//! snippets, and recent commit summaries. The loop controller consumes
//! the bundle but never mutates it.
//!
//! Hydration failures degrade gracefully: reasoning can still operate
//! on the incident's raw description alone, so a hydrator outage must
//! never abort a run.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::incident::Incident;

/// A window of log lines from one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogWindow {
    pub source_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub lines: Vec<String>,
}

/// A Slack message related to an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackSnippet {
    pub channel_id: String,
    pub message_ts: String,
    pub text: String,
    pub user: Option<String>,
}

/// A recent commit on the incident's repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    pub author: String,
    pub title: String,
    pub committed_at: DateTime<Utc>,
}

/// The read-only bundle of context assembled for one incident.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBundle {
    pub log_windows: Vec<LogWindow>,
    pub slack_messages: Vec<SlackSnippet>,
    pub commits: Vec<CommitSummary>,
}

impl ContextBundle {
    /// Whether the bundle carries nothing beyond the incident itself.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log_windows.is_empty() && self.slack_messages.is_empty() && self.commits.is_empty()
    }

    /// Render a bounded excerpt suitable for embedding in a prompt.
    ///
    /// `max_lines` bounds the log portion; Slack and commit excerpts
    /// are capped at a handful of entries each.
    #[must_use]
    pub fn excerpt(&self, max_lines: usize) -> String {
        let mut out = String::new();
        let mut remaining = max_lines;
        for window in &self.log_windows {
            if remaining == 0 {
                break;
            }
            let label = window.source_id.as_deref().unwrap_or("logs");
            out.push_str(&format!("--- logs ({label}) ---\n"));
            for line in window.lines.iter().take(remaining) {
                out.push_str(line);
                out.push('\n');
            }
            remaining = remaining.saturating_sub(window.lines.len().min(remaining));
        }
        for snippet in self.slack_messages.iter().take(5) {
            let user = snippet.user.as_deref().unwrap_or("unknown");
            out.push_str(&format!(
                "--- slack #{} {user}: {}\n",
                snippet.channel_id, snippet.text
            ));
        }
        for commit in self.commits.iter().take(5) {
            out.push_str(&format!("--- commit {} {}\n", commit.sha, commit.title));
        }
        out
    }
}

/// Collaborator that assembles a [`ContextBundle`] for an incident.
#[async_trait]
pub trait ContextHydrator: Send + Sync {
    /// Assemble context for the incident.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::SentinelError::ContextUnavailable`] when
    /// the backing sources cannot be reached. Callers degrade to an
    /// empty bundle rather than aborting.
    async fn get_context(&self, incident: &Incident) -> Result<ContextBundle>;
}

/// Hydrator backed by the incident record itself.
///
/// With no retrieval index attached, the best available observation is
/// the incident payload. A synthetic log window is built around the
/// incident description so the loop always has something to observe,
/// mirroring what a real log query would return.
#[derive(Debug, Clone, Default)]
pub struct IncidentHydrator;

impl IncidentHydrator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn synthetic_window(incident: &Incident) -> LogWindow {
        let base = incident.created_at;
        let description: String = incident.description.chars().take(120).collect();
        LogWindow {
            source_id: incident.source_ref.clone(),
            started_at: base - Duration::minutes(10),
            ended_at: base + Duration::minutes(2),
            lines: vec![
                format!(
                    "[{}] WARN no indexed log entries for incident",
                    (base - Duration::minutes(5)).to_rfc3339()
                ),
                format!("[{}] INFO using incident payload instead", base.to_rfc3339()),
                format!(
                    "[{}] ERROR {description}",
                    (base + Duration::minutes(1)).to_rfc3339()
                ),
            ],
        }
    }
}

#[async_trait]
impl ContextHydrator for IncidentHydrator {
    async fn get_context(&self, incident: &Incident) -> Result<ContextBundle> {
        let mut bundle = ContextBundle {
            log_windows: vec![Self::synthetic_window(incident)],
            ..ContextBundle::default()
        };
        // Slack-born incidents carry their own snippet in metadata.
        if let (Some(channel_id), Some(ts)) = (
            incident.meta_str("channel_id"),
            incident.source_ref.as_deref(),
        ) {
            bundle.slack_messages.push(SlackSnippet {
                channel_id: channel_id.to_string(),
                message_ts: ts.to_string(),
                text: incident.description.clone(),
                user: incident.meta_str("user").map(str::to_string),
            });
        }
        Ok(bundle)
    }
}
