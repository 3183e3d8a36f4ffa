//! Reusable incident and context fixtures for tests.

use chrono::Utc;
use serde_json::Value;

use crate::context::{ContextBundle, LogWindow};
use crate::incident::{Incident, Severity, SignalType};

/// The canonical log-alert incident used throughout the test suite.
#[must_use]
pub fn log_incident() -> Incident {
    Incident::new(
        SignalType::Log,
        "Log alert (error)",
        "ERROR: service unreachable; connection timeout",
        Severity::High,
    )
}

/// A manually reported incident.
#[must_use]
pub fn manual_incident() -> Incident {
    Incident::new(
        SignalType::Manual,
        "Checkout latency",
        "p99 latency spiked after the last deploy",
        Severity::Medium,
    )
}

/// A Slack-relayed incident with channel metadata attached.
#[must_use]
pub fn slack_incident() -> Incident {
    Incident::new(
        SignalType::Slack,
        "Slack escalation",
        "prod is down, paging infra",
        Severity::High,
    )
    .with_source_ref("1718000000.000100")
    .with_metadata("channel_id", Value::String("C-INFRA".into()))
    .with_metadata("user", Value::String("U-ONCALL".into()))
}

/// A context bundle carrying one log window with the given lines.
#[must_use]
pub fn bundle_with_lines(lines: &[&str]) -> ContextBundle {
    ContextBundle {
        log_windows: vec![LogWindow {
            source_id: Some("test-logs".into()),
            started_at: Utc::now() - chrono::Duration::minutes(10),
            ended_at: Utc::now(),
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
        }],
        ..ContextBundle::default()
    }
}
