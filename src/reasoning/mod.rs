//! Reasoning engine abstraction.
//!
//! The [`ReasoningEngine`] trait wraps a large-language-model call
//! behind two operations: `reason` (diagnose and propose an action) and
//! `evaluate` (decide whether the incident is resolved). Both enforce a
//! timeout and classify failures into typed
//! [`ReasoningError`](crate::error::ReasoningError) variants - never
//! generic panics that could silently abort the process.
//!
//! The model is inherently non-deterministic; the contract guarantees
//! schema shape only, not semantic correctness. Responses are parsed by
//! a strict schema-validated deserialization step that fails closed on
//! any mismatch.
//!
//! # Example
//!
//! ```rust,ignore
//! use sentinel::reasoning::{ReasoningEngine, CliReasoner};
//!
//! let engine = CliReasoner::from_config(&config.reasoning)?;
//! let diagnosis = engine.reason(&request).await?;
//! println!("{}: {}", diagnosis.issue, diagnosis.action);
//! ```

mod cli;

pub use cli::CliReasoner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ReasoningError;

/// Structured output of a `reason` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Brief root-cause summary.
    pub issue: String,
    /// Specific remediation action to take next.
    pub action: String,
}

/// Structured output of an `evaluate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub resolved: bool,
}

/// Inputs to a reasoning call, assembled by the loop controller.
#[derive(Debug, Clone, Default)]
pub struct ReasoningRequest {
    /// Current best-known observation text.
    pub logs: String,
    /// Rendered audit entries of everything attempted so far.
    pub actions: Vec<String>,
    /// Bounded context excerpt (logs/Slack/commits).
    pub context: String,
    /// Set after a parse failure to demand bare JSON more forcefully.
    pub strict: bool,
}

/// Wraps a blocking LLM call behind typed, timeout-enforced operations.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Diagnose the root cause and propose the next remediation action.
    async fn reason(&self, request: &ReasoningRequest) -> Result<Diagnosis, ReasoningError>;

    /// Decide whether the incident is resolved.
    async fn evaluate(&self, request: &ReasoningRequest) -> Result<Verdict, ReasoningError>;
}

/// Build the prompt for a `reason` call.
#[must_use]
pub fn reason_prompt(request: &ReasoningRequest) -> String {
    let mut prompt = String::from(
        "You are an SRE agent analyzing system logs for a production incident.\n\n",
    );
    prompt.push_str(&format!("Logs:\n{}\n", request.logs));
    if !request.actions.is_empty() {
        prompt.push_str("\nActions already attempted:\n");
        for action in &request.actions {
            prompt.push_str(&format!("- {action}\n"));
        }
    }
    if !request.context.is_empty() {
        prompt.push_str(&format!("\nRelated context:\n{}\n", request.context));
    }
    prompt.push_str(
        "\nAnalyze the issue and determine the best remediation action. \
         Do not repeat an action that was already attempted.\n",
    );
    prompt.push_str(
        "\nRespond with ONLY a JSON object (no other text) in this exact format:\n\
         {\"issue\": \"brief description of the problem\", \
         \"action\": \"specific remediation action to take\"}",
    );
    if request.strict {
        prompt.push_str(
            "\n\nIMPORTANT: your previous response could not be parsed. \
             Output the bare JSON object only - no prose, no code fences.",
        );
    }
    prompt
}

/// Build the prompt for an `evaluate` call.
#[must_use]
pub fn evaluate_prompt(request: &ReasoningRequest) -> String {
    let mut prompt = String::from(
        "You are an SRE agent judging whether a production incident is resolved.\n\n",
    );
    prompt.push_str(&format!("Current logs:\n{}\n", request.logs));
    if request.actions.is_empty() {
        prompt.push_str("\nNo remediation has been attempted yet.\n");
    } else {
        prompt.push_str("\nRemediation attempted so far:\n");
        for action in &request.actions {
            prompt.push_str(&format!("- {action}\n"));
        }
    }
    prompt.push_str(
        "\nRespond with ONLY a JSON object (no other text) in this exact format:\n\
         {\"resolved\": true} or {\"resolved\": false}",
    );
    prompt
}

/// Extract the outermost JSON object from a model response.
///
/// Models wrap JSON in prose or code fences often enough that the raw
/// response cannot be fed to the deserializer directly.
#[must_use]
pub fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&content[start..=end])
}

/// Parse a `reason` response into a [`Diagnosis`].
///
/// # Errors
///
/// Returns [`ReasoningError::Parse`] on any shape mismatch; the target
/// is never partially populated.
pub fn parse_diagnosis(content: &str) -> Result<Diagnosis, ReasoningError> {
    let json = extract_json(content)
        .ok_or_else(|| ReasoningError::Parse("no JSON object in response".into()))?;
    serde_json::from_str(json).map_err(|e| ReasoningError::Parse(e.to_string()))
}

/// Parse an `evaluate` response into a [`Verdict`].
pub fn parse_verdict(content: &str) -> Result<Verdict, ReasoningError> {
    let json = extract_json(content)
        .ok_or_else(|| ReasoningError::Parse("no JSON object in response".into()))?;
    serde_json::from_str(json).map_err(|e| ReasoningError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        let content = r#"{"issue": "a", "action": "b"}"#;
        assert_eq!(extract_json(content), Some(content));
    }

    #[test]
    fn test_extract_json_with_prose() {
        let content = "Here is my analysis:\n{\"resolved\": true}\nLet me know!";
        assert_eq!(extract_json(content), Some("{\"resolved\": true}"));
    }

    #[test]
    fn test_extract_json_none() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn test_parse_diagnosis_well_formed() {
        let diagnosis =
            parse_diagnosis(r#"{"issue": "upstream unreachable", "action": "restart upstream service"}"#)
                .unwrap();
        assert_eq!(diagnosis.issue, "upstream unreachable");
        assert_eq!(diagnosis.action, "restart upstream service");
    }

    #[test]
    fn test_parse_diagnosis_missing_field_fails_closed() {
        let err = parse_diagnosis(r#"{"issue": "upstream unreachable"}"#).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn test_parse_diagnosis_not_json() {
        assert!(parse_diagnosis("I think you should restart the service").is_err());
    }

    #[test]
    fn test_parse_verdict() {
        assert!(parse_verdict(r#"{"resolved": true}"#).unwrap().resolved);
        assert!(!parse_verdict(r#"{"resolved": false}"#).unwrap().resolved);
        assert!(parse_verdict(r#"{"resolved": "yes"}"#).is_err());
    }

    #[test]
    fn test_reason_prompt_includes_inputs() {
        let request = ReasoningRequest {
            logs: "ERROR: connection refused".into(),
            actions: vec!["restart upstream service (outcome: simulated restart)".into()],
            context: "--- commit abc123 fix: tighten pool limits".into(),
            strict: false,
        };
        let prompt = reason_prompt(&request);
        assert!(prompt.contains("ERROR: connection refused"));
        assert!(prompt.contains("restart upstream service"));
        assert!(prompt.contains("commit abc123"));
        assert!(!prompt.contains("could not be parsed"));
    }

    #[test]
    fn test_reason_prompt_strict_variant() {
        let request = ReasoningRequest {
            strict: true,
            ..ReasoningRequest::default()
        };
        assert!(reason_prompt(&request).contains("could not be parsed"));
    }

    #[test]
    fn test_evaluate_prompt_mentions_empty_attempts() {
        let request = ReasoningRequest::default();
        assert!(evaluate_prompt(&request).contains("No remediation has been attempted"));
    }
}
