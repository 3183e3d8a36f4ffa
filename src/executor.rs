//! Action execution.
//!
//! The loop controller hands the most recently proposed action to an
//! [`ActionExecutor`]. The default executor only records intent, so the
//! loop is safe to run unattended; real deployments install a
//! capability-scoped executor behind the same interface. The controller
//! is agnostic to which is installed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Result of executing one proposed action.
///
/// A failing execution is an outcome, not an error: it is recorded on
/// the action's audit entry and fed back into the next reasoning call
/// so the model can adapt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub detail: String,
}

impl ActionOutcome {
    #[must_use]
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Performs (or simulates) a proposed remediation action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute the action described in free text.
    ///
    /// # Errors
    ///
    /// Implementations should prefer returning a failed
    /// [`ActionOutcome`] over an error; errors are reserved for
    /// executor-internal faults and are still non-fatal to the run.
    async fn execute(&self, action: &str) -> Result<ActionOutcome>;
}

/// No-op executor that records intent without side effects.
#[derive(Debug, Clone, Default)]
pub struct NoopExecutor;

impl NoopExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActionExecutor for NoopExecutor {
    async fn execute(&self, action: &str) -> Result<ActionOutcome> {
        info!(action, "simulating remediation action");
        Ok(ActionOutcome::success(format!("simulated: {action}")))
    }
}

/// Command patterns that are never executed, regardless of allowlist.
pub const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -rf /*",
    ":(){:|:&};:",
    "dd if=/dev/zero",
    "mkfs.",
    "> /dev/sd",
    "chmod -R 777",
    "sudo rm",
    "sudo dd",
];

/// Capability-scoped executor that runs actions as shell-free commands.
///
/// An action is executed only when its program (first token) is on the
/// allowlist and the full line matches no dangerous pattern. Everything
/// else is refused with a failed outcome.
#[derive(Debug, Clone)]
pub struct AllowlistExecutor {
    allowlist: Vec<String>,
}

impl AllowlistExecutor {
    #[must_use]
    pub fn new(allowlist: Vec<String>) -> Self {
        Self { allowlist }
    }

    /// Whether the action line is eligible for execution.
    #[must_use]
    pub fn is_allowed(&self, action: &str) -> bool {
        if DANGEROUS_PATTERNS.iter().any(|p| action.contains(p)) {
            return false;
        }
        let Some(program) = action.split_whitespace().next() else {
            return false;
        };
        self.allowlist.iter().any(|allowed| allowed == program)
    }
}

#[async_trait]
impl ActionExecutor for AllowlistExecutor {
    async fn execute(&self, action: &str) -> Result<ActionOutcome> {
        if !self.is_allowed(action) {
            warn!(action, "refusing action outside the allowlist");
            return Ok(ActionOutcome::failure(format!(
                "refused: '{action}' is not allow-listed"
            )));
        }

        let mut tokens = action.split_whitespace();
        let program = tokens.next().unwrap_or_default();
        if which::which(program).is_err() {
            return Ok(ActionOutcome::failure(format!(
                "refused: '{program}' not found on PATH"
            )));
        }

        let output = tokio::process::Command::new(program)
            .args(tokens)
            .output()
            .await;

        match output {
            Ok(output) => {
                let detail = if output.status.success() {
                    String::from_utf8_lossy(&output.stdout).trim().to_string()
                } else {
                    String::from_utf8_lossy(&output.stderr).trim().to_string()
                };
                Ok(ActionOutcome {
                    success: output.status.success(),
                    detail: if detail.is_empty() {
                        format!("exit status {}", output.status.code().unwrap_or(-1))
                    } else {
                        detail
                    },
                })
            }
            Err(e) => Ok(ActionOutcome::failure(format!("spawn failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_executor_simulates_success() {
        let outcome = NoopExecutor::new()
            .execute("restart upstream service")
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.detail.contains("restart upstream service"));
    }

    #[test]
    fn test_allowlist_check() {
        let executor = AllowlistExecutor::new(vec!["kubectl".into(), "systemctl".into()]);
        assert!(executor.is_allowed("kubectl rollout restart deploy/api"));
        assert!(executor.is_allowed("systemctl restart nginx"));
        assert!(!executor.is_allowed("rm -rf / --no-preserve-root"));
        assert!(!executor.is_allowed("curl http://evil.example"));
        assert!(!executor.is_allowed(""));
    }

    #[test]
    fn test_dangerous_patterns_refused_even_when_listed() {
        let executor = AllowlistExecutor::new(vec!["sudo".into()]);
        assert!(!executor.is_allowed("sudo rm -rf /var/lib/data"));
    }

    #[tokio::test]
    async fn test_refused_action_is_failed_outcome_not_error() {
        let executor = AllowlistExecutor::new(vec!["echo".into()]);
        let outcome = executor.execute("curl http://example.com").await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.detail.contains("not allow-listed"));
    }

    #[tokio::test]
    async fn test_allowlisted_command_runs() {
        let executor = AllowlistExecutor::new(vec!["echo".into()]);
        let outcome = executor.execute("echo restarted").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.detail, "restarted");
    }
}
