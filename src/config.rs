//! Configuration loading and validation for the Sentinel agent.
//!
//! Configuration is explicit and passed in at construction; there are
//! no process-wide singletons. A missing config file yields defaults, a
//! malformed one fails the process loudly at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SentinelError};

/// Config file name looked up in the agent's working directory.
pub const CONFIG_FILE: &str = "sentinel.json";

/// Default iteration budget for one incident run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// What the loop controller does when the reasoning engine returns
/// malformed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailurePolicy {
    /// Retry the call once with a stricter prompt, then escalate.
    #[default]
    RetryStricter,
    /// Abort the run immediately and requeue for manual review.
    Requeue,
}

/// Reasoning engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Executable invoked for model calls.
    #[serde(default = "default_reasoning_command")]
    pub command: String,
    /// Model variant passed through to the CLI.
    #[serde(default = "default_model")]
    pub model: String,
    /// Timeout applied to every reason/evaluate call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for timeout/provider failures before escalating.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_reasoning_command() -> String {
    "claude".to_string()
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_retries() -> u32 {
    2
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            command: default_reasoning_command(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
        }
    }
}

impl ReasoningConfig {
    /// Timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which action executor is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Record intent only; safe to run unattended.
    #[default]
    Noop,
    /// Run actions as allow-listed commands.
    Allowlist,
}

/// Action executor settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub kind: ExecutorKind,
    /// Programs the allowlist executor may run.
    #[serde(default)]
    pub allowlist: Vec<String>,
}

/// Health probe settings for the evaluate short-circuit.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealthConfig {
    /// Command run to probe service health (exit 0 = healthy).
    #[serde(default)]
    pub command: Option<String>,
    /// When set and the probe passes, EVALUATE short-circuits
    /// `resolved = true` without a model call.
    #[serde(default)]
    pub trust_health_check: bool,
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Queue poll interval when idle, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Concurrent incident runs. Reasoning calls are the dominant cost,
    /// so this bounds concurrent model calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Lease applied when claiming an incident, in seconds. A
    /// processing incident whose lease expired is requeued by the
    /// reclaim sweep.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Interval between stale-lease sweeps, in milliseconds.
    #[serde(default = "default_reclaim_interval_ms")]
    pub reclaim_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_concurrency() -> usize {
    2
}

fn default_lease_secs() -> u64 {
    600
}

fn default_reclaim_interval_ms() -> u64 {
    30_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            concurrency: default_concurrency(),
            lease_secs: default_lease_secs(),
            reclaim_interval_ms: default_reclaim_interval_ms(),
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    #[must_use]
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Iteration budget for one incident run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Log lines carried into one observation.
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,
    #[serde(default)]
    pub parse_failure_policy: ParseFailurePolicy,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Incident store file. `None` keeps incidents in memory only.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_max_log_lines() -> usize {
    40
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_log_lines: default_max_log_lines(),
            parse_failure_policy: ParseFailurePolicy::default(),
            reasoning: ReasoningConfig::default(),
            executor: ExecutorConfig::default(),
            health: HealthConfig::default(),
            worker: WorkerConfig::default(),
            store_path: None,
        }
    }
}

impl SentinelConfig {
    /// Load configuration from a directory.
    ///
    /// A missing `sentinel.json` yields defaults; a malformed one is a
    /// startup error, never silently ignored.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::config_path(dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SentinelError::config_with_path(e.to_string(), path.clone()))?;
        let config: SentinelConfig = serde_json::from_str(&content)
            .map_err(|e| SentinelError::config_with_path(e.to_string(), path))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the config path for a directory.
    #[must_use]
    pub fn config_path(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::InvalidConfig`] for values that would
    /// make the loop unsound. These are programming/deployment errors
    /// and fail the worker process at startup.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(SentinelError::InvalidConfig {
                field: "max_iterations".into(),
                reason: "must be at least 1 to guarantee the loop can run".into(),
            });
        }
        if self.worker.concurrency == 0 {
            return Err(SentinelError::InvalidConfig {
                field: "worker.concurrency".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.reasoning.timeout_secs == 0 {
            return Err(SentinelError::InvalidConfig {
                field: "reasoning.timeout_secs".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.executor.kind == ExecutorKind::Allowlist && self.executor.allowlist.is_empty() {
            return Err(SentinelError::InvalidConfig {
                field: "executor.allowlist".into(),
                reason: "allowlist executor requires at least one allowed program".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SentinelConfig::default();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.parse_failure_policy, ParseFailurePolicy::RetryStricter);
        assert_eq!(config.reasoning.command, "claude");
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.worker.lease(), Duration::from_secs(600));
        assert!(config.store_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SentinelConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_iterations, 5);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"max_iterations": 3, "reasoning": {"model": "opus"}}"#,
        )
        .unwrap();
        let config = SentinelConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.reasoning.model, "opus");
        // untouched sections keep defaults
        assert_eq!(config.reasoning.command, "claude");
        assert_eq!(config.worker.poll_interval_ms, 2000);
    }

    #[test]
    fn test_load_malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{not json").unwrap();
        let err = SentinelConfig::load(dir.path()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let config = SentinelConfig {
            max_iterations: 0,
            ..SentinelConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SentinelError::InvalidConfig { ref field, .. } if field == "max_iterations"));
    }

    #[test]
    fn test_validate_rejects_empty_allowlist() {
        let config = SentinelConfig {
            executor: ExecutorConfig {
                kind: ExecutorKind::Allowlist,
                allowlist: vec![],
            },
            ..SentinelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_failure_policy_tags() {
        let json = serde_json::to_string(&ParseFailurePolicy::RetryStricter).unwrap();
        assert_eq!(json, "\"retry_stricter\"");
        let back: ParseFailurePolicy = serde_json::from_str("\"requeue\"").unwrap();
        assert_eq!(back, ParseFailurePolicy::Requeue);
    }
}
