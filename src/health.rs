//! Health probes for the evaluate short-circuit.
//!
//! Whether EVALUATE should trust a live health check over the model's
//! judgment is a pluggable policy: when a probe is configured, trusted,
//! and passing, the loop short-circuits `resolved = true` without a
//! model call. Absent or failing probes fall through to the model.

use async_trait::async_trait;
use tracing::debug;

/// A live health signal for the incident's service.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe current health.
    ///
    /// `None` means no signal is available (no probe applies, probe
    /// itself failed); the loop falls through to the model. `Some(true)`
    /// means the service checks out healthy.
    async fn check(&self) -> Option<bool>;
}

/// Probe that never reports a signal. The default.
#[derive(Debug, Clone, Default)]
pub struct NoProbe;

#[async_trait]
impl HealthProbe for NoProbe {
    async fn check(&self) -> Option<bool> {
        None
    }
}

/// Probe that runs a configured command; exit 0 means healthy.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    command: String,
}

impl CommandProbe {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for CommandProbe {
    async fn check(&self) -> Option<bool> {
        let mut tokens = self.command.split_whitespace();
        let program = tokens.next()?;
        let output = tokio::process::Command::new(program)
            .args(tokens)
            .output()
            .await;
        match output {
            Ok(output) => {
                debug!(command = %self.command, code = ?output.status.code(), "health probe ran");
                Some(output.status.success())
            }
            Err(e) => {
                debug!(command = %self.command, error = %e, "health probe unavailable");
                None
            }
        }
    }
}
