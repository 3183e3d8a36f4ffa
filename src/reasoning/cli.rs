//! Reasoning engine backed by a local LLM CLI.
//!
//! Spawns the configured CLI (the `claude` binary by default), pipes
//! the prompt over stdin, and enforces the configured timeout. Exit
//! failures are classified as provider errors; responses that do not
//! match the expected schema are parse errors.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use super::{
    evaluate_prompt, parse_diagnosis, parse_verdict, reason_prompt, Diagnosis, ReasoningEngine,
    ReasoningRequest, Verdict,
};
use crate::config::ReasoningConfig;
use crate::error::{ReasoningError, Result, SentinelError};

/// Reasoning engine that shells out to an LLM CLI.
#[derive(Debug, Clone)]
pub struct CliReasoner {
    command: String,
    model: String,
    timeout: Duration,
}

impl CliReasoner {
    /// Create a reasoner for the given CLI command and model variant.
    #[must_use]
    pub fn new(command: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            model: model.into(),
            timeout,
        }
    }

    /// Build from configuration, verifying the CLI binary exists.
    ///
    /// A missing binary is a deployment error surfaced at startup, not
    /// per-incident.
    pub fn from_config(config: &ReasoningConfig) -> Result<Self> {
        which::which(&config.command).map_err(|_| SentinelError::MissingTool {
            tool: config.command.clone(),
        })?;
        Ok(Self::new(
            config.command.clone(),
            config.model.clone(),
            config.timeout(),
        ))
    }

    async fn run_prompt(&self, prompt: &str) -> std::result::Result<String, ReasoningError> {
        debug!(
            command = %self.command,
            model = %self.model,
            prompt_chars = prompt.len(),
            "invoking reasoning CLI"
        );

        let spawn = async {
            let mut child = AsyncCommand::new(&self.command)
                .args(["-p", "--model", &self.model, "--output-format", "text"])
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .spawn()
                .map_err(|e| ReasoningError::Provider(e.to_string()))?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(prompt.as_bytes())
                    .await
                    .map_err(|e| ReasoningError::Provider(e.to_string()))?;
                drop(stdin);
            }

            let output = child
                .wait_with_output()
                .await
                .map_err(|e| ReasoningError::Provider(e.to_string()))?;

            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            } else {
                Err(ReasoningError::Provider(format!(
                    "{} exited with code {}: {}",
                    self.command,
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                )))
            }
        };

        match tokio::time::timeout(self.timeout, spawn).await {
            Ok(result) => result,
            Err(_) => Err(ReasoningError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl ReasoningEngine for CliReasoner {
    async fn reason(
        &self,
        request: &ReasoningRequest,
    ) -> std::result::Result<Diagnosis, ReasoningError> {
        let response = self.run_prompt(&reason_prompt(request)).await?;
        parse_diagnosis(&response)
    }

    async fn evaluate(
        &self,
        request: &ReasoningRequest,
    ) -> std::result::Result<Verdict, ReasoningError> {
        let response = self.run_prompt(&evaluate_prompt(request)).await?;
        parse_verdict(&response)
    }
}
