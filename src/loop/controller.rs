//! The incident loop controller.
//!
//! Sequences Observe -> Reason -> Act -> Evaluate over one incident,
//! decides whether to loop or terminate, and persists every transition.
//! Collaborators are injected as trait objects, so the controller never
//! talks to storage, a model provider, or an executor directly.
//!
//! # Stage contract
//!
//! ```text
//! OBSERVE ──> REASON ──> ACT ──> EVALUATE ──> DONE (resolved | escalated)
//!    ^                              │
//!    └──────────────────────────────┘   (continue while unresolved
//!                                        and under the iteration budget)
//! ```
//!
//! Stage-local failures are handled here and never crash a run: parse
//! failures fail closed and retry per policy, timeouts and provider
//! errors back off and retry, executor failures are recorded as
//! outcomes, and hydrator outages degrade to reasoning over raw logs.

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use regex::Regex;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::retry::RetryConfig;
use super::state::{action_fingerprint, ActionRecord, LoopState, Stage, NO_DATA_SENTINEL};
use crate::channel::DeliveryChannel;
use crate::config::{ParseFailurePolicy, SentinelConfig};
use crate::context::{ContextBundle, ContextHydrator};
use crate::error::{ReasoningError, Result};
use crate::executor::{ActionExecutor, ActionOutcome};
use crate::health::HealthProbe;
use crate::incident::{meta, Incident, IncidentStatus};
use crate::reasoning::{Diagnosis, ReasoningEngine, ReasoningRequest};
use crate::store::IncidentStore;

/// Failure notes retained in incident metadata.
const MAX_ERROR_NOTES: usize = 5;

/// Collaborators injected into the loop controller.
///
/// Trait objects keep storage, reasoning, execution, hydration, and
/// health probing swappable; tests install mocks from
/// [`crate::testing`].
#[derive(Clone)]
pub struct LoopDependencies {
    pub store: Arc<dyn IncidentStore>,
    pub hydrator: Arc<dyn ContextHydrator>,
    pub reasoner: Arc<dyn ReasoningEngine>,
    pub executor: Arc<dyn ActionExecutor>,
    pub probe: Arc<dyn HealthProbe>,
    pub channel: Arc<DeliveryChannel>,
}

impl std::fmt::Debug for LoopDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopDependencies")
            .field("store", &"<dyn IncidentStore>")
            .field("hydrator", &"<dyn ContextHydrator>")
            .field("reasoner", &"<dyn ReasoningEngine>")
            .field("executor", &"<dyn ActionExecutor>")
            .field("probe", &"<dyn HealthProbe>")
            .finish_non_exhaustive()
    }
}

/// Controller policy knobs, derived from [`SentinelConfig`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Iteration budget guaranteeing termination.
    pub max_iterations: u32,
    /// Log lines carried into one observation.
    pub max_log_lines: usize,
    pub parse_failure_policy: ParseFailurePolicy,
    pub retry: RetryConfig,
    /// Short-circuit EVALUATE when the health probe passes.
    pub trust_health_check: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_iterations: crate::config::DEFAULT_MAX_ITERATIONS,
            max_log_lines: 40,
            parse_failure_policy: ParseFailurePolicy::default(),
            retry: RetryConfig::default(),
            trust_health_check: false,
        }
    }
}

impl ControllerConfig {
    /// Derive controller policy from the agent configuration.
    #[must_use]
    pub fn from_config(config: &SentinelConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_log_lines: config.max_log_lines,
            parse_failure_policy: config.parse_failure_policy,
            retry: RetryConfig::with_retries(config.reasoning.retries),
            trust_health_check: config.health.trust_health_check,
        }
    }
}

/// Terminal outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// EVALUATE declared resolution; the incident is resolved.
    Resolved,
    /// Automated remediation could not proceed safely; the incident is
    /// requeued for manual review with the reason in metadata.
    Escalated { reason: String },
    /// The run was cancelled between stages; the incident is requeued.
    Cancelled,
}

/// Drives one incident through the observe/reason/act/evaluate loop.
pub struct LoopController {
    deps: LoopDependencies,
    config: ControllerConfig,
    cancel: watch::Receiver<bool>,
}

impl LoopController {
    /// Create a controller that is never externally cancelled.
    #[must_use]
    pub fn new(deps: LoopDependencies, config: ControllerConfig) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self {
            deps,
            config,
            cancel: rx,
        }
    }

    /// Install a cancellation token, checked between stages only.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Claim the incident and run the loop to a terminal outcome.
    ///
    /// # Errors
    ///
    /// [`crate::error::SentinelError::LockConflict`] when another
    /// worker holds the incident; the caller must not retry.
    pub async fn run(&self, incident_id: &str) -> Result<RunOutcome> {
        let incident = self.deps.store.claim(incident_id).await?;
        self.run_claimed(incident).await
    }

    /// Run the loop over an incident this worker already claimed.
    pub async fn run_claimed(&self, incident: Incident) -> Result<RunOutcome> {
        info!(
            incident_id = %incident.id,
            signal_type = %incident.signal_type,
            severity = %incident.severity,
            "starting incident run"
        );

        let mut state = LoopState::new();
        let mut errors: Vec<String> = Vec::new();

        loop {
            // OBSERVE: refresh the observation; never fails the run.
            let bundle = self.observe(&incident, &mut state, &mut errors).await;
            self.publish(&incident, Stage::Observe, &state);
            if self.is_cancelled() {
                return self.cancel_run(&incident, &state, &errors).await;
            }

            // Empty observation: nothing to reason about, ask EVALUATE
            // whether to keep waiting.
            if state.has_signal() {
                match self.reason(&incident, &mut state, &bundle, &mut errors).await {
                    ReasonStep::Proposed => {}
                    ReasonStep::Escalate(reason) => {
                        self.publish(&incident, Stage::Reason, &state);
                        return self.escalate(&incident, &state, &errors, reason).await;
                    }
                }
                self.publish(&incident, Stage::Reason, &state);
                if self.is_cancelled() {
                    return self.cancel_run(&incident, &state, &errors).await;
                }

                self.act(&incident, &mut state, &mut errors).await;
                self.publish(&incident, Stage::Act, &state);
                if self.is_cancelled() {
                    return self.cancel_run(&incident, &state, &errors).await;
                }
            }

            self.evaluate(&incident, &mut state, &bundle, &mut errors).await;
            self.publish(&incident, Stage::Evaluate, &state);

            state.iteration += 1;
            self.persist_progress(&incident, &state, &errors).await?;

            if state.resolved {
                let mut entries = Map::new();
                entries.insert(
                    meta::RESOLVED_AT.into(),
                    Value::String(Utc::now().to_rfc3339()),
                );
                self.deps.store.merge_metadata(&incident.id, entries).await?;
                self.deps
                    .store
                    .update_status(&incident.id, IncidentStatus::Resolved)
                    .await?;
                info!(
                    incident_id = %incident.id,
                    iterations = state.iteration,
                    "incident resolved"
                );
                return Ok(RunOutcome::Resolved);
            }

            if state.iteration >= self.config.max_iterations {
                return self
                    .escalate(
                        &incident,
                        &state,
                        &errors,
                        "iteration budget exhausted".to_string(),
                    )
                    .await;
            }

            if self.is_cancelled() {
                return self.cancel_run(&incident, &state, &errors).await;
            }
            debug!(
                incident_id = %incident.id,
                iteration = state.iteration,
                "unresolved, re-entering observe"
            );
        }
    }

    /// OBSERVE: refresh `logs` from the incident's signal and context.
    ///
    /// The first iteration seeds from the originating description plus
    /// the context bundle; later iterations re-query the hydrator to
    /// detect change. An unavailable source yields the explicit no-data
    /// sentinel instead of an error.
    async fn observe(
        &self,
        incident: &Incident,
        state: &mut LoopState,
        errors: &mut Vec<String>,
    ) -> ContextBundle {
        let (bundle, available) = match self.deps.hydrator.get_context(incident).await {
            Ok(bundle) => (bundle, true),
            Err(e) => {
                warn!(incident_id = %incident.id, error = %e, "context hydration failed, degrading");
                record_error(errors, Stage::Observe, &e.to_string());
                (ContextBundle::default(), false)
            }
        };

        state.logs = if state.iteration == 0 {
            compose_observation(incident, &bundle, true, self.config.max_log_lines)
        } else if available {
            compose_observation(incident, &bundle, false, self.config.max_log_lines)
        } else {
            NO_DATA_SENTINEL.to_string()
        };
        bundle
    }

    /// REASON: diagnose and propose the next action, with retry and the
    /// repeated-action guard. Fails closed: `issue`/`actions` are
    /// mutated only on a well-formed response.
    async fn reason(
        &self,
        incident: &Incident,
        state: &mut LoopState,
        bundle: &ContextBundle,
        errors: &mut Vec<String>,
    ) -> ReasonStep {
        let diagnosis = match self.diagnose(state, bundle, errors).await {
            Ok(diagnosis) => diagnosis,
            Err(reason) => return ReasonStep::Escalate(reason),
        };

        let duplicate = state
            .last_action()
            .map(|record| action_fingerprint(&record.proposed) == action_fingerprint(&diagnosis.action))
            .unwrap_or(false);

        state.issue = Some(diagnosis.issue);
        if duplicate {
            // Same fix proposed twice in a row: record it, but never
            // execute it again.
            state.actions.push(ActionRecord {
                proposed: diagnosis.action,
                outcome: Some(ActionOutcome::failure(
                    "skipped - identical to previous action",
                )),
            });
            warn!(incident_id = %incident.id, "repeated action proposed, escalating");
            return ReasonStep::Escalate("identical action proposed twice in a row".into());
        }

        state.push_action(diagnosis.action);
        ReasonStep::Proposed
    }

    async fn diagnose(
        &self,
        state: &LoopState,
        bundle: &ContextBundle,
        errors: &mut Vec<String>,
    ) -> std::result::Result<Diagnosis, String> {
        let mut request = ReasoningRequest {
            logs: state.logs.clone(),
            actions: state.rendered_actions(),
            context: bundle.excerpt(self.config.max_log_lines),
            strict: false,
        };
        let mut attempt = 0u32;
        let mut parse_retried = false;

        loop {
            match self.deps.reasoner.reason(&request).await {
                Ok(diagnosis) => return Ok(diagnosis),
                Err(e @ ReasoningError::Parse(_)) => {
                    record_error(errors, Stage::Reason, &e.to_string());
                    if !parse_retried
                        && self.config.parse_failure_policy == ParseFailurePolicy::RetryStricter
                    {
                        debug!("malformed reasoning response, retrying with stricter prompt");
                        parse_retried = true;
                        request.strict = true;
                        continue;
                    }
                    return Err(format!("reasoning parse failure: {e}"));
                }
                Err(e) => {
                    record_error(errors, Stage::Reason, &e.to_string());
                    attempt += 1;
                    if attempt > self.config.retry.max_retries {
                        return Err(format!("reasoning retries exhausted: {e}"));
                    }
                    let delay = self.config.retry.delay(attempt);
                    debug!(attempt, ?delay, "reasoning call failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// ACT: execute the most recently proposed action and annotate its
    /// audit entry. A failing executor never aborts the run.
    async fn act(&self, incident: &Incident, state: &mut LoopState, errors: &mut Vec<String>) {
        let Some(proposed) = state.last_action().map(|r| r.proposed.clone()) else {
            return;
        };
        let outcome = match self.deps.executor.execute(&proposed).await {
            Ok(outcome) => outcome,
            Err(e) => {
                record_error(errors, Stage::Act, &e.to_string());
                ActionOutcome::failure(e.to_string())
            }
        };
        if !outcome.success {
            warn!(
                incident_id = %incident.id,
                action = %proposed,
                detail = %outcome.detail,
                "action execution failed; visible to the next reasoning call"
            );
        }
        state.annotate_last(outcome);
    }

    /// EVALUATE: decide resolution. Malformed or failed output defaults
    /// to unresolved; a trusted, passing health probe short-circuits
    /// without a model call.
    async fn evaluate(
        &self,
        incident: &Incident,
        state: &mut LoopState,
        bundle: &ContextBundle,
        errors: &mut Vec<String>,
    ) {
        if self.config.trust_health_check {
            if let Some(true) = self.deps.probe.check().await {
                info!(incident_id = %incident.id, "health probe passing, short-circuiting resolution");
                state.resolved = true;
                return;
            }
        }

        let request = ReasoningRequest {
            logs: state.logs.clone(),
            actions: state.rendered_actions(),
            context: bundle.excerpt(self.config.max_log_lines),
            strict: false,
        };
        state.resolved = match self.deps.reasoner.evaluate(&request).await {
            Ok(verdict) => verdict.resolved,
            Err(e) => {
                // Silent false-positive resolution is worse than one
                // extra loop; the iteration budget still bounds us.
                warn!(incident_id = %incident.id, error = %e, "evaluate failed, treating as unresolved");
                record_error(errors, Stage::Evaluate, &e.to_string());
                false
            }
        };
    }

    fn publish(&self, incident: &Incident, stage: Stage, state: &LoopState) {
        let sequence = self.deps.channel.publish(&incident.id, stage, state);
        debug!(
            incident_id = %incident.id,
            stage = %stage,
            sequence,
            iteration = state.iteration,
            "stage transition"
        );
    }

    /// Mirror the audit trail and loop progress into incident metadata.
    async fn persist_progress(
        &self,
        incident: &Incident,
        state: &LoopState,
        errors: &[String],
    ) -> Result<()> {
        let mut entries = Map::new();
        entries.insert(meta::ACTIONS.into(), json!(state.rendered_actions()));
        entries.insert(meta::ITERATION.into(), json!(state.iteration));
        if let Some(issue) = &state.issue {
            entries.insert(meta::LAST_ISSUE.into(), Value::String(issue.clone()));
        }
        if let Some(record) = state.last_action() {
            entries.insert(
                meta::LAST_ACTION_FINGERPRINT.into(),
                Value::String(action_fingerprint(&record.proposed)),
            );
        }
        if !errors.is_empty() {
            entries.insert(meta::ERRORS.into(), json!(errors));
        }
        self.deps.store.merge_metadata(&incident.id, entries).await
    }

    /// Abort to manual review: requeue with a visible escalation marker.
    async fn escalate(
        &self,
        incident: &Incident,
        state: &LoopState,
        errors: &[String],
        reason: String,
    ) -> Result<RunOutcome> {
        warn!(incident_id = %incident.id, reason = %reason, "escalating to manual review");
        self.persist_progress(incident, state, errors).await?;
        let mut entries = Map::new();
        entries.insert(meta::NEEDS_REVIEW.into(), Value::Bool(true));
        entries.insert(meta::ESCALATION_REASON.into(), Value::String(reason.clone()));
        self.deps.store.merge_metadata(&incident.id, entries).await?;
        self.deps.store.requeue(&incident.id).await?;
        Ok(RunOutcome::Escalated { reason })
    }

    /// Cancelled between stages: persist what we have and requeue.
    async fn cancel_run(
        &self,
        incident: &Incident,
        state: &LoopState,
        errors: &[String],
    ) -> Result<RunOutcome> {
        info!(incident_id = %incident.id, "run cancelled, requeueing");
        self.persist_progress(incident, state, errors).await?;
        let mut entries = Map::new();
        entries.insert(meta::CANCELLED.into(), Value::Bool(true));
        self.deps.store.merge_metadata(&incident.id, entries).await?;
        self.deps.store.requeue(&incident.id).await?;
        Ok(RunOutcome::Cancelled)
    }
}

enum ReasonStep {
    Proposed,
    Escalate(String),
}

fn record_error(errors: &mut Vec<String>, stage: Stage, message: &str) {
    errors.push(format!("[{stage}] {message}"));
    if errors.len() > MAX_ERROR_NOTES {
        let excess = errors.len() - MAX_ERROR_NOTES;
        errors.drain(..excess);
    }
}

fn error_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(error|fatal|crit(ical)?|panic)\b").unwrap())
}

/// Assemble the observation text for one iteration: bundle log lines
/// most recent first, optionally seeded with the incident description,
/// bounded by `max_lines` with error-level lines retained
/// preferentially.
#[must_use]
pub fn compose_observation(
    incident: &Incident,
    bundle: &ContextBundle,
    seed_description: bool,
    max_lines: usize,
) -> String {
    let mut lines: Vec<String> = Vec::new();
    if seed_description && !incident.description.trim().is_empty() {
        lines.push(incident.description.clone());
    }
    for window in bundle.log_windows.iter().rev() {
        for line in window.lines.iter().rev() {
            lines.push(line.clone());
        }
    }
    select_lines(&lines, max_lines).join("\n")
}

fn select_lines(lines: &[String], max: usize) -> Vec<String> {
    if lines.len() <= max {
        return lines.to_vec();
    }
    let pattern = error_line_pattern();
    let mut picked: Vec<usize> = (0..lines.len())
        .filter(|&i| pattern.is_match(&lines[i]))
        .take(max)
        .collect();
    for i in 0..lines.len() {
        if picked.len() >= max {
            break;
        }
        if !picked.contains(&i) {
            picked.push(i);
        }
    }
    picked.sort_unstable();
    picked.iter().map(|&i| lines[i].clone()).collect()
}
