//! Mock collaborators with controllable behavior.
//!
//! Each mock mirrors one of the loop controller's injected traits and
//! supports scripted responses for exercising failure paths without
//! real model calls, processes, or log sources.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::context::{ContextBundle, ContextHydrator};
use crate::error::{ReasoningError, Result, SentinelError};
use crate::executor::{ActionExecutor, ActionOutcome};
use crate::health::HealthProbe;
use crate::incident::Incident;
use crate::reasoning::{Diagnosis, ReasoningEngine, ReasoningRequest, Verdict};

// ============================================================================
// MockReasoner
// ============================================================================

/// Scripted reasoning engine.
///
/// Responses queue up in the order they were added; once a queue is
/// exhausted the mock falls back to a deterministic default: `reason`
/// proposes a distinct action per call ("remediation step N"), and
/// `evaluate` reports unresolved.
///
/// # Example
///
/// ```rust,ignore
/// let reasoner = MockReasoner::new()
///     .with_diagnosis("upstream unreachable", "restart upstream service")
///     .with_verdict(true);
/// ```
#[derive(Debug, Default)]
pub struct MockReasoner {
    diagnoses: Mutex<VecDeque<std::result::Result<Diagnosis, ReasoningError>>>,
    verdicts: Mutex<VecDeque<std::result::Result<Verdict, ReasoningError>>>,
    reason_calls: AtomicU32,
    evaluate_calls: AtomicU32,
    strict_calls: AtomicU32,
    reason_requests: Mutex<Vec<ReasoningRequest>>,
}

impl MockReasoner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a well-formed diagnosis.
    #[must_use]
    pub fn with_diagnosis(self, issue: &str, action: &str) -> Self {
        self.diagnoses
            .lock()
            .unwrap()
            .push_back(Ok(Diagnosis {
                issue: issue.to_string(),
                action: action.to_string(),
            }));
        self
    }

    /// Queue a reasoning failure.
    #[must_use]
    pub fn with_reason_error(self, error: ReasoningError) -> Self {
        self.diagnoses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Queue an evaluate verdict.
    #[must_use]
    pub fn with_verdict(self, resolved: bool) -> Self {
        self.verdicts
            .lock()
            .unwrap()
            .push_back(Ok(Verdict { resolved }));
        self
    }

    /// Queue several evaluate verdicts at once.
    #[must_use]
    pub fn with_verdicts(self, resolved: impl IntoIterator<Item = bool>) -> Self {
        {
            let mut verdicts = self.verdicts.lock().unwrap();
            for value in resolved {
                verdicts.push_back(Ok(Verdict { resolved: value }));
            }
        }
        self
    }

    /// Queue an evaluate failure.
    #[must_use]
    pub fn with_evaluate_error(self, error: ReasoningError) -> Self {
        self.verdicts.lock().unwrap().push_back(Err(error));
        self
    }

    /// Number of `reason` calls observed.
    pub fn reason_calls(&self) -> u32 {
        self.reason_calls.load(Ordering::SeqCst)
    }

    /// Number of `evaluate` calls observed.
    pub fn evaluate_calls(&self) -> u32 {
        self.evaluate_calls.load(Ordering::SeqCst)
    }

    /// Number of `reason` calls that carried the strict flag.
    pub fn strict_calls(&self) -> u32 {
        self.strict_calls.load(Ordering::SeqCst)
    }

    /// Requests passed to `reason`, in order.
    pub fn reason_requests(&self) -> Vec<ReasoningRequest> {
        self.reason_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningEngine for MockReasoner {
    async fn reason(
        &self,
        request: &ReasoningRequest,
    ) -> std::result::Result<Diagnosis, ReasoningError> {
        let call = self.reason_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if request.strict {
            self.strict_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.reason_requests.lock().unwrap().push(request.clone());

        if let Some(scripted) = self.diagnoses.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(Diagnosis {
            issue: "diagnosed issue".to_string(),
            action: format!("remediation step {call}"),
        })
    }

    async fn evaluate(
        &self,
        _request: &ReasoningRequest,
    ) -> std::result::Result<Verdict, ReasoningError> {
        self.evaluate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.verdicts.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(Verdict { resolved: false })
    }
}

// ============================================================================
// MockExecutor
// ============================================================================

/// Scripted action executor. Default outcome is a simulated success,
/// so the happy path needs no setup.
#[derive(Debug, Default)]
pub struct MockExecutor {
    outcomes: Mutex<VecDeque<Result<ActionOutcome>>>,
    executed: Mutex<Vec<String>>,
}

impl MockExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a specific outcome.
    #[must_use]
    pub fn with_outcome(self, outcome: ActionOutcome) -> Self {
        self.outcomes.lock().unwrap().push_back(Ok(outcome));
        self
    }

    /// Queue a failed outcome.
    #[must_use]
    pub fn with_failure(self, detail: &str) -> Self {
        self.with_outcome(ActionOutcome::failure(detail))
    }

    /// Queue an executor-internal error.
    #[must_use]
    pub fn with_error(self, message: &str) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Err(SentinelError::action("mock", message)));
        self
    }

    /// Actions passed to `execute`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for MockExecutor {
    async fn execute(&self, action: &str) -> Result<ActionOutcome> {
        self.executed.lock().unwrap().push(action.to_string());
        if let Some(scripted) = self.outcomes.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(ActionOutcome::success("simulated restart"))
    }
}

// ============================================================================
// MockHydrator
// ============================================================================

/// Scripted context hydrator.
///
/// Serves queued bundles first, then the recurring default bundle.
/// `with_fail_count` makes the first N calls fail with
/// `ContextUnavailable` to exercise degradation.
#[derive(Debug, Default)]
pub struct MockHydrator {
    bundles: Mutex<VecDeque<ContextBundle>>,
    default_bundle: ContextBundle,
    fail_count: AtomicU32,
    fail_after: Option<u32>,
    fail_always: bool,
    calls: AtomicU32,
}

impl MockHydrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a bundle for one call.
    #[must_use]
    pub fn with_bundle(self, bundle: ContextBundle) -> Self {
        self.bundles.lock().unwrap().push_back(bundle);
        self
    }

    /// Set the recurring bundle served once the queue is drained.
    #[must_use]
    pub fn with_default_bundle(mut self, bundle: ContextBundle) -> Self {
        self.default_bundle = bundle;
        self
    }

    /// Fail the first `count` calls with `ContextUnavailable`.
    #[must_use]
    pub fn with_fail_count(self, count: u32) -> Self {
        self.fail_count.store(count, Ordering::SeqCst);
        self
    }

    /// Succeed for the first `count` calls, then fail every call with
    /// `ContextUnavailable` (a source that goes away mid-run).
    #[must_use]
    pub fn failing_after(mut self, count: u32) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Fail every call.
    #[must_use]
    pub fn always_failing(mut self) -> Self {
        self.fail_always = true;
        self
    }

    /// Number of hydration calls observed.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextHydrator for MockHydrator {
    async fn get_context(&self, _incident: &Incident) -> Result<ContextBundle> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_always {
            return Err(SentinelError::context("mock hydrator outage"));
        }
        if self.fail_after.is_some_and(|after| call >= after) {
            return Err(SentinelError::context("mock hydrator outage"));
        }
        if self.fail_count.load(Ordering::SeqCst) > 0 {
            self.fail_count.fetch_sub(1, Ordering::SeqCst);
            return Err(SentinelError::context("mock hydrator outage"));
        }
        if let Some(bundle) = self.bundles.lock().unwrap().pop_front() {
            return Ok(bundle);
        }
        Ok(self.default_bundle.clone())
    }
}

// ============================================================================
// StaticProbe
// ============================================================================

/// Health probe with a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    result: Option<bool>,
}

impl StaticProbe {
    /// Probe that reports no signal.
    #[must_use]
    pub fn silent() -> Self {
        Self { result: None }
    }

    /// Probe with a fixed healthy/unhealthy answer.
    #[must_use]
    pub fn reporting(healthy: bool) -> Self {
        Self {
            result: Some(healthy),
        }
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn check(&self) -> Option<bool> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_reasoner_scripted_then_default() {
        let reasoner = MockReasoner::new().with_diagnosis("issue a", "action a");
        let request = ReasoningRequest::default();

        let first = reasoner.reason(&request).await.unwrap();
        assert_eq!(first.action, "action a");

        // Queue drained: defaults produce distinct actions per call.
        let second = reasoner.reason(&request).await.unwrap();
        let third = reasoner.reason(&request).await.unwrap();
        assert_ne!(second.action, third.action);
        assert_eq!(reasoner.reason_calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_reasoner_tracks_strict_flag() {
        let reasoner = MockReasoner::new();
        let strict = ReasoningRequest {
            strict: true,
            ..ReasoningRequest::default()
        };
        reasoner.reason(&ReasoningRequest::default()).await.unwrap();
        reasoner.reason(&strict).await.unwrap();
        assert_eq!(reasoner.strict_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_executor_records_actions() {
        let executor = MockExecutor::new().with_failure("quota exceeded");
        let first = executor.execute("scale up").await.unwrap();
        assert!(!first.success);

        let second = executor.execute("restart service").await.unwrap();
        assert!(second.success);
        assert_eq!(executor.executed(), vec!["scale up", "restart service"]);
    }

    #[tokio::test]
    async fn test_mock_hydrator_fail_count() {
        let hydrator = MockHydrator::new().with_fail_count(1);
        let incident = crate::testing::fixtures::log_incident();
        assert!(hydrator.get_context(&incident).await.is_err());
        assert!(hydrator.get_context(&incident).await.is_ok());
        assert_eq!(hydrator.calls(), 2);
    }

    #[tokio::test]
    async fn test_static_probe() {
        assert_eq!(StaticProbe::silent().check().await, None);
        assert_eq!(StaticProbe::reporting(true).check().await, Some(true));
        assert_eq!(StaticProbe::reporting(false).check().await, Some(false));
    }
}
