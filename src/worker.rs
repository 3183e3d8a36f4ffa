//! Background worker that drains the incident queue.
//!
//! The worker polls the store on an explicit interval, claims queued
//! incidents, and runs each through its own [`LoopController`] task.
//! Concurrency is bounded by a semaphore sized to the deployment's
//! tolerance for concurrent reasoning calls. A watch-channel shutdown
//! token stops claiming immediately; in-flight runs finish their
//! current stage, persist, and requeue via the controller's own
//! cancellation check.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SentinelConfig;
use crate::error::Result;
use crate::r#loop::{ControllerConfig, LoopController, LoopDependencies, RunOutcome};
use crate::store::IncidentStore;

/// Drains the incident queue until shut down.
pub struct Worker {
    deps: LoopDependencies,
    config: SentinelConfig,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// Create a worker. Flip the `shutdown` channel to `true` to stop
    /// claiming and drain in-flight runs.
    #[must_use]
    pub fn new(
        deps: LoopDependencies,
        config: SentinelConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            deps,
            config,
            shutdown,
        }
    }

    fn controller(&self) -> LoopController {
        LoopController::new(
            self.deps.clone(),
            ControllerConfig::from_config(&self.config),
        )
        .with_cancellation(self.shutdown.clone())
    }

    /// Claim and process a single incident, if one is queued.
    ///
    /// Used by the one-shot CLI path and integration tests; the daemon
    /// path is [`Worker::run`].
    pub async fn process_once(&self) -> Result<Option<RunOutcome>> {
        match self.deps.store.claim_next().await? {
            Some(incident) => {
                let outcome = self.controller().run_claimed(incident).await?;
                Ok(Some(outcome))
            }
            None => Ok(None),
        }
    }

    /// Run the drain loop until the shutdown token flips.
    pub async fn run(&self) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.worker.concurrency));
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let mut shutdown = self.shutdown.clone();
        let mut poll = tokio::time::interval(self.config.worker.poll_interval());
        let mut reclaim = tokio::time::interval(self.config.worker.reclaim_interval());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        reclaim.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            concurrency = self.config.worker.concurrency,
            poll_interval_ms = self.config.worker.poll_interval_ms,
            "worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = reclaim.tick() => {
                    match self.deps.store.reclaim_stale().await {
                        Ok(reclaimed) if !reclaimed.is_empty() => {
                            warn!(count = reclaimed.len(), ids = ?reclaimed, "reclaimed stale incidents");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "stale-lease sweep failed"),
                    }
                }
                _ = poll.tick() => {
                    tasks.retain(|task| !task.is_finished());
                    self.drain_queue(&semaphore, &mut tasks).await;
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }

        info!(in_flight = tasks.len(), "worker shutting down, draining runs");
        futures::future::join_all(tasks).await;
        Ok(())
    }

    /// Claim queued incidents while worker slots are free.
    async fn drain_queue(&self, semaphore: &Arc<Semaphore>, tasks: &mut Vec<JoinHandle<()>>) {
        loop {
            let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() else {
                debug!("all worker slots busy");
                return;
            };
            let incident = match self.deps.store.claim_next().await {
                Ok(Some(incident)) => incident,
                Ok(None) => return,
                Err(e) => {
                    error!(error = %e, "failed to claim next incident");
                    return;
                }
            };

            let controller = self.controller();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                let incident_id = incident.id.clone();
                match controller.run_claimed(incident).await {
                    Ok(outcome) => {
                        debug!(incident_id, ?outcome, "run finished");
                    }
                    Err(e) => {
                        // Stage-local errors are handled inside the run;
                        // anything surfacing here is a store fault.
                        error!(incident_id, error = %e, "run aborted");
                    }
                }
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DeliveryChannel;
    use crate::incident::IncidentStatus;
    use crate::store::{IncidentStore, MemoryStore};
    use crate::testing::{log_incident, MockExecutor, MockHydrator, MockReasoner, StaticProbe};
    use std::time::Duration;

    fn deps(reasoner: MockReasoner) -> LoopDependencies {
        LoopDependencies {
            store: Arc::new(MemoryStore::new()),
            hydrator: Arc::new(MockHydrator::new()),
            reasoner: Arc::new(reasoner),
            executor: Arc::new(MockExecutor::new()),
            probe: Arc::new(StaticProbe::silent()),
            channel: Arc::new(DeliveryChannel::default()),
        }
    }

    fn quick_config() -> SentinelConfig {
        let mut config = SentinelConfig::default();
        config.worker.poll_interval_ms = 10;
        config.worker.reclaim_interval_ms = 50;
        config
    }

    #[tokio::test]
    async fn test_process_once_empty_queue() {
        let (_tx, rx) = watch::channel(false);
        let worker = Worker::new(deps(MockReasoner::new()), quick_config(), rx);
        assert_eq!(worker.process_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_process_once_resolves_incident() {
        let reasoner = MockReasoner::new()
            .with_diagnosis("upstream unreachable", "restart upstream service")
            .with_verdict(true);
        let deps = deps(reasoner);
        let incident = deps.store.create(log_incident()).await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let worker = Worker::new(deps.clone(), quick_config(), rx);
        let outcome = worker.process_once().await.unwrap();
        assert_eq!(outcome, Some(RunOutcome::Resolved));

        let stored = deps.store.get(&incident.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IncidentStatus::Resolved);
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops_on_shutdown() {
        let reasoner = MockReasoner::new().with_verdicts([true, true]);
        let deps = deps(reasoner);
        deps.store.create(log_incident()).await.unwrap();
        deps.store.create(log_incident()).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(deps.clone(), quick_config(), rx);
        let handle = tokio::spawn(async move { worker.run().await });

        // Give the worker a few poll ticks to process both incidents.
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop after shutdown")
            .unwrap()
            .unwrap();

        let incidents = deps.store.list().await.unwrap();
        assert_eq!(incidents.len(), 2);
        assert!(incidents
            .iter()
            .all(|i| i.status == IncidentStatus::Resolved));
    }
}
