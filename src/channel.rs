//! Delivery channel for loop transitions.
//!
//! After every stage transition the loop controller publishes
//! `{incident, stage, state}` here. Subscribers consume either by push
//! (a broadcast subscription receives each transition as it happens) or
//! by pull (polling an incident's transition history). Both views see
//! transitions for a single incident in the exact order the controller
//! produced them.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::r#loop::state::{LoopState, Stage};

/// Default per-incident history retained for the pull model.
pub const DEFAULT_HISTORY_CAP: usize = 256;

/// Broadcast buffer for push subscribers; slow consumers observe a
/// `Lagged` error rather than blocking the loop.
const BROADCAST_CAPACITY: usize = 1024;

/// One published loop transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub incident_id: String,
    pub stage: Stage,
    pub state: LoopState,
    /// Per-incident monotonically increasing sequence number.
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Default)]
struct ChannelInner {
    history: HashMap<String, VecDeque<StageEvent>>,
    sequences: HashMap<String, u64>,
}

/// Fan-out hub for loop transitions.
///
/// The subscriber registry and per-incident history are guarded by a
/// mutex, so readers never observe a partially-updated view. Publishing
/// never blocks on slow subscribers.
pub struct DeliveryChannel {
    sender: broadcast::Sender<StageEvent>,
    inner: Mutex<ChannelInner>,
    history_cap: usize,
}

impl Default for DeliveryChannel {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl DeliveryChannel {
    /// Create a channel retaining up to `history_cap` transitions per
    /// incident for the pull model.
    #[must_use]
    pub fn new(history_cap: usize) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            sender,
            inner: Mutex::new(ChannelInner::default()),
            history_cap,
        }
    }

    /// Publish one stage transition.
    ///
    /// Returns the per-incident sequence number assigned to the event.
    pub fn publish(&self, incident_id: &str, stage: Stage, state: &LoopState) -> u64 {
        let event = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let sequence = inner
                .sequences
                .entry(incident_id.to_string())
                .and_modify(|s| *s += 1)
                .or_insert(0);
            let event = StageEvent {
                incident_id: incident_id.to_string(),
                stage,
                state: state.clone(),
                sequence: *sequence,
                emitted_at: Utc::now(),
            };
            let history = inner.history.entry(incident_id.to_string()).or_default();
            history.push_back(event.clone());
            while history.len() > self.history_cap {
                history.pop_front();
            }
            event
        };
        let sequence = event.sequence;
        // No receivers is fine; pull-model clients read history instead.
        let _ = self.sender.send(event);
        sequence
    }

    /// Subscribe to the push stream of all transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.sender.subscribe()
    }

    /// Pull the retained transition history for one incident, oldest
    /// first.
    #[must_use]
    pub fn history(&self, incident_id: &str) -> Vec<StageEvent> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .history
            .get(incident_id)
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the retained history for one incident (after resolution,
    /// once the UI no longer polls it).
    pub fn forget(&self, incident_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.history.remove(incident_id);
        inner.sequences.remove(incident_id);
    }
}

impl std::fmt::Debug for DeliveryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryChannel")
            .field("history_cap", &self.history_cap)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_assigns_per_incident_sequences() {
        let channel = DeliveryChannel::default();
        let state = LoopState::new();

        assert_eq!(channel.publish("a", Stage::Observe, &state), 0);
        assert_eq!(channel.publish("a", Stage::Reason, &state), 1);
        assert_eq!(channel.publish("b", Stage::Observe, &state), 0);
        assert_eq!(channel.publish("a", Stage::Act, &state), 2);
    }

    #[test]
    fn test_history_preserves_order() {
        let channel = DeliveryChannel::default();
        let state = LoopState::new();
        for stage in [Stage::Observe, Stage::Reason, Stage::Act, Stage::Evaluate] {
            channel.publish("incident-1", stage, &state);
        }

        let history = channel.history("incident-1");
        let stages: Vec<Stage> = history.iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![Stage::Observe, Stage::Reason, Stage::Act, Stage::Evaluate]
        );
        let sequences: Vec<u64> = history.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_history_is_bounded() {
        let channel = DeliveryChannel::new(3);
        let state = LoopState::new();
        for _ in 0..10 {
            channel.publish("incident-1", Stage::Observe, &state);
        }
        let history = channel.history("incident-1");
        assert_eq!(history.len(), 3);
        // Oldest entries were evicted; sequence numbers keep counting.
        assert_eq!(history[0].sequence, 7);
        assert_eq!(history[2].sequence, 9);
    }

    #[tokio::test]
    async fn test_push_subscriber_receives_in_order() {
        let channel = DeliveryChannel::default();
        let mut receiver = channel.subscribe();
        let state = LoopState::new();

        channel.publish("incident-1", Stage::Observe, &state);
        channel.publish("incident-1", Stage::Reason, &state);

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.stage, Stage::Observe);
        assert_eq!(second.stage, Stage::Reason);
        assert!(first.sequence < second.sequence);
    }

    #[test]
    fn test_forget_clears_history() {
        let channel = DeliveryChannel::default();
        let state = LoopState::new();
        channel.publish("incident-1", Stage::Observe, &state);
        channel.forget("incident-1");
        assert!(channel.history("incident-1").is_empty());
        // Sequence restarts after forget.
        assert_eq!(channel.publish("incident-1", Stage::Observe, &state), 0);
    }

    #[test]
    fn test_history_unknown_incident_is_empty() {
        assert!(DeliveryChannel::default().history("nope").is_empty());
    }
}
