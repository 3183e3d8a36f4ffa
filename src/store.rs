//! Incident store implementations.
//!
//! The loop controller and worker only ever see the [`IncidentStore`]
//! trait, so storage technology is swappable. Two implementations ship:
//! [`MemoryStore`] for tests and ephemeral demos, and [`JsonFileStore`]
//! which persists the incident map atomically so a demo survives
//! restarts.
//!
//! Claiming an incident (queued -> processing) is the soft lock that
//! gives a worker exclusive ownership; a lease stamped at claim time
//! lets the reclaim sweep requeue incidents stranded by a crashed
//! worker.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{Result, SentinelError};
use crate::incident::{meta, Incident, IncidentStatus};

/// Default lease applied when claiming an incident.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(600);

/// Durable record of incidents and their lifecycle status.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Insert a new incident.
    async fn create(&self, incident: Incident) -> Result<Incident>;

    /// Load an incident by id.
    async fn get(&self, id: &str) -> Result<Option<Incident>>;

    /// All incidents, oldest first.
    async fn list(&self) -> Result<Vec<Incident>>;

    /// Claim a specific incident: queued -> processing, stamping the
    /// ownership lease.
    ///
    /// # Errors
    ///
    /// [`SentinelError::LockConflict`] when the incident is not queued;
    /// the losing caller must abort without mutating status.
    async fn claim(&self, id: &str) -> Result<Incident>;

    /// Claim the oldest queued incident, if any.
    async fn claim_next(&self) -> Result<Option<Incident>>;

    /// Transition status, enforcing monotonicity. Requeueing must go
    /// through [`IncidentStore::requeue`].
    async fn update_status(&self, id: &str, status: IncidentStatus) -> Result<()>;

    /// Explicit processing -> queued requeue (escalation, cancellation,
    /// lease reclaim).
    async fn requeue(&self, id: &str) -> Result<()>;

    /// Merge entries into the incident's metadata.
    async fn merge_metadata(&self, id: &str, entries: Map<String, Value>) -> Result<()>;

    /// Requeue processing incidents whose lease expired. Returns the
    /// reclaimed ids.
    async fn reclaim_stale(&self) -> Result<Vec<String>>;
}

// ============================================================================
// Shared map operations
// ============================================================================

type IncidentMap = HashMap<String, Incident>;

fn create_in(map: &mut IncidentMap, incident: Incident) -> Result<Incident> {
    if map.contains_key(&incident.id) {
        return Err(SentinelError::store(format!(
            "incident {} already exists",
            incident.id
        )));
    }
    map.insert(incident.id.clone(), incident.clone());
    Ok(incident)
}

fn claim_in(map: &mut IncidentMap, id: &str, lease: Duration) -> Result<Incident> {
    let incident = map
        .get_mut(id)
        .ok_or_else(|| SentinelError::UnknownIncident { id: id.to_string() })?;
    if incident.status != IncidentStatus::Queued {
        return Err(SentinelError::LockConflict {
            id: id.to_string(),
            status: incident.status.to_string(),
        });
    }
    let now = Utc::now();
    incident.status = IncidentStatus::Processing;
    incident.updated_at = now;
    let expires = now + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());
    incident.metadata.insert(
        meta::LEASE_EXPIRES_AT.into(),
        Value::String(expires.to_rfc3339()),
    );
    Ok(incident.clone())
}

fn claim_next_in(map: &mut IncidentMap, lease: Duration) -> Result<Option<Incident>> {
    let next_id = map
        .values()
        .filter(|i| i.status == IncidentStatus::Queued)
        .min_by_key(|i| i.created_at)
        .map(|i| i.id.clone());
    match next_id {
        Some(id) => claim_in(map, &id, lease).map(Some),
        None => Ok(None),
    }
}

fn update_status_in(map: &mut IncidentMap, id: &str, status: IncidentStatus) -> Result<()> {
    let incident = map
        .get_mut(id)
        .ok_or_else(|| SentinelError::UnknownIncident { id: id.to_string() })?;
    if !incident.status.can_transition(status, false) {
        return Err(SentinelError::IllegalTransition {
            id: id.to_string(),
            from: incident.status.to_string(),
            to: status.to_string(),
        });
    }
    incident.status = status;
    incident.updated_at = Utc::now();
    if status == IncidentStatus::Resolved {
        incident.metadata.remove(meta::LEASE_EXPIRES_AT);
    }
    Ok(())
}

fn requeue_in(map: &mut IncidentMap, id: &str) -> Result<()> {
    let incident = map
        .get_mut(id)
        .ok_or_else(|| SentinelError::UnknownIncident { id: id.to_string() })?;
    if !incident
        .status
        .can_transition(IncidentStatus::Queued, true)
    {
        return Err(SentinelError::IllegalTransition {
            id: id.to_string(),
            from: incident.status.to_string(),
            to: IncidentStatus::Queued.to_string(),
        });
    }
    incident.status = IncidentStatus::Queued;
    incident.updated_at = Utc::now();
    incident.metadata.remove(meta::LEASE_EXPIRES_AT);
    Ok(())
}

fn merge_in(map: &mut IncidentMap, id: &str, entries: Map<String, Value>) -> Result<()> {
    let incident = map
        .get_mut(id)
        .ok_or_else(|| SentinelError::UnknownIncident { id: id.to_string() })?;
    for (key, value) in entries {
        incident.metadata.insert(key, value);
    }
    incident.updated_at = Utc::now();
    Ok(())
}

fn reclaim_in(map: &mut IncidentMap, now: DateTime<Utc>) -> Vec<String> {
    let expired: Vec<String> = map
        .values()
        .filter(|i| i.status == IncidentStatus::Processing)
        .filter(|i| {
            i.meta_str(meta::LEASE_EXPIRES_AT)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .is_some_and(|expires| expires.with_timezone(&Utc) <= now)
        })
        .map(|i| i.id.clone())
        .collect();

    for id in &expired {
        if let Some(incident) = map.get_mut(id) {
            incident.status = IncidentStatus::Queued;
            incident.updated_at = now;
            incident.metadata.remove(meta::LEASE_EXPIRES_AT);
            incident
                .metadata
                .insert(meta::RECLAIMED_AT.into(), Value::String(now.to_rfc3339()));
        }
    }
    expired
}

fn sorted(map: &IncidentMap) -> Vec<Incident> {
    let mut incidents: Vec<Incident> = map.values().cloned().collect();
    incidents.sort_by_key(|i| i.created_at);
    incidents
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory incident store.
#[derive(Debug)]
pub struct MemoryStore {
    incidents: Mutex<IncidentMap>,
    lease: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            incidents: Mutex::new(HashMap::new()),
            lease: DEFAULT_LEASE,
        }
    }

    /// Override the claim lease (short leases make reclaim testable).
    #[must_use]
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IncidentMap> {
        self.incidents.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn create(&self, incident: Incident) -> Result<Incident> {
        create_in(&mut self.lock(), incident)
    }

    async fn get(&self, id: &str) -> Result<Option<Incident>> {
        Ok(self.lock().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Incident>> {
        Ok(sorted(&self.lock()))
    }

    async fn claim(&self, id: &str) -> Result<Incident> {
        claim_in(&mut self.lock(), id, self.lease)
    }

    async fn claim_next(&self) -> Result<Option<Incident>> {
        claim_next_in(&mut self.lock(), self.lease)
    }

    async fn update_status(&self, id: &str, status: IncidentStatus) -> Result<()> {
        update_status_in(&mut self.lock(), id, status)
    }

    async fn requeue(&self, id: &str) -> Result<()> {
        requeue_in(&mut self.lock(), id)
    }

    async fn merge_metadata(&self, id: &str, entries: Map<String, Value>) -> Result<()> {
        merge_in(&mut self.lock(), id, entries)
    }

    async fn reclaim_stale(&self) -> Result<Vec<String>> {
        Ok(reclaim_in(&mut self.lock(), Utc::now()))
    }
}

// ============================================================================
// JsonFileStore
// ============================================================================

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Lock file suffix for concurrent access prevention.
const LOCK_SUFFIX: &str = ".lock";

/// File-backed incident store with atomic writes.
///
/// The whole map is written through a temp file + rename under an
/// advisory lock after every mutation. A corrupted file is quarantined
/// and the store starts fresh rather than failing the worker.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    incidents: Mutex<IncidentMap>,
    lease: Duration,
}

impl JsonFileStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let incidents = Self::load(&path)?;
        Ok(Self {
            path,
            incidents: Mutex::new(incidents),
            lease: DEFAULT_LEASE,
        })
    }

    /// Override the claim lease.
    #[must_use]
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn load(path: &Path) -> Result<IncidentMap> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let contents = fs::read_to_string(path)?;
        match serde_json::from_str::<Vec<Incident>>(&contents) {
            Ok(incidents) => {
                info!(path = %path.display(), count = incidents.len(), "loaded incident store");
                Ok(incidents.into_iter().map(|i| (i.id.clone(), i)).collect())
            }
            Err(e) => {
                let quarantine = path.with_extension("corrupt");
                warn!(
                    path = %path.display(),
                    error = %e,
                    quarantine = %quarantine.display(),
                    "corrupted incident store, quarantining and starting fresh"
                );
                let _ = fs::rename(path, quarantine);
                Ok(HashMap::new())
            }
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(LOCK_SUFFIX);
        PathBuf::from(name)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(TMP_SUFFIX);
        PathBuf::from(name)
    }

    fn save(&self, map: &IncidentMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let lock_file = File::create(self.lock_path())?;
        FileExt::lock_exclusive(&lock_file)
            .map_err(|e| SentinelError::store(format!("failed to acquire store lock: {e}")))?;

        let incidents = sorted(map);
        let json = serde_json::to_string_pretty(&incidents)?;
        let tmp = self.tmp_path();
        let mut tmp_file = File::create(&tmp)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn mutate<T>(&self, op: impl FnOnce(&mut IncidentMap) -> Result<T>) -> Result<T> {
        let mut map = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
        let result = op(&mut map)?;
        self.save(&map)?;
        Ok(result)
    }
}

#[async_trait]
impl IncidentStore for JsonFileStore {
    async fn create(&self, incident: Incident) -> Result<Incident> {
        self.mutate(|map| create_in(map, incident))
    }

    async fn get(&self, id: &str) -> Result<Option<Incident>> {
        let map = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Incident>> {
        let map = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sorted(&map))
    }

    async fn claim(&self, id: &str) -> Result<Incident> {
        self.mutate(|map| claim_in(map, id, self.lease))
    }

    async fn claim_next(&self) -> Result<Option<Incident>> {
        self.mutate(|map| claim_next_in(map, self.lease))
    }

    async fn update_status(&self, id: &str, status: IncidentStatus) -> Result<()> {
        self.mutate(|map| update_status_in(map, id, status))
    }

    async fn requeue(&self, id: &str) -> Result<()> {
        self.mutate(|map| requeue_in(map, id))
    }

    async fn merge_metadata(&self, id: &str, entries: Map<String, Value>) -> Result<()> {
        self.mutate(|map| merge_in(map, id, entries))
    }

    async fn reclaim_stale(&self) -> Result<Vec<String>> {
        self.mutate(|map| Ok(reclaim_in(map, Utc::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{Severity, SignalType};

    fn incident(title: &str) -> Incident {
        Incident::new(SignalType::Manual, title, "description", Severity::Medium)
    }

    #[tokio::test]
    async fn test_claim_sets_processing_and_lease() {
        let store = MemoryStore::new();
        let created = store.create(incident("a")).await.unwrap();

        let claimed = store.claim(&created.id).await.unwrap();
        assert_eq!(claimed.status, IncidentStatus::Processing);
        assert!(claimed.meta_str(meta::LEASE_EXPIRES_AT).is_some());
    }

    #[tokio::test]
    async fn test_second_claim_is_lock_conflict() {
        let store = MemoryStore::new();
        let created = store.create(incident("a")).await.unwrap();
        store.claim(&created.id).await.unwrap();

        let err = store.claim(&created.id).await.unwrap_err();
        assert!(matches!(err, SentinelError::LockConflict { .. }));
        // The loser must not have mutated anything.
        let current = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(current.status, IncidentStatus::Processing);
    }

    #[tokio::test]
    async fn test_claim_next_is_oldest_first() {
        let store = MemoryStore::new();
        let mut first = incident("first");
        first.created_at = Utc::now() - chrono::Duration::minutes(5);
        let first = store.create(first).await.unwrap();
        store.create(incident("second")).await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);

        // Second call claims the remaining one; third finds nothing.
        assert!(store.claim_next().await.unwrap().is_some());
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_monotonicity_enforced() {
        let store = MemoryStore::new();
        let created = store.create(incident("a")).await.unwrap();
        store.claim(&created.id).await.unwrap();
        store
            .update_status(&created.id, IncidentStatus::Resolved)
            .await
            .unwrap();

        // resolved -> queued/processing is never legal, not even as a requeue
        let err = store.requeue(&created.id).await.unwrap_err();
        assert!(matches!(err, SentinelError::IllegalTransition { .. }));
        let err = store
            .update_status(&created.id, IncidentStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_implicit_requeue_rejected() {
        let store = MemoryStore::new();
        let created = store.create(incident("a")).await.unwrap();
        store.claim(&created.id).await.unwrap();

        let err = store
            .update_status(&created.id, IncidentStatus::Queued)
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::IllegalTransition { .. }));

        // The explicit path works and clears the lease.
        store.requeue(&created.id).await.unwrap();
        let current = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(current.status, IncidentStatus::Queued);
        assert!(current.meta_str(meta::LEASE_EXPIRES_AT).is_none());
    }

    #[tokio::test]
    async fn test_reclaim_stale_requeues_expired_leases() {
        let store = MemoryStore::new().with_lease(Duration::ZERO);
        let created = store.create(incident("a")).await.unwrap();
        store.claim(&created.id).await.unwrap();

        let reclaimed = store.reclaim_stale().await.unwrap();
        assert_eq!(reclaimed, vec![created.id.clone()]);

        let current = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(current.status, IncidentStatus::Queued);
        assert!(current.meta_str(meta::RECLAIMED_AT).is_some());
    }

    #[tokio::test]
    async fn test_reclaim_ignores_live_leases() {
        let store = MemoryStore::new().with_lease(Duration::from_secs(3600));
        let created = store.create(incident("a")).await.unwrap();
        store.claim(&created.id).await.unwrap();

        assert!(store.reclaim_stale().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_metadata_refreshes_updated_at() {
        let store = MemoryStore::new();
        let created = store.create(incident("a")).await.unwrap();
        let before = store.get(&created.id).await.unwrap().unwrap().updated_at;

        let mut entries = Map::new();
        entries.insert("iteration".into(), serde_json::json!(2));
        store.merge_metadata(&created.id, entries).await.unwrap();

        let after = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(after.metadata.get("iteration"), Some(&serde_json::json!(2)));
        assert!(after.updated_at >= before);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incidents.json");

        let created = {
            let store = JsonFileStore::open(&path).unwrap();
            let created = store.create(incident("persisted")).await.unwrap();
            store.claim(&created.id).await.unwrap();
            created
        };

        // Reopen from disk; the claim survived.
        let store = JsonFileStore::open(&path).unwrap();
        let loaded = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "persisted");
        assert_eq!(loaded.status, IncidentStatus::Processing);
    }

    #[tokio::test]
    async fn test_file_store_quarantines_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incidents.json");
        fs::write(&path, "{not valid json").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(path.with_extension("corrupt").exists());
    }

    #[tokio::test]
    async fn test_unknown_incident_errors() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.claim("missing").await.unwrap_err(),
            SentinelError::UnknownIncident { .. }
        ));
        assert!(store.get("missing").await.unwrap().is_none());
    }
}
