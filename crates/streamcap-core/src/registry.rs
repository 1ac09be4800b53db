//! Shared directory of capture workers.
//!
//! Every operation takes the single registry lock for its whole
//! read-modify-write span. Splitting a read and the write that depends on it
//! into two critical sections lets concurrent removals (or an add racing a
//! remove) overwrite each other's updates, so no method here ever does that.

use crate::error::RegistryError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Registry-assigned worker identifier, never reused
pub type WorkerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordStatus {
    Running,
    Ended,
}

/// Permanent history entry for one registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub channel: String,
    pub title: String,
    pub output_path: PathBuf,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub status: RecordStatus,
}

impl WorkerRecord {
    pub fn is_running(&self) -> bool {
        self.status == RecordStatus::Running
    }

    fn finish(&mut self, end_time: DateTime<Local>) {
        self.end_time = Some(end_time);
        self.status = RecordStatus::Ended;
    }
}

struct RegistryState<W> {
    next_id: WorkerId,
    active: BTreeMap<WorkerId, Arc<W>>,
    history: BTreeMap<WorkerId, WorkerRecord>,
    zombies: Vec<Arc<W>>,
}

/// Lock-guarded map of active workers, their permanent history and the
/// queue of finished workers waiting to be joined.
pub struct Registry<W> {
    state: Mutex<RegistryState<W>>,
}

impl<W> Default for Registry<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> Registry<W> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                next_id: 0,
                active: BTreeMap::new(),
                history: BTreeMap::new(),
                zombies: Vec::new(),
            }),
        }
    }

    // Every critical section restores consistency before anything that can
    // panic, so a poisoned lock still guards valid state.
    fn lock(&self) -> MutexGuard<'_, RegistryState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a worker and open its history record. Never fails.
    pub fn add(
        &self,
        worker: Arc<W>,
        channel: &str,
        title: &str,
        output_path: &Path,
        start_time: DateTime<Local>,
    ) -> WorkerId {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;

        state.active.insert(id, worker);
        state.history.insert(
            id,
            WorkerRecord {
                id,
                channel: channel.to_string(),
                title: title.to_string(),
                output_path: output_path.to_path_buf(),
                start_time,
                end_time: None,
                status: RecordStatus::Running,
            },
        );

        debug!(id, channel, "Registered worker");
        id
    }

    /// Live worker for `id`; ids that only exist in the history are not found
    pub fn get(&self, id: WorkerId) -> Result<Arc<W>, RegistryError> {
        self.lock()
            .active
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Move a worker from the active set to the zombie queue and close its record
    pub fn remove(&self, id: WorkerId, end_time: DateTime<Local>) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let worker = state.active.remove(&id).ok_or(RegistryError::NotFound(id))?;

        if let Some(record) = state.history.get_mut(&id) {
            record.finish(end_time);
        }

        // A restarting worker can finish a second attempt before the first was drained
        if !state.zombies.iter().any(|zombie| Arc::ptr_eq(zombie, &worker)) {
            state.zombies.push(worker);
        }

        debug!(id, "Deregistered worker");
        Ok(())
    }

    /// Point-in-time copy of the active workers; may be stale as soon as it returns
    pub fn snapshot_active(&self) -> BTreeMap<WorkerId, Arc<W>> {
        self.lock().active.clone()
    }

    /// Point-in-time copy of every record ever created
    pub fn snapshot_history(&self) -> BTreeMap<WorkerId, WorkerRecord> {
        self.lock().history.clone()
    }

    /// Take every finished worker; the caller must join each of them
    pub fn drain_zombies(&self) -> Vec<Arc<W>> {
        std::mem::take(&mut self.lock().zombies)
    }

    pub fn active_len(&self) -> usize {
        self.lock().active.len()
    }
}
