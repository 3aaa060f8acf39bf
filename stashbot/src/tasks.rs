//! Task registry: identity reservation, live-task bookkeeping and
//! admission pools.
//!
//! All registry state lives behind a single lock, so identity
//! reservation never hands out duplicates and a snapshot observes
//! either no record of a task or its complete record. The semaphore
//! pools bound how many registered tasks actually transfer at once;
//! registering never blocks.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::info;

/// Kind of transfer a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Download,
    Upload,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Download => "DOWNLOAD",
            TaskKind::Upload => "UPLOAD",
        };
        f.pad(name)
    }
}

/// Snapshot of one live task for status displays.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: u64,
    pub kind: TaskKind,
    pub filename: String,
    pub started_at: DateTime<Utc>,
}

struct TaskRecord {
    info: TaskInfo,
    abort: AbortHandle,
}

#[derive(Default)]
struct RegistryState {
    counter: u64,
    tasks: HashMap<u64, TaskRecord>,
}

/// Ownership record of in-flight transfer work.
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    download_pool: Arc<Semaphore>,
    upload_pool: Arc<Semaphore>,
    max_downloads: usize,
    max_uploads: usize,
}

impl TaskRegistry {
    pub fn new(max_downloads: usize, max_uploads: usize) -> Self {
        info!(
            "Task registry initialized: max_downloads={}, max_uploads={}",
            max_downloads, max_uploads
        );
        Self {
            state: Mutex::new(RegistryState::default()),
            download_pool: Arc::new(Semaphore::new(max_downloads)),
            upload_pool: Arc::new(Semaphore::new(max_uploads)),
            max_downloads,
            max_uploads,
        }
    }

    /// Reserve the next task identity.
    ///
    /// Identities increase monotonically and are never reused, so a
    /// caller can bake the id into the worker future before registering
    /// it.
    pub fn reserve_id(&self) -> u64 {
        let mut state = self.state.lock();
        state.counter += 1;
        state.counter
    }

    /// Record a task as live and start executing its work.
    ///
    /// The work is spawned and inserted under one lock hold, so no
    /// observer sees the task scheduled but unrecorded, and a worker
    /// that finishes instantly cannot deregister before its record
    /// exists. The returned handle may be awaited for completion.
    pub fn register<F>(&self, id: u64, kind: TaskKind, filename: &str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock();
        let handle = tokio::spawn(work);
        state.tasks.insert(
            id,
            TaskRecord {
                info: TaskInfo {
                    id,
                    kind,
                    filename: filename.to_string(),
                    started_at: Utc::now(),
                },
                abort: handle.abort_handle(),
            },
        );
        info!("Task {:3} | {:8} | Registered: {}", id, kind, filename);
        handle
    }

    /// Remove a task record.
    ///
    /// Idempotent: removing an unknown or already-removed id returns
    /// false and changes nothing.
    pub fn deregister(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        match state.tasks.remove(&id) {
            Some(record) => {
                info!(
                    "Task {:3} | {:8} | Completed: {} | Active: {}",
                    id,
                    record.info.kind,
                    record.info.filename,
                    state.tasks.len()
                );
                true
            }
            None => false,
        }
    }

    /// Consistent snapshot of live tasks of one kind, ordered by id.
    pub fn snapshot_by_kind(&self, kind: TaskKind) -> Vec<TaskInfo> {
        let state = self.state.lock();
        let mut tasks: Vec<TaskInfo> = state
            .tasks
            .values()
            .filter(|record| record.info.kind == kind)
            .map(|record| record.info.clone())
            .collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }

    /// Consistent snapshot of all live tasks, ordered by id.
    pub fn snapshot_all(&self) -> Vec<TaskInfo> {
        let state = self.state.lock();
        let mut tasks: Vec<TaskInfo> =
            state.tasks.values().map(|record| record.info.clone()).collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }

    /// Number of live tasks.
    pub fn active_count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Number of live tasks of one kind.
    pub fn active_by_kind(&self, kind: TaskKind) -> usize {
        self.state
            .lock()
            .tasks
            .values()
            .filter(|record| record.info.kind == kind)
            .count()
    }

    /// Configured pool capacity for one kind.
    pub fn capacity(&self, kind: TaskKind) -> usize {
        match kind {
            TaskKind::Download => self.max_downloads,
            TaskKind::Upload => self.max_uploads,
        }
    }

    /// Wait for an admission permit from the pool matching `kind`.
    ///
    /// The permit must be held for the entire pipeline body; dropping it
    /// is what frees the slot.
    pub async fn permit_for(&self, kind: TaskKind) -> crate::Result<OwnedSemaphorePermit> {
        let pool = match kind {
            TaskKind::Download => self.download_pool.clone(),
            TaskKind::Upload => self.upload_pool.clone(),
        };
        pool.acquire_owned()
            .await
            .map_err(|e| crate::Error::Other(format!("Semaphore error: {}", e)))
    }

    /// Abort every live worker and clear the table.
    ///
    /// Returns how many workers were aborted.
    pub fn abort_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.tasks.len();
        for (_, record) in state.tasks.drain() {
            record.abort.abort();
        }
        if count > 0 {
            info!("Aborted {} active tasks", count);
        }
        count
    }
}
