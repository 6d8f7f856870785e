// src/tasks.rs

use crate::error::{HistorianError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

pub type TaskId = u64;

/// Finished statuses kept for polling before the oldest are evicted
pub const DEFAULT_RETAINED_FINISHED: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed { error: String },
}

#[derive(Default)]
struct Inner {
    statuses: HashMap<TaskId, (String, TaskStatus)>,
    handles: HashMap<TaskId, JoinHandle<()>>,
}

/// Tracks detached background tasks so their outcome stays observable.
///
/// Spawning does not block the caller; status can be polled, or a caller
/// that wants to can `wait` for completion.
#[derive(Clone)]
pub struct TaskRegistry {
    next_id: Arc<AtomicU64>,
    inner: Arc<Mutex<Inner>>,
    retained_finished: usize,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_FINISHED)
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `retained_finished` completed or failed statuses.
    ///
    /// Eviction happens when a new task is spawned, oldest first.
    pub fn with_retention(retained_finished: usize) -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(0)),
            inner: Arc::new(Mutex::new(Inner::default())),
            retained_finished,
        }
    }

    /// Spawns `fut` on the runtime and records its lifecycle under `name`.
    pub fn spawn<F, T>(&self, name: impl Into<String>, fut: F) -> TaskId
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let name = name.into();
        self.evict_finished();
        self.set_status(id, &name, TaskStatus::Running);

        let registry = self.clone();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let status = match fut.await {
                Ok(_) => {
                    tracing::info!(task_id = id, task = %task_name, "task completed");
                    TaskStatus::Completed
                }
                Err(e) => {
                    tracing::error!(
                        task_id = id,
                        task = %task_name,
                        code = e.category().as_str(),
                        error = %e,
                        "task failed"
                    );
                    TaskStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            registry.finish(id, status);
        });

        // A task that already finished has nothing left to join.
        if let Ok(mut inner) = self.inner.lock() {
            let running = matches!(inner.statuses.get(&id), Some((_, TaskStatus::Running)));
            if running {
                inner.handles.insert(id, handle);
            }
        }
        tracing::debug!(task_id = id, task = %name, "task spawned");
        id
    }

    fn set_status(&self, id: TaskId, name: &str, status: TaskStatus) {
        if let Ok(mut inner) = self.inner.lock() {
            match inner.statuses.get_mut(&id) {
                Some(entry) => entry.1 = status,
                None => {
                    inner.statuses.insert(id, (name.to_string(), status));
                }
            }
        }
    }

    /// Records the final status and drops the task's join handle.
    fn finish(&self, id: TaskId, status: TaskStatus) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(entry) = inner.statuses.get_mut(&id) {
                entry.1 = status;
            }
            inner.handles.remove(&id);
        }
    }

    fn evict_finished(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let mut finished: Vec<TaskId> = inner
            .statuses
            .iter()
            .filter(|(_, (_, status))| *status != TaskStatus::Running)
            .map(|(id, _)| *id)
            .collect();
        if finished.len() <= self.retained_finished {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - self.retained_finished;
        for id in &finished[..excess] {
            inner.statuses.remove(id);
        }
        tracing::debug!(evicted = excess, "dropped old task statuses");
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.statuses.get(&id).map(|(_, s)| s.clone()))
    }

    /// Snapshot of every known task as (id, name, status), ordered by id
    pub fn list(&self) -> Vec<(TaskId, String, TaskStatus)> {
        let mut all: Vec<_> = self
            .inner
            .lock()
            .map(|inner| {
                inner
                    .statuses
                    .iter()
                    .map(|(id, (name, status))| (*id, name.clone(), status.clone()))
                    .collect()
            })
            .unwrap_or_default();
        all.sort_by_key(|(id, _, _)| *id);
        all
    }

    /// Waits for a task to finish and returns its final status.
    pub async fn wait(&self, id: TaskId) -> Result<TaskStatus> {
        let handle = self
            .inner
            .lock()
            .map_err(|_| HistorianError::task("task registry lock poisoned"))?
            .handles
            .remove(&id);

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                let status = TaskStatus::Failed {
                    error: format!("task panicked or was cancelled: {e}"),
                };
                self.set_status(id, "", status.clone());
                return Ok(status);
            }
        }

        self.status(id)
            .ok_or_else(|| HistorianError::task(format!("unknown task {id}")))
    }
}
