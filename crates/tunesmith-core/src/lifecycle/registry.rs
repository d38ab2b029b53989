//! Book-keeping for background workers, keyed by task id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use strum::{AsRefStr, Display};
use tokio::sync::watch;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum WorkerKind {
    Poll,
    Download,
}

type Key = (WorkerKind, String);

/// Tracks abort handles of running workers.  At most one worker per
/// `(kind, task id)` is alive at a time.
pub struct WorkerRegistry {
    handles: Mutex<HashMap<Key, AbortHandle>>,
    running: watch::Sender<usize>,
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.handles.lock().map(|h| h.len()).unwrap_or(0);
        write!(f, "WorkerRegistry({count} handles)")
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            running: watch::Sender::new(0),
        }
    }

    /// Spawn `worker` unless one of the same kind already runs for
    /// `task_id`.  Returns whether a worker was spawned.
    ///
    /// The worker must call [`WorkerRegistry::finish`] as its last step.
    pub fn spawn<F>(&self, kind: WorkerKind, task_id: &str, worker: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(mut map) = self.handles.lock() else {
            return false;
        };
        let key = (kind, task_id.to_owned());
        if map.contains_key(&key) {
            return false;
        }
        // Spawned while the lock is held so a worker that finishes
        // immediately cannot remove its entry before it is inserted.
        let handle = tokio::spawn(worker).abort_handle();
        map.insert(key, handle);
        self.running.send_replace(map.len());
        true
    }

    /// Called by a worker when it is done.
    pub fn finish(&self, kind: WorkerKind, task_id: &str) {
        if let Ok(mut map) = self.handles.lock() {
            map.remove(&(kind, task_id.to_owned()));
            self.running.send_replace(map.len());
        }
    }

    /// Abort every worker for `task_id`.  Returns how many were aborted.
    pub fn cancel_task(&self, task_id: &str) -> usize {
        let Ok(mut map) = self.handles.lock() else {
            return 0;
        };
        let keys: Vec<Key> = map.keys().filter(|(_, id)| id == task_id).cloned().collect();
        for key in &keys {
            if let Some(h) = map.remove(key) {
                h.abort();
            }
        }
        self.running.send_replace(map.len());
        keys.len()
    }

    /// Abort everything.
    pub fn cancel_all(&self) {
        if let Ok(mut map) = self.handles.lock() {
            for (_, h) in map.drain() {
                h.abort();
            }
            self.running.send_replace(0);
        }
    }

    pub fn is_running(&self, kind: WorkerKind, task_id: &str) -> bool {
        self.handles
            .lock()
            .map(|m| m.contains_key(&(kind, task_id.to_owned())))
            .unwrap_or(false)
    }

    /// Task ids with a live worker of `kind`, sorted.
    pub fn task_ids(&self, kind: WorkerKind) -> Vec<String> {
        let mut ids: Vec<String> = self
            .handles
            .lock()
            .map(|m| {
                m.keys()
                    .filter(|(k, _)| *k == kind)
                    .map(|(_, id)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        *self.running.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once no worker is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn one_worker_per_kind_and_task() {
        let registry = WorkerRegistry::new();
        assert!(registry.spawn(WorkerKind::Poll, "a", std::future::pending()));
        assert!(!registry.spawn(WorkerKind::Poll, "a", std::future::pending()));
        assert!(registry.spawn(WorkerKind::Download, "a", std::future::pending()));
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.cancel_task("a"), 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn wait_idle_returns_after_workers_finish() {
        let registry = Arc::new(WorkerRegistry::new());
        let r = Arc::clone(&registry);
        registry.spawn(WorkerKind::Poll, "a", async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            r.finish(WorkerKind::Poll, "a");
        });
        tokio::time::timeout(Duration::from_secs(2), registry.wait_idle())
            .await
            .expect("registry never became idle");
        assert!(registry.task_ids(WorkerKind::Poll).is_empty());
    }
}
