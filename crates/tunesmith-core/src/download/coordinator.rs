//! Download orchestration for Ready tasks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use tunesmith_types::sanitize_file_name;

use super::http::part_path;
use super::{DownloadId, DownloadManager};
use crate::error::{DownloadError, TaskError};
use crate::store::{DownloadRecord, DownloadRecordStore, SqliteStore};
use crate::task::GenerationTask;

/// Extension forced onto downloaded generations.
const DOWNLOAD_EXTENSION: &str = "wav";

/// Exclusive right to download one task.  Released on drop.
#[derive(Debug)]
pub struct DownloadClaim {
    task_id: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for DownloadClaim {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.task_id);
        }
    }
}

/// A started download.  Holds the task's claim until dropped.
#[derive(Debug)]
pub struct DownloadHandle {
    pub download_id: DownloadId,
    result: oneshot::Receiver<Result<PathBuf, TaskError>>,
    _claim: DownloadClaim,
}

impl DownloadHandle {
    /// Wait for the single completion result of this download.
    pub async fn finished(&mut self) -> Result<PathBuf, TaskError> {
        (&mut self.result)
            .await
            .unwrap_or_else(|_| Err(TaskError::Storage("download waiter stopped".into())))
    }
}

/// Outcome of re-attaching to a download after a restart.
#[derive(Debug)]
pub enum Resumed {
    /// The file from before the restart is already complete.
    Completed { path: PathBuf, download_id: Option<DownloadId> },
    /// The download was started again.
    Restarted(DownloadHandle),
}

pub struct DownloadCoordinator {
    manager: Arc<dyn DownloadManager>,
    store: Arc<SqliteStore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.in_flight.lock().map(|s| s.len()).unwrap_or(0);
        write!(f, "DownloadCoordinator({count} in flight)")
    }
}

impl DownloadCoordinator {
    pub fn new(manager: Arc<dyn DownloadManager>, store: Arc<SqliteStore>) -> Self {
        Self {
            manager,
            store,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Claim `task_id` for downloading.  `None` if a download for it is
    /// already in flight.
    pub fn try_claim(&self, task_id: &str) -> Option<DownloadClaim> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(task_id.to_owned()) {
            return None;
        }
        Some(DownloadClaim {
            task_id: task_id.to_owned(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self, task_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|s| s.contains(task_id))
            .unwrap_or(false)
    }

    /// Enqueue the fetch for `task.remote_url`, persist its
    /// [`DownloadRecord`] and start listening for completion.
    pub async fn start(
        &self,
        claim: DownloadClaim,
        task: &GenerationTask,
    ) -> Result<DownloadHandle, TaskError> {
        let url = task
            .remote_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| TaskError::Validation(format!("task {} has no download url", task.task_id)))?;
        let name = sanitize_file_name(&task.title, DOWNLOAD_EXTENSION);

        let download_id = self.manager.enqueue(url, &name).await?;
        let destination = self
            .manager
            .destination(&download_id)
            .await
            .unwrap_or_else(|| PathBuf::from(&name));

        let record = DownloadRecord {
            download_id: download_id.clone(),
            task_id: task.task_id.clone(),
            destination,
            created_at: Utc::now(),
        };
        self.store.put_download_record(&record).await?;
        info!(task_id = %task.task_id, download_id = %download_id, destination = %record.destination.display(), "download enqueued");

        Ok(self.listen(claim, download_id))
    }

    /// Re-attach to a `Downloading` task after a restart.
    pub async fn resume(
        &self,
        claim: DownloadClaim,
        task: &GenerationTask,
    ) -> Result<Resumed, TaskError> {
        if let Some(record) = self.store.download_record_for_task(&task.task_id).await? {
            if let Some(path) = self.manager.resolve_path(&record.download_id).await {
                return Ok(Resumed::Completed { path, download_id: Some(record.download_id) });
            }
            // The manager promotes files atomically, so a non-empty file at
            // the recorded destination is a finished download.
            let finished = tokio::fs::metadata(&record.destination)
                .await
                .map(|m| m.is_file() && m.len() > 0)
                .unwrap_or(false);
            if finished {
                debug!(task_id = %task.task_id, path = %record.destination.display(), "found completed download on disk");
                return Ok(Resumed::Completed {
                    path: record.destination,
                    download_id: Some(record.download_id),
                });
            }
            debug!(task_id = %task.task_id, download_id = %record.download_id, "stale download record; restarting");
            self.manager.release(&record.download_id).await;
            remove_leftover(&part_path(&record.destination)).await;
            remove_leftover(&record.destination).await;
        }
        self.start(claim, task).await.map(Resumed::Restarted)
    }

    /// Drop the persisted record and the manager's bookkeeping once the
    /// owning task has been updated.
    pub async fn forget(&self, download_id: &str) {
        self.manager.release(download_id).await;
        if let Err(e) = self.store.remove_download_record(download_id).await {
            warn!(download_id, error = %e, "failed to remove download record");
        }
    }

    /// Abort whatever download is recorded for `task_id` and discard its
    /// partial file.  Returns whether there was one.
    pub async fn cancel_for_task(&self, task_id: &str) -> Result<bool, TaskError> {
        let Some(record) = self.store.download_record_for_task(task_id).await? else {
            return Ok(false);
        };
        info!(task_id, download_id = %record.download_id, "cancelling download");
        self.forget(&record.download_id).await;
        remove_leftover(&part_path(&record.destination)).await;
        Ok(true)
    }

    fn listen(&self, claim: DownloadClaim, download_id: DownloadId) -> DownloadHandle {
        let (tx, rx) = oneshot::channel();
        let manager = Arc::clone(&self.manager);
        let id = download_id.clone();
        tokio::spawn(async move {
            let result = match manager.wait(&id).await {
                Ok(()) => manager.resolve_path(&id).await.ok_or_else(|| {
                    TaskError::Storage(format!("download {id} completed but its file cannot be found"))
                }),
                Err(DownloadError::UnknownDownload(id)) => Err(TaskError::Storage(format!(
                    "download {id} is not known to the download manager"
                ))),
                Err(e) => Err(e.into()),
            };
            let _ = tx.send(result);
        });
        DownloadHandle {
            download_id,
            result: rx,
            _claim: claim,
        }
    }
}

/// Remove a partial file left by an interrupted download.  Non-empty
/// finished files are kept.
async fn remove_leftover(path: &Path) {
    let is_part = path.extension().is_some_and(|e| e == "part");
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() && (is_part || m.len() == 0) => {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "removed leftover download file"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove leftover download file"),
            }
        }
        _ => {}
    }
}
