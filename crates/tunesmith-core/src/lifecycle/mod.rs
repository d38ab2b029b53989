//! Task lifecycle: submission, polling, reconciliation and downloads.
//!
//! Every transition is written to the store first and only then announced
//! on the [`TaskEvent`] channel, so an observer that reacts to an event by
//! reading the store always sees that state or a later one.

mod poll;
mod registry;


use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::client::{ContinuationRequest, GenerationRequest, GenerationService};
use crate::download::{DownloadCoordinator, DownloadHandle, DownloadManager, Resumed};
use crate::error::TaskError;
use crate::store::{GenerationTaskStore, SqliteStore, UpdateOutcome};
use crate::task::{FailureReason, GenerationTask, TaskStatus};

pub use registry::{WorkerKind, WorkerRegistry};

/// Tuning knobs for [`TaskLifecycleManager`].
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Pause between two status queries of one task.
    pub poll_interval: Duration,
    /// Consecutive transient failures after which a poll worker gives up.
    pub max_consecutive_failures: u32,
    /// Capacity of the [`TaskEvent`] broadcast channel.
    pub event_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_consecutive_failures: 6,
            event_capacity: 256,
        }
    }
}

/// Notifications sent after the corresponding store write succeeded.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Updated(GenerationTask),
    Deleted { task_id: String },
}

/// What [`TaskLifecycleManager::reconcile`] restarted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub resumed_polls: Vec<String>,
    pub resumed_downloads: Vec<String>,
    pub completed_downloads: Vec<String>,
    pub failed_downloads: Vec<String>,
}

struct Inner {
    store: Arc<SqliteStore>,
    service: Arc<dyn GenerationService>,
    downloads: DownloadCoordinator,
    workers: WorkerRegistry,
    events: broadcast::Sender<TaskEvent>,
    config: LifecycleConfig,
}

/// Owns the poll and download workers of every task.
#[derive(Clone)]
pub struct TaskLifecycleManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLifecycleManager")
            .field("workers", &self.inner.workers)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl TaskLifecycleManager {
    pub fn new(
        store: Arc<SqliteStore>,
        service: Arc<dyn GenerationService>,
        download_manager: Arc<dyn DownloadManager>,
        config: LifecycleConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                downloads: DownloadCoordinator::new(download_manager, Arc::clone(&store)),
                store,
                service,
                workers: WorkerRegistry::new(),
                events,
                config,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.inner.store
    }

    // ── submission ─────────────────────────────────────────────────────────

    /// Submit a prompt.  The task is persisted as `Queued` only after the
    /// service has acknowledged it with an id.
    pub async fn submit(
        &self,
        prompt: &str,
        model: &str,
        duration_ms: u64,
    ) -> Result<GenerationTask, TaskError> {
        let prompt = prompt.trim();
        let model = model.trim();
        if prompt.is_empty() {
            return Err(TaskError::Validation("prompt must not be empty".into()));
        }
        if model.is_empty() {
            return Err(TaskError::Validation("model must not be empty".into()));
        }

        let request = GenerationRequest {
            prompt: prompt.to_owned(),
            model: model.to_owned(),
            duration_ms,
        };
        let task_id = self.inner.service.submit(&request).await?;
        let task = GenerationTask::queued(task_id, prompt, model, duration_ms);
        self.accept(task).await
    }

    /// Submit a continuation of `seed_audio`.
    pub async fn submit_continuation(
        &self,
        seed_audio: &Path,
        description: Option<&str>,
        model: &str,
        duration_ms: u64,
    ) -> Result<GenerationTask, TaskError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(TaskError::Validation("model must not be empty".into()));
        }
        let is_file = tokio::fs::metadata(seed_audio)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(TaskError::Validation(format!(
                "seed audio {} does not exist",
                seed_audio.display()
            )));
        }
        let description = description.map(str::trim).filter(|d| !d.is_empty());

        let request = ContinuationRequest {
            seed_audio: seed_audio.to_path_buf(),
            description: description.map(str::to_owned),
            model: model.to_owned(),
            duration_ms,
        };
        let task_id = self.inner.service.submit_continuation(&request).await?;
        let task =
            GenerationTask::continuation(task_id, seed_audio, description, model, duration_ms);
        self.accept(task).await
    }

    async fn accept(&self, task: GenerationTask) -> Result<GenerationTask, TaskError> {
        if !self.inner.store.insert_new(&task).await? {
            warn!(task_id = %task.task_id, "service returned a task id that is already stored");
            return Err(TaskError::Server(format!(
                "service returned task id {} which is already in use",
                task.task_id
            )));
        }
        let stored = self
            .inner
            .store
            .get_by_id(&task.task_id)
            .await?
            .unwrap_or(task);
        info!(task_id = %stored.task_id, title = %stored.title, "task queued");
        self.inner.notify(TaskEvent::Updated(stored.clone()));
        self.spawn_poller(&stored.task_id);
        Ok(stored)
    }

    fn spawn_poller(&self, task_id: &str) -> bool {
        let inner = Arc::clone(&self.inner);
        let id = task_id.to_owned();
        self.inner
            .workers
            .spawn(WorkerKind::Poll, task_id, poll::run(inner, id))
    }

    // ── startup reconciliation ─────────────────────────────────────────────

    /// Resume work interrupted by a restart: a poll worker for every
    /// `Queued`/`Processing` task and the download of every `Downloading`
    /// task.
    pub async fn reconcile(&self) -> Result<ReconcileReport, TaskError> {
        let mut report = ReconcileReport::default();

        for task in self.inner.store.get_by_status(&TaskStatus::IN_FLIGHT).await? {
            if self.spawn_poller(&task.task_id) {
                report.resumed_polls.push(task.task_id);
            }
        }

        for task in self.inner.store.get_by_status(&[TaskStatus::Downloading]).await? {
            let Some(claim) = self.inner.downloads.try_claim(&task.task_id) else {
                continue;
            };
            match self.inner.downloads.resume(claim, &task).await {
                Ok(Resumed::Completed { path, download_id }) => {
                    self.inner.finish_download(&task.task_id, Ok(path)).await;
                    if let Some(id) = download_id {
                        self.inner.downloads.forget(&id).await;
                    }
                    report.completed_downloads.push(task.task_id);
                }
                Ok(Resumed::Restarted(handle)) => {
                    self.spawn_download_worker(&task.task_id, handle);
                    report.resumed_downloads.push(task.task_id);
                }
                Err(e) => {
                    warn!(task_id = %task.task_id, error = %e, "could not resume download");
                    self.inner.finish_download(&task.task_id, Err(e)).await;
                    report.failed_downloads.push(task.task_id);
                }
            }
        }

        info!(
            polls = report.resumed_polls.len(),
            downloads = report.resumed_downloads.len(),
            completed = report.completed_downloads.len(),
            failed = report.failed_downloads.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    // ── downloads ──────────────────────────────────────────────────────────

    /// Start downloading a `Ready` task.  Asking again while its download is
    /// in flight returns the task unchanged.
    pub async fn download(&self, task_id: &str) -> Result<GenerationTask, TaskError> {
        let task = self.get(task_id).await?;
        if task.status == TaskStatus::Downloading && self.inner.downloads.is_in_flight(task_id) {
            debug!(task_id, "download already in flight");
            return Ok(task);
        }
        if task.status != TaskStatus::Ready {
            return Err(TaskError::InvalidTransition {
                task_id: task_id.to_owned(),
                from: task.status,
                to: TaskStatus::Downloading,
            });
        }
        let Some(claim) = self.inner.downloads.try_claim(task_id) else {
            return Ok(task);
        };

        let downloading = match self
            .inner
            .store
            .update_existing(task_id, |t| t.mark_downloading())
            .await?
        {
            UpdateOutcome::Updated(t) | UpdateOutcome::Unchanged(t) => t,
            UpdateOutcome::Missing => return Err(TaskError::NotFound(task_id.to_owned())),
        };
        self.inner.notify(TaskEvent::Updated(downloading.clone()));

        match self.inner.downloads.start(claim, &downloading).await {
            Ok(handle) => {
                self.spawn_download_worker(task_id, handle);
                Ok(downloading)
            }
            Err(e) => {
                let reason = e.failure_reason().unwrap_or(FailureReason::Storage);
                self.inner.fail_download(task_id, reason, e.to_string()).await;
                Err(e)
            }
        }
    }

    fn spawn_download_worker(&self, task_id: &str, mut handle: DownloadHandle) {
        let inner = Arc::clone(&self.inner);
        let id = task_id.to_owned();
        let spawned = self.inner.workers.spawn(WorkerKind::Download, task_id, async move {
            let result = handle.finished().await;
            inner.finish_download(&id, result).await;
            inner.downloads.forget(&handle.download_id).await;
            inner.workers.finish(WorkerKind::Download, &id);
        });
        if !spawned {
            warn!(task_id, "a download worker is already running for this task");
        }
    }

    // ── management ─────────────────────────────────────────────────────────

    pub async fn get(&self, task_id: &str) -> Result<GenerationTask, TaskError> {
        self.inner
            .store
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.to_owned()))
    }

    pub async fn find_by_title(&self, title: &str) -> Result<GenerationTask, TaskError> {
        self.inner
            .store
            .find_by_title(title)
            .await?
            .ok_or_else(|| TaskError::NotFound(format!("title {title:?}")))
    }

    /// Every task, in insertion order.
    pub async fn list(&self) -> Result<Vec<GenerationTask>, TaskError> {
        self.inner.store.list().await
    }

    /// Stop the task's workers and any fetch in progress, then remove its
    /// row (and optionally its file).  Returns whether a row was removed.
    pub async fn delete(&self, task_id: &str, delete_file: bool) -> Result<bool, TaskError> {
        let aborted = self.inner.workers.cancel_task(task_id);
        if self.inner.downloads.cancel_for_task(task_id).await? {
            debug!(task_id, "in-flight download cancelled");
        }
        let removed = self.inner.store.delete(task_id, delete_file).await?;
        if removed.is_some() {
            info!(task_id, aborted, "task deleted");
            self.inner.notify(TaskEvent::Deleted {
                task_id: task_id.to_owned(),
            });
        }
        Ok(removed.is_some())
    }

    pub async fn delete_by_title(&self, title: &str, delete_file: bool) -> Result<bool, TaskError> {
        match self.inner.store.find_by_title(title).await? {
            Some(task) => self.delete(&task.task_id, delete_file).await,
            None => Ok(false),
        }
    }

    /// Submit a `Failed` task again.  On success the failed row is replaced
    /// by the new task.
    pub async fn resubmit(&self, task_id: &str) -> Result<GenerationTask, TaskError> {
        let task = self.get(task_id).await?;
        if task.status != TaskStatus::Failed {
            return Err(TaskError::InvalidTransition {
                task_id: task_id.to_owned(),
                from: task.status,
                to: TaskStatus::Queued,
            });
        }
        let fresh = match &task.source_audio {
            Some(seed) => {
                let description = Some(task.prompt.as_str()).filter(|p| !p.is_empty());
                self.submit_continuation(seed, description, &task.model, task.requested_duration_ms)
                    .await?
            }
            None => {
                self.submit(&task.prompt, &task.model, task.requested_duration_ms)
                    .await?
            }
        };
        self.delete(task_id, false).await?;
        Ok(fresh)
    }

    /// Task ids with a live worker of `kind`.
    pub fn active_workers(&self, kind: WorkerKind) -> Vec<String> {
        self.inner.workers.task_ids(kind)
    }

    /// Resolve once every poll and download worker has stopped.
    pub async fn wait_idle(&self) {
        self.inner.workers.wait_idle().await;
    }

    /// Abort all workers.  Their tasks stay as persisted and are picked up
    /// again by the next [`reconcile`](Self::reconcile).
    pub fn shutdown(&self) {
        self.inner.workers.cancel_all();
    }
}

impl Inner {
    fn notify(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Apply a transition through the guarded store path and announce it.
    /// `Ok(None)` means the task was deleted meanwhile.
    async fn transition<F>(&self, task_id: &str, mutate: F) -> Result<Option<GenerationTask>, TaskError>
    where
        F: FnOnce(&mut GenerationTask) -> Result<(), TaskError> + Send,
    {
        match self.store.update_existing(task_id, mutate).await? {
            UpdateOutcome::Updated(task) => {
                debug!(task_id, status = %task.status, "task transitioned");
                self.notify(TaskEvent::Updated(task.clone()));
                Ok(Some(task))
            }
            UpdateOutcome::Unchanged(task) => Ok(Some(task)),
            UpdateOutcome::Missing => Ok(None),
        }
    }

    async fn finish_download(&self, task_id: &str, result: Result<PathBuf, TaskError>) {
        match result {
            Ok(path) => {
                info!(task_id, path = %path.display(), "download finished");
                let outcome = self.transition(task_id, move |t| t.mark_downloaded(path)).await;
                log_download_write(task_id, outcome);
            }
            Err(e) => {
                let reason = e.failure_reason().unwrap_or(FailureReason::Storage);
                self.fail_download(task_id, reason, e.to_string()).await;
            }
        }
    }

    async fn fail_download(&self, task_id: &str, reason: FailureReason, message: String) {
        warn!(task_id, %reason, error = %message, "download failed");
        let outcome = self
            .transition(task_id, move |t| t.mark_failed(reason, message))
            .await;
        log_download_write(task_id, outcome);
    }
}

fn log_download_write(task_id: &str, outcome: Result<Option<GenerationTask>, TaskError>) {
    match outcome {
        Ok(Some(_)) => {}
        Ok(None) => debug!(task_id, "task deleted while downloading"),
        Err(e) => warn!(task_id, error = %e, "failed to record download result"),
    }
}
