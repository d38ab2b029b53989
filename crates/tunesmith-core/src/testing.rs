//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};

use crate::client::{ContinuationRequest, GenerationRequest, GenerationService, RemoteStatus};
use crate::download::{DownloadId, DownloadManager};
use crate::error::{ClientError, DownloadError};

/// Scripted generation service.
///
/// Each task id pops its next poll reply from a queue; once the queue is
/// empty the task keeps reporting `Processing`.
#[derive(Default)]
pub struct FakeGenerationService {
    next_id: AtomicUsize,
    pub fail_submit: Mutex<Option<ClientError>>,
    scripts: Mutex<HashMap<String, VecDeque<Result<RemoteStatus, ClientError>>>>,
    polls: Mutex<Vec<String>>,
    submissions: Mutex<Vec<GenerationRequest>>,
    continuations: Mutex<Vec<ContinuationRequest>>,
}

impl FakeGenerationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, task_id: &str, replies: Vec<Result<RemoteStatus, ClientError>>) {
        self.scripts
            .lock()
            .await
            .insert(task_id.to_owned(), replies.into());
    }

    pub async fn polled_ids(&self) -> Vec<String> {
        self.polls.lock().await.clone()
    }

    pub async fn poll_count(&self, task_id: &str) -> usize {
        self.polls.lock().await.iter().filter(|id| *id == task_id).count()
    }

    pub async fn submissions(&self) -> Vec<GenerationRequest> {
        self.submissions.lock().await.clone()
    }

    pub async fn continuations(&self) -> Vec<ContinuationRequest> {
        self.continuations.lock().await.clone()
    }

    async fn take_submit_error(&self) -> Option<ClientError> {
        self.fail_submit.lock().await.take()
    }

    fn issue_id(&self) -> String {
        format!("task-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl GenerationService for FakeGenerationService {
    async fn submit(&self, request: &GenerationRequest) -> Result<String, ClientError> {
        if let Some(e) = self.take_submit_error().await {
            return Err(e);
        }
        self.submissions.lock().await.push(request.clone());
        Ok(self.issue_id())
    }

    async fn submit_continuation(&self, request: &ContinuationRequest) -> Result<String, ClientError> {
        if let Some(e) = self.take_submit_error().await {
            return Err(e);
        }
        self.continuations.lock().await.push(request.clone());
        Ok(self.issue_id())
    }

    async fn poll_status(&self, task_id: &str) -> Result<RemoteStatus, ClientError> {
        self.polls.lock().await.push(task_id.to_owned());
        let mut scripts = self.scripts.lock().await;
        scripts
            .get_mut(task_id)
            .and_then(|q| q.pop_front())
            .unwrap_or(Ok(RemoteStatus::Processing))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FakeState {
    Running,
    Done { keep_file: bool },
    Failed(String),
}

/// Download manager whose downloads finish only when a test says so.
pub struct FakeDownloadManager {
    dir: PathBuf,
    next_id: AtomicUsize,
    urls: Mutex<Vec<String>>,
    released: Mutex<Vec<DownloadId>>,
    downloads: Mutex<HashMap<DownloadId, (PathBuf, watch::Sender<FakeState>)>>,
}

impl FakeDownloadManager {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            next_id: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            downloads: Mutex::new(HashMap::new()),
        }
    }

    pub async fn enqueued_urls(&self) -> Vec<String> {
        self.urls.lock().await.clone()
    }

    pub async fn complete(&self, download_id: &str, body: &[u8]) {
        let downloads = self.downloads.lock().await;
        if let Some((path, tx)) = downloads.get(download_id) {
            std::fs::write(path, body).unwrap();
            tx.send_replace(FakeState::Done { keep_file: true });
        }
    }

    /// Report success but make the path unresolvable.
    pub async fn complete_without_file(&self, download_id: &str) {
        if let Some((_, tx)) = self.downloads.lock().await.get(download_id) {
            tx.send_replace(FakeState::Done { keep_file: false });
        }
    }

    pub async fn fail(&self, download_id: &str, message: &str) {
        if let Some((_, tx)) = self.downloads.lock().await.get(download_id) {
            tx.send_replace(FakeState::Failed(message.to_owned()));
        }
    }

    /// Ids passed to `release`, in call order.
    pub async fn released(&self) -> Vec<DownloadId> {
        self.released.lock().await.clone()
    }

    /// Ids issued and not yet released, oldest first.
    pub async fn ids(&self) -> Vec<DownloadId> {
        let mut ids: Vec<_> = self.downloads.lock().await.keys().cloned().collect();
        ids.sort_by_key(|id| id.trim_start_matches("dl-").parse::<usize>().unwrap_or(0));
        ids
    }
}

#[async_trait]
impl DownloadManager for FakeDownloadManager {
    async fn enqueue(&self, url: &str, destination_name: &str) -> Result<DownloadId, DownloadError> {
        let id = format!("dl-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let path = self.dir.join(destination_name);
        let (tx, _rx) = watch::channel(FakeState::Running);
        self.urls.lock().await.push(url.to_owned());
        self.downloads.lock().await.insert(id.clone(), (path, tx));
        Ok(id)
    }

    async fn wait(&self, download_id: &str) -> Result<(), DownloadError> {
        let mut rx = {
            let downloads = self.downloads.lock().await;
            let (_, tx) = downloads
                .get(download_id)
                .ok_or_else(|| DownloadError::UnknownDownload(download_id.to_owned()))?;
            tx.subscribe()
        };
        let state = rx
            .wait_for(|s| *s != FakeState::Running)
            .await
            .map_err(|_| DownloadError::Network("fake dropped".into()))?
            .clone();
        match state {
            FakeState::Failed(m) => Err(DownloadError::Network(m)),
            _ => Ok(()),
        }
    }

    async fn destination(&self, download_id: &str) -> Option<PathBuf> {
        self.downloads
            .lock()
            .await
            .get(download_id)
            .map(|(path, _)| path.clone())
    }

    async fn resolve_path(&self, download_id: &str) -> Option<PathBuf> {
        let downloads = self.downloads.lock().await;
        let (path, tx) = downloads.get(download_id)?;
        match *tx.borrow() {
            FakeState::Done { keep_file: true } => Some(path.clone()),
            _ => None,
        }
    }

    async fn release(&self, download_id: &str) {
        self.released.lock().await.push(download_id.to_owned());
        self.downloads.lock().await.remove(download_id);
    }
}
