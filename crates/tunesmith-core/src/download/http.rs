//! Streaming HTTP download manager.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DownloadId, DownloadManager};
use crate::error::DownloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Network,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DownloadState {
    Running,
    Completed,
    Failed { kind: FailureKind, message: String },
}

impl DownloadState {
    fn failed(error: &DownloadError) -> Self {
        let (kind, message) = match error {
            DownloadError::Storage(e) => (FailureKind::Storage, e.to_string()),
            DownloadError::Network(m) => (FailureKind::Network, m.clone()),
            other => (FailureKind::Network, other.to_string()),
        };
        DownloadState::Failed { kind, message }
    }
}

#[derive(Debug)]
struct Entry {
    destination: PathBuf,
    state: watch::Receiver<DownloadState>,
    worker: JoinHandle<()>,
}

/// Downloads into one directory, writing `<name>.part` and renaming it into
/// place once the body has been fully written.
#[derive(Debug, Clone)]
pub struct HttpDownloadManager {
    client: Client,
    dir: PathBuf,
    entries: Arc<Mutex<HashMap<DownloadId, Entry>>>,
}

impl HttpDownloadManager {
    pub fn new(client: Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dir: dir.into(),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// First of `name`, `stem-1.ext`, `stem-2.ext`, ... that does not exist yet.
async fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_owned());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let mut n = 1u32;
    loop {
        let file = match &ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        let candidate = dir.join(file);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

/// `<destination>.part`, where the body is written before the rename.
pub(crate) fn part_path(destination: &Path) -> PathBuf {
    let mut part = destination.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

async fn fetch(client: &Client, url: &str, destination: &Path) -> Result<(), DownloadError> {
    let part = part_path(destination);

    let response = client.get(url).send().await?.error_for_status()?;
    let mut file = tokio::fs::File::create(&part).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    let result = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok::<(), DownloadError>(())
    }
    .await;

    drop(file);
    if let Err(e) = result {
        if let Err(rm) = tokio::fs::remove_file(&part).await {
            warn!(path = %part.display(), error = %rm, "failed to remove partial download");
        }
        return Err(e);
    }
    tokio::fs::rename(&part, destination).await?;
    debug!(path = %destination.display(), bytes = written, "download written");
    Ok(())
}

#[async_trait]
impl DownloadManager for HttpDownloadManager {
    async fn enqueue(&self, url: &str, destination_name: &str) -> Result<DownloadId, DownloadError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let destination = unique_destination(&self.dir, destination_name).await;
        let download_id = Uuid::new_v4().to_string();
        let (tx, rx) = watch::channel(DownloadState::Running);

        // Hold the map lock across the spawn so a release cannot slip in
        // between the worker starting and its entry being recorded.
        let mut entries = self.entries.lock().await;
        let client = self.client.clone();
        let url = url.to_owned();
        let id = download_id.clone();
        let target = destination.clone();
        let worker = tokio::spawn(async move {
            let state = match fetch(&client, &url, &target).await {
                Ok(()) => {
                    info!(download_id = %id, path = %target.display(), "download completed");
                    DownloadState::Completed
                }
                Err(e) => {
                    warn!(download_id = %id, url = %url, error = %e, "download failed");
                    DownloadState::failed(&e)
                }
            };
            let _ = tx.send(state);
        });
        entries.insert(
            download_id.clone(),
            Entry {
                destination,
                state: rx,
                worker,
            },
        );

        Ok(download_id)
    }

    async fn wait(&self, download_id: &str) -> Result<(), DownloadError> {
        let mut rx = {
            let entries = self.entries.lock().await;
            entries
                .get(download_id)
                .map(|e| e.state.clone())
                .ok_or_else(|| DownloadError::UnknownDownload(download_id.to_owned()))?
        };
        let state = rx
            .wait_for(|s| *s != DownloadState::Running)
            .await
            .map_err(|_| DownloadError::Network("download worker went away".into()))?
            .clone();
        match state {
            DownloadState::Failed {
                kind: FailureKind::Storage,
                message,
            } => Err(DownloadError::Storage(std::io::Error::other(message))),
            DownloadState::Failed { message, .. } => Err(DownloadError::Network(message)),
            _ => Ok(()),
        }
    }

    async fn destination(&self, download_id: &str) -> Option<PathBuf> {
        let entries = self.entries.lock().await;
        entries.get(download_id).map(|e| e.destination.clone())
    }

    async fn resolve_path(&self, download_id: &str) -> Option<PathBuf> {
        let destination = {
            let entries = self.entries.lock().await;
            let entry = entries.get(download_id)?;
            if *entry.state.borrow() != DownloadState::Completed {
                return None;
            }
            entry.destination.clone()
        };
        match tokio::fs::try_exists(&destination).await {
            Ok(true) => Some(destination),
            _ => None,
        }
    }

    async fn release(&self, download_id: &str) {
        let Some(entry) = self.entries.lock().await.remove(download_id) else {
            return;
        };
        let running = *entry.state.borrow() == DownloadState::Running;
        if running {
            entry.worker.abort();
        }
        // Wait for the worker to unwind so nothing writes the part file after
        // it has been removed.
        let _ = entry.worker.await;
        let part = part_path(&entry.destination);
        match tokio::fs::remove_file(&part).await {
            Ok(()) => debug!(download_id, path = %part.display(), "removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(download_id, path = %part.display(), error = %e, "failed to remove partial download"),
        }
        if running {
            info!(download_id, "download cancelled");
        }
    }
}
