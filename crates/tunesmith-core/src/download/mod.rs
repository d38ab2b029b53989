//! Binary downloads of finished generations.
//!
//! [`DownloadManager`] is the fetch collaborator (the reqwest-backed
//! [`HttpDownloadManager`] in production, fakes in tests).
//! [`DownloadCoordinator`] sits on top of it: it names the destination,
//! persists the [`DownloadRecord`](crate::store::DownloadRecord) and hands
//! the single completion result back to the lifecycle manager.

mod coordinator;
mod http;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::DownloadError;

pub use coordinator::{DownloadClaim, DownloadCoordinator, DownloadHandle, Resumed};
pub use http::HttpDownloadManager;

/// Opaque identifier handed out by [`DownloadManager::enqueue`].
pub type DownloadId = String;

#[async_trait]
pub trait DownloadManager: Send + Sync + 'static {
    /// Start fetching `url` into a file named `destination_name` and return
    /// the id of the download.
    async fn enqueue(&self, url: &str, destination_name: &str) -> Result<DownloadId, DownloadError>;

    /// Resolve once the download finishes: `Ok` on success, the failure
    /// otherwise.  Fails with [`DownloadError::UnknownDownload`] for ids this
    /// manager never issued (e.g. from before a restart).
    async fn wait(&self, download_id: &str) -> Result<(), DownloadError>;

    /// Where the file for `download_id` will land once complete.
    async fn destination(&self, download_id: &str) -> Option<PathBuf>;

    /// Local path of a completed download, if it can still be found.
    async fn resolve_path(&self, download_id: &str) -> Option<PathBuf>;

    /// Stop tracking `download_id`.  A fetch still running is aborted and its
    /// partial file removed; a completed file is left where it is.  Unknown
    /// ids are ignored.
    async fn release(&self, download_id: &str);
}
