//! Error types for the task lifecycle.
//!
//! [`TaskError`] is what every public lifecycle operation returns.  The
//! collaborator errors ([`ClientError`], [`DownloadError`]) are narrower and
//! convert into it so callers only ever match one enum.

use thiserror::Error;

use crate::task::{FailureReason, TaskStatus};

/// All errors surfaced by the task lifecycle manager and its store.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Transient transport failure talking to the generation service or the
    /// download source.
    #[error("network error: {0}")]
    Network(String),

    /// The generation service explicitly reported a failure or sent a
    /// response we cannot use.
    #[error("server error: {0}")]
    Server(String),

    /// Disk or permission failure while resolving or moving a file.
    #[error("storage error: {0}")]
    Storage(String),

    /// Caller-supplied arguments were rejected before any I/O.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Propagated from the SQLite store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No task with the given id (or title) exists.
    #[error("task not found: {0}")]
    NotFound(String),

    /// The requested operation is not valid from the task's current state.
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

impl TaskError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Network(_))
    }

    /// The persisted failure reason this error maps to, if it should fail a
    /// task at all.  Validation and bookkeeping errors never do.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            TaskError::Network(_) => Some(FailureReason::Network),
            TaskError::Server(_) => Some(FailureReason::Server),
            TaskError::Storage(_) => Some(FailureReason::Storage),
            _ => None,
        }
    }
}

/// Errors from the generation service client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connect/timeout/body errors and 5xx or 429 responses.
    #[error("network error: {0}")]
    Network(String),

    /// 4xx responses, undecodable bodies and responses missing required
    /// fields.
    #[error("server error: {0}")]
    Server(String),

    /// The seed audio for a continuation could not be read.
    #[error("failed to read seed audio: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return ClientError::Server(format!("malformed response: {e}"));
        }
        match e.status() {
            Some(status) if status.is_server_error() || status.as_u16() == 429 => {
                ClientError::Network(e.to_string())
            }
            Some(_) => ClientError::Server(e.to_string()),
            None => ClientError::Network(e.to_string()),
        }
    }
}

impl From<ClientError> for TaskError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Network(m) => TaskError::Network(m),
            ClientError::Server(m) => TaskError::Server(m),
            ClientError::Io(e) => TaskError::Storage(e.to_string()),
        }
    }
}

/// Errors from the download manager.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download failed: {0}")]
    Network(String),

    #[error("download storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("unknown download id: {0}")]
    UnknownDownload(String),
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        DownloadError::Network(e.to_string())
    }
}

impl From<DownloadError> for TaskError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::Network(m) => TaskError::Network(m),
            DownloadError::Storage(e) => TaskError::Storage(e.to_string()),
            DownloadError::UnknownDownload(id) => {
                TaskError::Storage(format!("download {id} is not known to the download manager"))
            }
        }
    }
}
