//! tunesmith-core: remote music generation tasks from submission to a file
//! on disk.
//!
//! - [`task`]: the [`GenerationTask`] model and its state machine
//! - [`store`]: SQLite persistence ([`SqliteStore`])
//! - [`client`]: the generation service ([`GenerationService`],
//!   [`HttpGenerationClient`])
//! - [`download`]: download manager and [`DownloadCoordinator`]
//! - [`lifecycle`]: [`TaskLifecycleManager`], poll workers and startup
//!   reconciliation
//! - [`presets`]: prompt templates by genre

pub mod client;
pub mod download;
pub mod error;
pub mod lifecycle;
pub mod presets;
pub mod store;
pub mod task;

#[cfg(test)]
mod testing;

pub use client::{
    ClientConfig, ContinuationRequest, GenerationRequest, GenerationService, HttpGenerationClient,
    RemoteStatus,
};
pub use download::{DownloadCoordinator, DownloadManager, HttpDownloadManager};
pub use error::{ClientError, DownloadError, TaskError};
pub use lifecycle::{LifecycleConfig, ReconcileReport, TaskEvent, TaskLifecycleManager, WorkerKind};
pub use store::{
    DownloadRecord, DownloadRecordStore, EditStore, GenerationTaskStore, SavedEdit, SqliteStore,
    UpdateOutcome, UpsertOutcome,
};
pub use task::{Failure, FailureReason, GenerationTask, TaskStatus};
