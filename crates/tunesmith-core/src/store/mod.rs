//! Durable storage for generation tasks, download records and saved edits.
//!
//! Uses [`sqlx`] with the `sqlite` feature.  Migrations are embedded with
//! `sqlx::migrate!("./migrations")`, resolved relative to this crate's
//! `CARGO_MANIFEST_DIR` at compile time, and applied by
//! [`SqliteStore::connect`].
//!
//! Only the runtime-checked `sqlx::query` / `query_as` forms are used, so no
//! `DATABASE_URL` is needed at build time.

mod downloads;
mod edits;
mod tasks;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::Mutex;

use crate::error::TaskError;
use crate::task::{GenerationTask, TaskStatus};

/// What an [`GenerationTaskStore::upsert`] actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The merged row equals the stored one; nothing was written.
    Unchanged,
}

/// Result of a guarded [`GenerationTaskStore::update_existing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated(GenerationTask),
    Unchanged(GenerationTask),
    /// The row no longer exists (deleted by the user); nothing was written.
    Missing,
}

/// Maps a download handed to the download manager back to its task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadRecord {
    pub download_id: String,
    pub task_id: String,
    pub destination: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// A file produced by a local edit (trim, volume, concatenate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedEdit {
    pub id: i64,
    pub title: String,
    pub path: PathBuf,
    pub duration_ms: u64,
    pub operation: String,
    pub created_at: DateTime<Utc>,
}

pub trait GenerationTaskStore: Send + Sync + 'static {
    /// Insert or merge `task` into the row with the same `task_id`.
    ///
    /// The read, merge and write happen in one transaction under the store's
    /// write lock, so a concurrent writer can never clobber fields this call
    /// does not carry.
    fn upsert(
        &self,
        task: &GenerationTask,
    ) -> impl Future<Output = Result<UpsertOutcome, TaskError>> + Send;

    /// Insert `task` only if no row with its `task_id` exists.  Returns
    /// `false`, leaving the existing row untouched, on a duplicate id.
    fn insert_new(
        &self,
        task: &GenerationTask,
    ) -> impl Future<Output = Result<bool, TaskError>> + Send;

    /// Apply `mutate` to the stored row and write the result, without ever
    /// inserting.  Used by workers so a deleted task is never resurrected.
    fn update_existing<F>(
        &self,
        task_id: &str,
        mutate: F,
    ) -> impl Future<Output = Result<UpdateOutcome, TaskError>> + Send
    where
        F: FnOnce(&mut GenerationTask) -> Result<(), TaskError> + Send;

    fn get_by_id(
        &self,
        task_id: &str,
    ) -> impl Future<Output = Result<Option<GenerationTask>, TaskError>> + Send;

    /// First task (in insertion order) with this exact title.
    fn find_by_title(
        &self,
        title: &str,
    ) -> impl Future<Output = Result<Option<GenerationTask>, TaskError>> + Send;

    /// All tasks in any of `statuses`, in insertion order.
    fn get_by_status(
        &self,
        statuses: &[TaskStatus],
    ) -> impl Future<Output = Result<Vec<GenerationTask>, TaskError>> + Send;

    /// Every task, in insertion order.
    fn list(&self) -> impl Future<Output = Result<Vec<GenerationTask>, TaskError>> + Send;

    /// Remove the row (and its download record).  With `delete_file` the
    /// task's local file is removed too; failing to remove it is logged, not
    /// returned.  Yields the deleted row, or `None` if there was none.
    fn delete(
        &self,
        task_id: &str,
        delete_file: bool,
    ) -> impl Future<Output = Result<Option<GenerationTask>, TaskError>> + Send;
}

pub trait DownloadRecordStore: Send + Sync + 'static {
    /// Persist `record`, replacing any older record for the same task.
    fn put_download_record(
        &self,
        record: &DownloadRecord,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    fn download_record_for_task(
        &self,
        task_id: &str,
    ) -> impl Future<Output = Result<Option<DownloadRecord>, sqlx::Error>> + Send;

    fn remove_download_record(
        &self,
        download_id: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

pub trait EditStore: Send + Sync + 'static {
    fn record_edit(
        &self,
        title: &str,
        path: &Path,
        duration_ms: u64,
        operation: &str,
    ) -> impl Future<Output = Result<SavedEdit, sqlx::Error>> + Send;

    /// Newest first.
    fn list_edits(&self) -> impl Future<Output = Result<Vec<SavedEdit>, sqlx::Error>> + Send;

    fn delete_edit(&self, id: i64) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;
}

/// SQLite-backed store for everything tunesmith persists.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    /// Serialises read-modify-write cycles within this process.
    write_lock: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` is a sqlx SQLite URL such as `"sqlite://tunesmith.db"` or
    /// `"sqlite::memory:"`.  In-memory databases get a single long-lived
    /// connection so every query sees the same data.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn parse_timestamp(raw: &str, column: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        tracing::warn!(raw = %raw, column, error = %e, "failed to parse timestamp; using now");
        Utc::now()
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
