//! [`GenerationTaskStore`] for [`SqliteStore`].

use std::path::PathBuf;
use std::str::FromStr;

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use super::{GenerationTaskStore, SqliteStore, UpdateOutcome, UpsertOutcome, parse_timestamp, to_i64, to_u64};
use crate::error::TaskError;
use crate::task::{Failure, FailureReason, GenerationTask, TaskStatus};

const TASK_COLUMNS: &str = "task_id, prompt, model, requested_duration_ms, status, remote_url, \
     local_path, source_audio, title, error_kind, error_msg, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    prompt: String,
    model: String,
    requested_duration_ms: i64,
    status: String,
    remote_url: Option<String>,
    local_path: Option<String>,
    source_audio: Option<String>,
    title: String,
    error_kind: Option<String>,
    error_msg: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TaskRow> for GenerationTask {
    type Error = TaskError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .map_err(|e| TaskError::Database(sqlx::Error::Decode(Box::new(e))))?;
        let failure = match row.error_kind.as_deref() {
            Some(kind) => Some(Failure {
                reason: FailureReason::from_str(kind)
                    .map_err(|e| TaskError::Database(sqlx::Error::Decode(Box::new(e))))?,
                message: row.error_msg.unwrap_or_default(),
            }),
            None => None,
        };
        Ok(GenerationTask {
            created_at: parse_timestamp(&row.created_at, "created_at"),
            updated_at: parse_timestamp(&row.updated_at, "updated_at"),
            task_id: row.task_id,
            prompt: row.prompt,
            model: row.model,
            requested_duration_ms: to_u64(row.requested_duration_ms),
            status,
            remote_url: row.remote_url,
            local_path: row.local_path.map(PathBuf::from),
            source_audio: row.source_audio.map(PathBuf::from),
            title: row.title,
            failure,
        })
    }
}

fn collect(rows: Vec<TaskRow>) -> Result<Vec<GenerationTask>, TaskError> {
    rows.into_iter().map(GenerationTask::try_from).collect()
}

async fn fetch_task(
    conn: &mut SqliteConnection,
    task_id: &str,
) -> Result<Option<GenerationTask>, TaskError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM generation_tasks WHERE task_id = ?1");
    let row: Option<TaskRow> = sqlx::query_as(&sql)
        .bind(task_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(GenerationTask::try_from).transpose()
}

async fn insert_row(conn: &mut SqliteConnection, task: &GenerationTask) -> Result<(), TaskError> {
    sqlx::query(
        "INSERT INTO generation_tasks (task_id, prompt, model, requested_duration_ms, status, \
         remote_url, local_path, source_audio, title, error_kind, error_msg, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )
    .bind(&task.task_id)
    .bind(&task.prompt)
    .bind(&task.model)
    .bind(to_i64(task.requested_duration_ms))
    .bind(task.status.as_ref())
    .bind(&task.remote_url)
    .bind(task.local_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
    .bind(task.source_audio.as_ref().map(|p| p.to_string_lossy().into_owned()))
    .bind(&task.title)
    .bind(task.failure.as_ref().map(|f| f.reason.as_ref().to_owned()))
    .bind(task.failure.as_ref().map(|f| f.message.clone()))
    .bind(task.created_at.to_rfc3339())
    .bind(task.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn update_row(conn: &mut SqliteConnection, task: &GenerationTask) -> Result<(), TaskError> {
    sqlx::query(
        "UPDATE generation_tasks SET prompt = ?1, model = ?2, requested_duration_ms = ?3, \
         status = ?4, remote_url = ?5, local_path = ?6, source_audio = ?7, title = ?8, \
         error_kind = ?9, error_msg = ?10, updated_at = ?11 WHERE task_id = ?12",
    )
    .bind(&task.prompt)
    .bind(&task.model)
    .bind(to_i64(task.requested_duration_ms))
    .bind(task.status.as_ref())
    .bind(&task.remote_url)
    .bind(task.local_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
    .bind(task.source_audio.as_ref().map(|p| p.to_string_lossy().into_owned()))
    .bind(&task.title)
    .bind(task.failure.as_ref().map(|f| f.reason.as_ref().to_owned()))
    .bind(task.failure.as_ref().map(|f| f.message.clone()))
    .bind(task.updated_at.to_rfc3339())
    .bind(&task.task_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn check_invariants(task: &GenerationTask) -> Result<(), TaskError> {
    if task.task_id.trim().is_empty() {
        return Err(TaskError::Validation("task id must not be empty".into()));
    }
    if !task.holds_invariants() {
        return Err(TaskError::Validation(format!(
            "task {} in state {} has inconsistent remote_url/local_path",
            task.task_id, task.status
        )));
    }
    Ok(())
}

impl GenerationTaskStore for SqliteStore {
    async fn upsert(&self, task: &GenerationTask) -> Result<UpsertOutcome, TaskError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let outcome = match fetch_task(&mut *tx, &task.task_id).await? {
            None => {
                let mut fresh = task.clone();
                fresh.normalize();
                check_invariants(&fresh)?;
                insert_row(&mut *tx, &fresh).await?;
                UpsertOutcome::Inserted
            }
            Some(existing) => {
                let mut merged = existing.clone();
                merged.merge_from(task);
                merged.normalize();
                check_invariants(&merged)?;
                if merged.same_content(&existing) {
                    UpsertOutcome::Unchanged
                } else {
                    merged.updated_at = Utc::now();
                    update_row(&mut *tx, &merged).await?;
                    UpsertOutcome::Updated
                }
            }
        };

        tx.commit().await?;
        debug!(task_id = %task.task_id, status = %task.status, ?outcome, "task upserted");
        Ok(outcome)
    }

    async fn insert_new(&self, task: &GenerationTask) -> Result<bool, TaskError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if fetch_task(&mut *tx, &task.task_id).await?.is_some() {
            debug!(task_id = %task.task_id, "task id already stored; not inserting");
            return Ok(false);
        }
        let mut fresh = task.clone();
        fresh.normalize();
        check_invariants(&fresh)?;
        insert_row(&mut *tx, &fresh).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update_existing<F>(&self, task_id: &str, mutate: F) -> Result<UpdateOutcome, TaskError>
    where
        F: FnOnce(&mut GenerationTask) -> Result<(), TaskError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let Some(existing) = fetch_task(&mut *tx, task_id).await? else {
            debug!(task_id, "task vanished before update; skipping write");
            return Ok(UpdateOutcome::Missing);
        };

        let mut updated = existing.clone();
        mutate(&mut updated)?;
        updated.normalize();
        check_invariants(&updated)?;

        if updated.same_content(&existing) {
            return Ok(UpdateOutcome::Unchanged(existing));
        }
        updated.updated_at = Utc::now();
        update_row(&mut *tx, &updated).await?;
        tx.commit().await?;
        Ok(UpdateOutcome::Updated(updated))
    }

    async fn get_by_id(&self, task_id: &str) -> Result<Option<GenerationTask>, TaskError> {
        let mut conn = self.pool.acquire().await?;
        fetch_task(&mut *conn, task_id).await
    }

    async fn find_by_title(&self, title: &str) -> Result<Option<GenerationTask>, TaskError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM generation_tasks WHERE title = ?1 ORDER BY seq LIMIT 1"
        );
        let row: Option<TaskRow> = sqlx::query_as(&sql)
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        row.map(GenerationTask::try_from).transpose()
    }

    async fn get_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<GenerationTask>, TaskError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM generation_tasks WHERE status IN ({placeholders}) ORDER BY seq"
        );
        let mut query = sqlx::query_as::<_, TaskRow>(&sql);
        for status in statuses {
            query = query.bind(status.as_ref());
        }
        collect(query.fetch_all(&self.pool).await?)
    }

    async fn list(&self) -> Result<Vec<GenerationTask>, TaskError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM generation_tasks ORDER BY seq");
        let rows: Vec<TaskRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        collect(rows)
    }

    async fn delete(
        &self,
        task_id: &str,
        delete_file: bool,
    ) -> Result<Option<GenerationTask>, TaskError> {
        let removed = {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await?;
            let existing = fetch_task(&mut *tx, task_id).await?;
            if existing.is_some() {
                sqlx::query("DELETE FROM download_records WHERE task_id = ?1")
                    .bind(task_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM generation_tasks WHERE task_id = ?1")
                    .bind(task_id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            existing
        };

        if delete_file {
            if let Some(path) = removed.as_ref().and_then(|t| t.local_path.as_ref()) {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(task_id, path = %path.display(), error = %e, "failed to remove task file");
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn ready(task_id: &str) -> GenerationTask {
        let mut t = GenerationTask::queued(task_id, "ambient pad", "small", 20_000);
        t.mark_ready("http://host/a.wav").unwrap();
        t
    }

    #[tokio::test]
    async fn upsert_inserts_then_reports_unchanged() {
        let store = store().await;
        let task = GenerationTask::queued("t-1", "ambient pad", "small", 20_000);

        assert_eq!(store.upsert(&task).await.unwrap(), UpsertOutcome::Inserted);
        let first = store.get_by_id("t-1").await.unwrap().unwrap();
        assert_eq!(store.upsert(&task).await.unwrap(), UpsertOutcome::Unchanged);
        let second = store.get_by_id("t-1").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn insert_new_leaves_existing_rows_alone() {
        let store = store().await;
        let mut done = ready("t-1");
        done.mark_downloading().unwrap();
        done.mark_downloaded("/music/a.wav".into()).unwrap();
        store.upsert(&done).await.unwrap();

        let again = GenerationTask::queued("t-1", "something else", "small", 5_000);
        assert!(!store.insert_new(&again).await.unwrap());

        let stored = store.get_by_id("t-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Downloaded);
        assert_eq!(stored.local_path, Some(PathBuf::from("/music/a.wav")));
        assert_eq!(stored.remote_url.as_deref(), Some("http://host/a.wav"));

        assert!(store.insert_new(&GenerationTask::queued("t-2", "x", "small", 1_000)).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upsert_merges_without_dropping_local_path() {
        let store = store().await;
        let mut task = ready("t-1");
        task.mark_downloading().unwrap();
        task.mark_downloaded(PathBuf::from("/music/a.wav")).unwrap();
        store.upsert(&task).await.unwrap();

        // A writer that only knows the status must not wipe the path.
        let mut partial = GenerationTask::queued("t-1", "", "", 20_000);
        partial.title.clear();
        partial.status = TaskStatus::Downloaded;
        assert_eq!(store.upsert(&partial).await.unwrap(), UpsertOutcome::Unchanged);

        let stored = store.get_by_id("t-1").await.unwrap().unwrap();
        assert_eq!(stored.local_path, Some(PathBuf::from("/music/a.wav")));
        assert_eq!(stored.prompt, "ambient pad");
    }

    #[tokio::test]
    async fn upsert_rejects_rows_that_break_invariants() {
        let store = store().await;
        let mut task = GenerationTask::queued("t-1", "p", "small", 1_000);
        task.status = TaskStatus::Ready;
        let err = store.upsert(&task).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        assert!(store.get_by_id("t-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_existing_never_inserts() {
        let store = store().await;
        let outcome = store
            .update_existing("ghost", |t| t.mark_processing())
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Missing);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_existing_applies_transition_and_rejects_bad_ones() {
        let store = store().await;
        store
            .upsert(&GenerationTask::queued("t-1", "p", "small", 1_000))
            .await
            .unwrap();

        let outcome = store
            .update_existing("t-1", |t| t.mark_ready("http://host/x.wav"))
            .await
            .unwrap();
        let UpdateOutcome::Updated(task) = outcome else {
            panic!("expected an update, got {outcome:?}");
        };
        assert_eq!(task.status, TaskStatus::Ready);

        let err = store
            .update_existing("t-1", |t| t.mark_processing())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        let stored = store.get_by_id("t-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn get_by_status_returns_insertion_order() {
        let store = store().await;
        for id in ["c", "a", "b"] {
            store
                .upsert(&GenerationTask::queued(id, "p", "small", 1_000))
                .await
                .unwrap();
        }
        store.upsert(&ready("r")).await.unwrap();
        store
            .update_existing("a", |t| t.mark_processing())
            .await
            .unwrap();

        let ids: Vec<_> = store
            .get_by_status(&TaskStatus::IN_FLIGHT)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(ids, ["c", "a", "b"]);
        assert_eq!(store.get_by_status(&[TaskStatus::Ready]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_round_trips_through_the_row() {
        let store = store().await;
        store
            .upsert(&GenerationTask::queued("t-1", "p", "small", 1_000))
            .await
            .unwrap();
        store
            .update_existing("t-1", |t| t.mark_failed(FailureReason::Server, "model exploded"))
            .await
            .unwrap();

        let stored = store.get_by_id("t-1").await.unwrap().unwrap();
        let failure = stored.failure.unwrap();
        assert_eq!(failure.reason, FailureReason::Server);
        assert_eq!(failure.message, "model exploded");
    }

    #[tokio::test]
    async fn find_by_title_and_delete_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.wav");
        std::fs::write(&file, b"RIFF").unwrap();

        let store = store().await;
        let mut task = ready("t-1");
        task.mark_downloading().unwrap();
        task.mark_downloaded(file.clone()).unwrap();
        store.upsert(&task).await.unwrap();

        let found = store.find_by_title("Music for ambient pad").await.unwrap();
        assert_eq!(found.map(|t| t.task_id).as_deref(), Some("t-1"));

        let removed = store.delete("t-1", true).await.unwrap();
        assert!(removed.is_some());
        assert!(!file.exists());
        assert!(store.get_by_id("t-1").await.unwrap().is_none());
        assert!(store.delete("t-1", true).await.unwrap().is_none());
    }
}
