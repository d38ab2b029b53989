//! [`EditStore`] for [`SqliteStore`].

use std::path::{Path, PathBuf};

use chrono::Utc;

use super::{EditStore, SavedEdit, SqliteStore, parse_timestamp, to_i64, to_u64};

impl EditStore for SqliteStore {
    async fn record_edit(
        &self,
        title: &str,
        path: &Path,
        duration_ms: u64,
        operation: &str,
    ) -> Result<SavedEdit, sqlx::Error> {
        let created_at = Utc::now();
        let path_str = path.to_string_lossy().into_owned();
        let result = sqlx::query(
            "INSERT INTO saved_edits (title, path, duration_ms, operation, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(title)
        .bind(&path_str)
        .bind(to_i64(duration_ms))
        .bind(operation)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(SavedEdit {
            id: result.last_insert_rowid(),
            title: title.to_owned(),
            path: path.to_path_buf(),
            duration_ms,
            operation: operation.to_owned(),
            created_at,
        })
    }

    async fn list_edits(&self) -> Result<Vec<SavedEdit>, sqlx::Error> {
        let rows: Vec<(i64, String, String, i64, String, String)> = sqlx::query_as(
            "SELECT id, title, path, duration_ms, operation, created_at \
             FROM saved_edits ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, title, path, duration_ms, operation, created_at)| SavedEdit {
                id,
                title,
                path: PathBuf::from(path),
                duration_ms: to_u64(duration_ms),
                operation,
                created_at: parse_timestamp(&created_at, "saved_edits.created_at"),
            })
            .collect())
    }

    async fn delete_edit(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM saved_edits WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn edits_are_listed_newest_first() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store
            .record_edit("intro", Path::new("/out/intro.wav"), 4_000, "trim")
            .await
            .unwrap();
        let second = store
            .record_edit("mix", Path::new("/out/mix.mp3"), 9_500, "concatenate")
            .await
            .unwrap();

        let edits = store.list_edits().await.unwrap();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0], second);
        assert_eq!(edits[1].operation, "trim");

        assert!(store.delete_edit(second.id).await.unwrap());
        assert!(!store.delete_edit(second.id).await.unwrap());
        assert_eq!(store.list_edits().await.unwrap().len(), 1);
    }
}
