//! [`DownloadRecordStore`] for [`SqliteStore`].

use std::path::PathBuf;

use super::{DownloadRecord, DownloadRecordStore, SqliteStore, parse_timestamp};

impl DownloadRecordStore for SqliteStore {
    async fn put_download_record(&self, record: &DownloadRecord) -> Result<(), sqlx::Error> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM download_records WHERE task_id = ?1")
            .bind(&record.task_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO download_records (download_id, task_id, destination, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&record.download_id)
        .bind(&record.task_id)
        .bind(record.destination.to_string_lossy().into_owned())
        .bind(record.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }

    async fn download_record_for_task(
        &self,
        task_id: &str,
    ) -> Result<Option<DownloadRecord>, sqlx::Error> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT download_id, task_id, destination, created_at \
             FROM download_records WHERE task_id = ?1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(download_id, task_id, destination, created_at)| DownloadRecord {
            download_id,
            task_id,
            destination: PathBuf::from(destination),
            created_at: parse_timestamp(&created_at, "download_records.created_at"),
        }))
    }

    async fn remove_download_record(&self, download_id: &str) -> Result<(), sqlx::Error> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM download_records WHERE download_id = ?1")
            .bind(download_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(download_id: &str, task_id: &str) -> DownloadRecord {
        DownloadRecord {
            download_id: download_id.into(),
            task_id: task_id.into(),
            destination: PathBuf::from(format!("/downloads/{task_id}.wav")),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn newer_record_replaces_older_one_for_the_same_task() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.put_download_record(&record("d-1", "t-1")).await.unwrap();
        store.put_download_record(&record("d-2", "t-1")).await.unwrap();

        let found = store.download_record_for_task("t-1").await.unwrap().unwrap();
        assert_eq!(found.download_id, "d-2");
        assert_eq!(found.destination, PathBuf::from("/downloads/t-1.wav"));

        store.remove_download_record("d-2").await.unwrap();
        assert!(store.download_record_for_task("t-1").await.unwrap().is_none());
    }
}
