use rusqlite::{OptionalExtension, Row, params};

use super::TaskStore;
use crate::core::error::Result;

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub origin_chat_id: i64,
    pub origin_chat_title: String,
    pub last_downloaded_message_id: i64,
    pub total_videos: i64,
    pub downloaded_videos: i64,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_download_task(row: &Row<'_>) -> rusqlite::Result<DownloadTask> {
    Ok(DownloadTask {
        origin_chat_id: row.get(0)?,
        origin_chat_title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        last_downloaded_message_id: row.get(2)?,
        total_videos: row.get(3)?,
        downloaded_videos: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl TaskStore {
    pub async fn get_download_task(&self, origin_chat_id: i64) -> Result<Option<DownloadTask>> {
        let db = self.db.lock().await;
        let task = db
            .query_row(
                "SELECT origin_chat_id, origin_chat_title, last_downloaded_message_id,
                        total_videos, downloaded_videos, created_at, updated_at
                 FROM DownloadTasks WHERE origin_chat_id = ?1",
                params![origin_chat_id],
                row_to_download_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Idempotent creation: an existing task is left untouched.
    pub async fn create_download_task(&self, origin_chat_id: i64, title: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR IGNORE INTO DownloadTasks (origin_chat_id, origin_chat_title)
             VALUES (?1, ?2)",
            params![origin_chat_id, title],
        )?;
        Ok(())
    }

    /// Advance the video checkpoint and counters. The checkpoint is
    /// monotonic; counters follow whatever the engine reports.
    pub async fn advance_download_progress(
        &self,
        origin_chat_id: i64,
        message_id: i64,
        downloaded_videos: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE DownloadTasks
             SET last_downloaded_message_id = MAX(last_downloaded_message_id, ?2),
                 downloaded_videos = ?3,
                 updated_at = CURRENT_TIMESTAMP
             WHERE origin_chat_id = ?1",
            params![origin_chat_id, message_id, downloaded_videos],
        )?;
        Ok(())
    }

    pub async fn set_download_totals(&self, origin_chat_id: i64, total_videos: i64) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE DownloadTasks
             SET total_videos = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE origin_chat_id = ?1",
            params![origin_chat_id, total_videos],
        )?;
        Ok(())
    }

    pub async fn delete_download_task(&self, origin_chat_id: i64) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "DELETE FROM DownloadTasks WHERE origin_chat_id = ?1",
            params![origin_chat_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = TaskStore::open_in_memory().expect("store");
        store
            .create_download_task(-1001, "Videos")
            .await
            .expect("create");
        store
            .advance_download_progress(-1001, 12, 3)
            .await
            .expect("advance");

        // Re-creating must not reset progress.
        store
            .create_download_task(-1001, "Videos")
            .await
            .expect("re-create");
        let task = store.get_download_task(-1001).await.unwrap().unwrap();
        assert_eq!(task.last_downloaded_message_id, 12);
        assert_eq!(task.downloaded_videos, 3);
    }

    #[tokio::test]
    async fn checkpoint_never_moves_backwards() {
        let store = TaskStore::open_in_memory().expect("store");
        store
            .create_download_task(-1001, "Videos")
            .await
            .expect("create");

        store
            .advance_download_progress(-1001, 20, 5)
            .await
            .expect("advance");
        store
            .advance_download_progress(-1001, 4, 6)
            .await
            .expect("stale id");
        let task = store.get_download_task(-1001).await.unwrap().unwrap();
        assert_eq!(task.last_downloaded_message_id, 20);
        assert_eq!(task.downloaded_videos, 6);
    }
}
