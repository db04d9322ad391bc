use rusqlite::{OptionalExtension, Row, params};

use super::TaskStore;
use crate::core::error::Result;

/// Transport strategy for a clone task. Sticky once written, except for the
/// one-way forward to download_upload downgrade on restricted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloningStrategy {
    Forward,
    DownloadUpload,
}

impl CloningStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            CloningStrategy::Forward => "forward",
            CloningStrategy::DownloadUpload => "download_upload",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "forward" => Some(CloningStrategy::Forward),
            "download_upload" => Some(CloningStrategy::DownloadUpload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncTask {
    pub origin_chat_id: i64,
    pub origin_chat_title: String,
    pub destination_chat_id: Option<i64>,
    pub cloning_strategy: CloningStrategy,
    pub last_synced_message_id: i64,
}

fn row_to_sync_task(row: &Row<'_>) -> rusqlite::Result<SyncTask> {
    let strategy: String = row.get(3)?;
    Ok(SyncTask {
        origin_chat_id: row.get(0)?,
        origin_chat_title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        destination_chat_id: row.get(2)?,
        // 'unknown' only appears on rows written before a strategy was
        // chosen; treat it as the safe strategy.
        cloning_strategy: CloningStrategy::from_str(&strategy)
            .unwrap_or(CloningStrategy::DownloadUpload),
        last_synced_message_id: row.get(4)?,
    })
}

impl TaskStore {
    pub async fn get_sync_task(&self, origin_chat_id: i64) -> Result<Option<SyncTask>> {
        let db = self.db.lock().await;
        let task = db
            .query_row(
                "SELECT origin_chat_id, origin_chat_title, destination_chat_id,
                        cloning_strategy, last_synced_message_id
                 FROM SyncTasks WHERE origin_chat_id = ?1",
                params![origin_chat_id],
                row_to_sync_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Insert or refresh a task. The checkpoint is never rewound by an
    /// upsert; only `advance_sync_progress` moves it.
    pub async fn upsert_sync_task(&self, task: &SyncTask) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO SyncTasks
                 (origin_chat_id, origin_chat_title, destination_chat_id,
                  cloning_strategy, last_synced_message_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(origin_chat_id) DO UPDATE SET
                 origin_chat_title = excluded.origin_chat_title,
                 destination_chat_id = excluded.destination_chat_id,
                 cloning_strategy = excluded.cloning_strategy",
            params![
                task.origin_chat_id,
                task.origin_chat_title,
                task.destination_chat_id,
                task.cloning_strategy.as_str(),
                task.last_synced_message_id,
            ],
        )?;
        Ok(())
    }

    pub async fn update_sync_strategy(
        &self,
        origin_chat_id: i64,
        strategy: CloningStrategy,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE SyncTasks SET cloning_strategy = ?2 WHERE origin_chat_id = ?1",
            params![origin_chat_id, strategy.as_str()],
        )?;
        Ok(())
    }

    /// Advance the checkpoint. Monotonic: a lower id is a no-op.
    pub async fn advance_sync_progress(&self, origin_chat_id: i64, message_id: i64) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE SyncTasks SET last_synced_message_id = ?2
             WHERE origin_chat_id = ?1 AND last_synced_message_id < ?2",
            params![origin_chat_id, message_id],
        )?;
        Ok(())
    }

    pub async fn delete_sync_task(&self, origin_chat_id: i64) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "DELETE FROM SyncTasks WHERE origin_chat_id = ?1",
            params![origin_chat_id],
        )?;
        Ok(())
    }
}
