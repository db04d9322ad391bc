use rusqlite::{OptionalExtension, Row, params};
use tracing::info;

use super::TaskStore;
use crate::core::error::Result;

/// Ordered stages of the publish pipeline. Each stage owns a monotonic latch
/// in the task row; advancing past a stage requires its latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    Init,
    Zip,
    Report,
    ReencodeAuth,
    Reencode,
    Join,
    Timestamp,
    UploadAuth,
    Upload,
    Done,
}

impl PublishStep {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishStep::Init => "init",
            PublishStep::Zip => "zip",
            PublishStep::Report => "report",
            PublishStep::ReencodeAuth => "reencode_auth",
            PublishStep::Reencode => "reencode",
            PublishStep::Join => "join",
            PublishStep::Timestamp => "timestamp",
            PublishStep::UploadAuth => "upload_auth",
            PublishStep::Upload => "upload",
            PublishStep::Done => "done",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "init" => Some(PublishStep::Init),
            "zip" => Some(PublishStep::Zip),
            "report" => Some(PublishStep::Report),
            "reencode_auth" => Some(PublishStep::ReencodeAuth),
            "reencode" => Some(PublishStep::Reencode),
            "join" => Some(PublishStep::Join),
            "timestamp" => Some(PublishStep::Timestamp),
            "upload_auth" => Some(PublishStep::UploadAuth),
            "upload" => Some(PublishStep::Upload),
            "done" => Some(PublishStep::Done),
            _ => None,
        }
    }

    pub fn next(self) -> PublishStep {
        match self {
            PublishStep::Init => PublishStep::Zip,
            PublishStep::Zip => PublishStep::Report,
            PublishStep::Report => PublishStep::ReencodeAuth,
            PublishStep::ReencodeAuth => PublishStep::Reencode,
            PublishStep::Reencode => PublishStep::Join,
            PublishStep::Join => PublishStep::Timestamp,
            PublishStep::Timestamp => PublishStep::UploadAuth,
            PublishStep::UploadAuth => PublishStep::Upload,
            PublishStep::Upload => PublishStep::Done,
            PublishStep::Done => PublishStep::Done,
        }
    }

    /// Latch column asserted when this stage completes. `done` is implied by
    /// `is_published`.
    pub fn latch_column(self) -> Option<&'static str> {
        match self {
            PublishStep::Init => Some("is_started"),
            PublishStep::Zip => Some("is_zipped"),
            PublishStep::Report => Some("is_reported"),
            PublishStep::ReencodeAuth => Some("is_reencode_auth"),
            PublishStep::Reencode => Some("is_reencoded"),
            PublishStep::Join => Some("is_joined"),
            PublishStep::Timestamp => Some("is_timestamped"),
            PublishStep::UploadAuth => Some("is_upload_auth"),
            PublishStep::Upload => Some("is_published"),
            PublishStep::Done => None,
        }
    }

    pub fn all() -> [PublishStep; 10] {
        [
            PublishStep::Init,
            PublishStep::Zip,
            PublishStep::Report,
            PublishStep::ReencodeAuth,
            PublishStep::Reencode,
            PublishStep::Join,
            PublishStep::Timestamp,
            PublishStep::UploadAuth,
            PublishStep::Upload,
            PublishStep::Done,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishTask {
    pub source_folder_path: String,
    pub project_name: String,
    pub destination_chat_id: Option<i64>,
    pub current_step: PublishStep,
    pub status: TaskStatus,
    pub is_started: bool,
    pub is_zipped: bool,
    pub is_reported: bool,
    pub is_reencode_auth: bool,
    pub is_reencoded: bool,
    pub is_joined: bool,
    pub is_timestamped: bool,
    pub is_upload_auth: bool,
    pub is_published: bool,
    pub last_uploaded_file: Option<String>,
}

impl PublishTask {
    pub fn latch(&self, step: PublishStep) -> bool {
        match step {
            PublishStep::Init => self.is_started,
            PublishStep::Zip => self.is_zipped,
            PublishStep::Report => self.is_reported,
            PublishStep::ReencodeAuth => self.is_reencode_auth,
            PublishStep::Reencode => self.is_reencoded,
            PublishStep::Join => self.is_joined,
            PublishStep::Timestamp => self.is_timestamped,
            PublishStep::UploadAuth => self.is_upload_auth,
            PublishStep::Upload => self.is_published,
            PublishStep::Done => self.is_published,
        }
    }

    /// Vector of latches in stage order, used by the monotonicity checks.
    pub fn latches(&self) -> [bool; 9] {
        [
            self.is_started,
            self.is_zipped,
            self.is_reported,
            self.is_reencode_auth,
            self.is_reencoded,
            self.is_joined,
            self.is_timestamped,
            self.is_upload_auth,
            self.is_published,
        ]
    }
}

fn row_to_publish_task(row: &Row<'_>) -> rusqlite::Result<PublishTask> {
    let step: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(PublishTask {
        source_folder_path: row.get(0)?,
        project_name: row.get(1)?,
        destination_chat_id: row.get(2)?,
        current_step: step
            .as_deref()
            .and_then(PublishStep::from_str)
            .unwrap_or(PublishStep::Init),
        status: TaskStatus::from_str(&status).unwrap_or(TaskStatus::Pending),
        is_started: row.get(5)?,
        is_zipped: row.get(6)?,
        is_reported: row.get(7)?,
        is_reencode_auth: row.get(8)?,
        is_reencoded: row.get(9)?,
        is_joined: row.get(10)?,
        is_timestamped: row.get(11)?,
        is_upload_auth: row.get(12)?,
        is_published: row.get(13)?,
        last_uploaded_file: row.get(14)?,
    })
}

const PUBLISH_COLUMNS: &str = "source_folder_path, project_name, destination_chat_id,
    current_step, status, is_started, is_zipped, is_reported, is_reencode_auth,
    is_reencoded, is_joined, is_timestamped, is_upload_auth, is_published,
    last_uploaded_file";

impl TaskStore {
    pub async fn get_publish_task(&self, source_folder: &str) -> Result<Option<PublishTask>> {
        let db = self.db.lock().await;
        let task = db
            .query_row(
                &format!("SELECT {PUBLISH_COLUMNS} FROM PublishTasks WHERE source_folder_path = ?1"),
                params![source_folder],
                row_to_publish_task,
            )
            .optional()?;
        Ok(task)
    }

    pub async fn get_or_create_publish_task(
        &self,
        source_folder: &str,
        project_name: &str,
    ) -> Result<PublishTask> {
        {
            let db = self.db.lock().await;
            db.execute(
                "INSERT OR IGNORE INTO PublishTasks (source_folder_path, project_name, current_step)
                 VALUES (?1, ?2, 'init')",
                params![source_folder, project_name],
            )?;
        }
        let task = self
            .get_publish_task(source_folder)
            .await?
            .expect("publish task row exists after insert-or-ignore");
        Ok(task)
    }

    pub async fn set_publish_status(&self, source_folder: &str, status: TaskStatus) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE PublishTasks
             SET status = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE source_folder_path = ?1",
            params![source_folder, status.as_str()],
        )?;
        Ok(())
    }

    /// Durably record a completed stage: set its latch and move
    /// `current_step` to the successor in one statement, so a crash can
    /// never observe the latch without the advance or vice versa.
    pub async fn complete_publish_step(&self, source_folder: &str, step: PublishStep) -> Result<()> {
        let latch = step
            .latch_column()
            .expect("done has no latch and is never completed explicitly");
        let db = self.db.lock().await;
        db.execute(
            &format!(
                "UPDATE PublishTasks
                 SET {latch} = 1, current_step = ?2, updated_at = CURRENT_TIMESTAMP
                 WHERE source_folder_path = ?1"
            ),
            params![source_folder, step.next().as_str()],
        )?;
        info!(stage = step.as_str(), "publish stage committed");
        Ok(())
    }

    pub async fn set_publish_destination(&self, source_folder: &str, chat_id: i64) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE PublishTasks
             SET destination_chat_id = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE source_folder_path = ?1",
            params![source_folder, chat_id],
        )?;
        Ok(())
    }

    pub async fn set_last_uploaded_file(&self, source_folder: &str, file: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE PublishTasks
             SET last_uploaded_file = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE source_folder_path = ?1",
            params![source_folder, file],
        )?;
        Ok(())
    }

    pub async fn delete_publish_task(&self, source_folder: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "DELETE FROM PublishTasks WHERE source_folder_path = ?1",
            params![source_folder],
        )?;
        Ok(())
    }
}
