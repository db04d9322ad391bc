mod download;
mod publish;
mod sync;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::debug;

pub use download::DownloadTask;
pub use publish::{PublishStep, PublishTask, TaskStatus};
pub use sync::{CloningStrategy, SyncTask};

use crate::core::error::Result;

/// Relational store for the three task kinds. The store is a log of durable
/// checkpoints, not a mirror of content: every mutation is committed before
/// control returns and there is no write-back cache.
pub struct TaskStore {
    db: Arc<Mutex<Connection>>,
}

/// Columns added after the initial release. `ensure_schema` silently absorbs
/// them into databases created by older builds.
const LATER_COLUMNS: &[(&str, &str, &str)] = &[
    ("SyncTasks", "origin_chat_title", "TEXT"),
    ("DownloadTasks", "total_videos", "INTEGER DEFAULT 0"),
    ("DownloadTasks", "downloaded_videos", "INTEGER DEFAULT 0"),
    ("PublishTasks", "last_uploaded_file", "TEXT"),
];

impl TaskStore {
    /// Open (or create) the database file and bring the schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::apply_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::apply_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Idempotent schema migration.
    pub async fn ensure_schema(&self) -> Result<()> {
        let db = self.db.lock().await;
        Self::apply_schema(&db)
    }

    fn apply_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS SyncTasks (
                origin_chat_id INTEGER PRIMARY KEY,
                origin_chat_title TEXT,
                destination_chat_id INTEGER,
                cloning_strategy TEXT DEFAULT 'unknown',
                last_synced_message_id INTEGER DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS DownloadTasks (
                origin_chat_id INTEGER PRIMARY KEY,
                origin_chat_title TEXT,
                last_downloaded_message_id INTEGER DEFAULT 0,
                total_videos INTEGER DEFAULT 0,
                downloaded_videos INTEGER DEFAULT 0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS PublishTasks (
                source_folder_path TEXT PRIMARY KEY,
                project_name TEXT NOT NULL,
                destination_chat_id INTEGER,
                current_step TEXT,
                status TEXT DEFAULT 'pending',
                is_started BOOLEAN DEFAULT 0,
                is_zipped BOOLEAN DEFAULT 0,
                is_reported BOOLEAN DEFAULT 0,
                is_reencode_auth BOOLEAN DEFAULT 0,
                is_reencoded BOOLEAN DEFAULT 0,
                is_joined BOOLEAN DEFAULT 0,
                is_timestamped BOOLEAN DEFAULT 0,
                is_upload_auth BOOLEAN DEFAULT 0,
                is_published BOOLEAN DEFAULT 0,
                last_uploaded_file TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );",
        )?;

        for (table, column, decl) in LATER_COLUMNS {
            if !Self::column_exists(conn, table, column)? {
                debug!(table, column, "absorbing new column into existing schema");
                conn.execute(
                    &format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"),
                    [],
                )?;
            }
        }
        Ok(())
    }

    fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            if name == column {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
