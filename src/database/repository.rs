/*!
 * Repository layer for database operations.
 *
 * This module provides a high-level API for all database operations,
 * abstracting away the SQL details and providing type-safe access.
 */

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use super::connection::DatabaseConnection;
use super::models::{
    NewTask, NewWatcher, TaskPage, TaskRecord, TaskStats, TaskStatus, WatcherRecord,
};
use crate::app_config::Settings;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    /// Database connection
    db: DatabaseConnection,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn map_task_row(row: &rusqlite::Row) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_name: row.get(2)?,
        status: row
            .get::<_, String>(3)?
            .parse()
            .unwrap_or(TaskStatus::Pending),
        progress: row.get(4)?,
        source_language: row.get(5)?,
        target_language: row.get(6)?,
        llm_provider: row.get(7)?,
        subtitle_track: row.get(8)?,
        force_override: row.get(9)?,
        error_message: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        completed_at: row.get(13)?,
    })
}

const TASK_COLUMNS: &str = "id, file_path, file_name, status, progress, source_language, \
     target_language, llm_provider, subtitle_track, force_override, error_message, \
     created_at, updated_at, completed_at";

fn map_watcher_row(row: &rusqlite::Row) -> rusqlite::Result<WatcherRecord> {
    Ok(WatcherRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        enabled: row.get(2)?,
        target_language: row.get(3)?,
        llm_provider: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn get_task_sync(conn: &Connection, id: i64) -> Result<Option<TaskRecord>> {
    let task = conn
        .query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
            [id],
            map_task_row,
        )
        .optional()?;
    Ok(task)
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let db = DatabaseConnection::new_in_memory()?;
        Ok(Self::new(db))
    }

    // =========================================================================
    // Task Operations
    // =========================================================================

    /// Create a task unless an active one already holds the
    /// (file_path, target_language) slot. Returns `None` on duplicate.
    pub async fn create_task(&self, new: NewTask) -> Result<Option<TaskRecord>> {
        self.db
            .execute_async(move |conn| {
                let duplicate: bool = conn.query_row(
                    "SELECT COUNT(*) > 0 FROM tasks
                     WHERE file_path = ?1 AND target_language = ?2
                       AND status IN ('pending', 'processing', 'paused')",
                    params![new.file_path, new.target_language],
                    |row| row.get(0),
                )?;
                if duplicate {
                    return Ok(None);
                }

                let now = now_rfc3339();
                conn.execute(
                    "INSERT INTO tasks (file_path, file_name, status, progress, source_language,
                                        target_language, llm_provider, subtitle_track,
                                        force_override, created_at, updated_at)
                     VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    params![
                        new.file_path,
                        new.file_name,
                        new.source_language,
                        new.target_language,
                        new.llm_provider,
                        new.subtitle_track,
                        new.force_override,
                        now,
                    ],
                )?;

                let id = conn.last_insert_rowid();
                get_task_sync(conn, id)
            })
            .await
    }

    /// Get a task by id
    pub async fn get_task(&self, id: i64) -> Result<Option<TaskRecord>> {
        self.db.execute_async(move |conn| get_task_sync(conn, id)).await
    }

    /// List tasks with optional status filter, newest first
    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<TaskPage> {
        self.db
            .execute_async(move |conn| {
                let (total, tasks): (i64, Vec<TaskRecord>) = match status {
                    Some(status) => {
                        let status = status.to_string();
                        let total = conn.query_row(
                            "SELECT COUNT(*) FROM tasks WHERE status = ?1",
                            [&status],
                            |row| row.get(0),
                        )?;
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {} FROM tasks WHERE status = ?1
                             ORDER BY id DESC LIMIT ?2 OFFSET ?3",
                            TASK_COLUMNS
                        ))?;
                        let tasks = stmt
                            .query_map(params![status, limit, offset], map_task_row)?
                            .filter_map(|r| r.ok())
                            .collect();
                        (total, tasks)
                    }
                    None => {
                        let total =
                            conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {} FROM tasks ORDER BY id DESC LIMIT ?1 OFFSET ?2",
                            TASK_COLUMNS
                        ))?;
                        let tasks = stmt
                            .query_map(params![limit, offset], map_task_row)?
                            .filter_map(|r| r.ok())
                            .collect();
                        (total, tasks)
                    }
                };

                Ok(TaskPage {
                    tasks,
                    total,
                    limit,
                    offset,
                })
            })
            .await
    }

    /// All tasks currently in a given status, oldest first
    pub async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM tasks WHERE status = ?1 ORDER BY id ASC",
                    TASK_COLUMNS
                ))?;
                let tasks = stmt
                    .query_map([status.to_string()], map_task_row)?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(tasks)
            })
            .await
    }

    /// Per-status counts plus total
    pub async fn task_stats(&self) -> Result<TaskStats> {
        self.db
            .execute_async(|conn| {
                let mut stats = TaskStats::default();
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows.filter_map(|r| r.ok()) {
                    let (status, count) = row;
                    match status.parse::<TaskStatus>() {
                        Ok(TaskStatus::Pending) => stats.pending = count,
                        Ok(TaskStatus::Processing) => stats.processing = count,
                        Ok(TaskStatus::Completed) => stats.completed = count,
                        Ok(TaskStatus::Failed) => stats.failed = count,
                        Ok(TaskStatus::Cancelled) => stats.cancelled = count,
                        Ok(TaskStatus::Paused) => stats.paused = count,
                        Err(_) => {}
                    }
                    stats.total += count;
                }
                Ok(stats)
            })
            .await
    }

    /// Transition a task's status, maintaining the status invariants:
    /// `completed` sets `completed_at` and forces progress to 100,
    /// `failed` records the error message, every other status clears both.
    pub async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE tasks SET
                         status = ?1,
                         updated_at = ?2,
                         error_message = CASE WHEN ?1 = 'failed' THEN ?3 ELSE NULL END,
                         completed_at = CASE WHEN ?1 = 'completed' THEN ?2 ELSE NULL END,
                         progress = CASE WHEN ?1 = 'completed' THEN 100 ELSE progress END
                     WHERE id = ?4",
                    params![status.to_string(), now_rfc3339(), error_message, id],
                )?;
                Ok(())
            })
            .await
    }

    /// Update a task's progress percentage
    pub async fn update_task_progress(&self, id: i64, progress: i64) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE tasks SET progress = ?1, updated_at = ?2 WHERE id = ?3",
                    params![progress.clamp(0, 100), now_rfc3339(), id],
                )?;
                Ok(())
            })
            .await
    }

    /// Reset a task for a fresh run: pending, progress 0, no error
    pub async fn reset_task_for_retry(&self, id: i64) -> Result<()> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE tasks SET status = 'pending', progress = 0,
                                      error_message = NULL, completed_at = NULL, updated_at = ?1
                     WHERE id = ?2",
                    params![now_rfc3339(), id],
                )?;
                Ok(())
            })
            .await
    }

    /// Delete a task row; returns whether a row was removed
    pub async fn delete_task(&self, id: i64) -> Result<bool> {
        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
                Ok(deleted > 0)
            })
            .await
    }

    /// Whether an active task holds the (file, language) slot
    pub async fn has_active_task(&self, file_path: &str, target_language: &str) -> Result<bool> {
        let file_path = file_path.to_string();
        let target_language = target_language.to_string();
        self.db
            .execute_async(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT COUNT(*) > 0 FROM tasks
                     WHERE file_path = ?1 AND target_language = ?2
                       AND status IN ('pending', 'processing', 'paused')",
                    params![file_path, target_language],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
    }

    /// Crash recovery: tasks left in `processing` by a previous run go back
    /// to `pending`. Returns the number of recovered tasks.
    pub async fn recover_interrupted_tasks(&self) -> Result<usize> {
        self.db
            .execute_async(|conn| {
                let recovered = conn.execute(
                    "UPDATE tasks SET status = 'pending', updated_at = ?1
                     WHERE status = 'processing'",
                    [now_rfc3339()],
                )?;
                Ok(recovered)
            })
            .await
    }

    // =========================================================================
    // Watcher Operations
    // =========================================================================

    /// Create a watcher unless one already exists for the path.
    /// Returns `None` on duplicate.
    pub async fn create_watcher(&self, new: NewWatcher) -> Result<Option<WatcherRecord>> {
        self.db
            .execute_async(move |conn| {
                let duplicate: bool = conn.query_row(
                    "SELECT COUNT(*) > 0 FROM watchers WHERE path = ?1",
                    [&new.path],
                    |row| row.get(0),
                )?;
                if duplicate {
                    return Ok(None);
                }

                conn.execute(
                    "INSERT INTO watchers (path, enabled, target_language, llm_provider, created_at)
                     VALUES (?1, 1, ?2, ?3, ?4)",
                    params![new.path, new.target_language, new.llm_provider, now_rfc3339()],
                )?;

                let id = conn.last_insert_rowid();
                let watcher = conn
                    .query_row(
                        "SELECT id, path, enabled, target_language, llm_provider, created_at
                         FROM watchers WHERE id = ?1",
                        [id],
                        map_watcher_row,
                    )
                    .optional()?;
                Ok(watcher)
            })
            .await
    }

    /// Get a watcher by id
    pub async fn get_watcher(&self, id: i64) -> Result<Option<WatcherRecord>> {
        self.db
            .execute_async(move |conn| {
                let watcher = conn
                    .query_row(
                        "SELECT id, path, enabled, target_language, llm_provider, created_at
                         FROM watchers WHERE id = ?1",
                        [id],
                        map_watcher_row,
                    )
                    .optional()?;
                Ok(watcher)
            })
            .await
    }

    /// All watchers, oldest first
    pub async fn list_watchers(&self) -> Result<Vec<WatcherRecord>> {
        self.db
            .execute_async(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, path, enabled, target_language, llm_provider, created_at
                     FROM watchers ORDER BY id ASC",
                )?;
                let watchers = stmt
                    .query_map([], map_watcher_row)?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(watchers)
            })
            .await
    }

    /// Flip a watcher's enabled flag; returns whether a row changed
    pub async fn set_watcher_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        self.db
            .execute_async(move |conn| {
                let changed = conn.execute(
                    "UPDATE watchers SET enabled = ?1 WHERE id = ?2",
                    params![enabled, id],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    /// Delete a watcher; returns whether a row was removed
    pub async fn delete_watcher(&self, id: i64) -> Result<bool> {
        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute("DELETE FROM watchers WHERE id = ?1", [id])?;
                Ok(deleted > 0)
            })
            .await
    }

    // =========================================================================
    // History Operations
    // =========================================================================

    /// Record a successful completion; duplicates are ignored
    pub async fn insert_history(&self, file_path: &str, target_language: &str) -> Result<()> {
        let file_path = file_path.to_string();
        let target_language = target_language.to_string();
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO history (file_path, target_language, completed_at)
                     VALUES (?1, ?2, ?3)",
                    params![file_path, target_language, now_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }

    /// Whether a completion is on record for (file, language)
    pub async fn has_history(&self, file_path: &str, target_language: &str) -> Result<bool> {
        let file_path = file_path.to_string();
        let target_language = target_language.to_string();
        self.db
            .execute_async(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT COUNT(*) > 0 FROM history
                     WHERE file_path = ?1 AND target_language = ?2",
                    params![file_path, target_language],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
    }

    // =========================================================================
    // Settings Operations
    // =========================================================================

    /// Load the persisted settings singleton, if present
    pub async fn load_settings(&self) -> Result<Option<Settings>> {
        self.db
            .execute_async(|conn| {
                let payload: Option<String> = conn
                    .query_row("SELECT payload FROM settings WHERE id = 1", [], |row| {
                        row.get(0)
                    })
                    .optional()?;
                match payload {
                    Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    /// Persist the settings singleton
    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let payload = serde_json::to_string(settings)?;
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO settings (id, payload, updated_at) VALUES (1, ?1, ?2)",
                    params![payload, now_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }
}
