/*!
 * Typed records for the persistence layer.
 */

use serde::{Deserialize, Serialize};

/// Lifecycle status of a translation task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued, waiting for a worker slot
    Pending,
    /// A worker is driving the pipeline
    Processing,
    /// Finished successfully
    Completed,
    /// Terminal failure; `error_message` explains why
    Failed,
    /// Cancelled by request
    Cancelled,
    /// Paused with a resumable checkpoint
    Paused,
}

impl TaskStatus {
    /// Statuses that hold the (file, language) uniqueness slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Paused)
    }

    /// Statuses a task can be retried from
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Paused)
    }

    /// All statuses, for stats enumeration
    pub fn all() -> &'static [TaskStatus] {
        &[
            Self::Pending,
            Self::Processing,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
            Self::Paused,
        ]
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// A persisted translation task
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// Monotonic task id
    pub id: i64,
    /// Absolute source file path
    pub file_path: String,
    /// Display file name
    pub file_name: String,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Progress percentage in [0, 100]
    pub progress: i64,
    /// Source language, if known
    pub source_language: Option<String>,
    /// Target language
    pub target_language: String,
    /// Provider id used for translation
    pub llm_provider: String,
    /// Explicit subtitle track index within the container
    pub subtitle_track: Option<i64>,
    /// Bypass the skip rules
    pub force_override: bool,
    /// Failure explanation, set iff status is failed
    pub error_message: Option<String>,
    /// RFC 3339 creation time
    pub created_at: String,
    /// RFC 3339 last update time
    pub updated_at: String,
    /// RFC 3339 completion time, set iff status is completed
    pub completed_at: Option<String>,
}

/// Parameters for creating a task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub file_path: String,
    pub file_name: String,
    pub source_language: Option<String>,
    pub target_language: String,
    pub llm_provider: String,
    pub subtitle_track: Option<i64>,
    pub force_override: bool,
}

/// A persisted directory watcher directive
#[derive(Debug, Clone, Serialize)]
pub struct WatcherRecord {
    /// Watcher id
    pub id: i64,
    /// Absolute directory path
    pub path: String,
    /// Whether scan and live monitoring are active
    pub enabled: bool,
    /// Target language for synthesized tasks
    pub target_language: String,
    /// Provider id for synthesized tasks
    pub llm_provider: String,
    /// RFC 3339 creation time
    pub created_at: String,
}

/// Parameters for creating a watcher
#[derive(Debug, Clone)]
pub struct NewWatcher {
    pub path: String,
    pub target_language: String,
    pub llm_provider: String,
}

/// Per-status task counts
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub paused: i64,
    pub total: i64,
}

/// One page of tasks plus paging metadata
#[derive(Debug, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<TaskRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
