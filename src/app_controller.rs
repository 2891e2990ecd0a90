/*!
 * Controller facade.
 *
 * Every operation the transport layer (HTTP/WebSocket) exposes maps onto a
 * public method here with serde-ready request/response types. The
 * controller validates input, consults the skip oracle, and delegates to
 * the scheduler, supervisor, and repository; it holds no task state of its
 * own.
 */

use std::sync::Arc;

use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_config::{LlmProvider, Settings, SettingsStore};
use crate::database::Repository;
use crate::database::models::{NewTask, NewWatcher, TaskPage, TaskRecord, TaskStats, WatcherRecord};
use crate::errors::UserError;
use crate::file_utils::FileManager;
use crate::language_utils;
use crate::media_toolbox::{MediaToolbox, SubtitleTrack};
use crate::progress::ProgressBus;
use crate::scheduler::{DeleteOutcome, TaskScheduler};
use crate::skip::{SkipDecision, SkipOracle, SkipReason};
use crate::translation::{BatchTranslator, HealthStatus};
use crate::watcher::WatcherSupervisor;

/// Failures surfaced to API callers
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Invalid request; maps to a 4xx response
    #[error(transparent)]
    User(#[from] UserError),
    /// Infrastructure failure; maps to a 5xx response
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Request body for creating one task
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTaskRequest {
    pub file_path: String,
    pub target_language: Option<String>,
    pub llm_provider: Option<String>,
    pub subtitle_track: Option<i64>,
    #[serde(default)]
    pub force_override: bool,
}

/// Request body for ingesting a directory
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateDirectoryRequest {
    pub directory_path: String,
    pub target_language: Option<String>,
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub force_override: bool,
}

/// Result of creating one task: either a task or a benign skip
#[derive(Debug)]
pub enum CreateTaskOutcome {
    Created(TaskRecord),
    Skipped(SkipReason),
}

/// Result of directory ingestion
#[derive(Debug, Serialize)]
pub struct DirectoryCreateResult {
    pub created_count: usize,
    pub task_ids: Vec<i64>,
}

/// One entry in a directory listing
#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Request body for creating a watcher
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWatcherRequest {
    pub path: String,
    pub target_language: Option<String>,
    pub llm_provider: Option<String>,
}

/// One provider in the enumeration endpoint
#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub default_model: &'static str,
    pub models: &'static [&'static str],
}

/// One supported language
#[derive(Debug, Serialize)]
pub struct LanguageInfo {
    pub name: &'static str,
    pub tag: &'static str,
}

/// Request body for probing a provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TestLlmRequest {
    pub provider: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Result of a provider probe
#[derive(Debug, Serialize)]
pub struct TestLlmResult {
    pub ok: bool,
    pub message: String,
}

/// Service facade tying together scheduler, watchers, settings, and store
#[derive(Clone)]
pub struct Controller {
    repo: Repository,
    settings: Arc<SettingsStore>,
    scheduler: TaskScheduler,
    supervisor: WatcherSupervisor,
    oracle: SkipOracle,
    bus: Arc<ProgressBus>,
}

impl Controller {
    /// Wire up the facade from its collaborators
    pub fn new(
        repo: Repository,
        settings: Arc<SettingsStore>,
        scheduler: TaskScheduler,
        supervisor: WatcherSupervisor,
        oracle: SkipOracle,
        bus: Arc<ProgressBus>,
    ) -> Self {
        Self {
            repo,
            settings,
            scheduler,
            supervisor,
            oracle,
            bus,
        }
    }

    /// Start the scheduler loop and the directory watchers
    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        self.supervisor.start().await?;
        Ok(())
    }

    /// Drain shutdown: stop watchers, pause running tasks, persist state
    pub async fn shutdown(&self) {
        self.supervisor.stop_all();
        self.scheduler.shutdown().await;
    }

    /// The progress bus, for event subscribers
    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// List tasks, optionally filtered by status
    pub async fn list_tasks(
        &self,
        status: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<TaskPage, ControllerError> {
        let status = match status.filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse().map_err(UserError::InvalidSetting)?),
            None => None,
        };
        let limit = limit.unwrap_or(50).clamp(1, 500);
        let offset = offset.unwrap_or(0).max(0);
        Ok(self.repo.list_tasks(status, limit, offset).await?)
    }

    /// Per-status task counts
    pub async fn task_stats(&self) -> Result<TaskStats, ControllerError> {
        Ok(self.repo.task_stats().await?)
    }

    /// Fetch one task
    pub async fn get_task(&self, id: i64) -> Result<TaskRecord, ControllerError> {
        self.repo
            .get_task(id)
            .await?
            .ok_or_else(|| UserError::TaskNotFound(id).into())
    }

    /// Create a task for one file, honoring the skip rules
    pub async fn create_task(
        &self,
        request: CreateTaskRequest,
    ) -> Result<CreateTaskOutcome, ControllerError> {
        let path = FileManager::expand_tilde(&request.file_path);
        if !FileManager::file_exists(&path) {
            return Err(UserError::FileNotFound(path).into());
        }
        if !FileManager::is_media_file(&path) {
            return Err(UserError::UnsupportedFile(request.file_path.clone()).into());
        }

        let settings = self.settings.current();
        let target_language = request
            .target_language
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| settings.target_language.clone());
        let provider = self.resolve_provider(request.llm_provider.as_deref())?;

        match self
            .oracle
            .evaluate(&path, &target_language, request.force_override)
            .await?
        {
            SkipDecision::Skip(reason) => {
                info!("Create request for {:?} skipped: {}", path, reason.as_str());
                Ok(CreateTaskOutcome::Skipped(reason))
            }
            SkipDecision::Proceed => {
                let new = NewTask {
                    file_path: path.to_string_lossy().to_string(),
                    file_name: path
                        .file_name()
                        .unwrap_or_default()
                        .to_string_lossy()
                        .to_string(),
                    source_language: None,
                    target_language: target_language.clone(),
                    llm_provider: provider.id().to_string(),
                    subtitle_track: request.subtitle_track,
                    force_override: request.force_override,
                };
                match self.scheduler.submit(new).await? {
                    Some(task) => Ok(CreateTaskOutcome::Created(task)),
                    None => Err(UserError::DuplicateActiveTask {
                        file_path: path.to_string_lossy().to_string(),
                        target_language,
                    }
                    .into()),
                }
            }
        }
    }

    /// Create tasks for every eligible file under a directory
    pub async fn create_directory_tasks(
        &self,
        request: CreateDirectoryRequest,
    ) -> Result<DirectoryCreateResult, ControllerError> {
        let dir = FileManager::expand_tilde(&request.directory_path);
        if !FileManager::dir_exists(&dir) {
            return Err(UserError::NotADirectory(dir).into());
        }

        let settings = self.settings.current();
        let target_language = request
            .target_language
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| settings.target_language.clone());
        let provider = self.resolve_provider(request.llm_provider.as_deref())?;

        let files = FileManager::find_media_files(&dir, request.recursive)
            .map_err(ControllerError::Internal)?;

        let mut task_ids = Vec::new();
        for file in files {
            let decision = self
                .oracle
                .evaluate(&file, &target_language, request.force_override)
                .await?;
            if !matches!(decision, SkipDecision::Proceed) {
                continue;
            }

            let new = NewTask {
                file_path: file.to_string_lossy().to_string(),
                file_name: file
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .to_string(),
                source_language: None,
                target_language: target_language.clone(),
                llm_provider: provider.id().to_string(),
                subtitle_track: None,
                force_override: request.force_override,
            };
            if let Some(task) = self.scheduler.submit(new).await? {
                task_ids.push(task.id);
            }
        }

        info!(
            "Directory ingestion of {:?} created {} tasks",
            dir,
            task_ids.len()
        );
        Ok(DirectoryCreateResult {
            created_count: task_ids.len(),
            task_ids,
        })
    }

    /// Delete a task, cancelling it first if active
    pub async fn delete_task(&self, id: i64) -> Result<(), ControllerError> {
        if self.scheduler.delete(id).await? {
            Ok(())
        } else {
            Err(UserError::TaskNotFound(id).into())
        }
    }

    /// Re-enqueue a failed/cancelled/paused task
    pub async fn retry_task(&self, id: i64) -> Result<TaskRecord, ControllerError> {
        let task = self.get_task(id).await?;
        if !self.scheduler.retry(id).await? {
            return Err(UserError::InvalidTransition {
                id,
                status: task.status.to_string(),
                operation: "retry",
            }
            .into());
        }
        self.get_task(id).await
    }

    /// Pause every pausable task; returns the count
    pub async fn pause_all(&self) -> Result<usize, ControllerError> {
        Ok(self.scheduler.pause_all().await?)
    }

    /// Pause the given tasks; returns the count
    pub async fn pause_selected(&self, ids: &[i64]) -> Result<usize, ControllerError> {
        Ok(self.scheduler.pause_selected(ids).await?)
    }

    /// Delete every task
    pub async fn delete_all(&self) -> Result<DeleteOutcome, ControllerError> {
        Ok(self.scheduler.delete_all().await?)
    }

    /// Delete the given tasks
    pub async fn delete_selected(&self, ids: &[i64]) -> Result<DeleteOutcome, ControllerError> {
        Ok(self.scheduler.delete_selected(ids).await?)
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// List a directory, directories first. `~` expands to the user home.
    pub async fn browse_files(&self, path: &str) -> Result<Vec<FileEntry>, ControllerError> {
        let dir = FileManager::expand_tilde(path);
        if !FileManager::dir_exists(&dir) {
            return Err(UserError::NotADirectory(dir).into());
        }

        let mut entries = Vec::new();
        let read_dir = std::fs::read_dir(&dir)
            .map_err(|e| ControllerError::Internal(anyhow::anyhow!("{:?}: {}", dir, e)))?;
        for entry in read_dir.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path().to_string_lossy().to_string(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then(a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Subtitle tracks of a media container
    pub async fn subtitle_tracks(
        &self,
        file_path: &str,
    ) -> Result<Vec<SubtitleTrack>, ControllerError> {
        let path = FileManager::expand_tilde(file_path);
        if !FileManager::file_exists(&path) {
            return Err(UserError::FileNotFound(path).into());
        }
        let tracks = MediaToolbox::list_tracks(&path)
            .await
            .map_err(|e| ControllerError::Internal(e.into()))?;
        Ok(tracks)
    }

    // =========================================================================
    // Watchers
    // =========================================================================

    /// All watchers
    pub async fn list_watchers(&self) -> Result<Vec<WatcherRecord>, ControllerError> {
        Ok(self.repo.list_watchers().await?)
    }

    /// Create and start a watcher
    pub async fn create_watcher(
        &self,
        request: CreateWatcherRequest,
    ) -> Result<WatcherRecord, ControllerError> {
        let dir = FileManager::expand_tilde(&request.path);
        if !FileManager::dir_exists(&dir) {
            return Err(UserError::NotADirectory(dir).into());
        }

        let settings = self.settings.current();
        let target_language = request
            .target_language
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| settings.target_language.clone());
        let provider = self.resolve_provider(request.llm_provider.as_deref())?;

        let new = NewWatcher {
            path: dir.to_string_lossy().to_string(),
            target_language,
            llm_provider: provider.id().to_string(),
        };
        match self.supervisor.create(new).await? {
            Some(watcher) => Ok(watcher),
            None => Err(UserError::WatcherExists(dir).into()),
        }
    }

    /// Enable/disable a watcher
    pub async fn toggle_watcher(&self, id: i64) -> Result<WatcherRecord, ControllerError> {
        self.supervisor
            .toggle(id)
            .await?
            .ok_or_else(|| UserError::WatcherNotFound(id).into())
    }

    /// Delete a watcher and its resources
    pub async fn delete_watcher(&self, id: i64) -> Result<(), ControllerError> {
        if self.supervisor.delete(id).await? {
            Ok(())
        } else {
            Err(UserError::WatcherNotFound(id).into())
        }
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// The current settings snapshot
    pub fn get_settings(&self) -> Arc<Settings> {
        self.settings.current()
    }

    /// Validate, persist, and apply new settings
    pub async fn update_settings(
        &self,
        settings: Settings,
    ) -> Result<Arc<Settings>, ControllerError> {
        let snapshot = self.settings.replace(settings).map_err(UserError::from)?;
        self.repo.save_settings(&snapshot).await?;
        // A raised concurrency limit can free worker slots immediately
        self.scheduler.notify_config_changed();
        Ok(snapshot)
    }

    /// Enumerated providers with their models
    pub fn llm_providers(&self) -> Vec<ProviderInfo> {
        LlmProvider::all()
            .iter()
            .map(|p| ProviderInfo {
                id: p.id(),
                name: p.display_name(),
                default_model: p.default_model(),
                models: p.known_models(),
            })
            .collect()
    }

    /// Supported target languages
    pub fn languages(&self) -> Vec<LanguageInfo> {
        language_utils::SUPPORTED_LANGUAGES
            .iter()
            .map(|(name, tag)| LanguageInfo { name, tag })
            .collect()
    }

    /// Probe a provider configuration with a trivial translation
    pub async fn test_llm(&self, request: TestLlmRequest) -> Result<TestLlmResult, ControllerError> {
        let provider: LlmProvider = request.provider.parse().map_err(UserError::from)?;

        let mut settings = (*self.settings.current()).clone();
        match provider {
            LlmProvider::OpenAI => {
                if let Some(key) = request.api_key {
                    settings.openai_api_key = key;
                }
                if let Some(model) = request.model {
                    settings.openai_model = model;
                }
                if let Some(url) = request.base_url {
                    settings.openai_base_url = Some(url);
                }
            }
            LlmProvider::Claude => {
                if let Some(key) = request.api_key {
                    settings.claude_api_key = key;
                }
                if let Some(model) = request.model {
                    settings.claude_model = model;
                }
            }
            LlmProvider::DeepSeek => {
                if let Some(key) = request.api_key {
                    settings.deepseek_api_key = key;
                }
                if let Some(model) = request.model {
                    settings.deepseek_model = model;
                }
                if let Some(url) = request.base_url {
                    settings.deepseek_base_url = Some(url);
                }
            }
            LlmProvider::Glm => {
                if let Some(key) = request.api_key {
                    settings.glm_api_key = key;
                }
                if let Some(model) = request.model {
                    settings.glm_model = model;
                }
                if let Some(url) = request.base_url {
                    settings.glm_base_url = Some(url);
                }
            }
        }

        let translator = BatchTranslator::from_settings(&settings, provider);
        let result = match translator.healthcheck().await {
            HealthStatus::Ok => TestLlmResult {
                ok: true,
                message: format!("{} connection successful", provider.display_name()),
            },
            HealthStatus::AuthError(message) => TestLlmResult { ok: false, message },
            HealthStatus::NetError(message) => TestLlmResult { ok: false, message },
        };
        Ok(result)
    }

    fn resolve_provider(&self, raw: Option<&str>) -> Result<LlmProvider, UserError> {
        match raw.filter(|p| !p.is_empty()) {
            Some(raw) => raw.parse(),
            None => Ok(self.settings.current().default_llm),
        }
    }
}
