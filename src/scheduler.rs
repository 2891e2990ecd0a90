/*!
 * Bounded-concurrency task scheduler.
 *
 * Pending task ids drain from a FIFO queue into worker slots bounded by
 * `max_concurrent_tasks`. The limit is re-read from settings on every
 * dispatch, so raising it takes effect immediately and lowering it only
 * withholds newly freed slots; running tasks are never preempted. Each
 * worker owns a cancel/pause token pair observed by its pipeline at defined
 * suspension points. All status persistence for a task id happens on its
 * worker, so the store never sees concurrent writers for one task.
 */

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app_config::{LlmProvider, Settings, SettingsStore};
use crate::database::Repository;
use crate::database::models::{NewTask, TaskRecord, TaskStatus};
use crate::errors::TaskError;
use crate::pipeline::{PipelineOutcome, TranslationPipeline};
use crate::progress::{ProgressBus, TaskEvent};
use crate::providers::{ChatProvider, build_provider};
use crate::translation::BatchTranslator;

/// Builds a chat provider for a worker; tests substitute mock providers
pub type ProviderFactory =
    Arc<dyn Fn(&Settings, LlmProvider) -> Box<dyn ChatProvider> + Send + Sync>;

/// Result of the delete-all / delete-selected batch operations
#[derive(Debug, Default, serde::Serialize)]
pub struct DeleteOutcome {
    /// Tasks that were still active and had to be cancelled first
    pub cancelled_count: usize,
    /// Task rows removed
    pub deleted_count: usize,
}

struct RunningWorker {
    cancel: CancellationToken,
    pause: CancellationToken,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    repo: Repository,
    bus: Arc<ProgressBus>,
    settings: Arc<SettingsStore>,
    scratch_root: PathBuf,
    provider_factory: ProviderFactory,
    queue: Mutex<VecDeque<i64>>,
    running: Mutex<HashMap<i64, RunningWorker>>,
    wake: Notify,
    shutdown: CancellationToken,
}

/// Bounded-concurrency dispatcher for translation tasks
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    /// Create a scheduler with the default provider factory
    pub fn new(
        repo: Repository,
        bus: Arc<ProgressBus>,
        settings: Arc<SettingsStore>,
        scratch_root: PathBuf,
    ) -> Self {
        Self::with_provider_factory(
            repo,
            bus,
            settings,
            scratch_root,
            Arc::new(|settings: &Settings, provider: LlmProvider| {
                build_provider(settings, provider)
            }),
        )
    }

    /// Create a scheduler with a custom provider factory (tests)
    pub fn with_provider_factory(
        repo: Repository,
        bus: Arc<ProgressBus>,
        settings: Arc<SettingsStore>,
        scratch_root: PathBuf,
        provider_factory: ProviderFactory,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                repo,
                bus,
                settings,
                scratch_root,
                provider_factory,
                queue: Mutex::new(VecDeque::new()),
                running: Mutex::new(HashMap::new()),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Recover interrupted tasks, enqueue the pending backlog, and start
    /// the dispatch loop
    pub async fn start(&self) -> Result<()> {
        let recovered = self.inner.repo.recover_interrupted_tasks().await?;
        if recovered > 0 {
            info!("Recovered {} interrupted tasks to pending", recovered);
        }

        let pending = self.inner.repo.tasks_with_status(TaskStatus::Pending).await?;
        {
            let mut queue = self.inner.queue.lock();
            for task in &pending {
                queue.push_back(task.id);
            }
        }
        if !pending.is_empty() {
            info!("Enqueued {} pending tasks from the store", pending.len());
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.dispatch_loop().await;
        });
        Ok(())
    }

    /// Create and enqueue a task. Returns `None` when an active task
    /// already covers the (file, language) pair.
    pub async fn submit(&self, new: NewTask) -> Result<Option<TaskRecord>> {
        if self.inner.shutdown.is_cancelled() {
            return Err(anyhow::anyhow!("scheduler is shutting down"));
        }

        let created = self.inner.repo.create_task(new).await?;
        if let Some(task) = &created {
            self.inner.bus.publish(TaskEvent::NewTask { task_id: task.id });
            self.inner.queue.lock().push_back(task.id);
            self.inner.wake.notify_one();
            debug!("Task {} enqueued for {}", task.id, task.file_name);
        }
        Ok(created)
    }

    /// Cancel a task. Running tasks get the cooperative signal; queued and
    /// paused ones transition immediately.
    pub async fn cancel(&self, id: i64) -> Result<bool> {
        if let Some(worker) = self.inner.running.lock().get(&id) {
            worker.cancel.cancel();
            return Ok(true);
        }

        let Some(task) = self.inner.repo.get_task(id).await? else {
            return Ok(false);
        };
        match task.status {
            TaskStatus::Pending => {
                self.inner.queue.lock().retain(|&q| q != id);
                self.inner.set_status(id, TaskStatus::Cancelled, None).await?;
                self.inner.release_scratch(id);
                Ok(true)
            }
            TaskStatus::Paused => {
                self.inner.set_status(id, TaskStatus::Cancelled, None).await?;
                self.inner.release_scratch(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Pause a task. Running tasks pause at the next suspension point and
    /// persist a checkpoint; queued ones transition immediately.
    pub async fn pause(&self, id: i64) -> Result<bool> {
        if let Some(worker) = self.inner.running.lock().get(&id) {
            worker.pause.cancel();
            return Ok(true);
        }

        let Some(task) = self.inner.repo.get_task(id).await? else {
            return Ok(false);
        };
        match task.status {
            TaskStatus::Pending => {
                self.inner.queue.lock().retain(|&q| q != id);
                self.inner.set_status(id, TaskStatus::Paused, None).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Resume a paused task from its checkpoint
    pub async fn resume(&self, id: i64) -> Result<bool> {
        let Some(task) = self.inner.repo.get_task(id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Paused {
            return Ok(false);
        }

        self.inner.set_status(id, TaskStatus::Pending, None).await?;
        self.inner.queue.lock().push_back(id);
        self.inner.wake.notify_one();
        Ok(true)
    }

    /// Retry a task. Failed and cancelled runs restart from scratch;
    /// paused runs resume from their checkpoint.
    pub async fn retry(&self, id: i64) -> Result<bool> {
        let Some(task) = self.inner.repo.get_task(id).await? else {
            return Ok(false);
        };
        match task.status {
            TaskStatus::Failed | TaskStatus::Cancelled => {
                self.inner.repo.reset_task_for_retry(id).await?;
                self.inner.bus.publish(TaskEvent::Status {
                    task_id: id,
                    status: TaskStatus::Pending,
                });
                self.inner.queue.lock().push_back(id);
                self.inner.wake.notify_one();
                Ok(true)
            }
            TaskStatus::Paused => self.resume(id).await,
            _ => Ok(false),
        }
    }

    /// Delete a task, cancelling it first if still active.
    /// Returns whether a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        if let Some(worker) = self.inner.running.lock().get(&id) {
            worker.cancel.cancel();
        }
        self.inner.queue.lock().retain(|&q| q != id);

        let deleted = self.inner.repo.delete_task(id).await?;
        if deleted {
            self.inner.release_scratch(id);
        }
        Ok(deleted)
    }

    /// Pause every pending and processing task; returns the success count
    pub async fn pause_all(&self) -> Result<usize> {
        let mut ids: Vec<i64> = Vec::new();
        for status in [TaskStatus::Pending, TaskStatus::Processing] {
            for task in self.inner.repo.tasks_with_status(status).await? {
                ids.push(task.id);
            }
        }
        self.pause_selected(&ids).await
    }

    /// Pause the given tasks; each item is treated independently
    pub async fn pause_selected(&self, ids: &[i64]) -> Result<usize> {
        let mut paused = 0;
        for &id in ids {
            match self.pause(id).await {
                Ok(true) => paused += 1,
                Ok(false) => {}
                Err(e) => warn!("Pause of task {} failed: {}", id, e),
            }
        }
        Ok(paused)
    }

    /// Delete every task; returns cancel/delete counts
    pub async fn delete_all(&self) -> Result<DeleteOutcome> {
        let page = self.inner.repo.list_tasks(None, -1, 0).await?;
        let ids: Vec<i64> = page.tasks.iter().map(|t| t.id).collect();
        self.delete_selected(&ids).await
    }

    /// Delete the given tasks; each item is treated independently
    pub async fn delete_selected(&self, ids: &[i64]) -> Result<DeleteOutcome> {
        let mut outcome = DeleteOutcome::default();
        for &id in ids {
            let was_active = self
                .inner
                .repo
                .get_task(id)
                .await?
                .map(|t| t.status.is_active())
                .unwrap_or(false);

            match self.delete(id).await {
                Ok(true) => {
                    outcome.deleted_count += 1;
                    if was_active {
                        outcome.cancelled_count += 1;
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("Delete of task {} failed: {}", id, e),
            }
        }
        Ok(outcome)
    }

    /// Nudge the dispatcher after a settings change (e.g. a raised limit)
    pub fn notify_config_changed(&self) {
        self.inner.wake.notify_one();
    }

    /// Number of currently running workers
    pub fn running_count(&self) -> usize {
        self.inner.running.lock().len()
    }

    /// Number of queued task ids
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Drain for shutdown: refuse new work, signal every running task to
    /// pause (persisting checkpoints), and wait for workers to exit.
    pub async fn shutdown(&self) {
        info!("Scheduler shutting down, pausing running tasks");
        self.inner.shutdown.cancel();

        let workers: Vec<RunningWorker> = {
            let mut running = self.inner.running.lock();
            running.drain().map(|(_, w)| w).collect()
        };
        for worker in &workers {
            worker.pause.cancel();
        }
        for worker in workers {
            if let Err(e) = worker.handle.await {
                warn!("Worker did not shut down cleanly: {}", e);
            }
        }
        info!("Scheduler drained");
    }
}

impl SchedulerInner {
    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.dispatch_ready();
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
            }
        }
        debug!("Dispatch loop exited");
    }

    /// Fill free worker slots from the queue head, strictly FIFO
    fn dispatch_ready(self: &Arc<Self>) {
        loop {
            let limit = self.settings.current().max_concurrent_tasks;
            let mut running = self.running.lock();
            if running.len() >= limit {
                return;
            }
            let Some(id) = self.queue.lock().pop_front() else {
                return;
            };

            let cancel = CancellationToken::new();
            let pause = CancellationToken::new();
            let inner = Arc::clone(self);
            let (worker_cancel, worker_pause) = (cancel.clone(), pause.clone());
            let handle = tokio::spawn(async move {
                inner.run_worker(id, worker_cancel, worker_pause).await;
            });
            running.insert(
                id,
                RunningWorker {
                    cancel,
                    pause,
                    handle,
                },
            );
        }
    }

    async fn run_worker(
        self: Arc<Self>,
        id: i64,
        cancel: CancellationToken,
        pause: CancellationToken,
    ) {
        if let Err(e) = self.execute_task(id, cancel, pause).await {
            error!("Worker for task {} failed to persist state: {}", id, e);
        }
        self.running.lock().remove(&id);
        self.wake.notify_one();
    }

    async fn execute_task(
        &self,
        id: i64,
        cancel: CancellationToken,
        pause: CancellationToken,
    ) -> Result<()> {
        let Some(task) = self.repo.get_task(id).await? else {
            // Deleted while queued
            return Ok(());
        };
        if task.status != TaskStatus::Pending {
            debug!("Task {} no longer pending, skipping worker run", id);
            return Ok(());
        }

        self.set_status(id, TaskStatus::Processing, None).await?;

        let settings = self.settings.current();
        let provider_id: LlmProvider = task
            .llm_provider
            .parse()
            .unwrap_or(settings.default_llm);
        let provider = (self.provider_factory)(&settings, provider_id);
        let translator = BatchTranslator::with_provider(
            provider,
            task.source_language
                .clone()
                .unwrap_or_else(|| settings.source_language.clone()),
            task.target_language.clone(),
        );

        let pipeline = match TranslationPipeline::new(
            task,
            settings,
            self.repo.clone(),
            Arc::clone(&self.bus),
            translator,
            &self.scratch_root,
            cancel,
            pause,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.set_status(id, TaskStatus::Failed, Some(e.to_string())).await?;
                return Ok(());
            }
        };

        // The pipeline runs in its own task so a panic is trapped at the
        // join boundary instead of taking the worker down silently.
        let run = tokio::spawn(async move { pipeline.run().await });
        let outcome = match run.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                Err(TaskError::Internal("worker panicked".to_string()))
            }
            Err(_) => Err(TaskError::Internal("worker aborted".to_string())),
        };

        match outcome {
            Ok(PipelineOutcome::Completed) => {
                self.set_status(id, TaskStatus::Completed, None).await?;
            }
            Ok(PipelineOutcome::Paused) => {
                self.set_status(id, TaskStatus::Paused, None).await?;
            }
            Ok(PipelineOutcome::Cancelled) => {
                self.set_status(id, TaskStatus::Cancelled, None).await?;
            }
            Err(e) => {
                warn!("Task {} failed: {}", id, e);
                self.set_status(id, TaskStatus::Failed, Some(e.to_string())).await?;
            }
        }
        Ok(())
    }

    /// Persist a status transition and publish it on the bus
    async fn set_status(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        self.repo.update_task_status(id, status, error_message).await?;
        self.bus.publish(TaskEvent::Status {
            task_id: id,
            status,
        });
        Ok(())
    }

    /// Remove a task's scratch directory, tolerating its absence
    fn release_scratch(&self, id: i64) {
        let dir = self.scratch_root.join(id.to_string());
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!("Could not remove scratch for task {}: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_task(path: &str) -> NewTask {
        NewTask {
            file_path: path.to_string(),
            file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
            source_language: None,
            target_language: "Chinese".to_string(),
            llm_provider: "openai".to_string(),
            subtitle_track: None,
            force_override: false,
        }
    }

    fn scheduler_without_loop() -> (TaskScheduler, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::new_in_memory().unwrap();
        let bus = Arc::new(ProgressBus::new());
        let settings = Arc::new(SettingsStore::new(crate::app_config::Settings::default()));
        let scheduler = TaskScheduler::new(repo, bus, settings, dir.path().to_path_buf());
        (scheduler, dir)
    }

    #[tokio::test]
    async fn test_submit_enqueues_and_publishes_new_task() {
        let (scheduler, _dir) = scheduler_without_loop();
        let mut rx = scheduler.inner.bus.subscribe();

        let task = scheduler.submit(new_task("/m/a.srt")).await.unwrap().unwrap();
        assert_eq!(scheduler.queue_len(), 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            TaskEvent::NewTask { task_id: task.id }
        );
    }

    #[tokio::test]
    async fn test_submit_duplicate_active_returns_none() {
        let (scheduler, _dir) = scheduler_without_loop();
        scheduler.submit(new_task("/m/a.srt")).await.unwrap().unwrap();
        assert!(scheduler.submit(new_task("/m/a.srt")).await.unwrap().is_none());
        assert_eq!(scheduler.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_task_dequeues_and_transitions() {
        let (scheduler, _dir) = scheduler_without_loop();
        let task = scheduler.submit(new_task("/m/a.srt")).await.unwrap().unwrap();

        assert!(scheduler.cancel(task.id).await.unwrap());
        assert_eq!(scheduler.queue_len(), 0);

        let task = scheduler.inner.repo.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_terminal_task_is_refused() {
        let (scheduler, _dir) = scheduler_without_loop();
        let task = scheduler.submit(new_task("/m/a.srt")).await.unwrap().unwrap();
        scheduler
            .inner
            .set_status(task.id, TaskStatus::Completed, None)
            .await
            .unwrap();

        assert!(!scheduler.cancel(task.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_pause_pending_then_resume_restores_queue() {
        let (scheduler, _dir) = scheduler_without_loop();
        let task = scheduler.submit(new_task("/m/a.srt")).await.unwrap().unwrap();

        assert!(scheduler.pause(task.id).await.unwrap());
        assert_eq!(scheduler.queue_len(), 0);
        let record = scheduler.inner.repo.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Paused);

        assert!(scheduler.resume(task.id).await.unwrap());
        assert_eq!(scheduler.queue_len(), 1);
        let record = scheduler.inner.repo.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_retry_failed_resets_progress() {
        let (scheduler, _dir) = scheduler_without_loop();
        let task = scheduler.submit(new_task("/m/a.srt")).await.unwrap().unwrap();
        scheduler.inner.repo.update_task_progress(task.id, 60).await.unwrap();
        scheduler
            .inner
            .set_status(task.id, TaskStatus::Failed, Some("boom".to_string()))
            .await
            .unwrap();
        // The failed task is no longer queued
        scheduler.inner.queue.lock().clear();

        assert!(scheduler.retry(task.id).await.unwrap());
        let record = scheduler.inner.repo.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.progress, 0);
        assert_eq!(scheduler.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_retry_is_refused_for_non_retryable_statuses() {
        let (scheduler, _dir) = scheduler_without_loop();
        let task = scheduler.submit(new_task("/m/a.srt")).await.unwrap().unwrap();
        assert!(!scheduler.retry(task.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_selected_counts_active_cancellations() {
        let (scheduler, _dir) = scheduler_without_loop();
        let a = scheduler.submit(new_task("/m/a.srt")).await.unwrap().unwrap();
        let b = scheduler.submit(new_task("/m/b.srt")).await.unwrap().unwrap();
        scheduler
            .inner
            .set_status(b.id, TaskStatus::Completed, None)
            .await
            .unwrap();

        let outcome = scheduler.delete_selected(&[a.id, b.id, 999]).await.unwrap();
        assert_eq!(outcome.deleted_count, 2);
        assert_eq!(outcome.cancelled_count, 1);
        assert_eq!(scheduler.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_pause_all_counts_only_pausable_tasks() {
        let (scheduler, _dir) = scheduler_without_loop();
        scheduler.submit(new_task("/m/a.srt")).await.unwrap().unwrap();
        scheduler.submit(new_task("/m/b.srt")).await.unwrap().unwrap();
        let c = scheduler.submit(new_task("/m/c.srt")).await.unwrap().unwrap();
        scheduler
            .inner
            .set_status(c.id, TaskStatus::Failed, Some("x".to_string()))
            .await
            .unwrap();
        scheduler.inner.queue.lock().retain(|&q| q != c.id);

        let paused = scheduler.pause_all().await.unwrap();
        assert_eq!(paused, 2);
    }

    #[tokio::test]
    async fn test_submit_refused_after_shutdown() {
        let (scheduler, _dir) = scheduler_without_loop();
        scheduler.shutdown().await;
        assert!(scheduler.submit(new_task("/m/a.srt")).await.is_err());
    }
}
