/*!
 * Watcher supervisor: turns filesystem activity into task submissions.
 *
 * Each enabled watcher runs a startup scan (non-recursive) and a live
 * monitor (recursive) over its directory. New files are held until their
 * size has been stable for the debounce window, so partially written
 * downloads are not ingested. Every candidate passes through the skip
 * oracle before a task is created.
 */

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::database::Repository;
use crate::database::models::{NewTask, NewWatcher, WatcherRecord};
use crate::file_utils::FileManager;
use crate::scheduler::TaskScheduler;
use crate::skip::{SkipDecision, SkipOracle};

/// A file is considered complete once its size has been stable this long
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

/// How often pending files are re-checked for stability
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// A file seen by the live monitor, awaiting size stability
#[derive(Debug)]
struct PendingFile {
    size: u64,
    since: Instant,
}

/// Record a filesystem event into the pending map
fn note_event(pending: &mut HashMap<PathBuf, PendingFile>, result: notify::Result<Event>) {
    let event = match result {
        Ok(event) => event,
        Err(e) => {
            warn!("Watch event error: {}", e);
            return;
        }
    };

    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }

    for path in event.paths {
        if !FileManager::is_media_file(&path) {
            continue;
        }
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        let size = metadata.len();
        match pending.get_mut(&path) {
            Some(entry) if entry.size == size => {
                // Same size: let the existing stability clock run
            }
            Some(entry) => {
                entry.size = size;
                entry.since = Instant::now();
            }
            None => {
                pending.insert(
                    path,
                    PendingFile {
                        size,
                        since: Instant::now(),
                    },
                );
            }
        }
    }
}

/// Collect files whose size has been stable through the debounce window
fn sweep_stable(pending: &mut HashMap<PathBuf, PendingFile>) -> Vec<PathBuf> {
    let mut ready = Vec::new();

    pending.retain(|path, entry| {
        if entry.since.elapsed() < DEBOUNCE_WINDOW {
            return true;
        }
        match std::fs::metadata(path) {
            Ok(metadata) if metadata.len() == entry.size => {
                ready.push(path.clone());
                false
            }
            Ok(metadata) => {
                // Still growing: restart the clock
                entry.size = metadata.len();
                entry.since = Instant::now();
                true
            }
            // Vanished before it settled
            Err(_) => false,
        }
    });

    ready.sort();
    ready
}

struct ActiveWatch {
    stop: CancellationToken,
}

struct SupervisorInner {
    repo: Repository,
    scheduler: TaskScheduler,
    oracle: SkipOracle,
    active: Mutex<HashMap<i64, ActiveWatch>>,
}

/// Runs one watch task per enabled watcher
#[derive(Clone)]
pub struct WatcherSupervisor {
    inner: Arc<SupervisorInner>,
}

impl WatcherSupervisor {
    /// Create a supervisor over the given store, scheduler, and oracle
    pub fn new(repo: Repository, scheduler: TaskScheduler, oracle: SkipOracle) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                repo,
                scheduler,
                oracle,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start watch tasks for every enabled watcher in the store
    pub async fn start(&self) -> Result<()> {
        let watchers = self.inner.repo.list_watchers().await?;
        let enabled = watchers.iter().filter(|w| w.enabled).count();
        for watcher in watchers.into_iter().filter(|w| w.enabled) {
            self.spawn_watch(watcher);
        }
        if enabled > 0 {
            info!("Started {} directory watchers", enabled);
        }
        Ok(())
    }

    /// Create and start a new watcher. Returns `None` when the path
    /// already has one.
    pub async fn create(&self, new: NewWatcher) -> Result<Option<WatcherRecord>> {
        let created = self.inner.repo.create_watcher(new).await?;
        if let Some(watcher) = &created {
            self.spawn_watch(watcher.clone());
        }
        Ok(created)
    }

    /// Flip a watcher's enabled flag, starting or stopping its watch task.
    /// Returns the updated record.
    pub async fn toggle(&self, id: i64) -> Result<Option<WatcherRecord>> {
        let Some(watcher) = self.inner.repo.get_watcher(id).await? else {
            return Ok(None);
        };

        let enabled = !watcher.enabled;
        self.inner.repo.set_watcher_enabled(id, enabled).await?;

        if enabled {
            let mut updated = watcher;
            updated.enabled = true;
            self.spawn_watch(updated.clone());
            Ok(Some(updated))
        } else {
            self.stop_watch(id);
            let mut updated = watcher;
            updated.enabled = false;
            Ok(Some(updated))
        }
    }

    /// Delete a watcher, tearing down its watch task
    pub async fn delete(&self, id: i64) -> Result<bool> {
        self.stop_watch(id);
        self.inner.repo.delete_watcher(id).await
    }

    /// Stop every watch task (shutdown)
    pub fn stop_all(&self) {
        let mut active = self.inner.active.lock();
        for (_, watch) in active.drain() {
            watch.stop.cancel();
        }
    }

    /// Number of live watch tasks
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    fn spawn_watch(&self, watcher: WatcherRecord) {
        let stop = CancellationToken::new();
        {
            let mut active = self.inner.active.lock();
            if let Some(previous) = active.insert(watcher.id, ActiveWatch { stop: stop.clone() }) {
                previous.stop.cancel();
            }
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.watch_loop(watcher, stop).await;
        });
    }

    fn stop_watch(&self, id: i64) {
        if let Some(watch) = self.inner.active.lock().remove(&id) {
            watch.stop.cancel();
        }
    }
}

impl SupervisorInner {
    async fn watch_loop(self: Arc<Self>, watcher: WatcherRecord, stop: CancellationToken) {
        let root = PathBuf::from(&watcher.path);

        // Startup scan: immediate children only
        match FileManager::find_media_files(&root, false) {
            Ok(files) => {
                for file in files {
                    if stop.is_cancelled() {
                        return;
                    }
                    self.submit_candidate(&watcher, &file).await;
                }
            }
            Err(e) => warn!("Watcher {}: startup scan failed: {}", watcher.id, e),
        }

        // Live monitor: recursive creation/rename-into events
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut fs_watcher =
            match notify::recommended_watcher(move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            }) {
                Ok(w) => w,
                Err(e) => {
                    error!("Watcher {}: could not create monitor: {}", watcher.id, e);
                    return;
                }
            };
        if let Err(e) = fs_watcher.watch(&root, RecursiveMode::Recursive) {
            error!("Watcher {}: could not watch {:?}: {}", watcher.id, root, e);
            return;
        }
        debug!("Watcher {}: monitoring {:?}", watcher.id, root);

        let mut pending: HashMap<PathBuf, PendingFile> = HashMap::new();
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                Some(event) = rx.recv() => note_event(&mut pending, event),
                _ = tick.tick() => {
                    for file in sweep_stable(&mut pending) {
                        self.submit_candidate(&watcher, &file).await;
                    }
                }
            }
        }
        debug!("Watcher {}: stopped", watcher.id);
    }

    async fn submit_candidate(&self, watcher: &WatcherRecord, path: &Path) {
        match self
            .oracle
            .evaluate(path, &watcher.target_language, false)
            .await
        {
            Ok(SkipDecision::Proceed) => {
                let new = NewTask {
                    file_path: path.to_string_lossy().to_string(),
                    file_name: path
                        .file_name()
                        .unwrap_or_default()
                        .to_string_lossy()
                        .to_string(),
                    source_language: None,
                    target_language: watcher.target_language.clone(),
                    llm_provider: watcher.llm_provider.clone(),
                    subtitle_track: None,
                    force_override: false,
                };
                match self.scheduler.submit(new).await {
                    Ok(Some(task)) => {
                        info!("Watcher {}: created task {} for {:?}", watcher.id, task.id, path);
                    }
                    Ok(None) => debug!("Watcher {}: {:?} already active", watcher.id, path),
                    Err(e) => warn!("Watcher {}: submit failed for {:?}: {}", watcher.id, path, e),
                }
            }
            Ok(SkipDecision::Skip(reason)) => {
                debug!(
                    "Watcher {}: skipping {:?} ({})",
                    watcher.id,
                    path,
                    reason.as_str()
                );
            }
            Err(e) => warn!("Watcher {}: skip evaluation failed for {:?}: {}", watcher.id, path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{Settings, SettingsStore};
    use crate::progress::ProgressBus;
    use tempfile::tempdir;

    fn supervisor(scratch: &Path) -> (WatcherSupervisor, Repository, TaskScheduler) {
        let repo = Repository::new_in_memory().unwrap();
        let bus = Arc::new(ProgressBus::new());
        let settings = Arc::new(SettingsStore::new(Settings::default()));
        let scheduler = TaskScheduler::new(
            repo.clone(),
            bus,
            Arc::clone(&settings),
            scratch.to_path_buf(),
        );
        let oracle = SkipOracle::new(repo.clone(), settings);
        let supervisor = WatcherSupervisor::new(repo.clone(), scheduler.clone(), oracle);
        (supervisor, repo, scheduler)
    }

    #[test]
    fn test_sweep_holds_files_inside_debounce_window() {
        let mut pending = HashMap::new();
        pending.insert(
            PathBuf::from("/nonexistent/file.mkv"),
            PendingFile {
                size: 10,
                since: Instant::now(),
            },
        );
        assert!(sweep_stable(&mut pending).is_empty());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_sweep_releases_stable_files_and_drops_vanished_ones() {
        let dir = tempdir().unwrap();
        let stable = dir.path().join("done.srt");
        std::fs::write(&stable, b"123456").unwrap();

        let old = Instant::now() - Duration::from_secs(3);
        let mut pending = HashMap::new();
        pending.insert(stable.clone(), PendingFile { size: 6, since: old });
        pending.insert(
            PathBuf::from("/vanished/file.mkv"),
            PendingFile { size: 99, since: old },
        );

        let ready = sweep_stable(&mut pending);
        assert_eq!(ready, vec![stable]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_sweep_restarts_clock_for_growing_files() {
        let dir = tempdir().unwrap();
        let growing = dir.path().join("partial.mkv");
        std::fs::write(&growing, b"0123456789").unwrap();

        let mut pending = HashMap::new();
        pending.insert(
            growing.clone(),
            PendingFile {
                size: 4, // recorded before the file grew
                since: Instant::now() - Duration::from_secs(3),
            },
        );

        assert!(sweep_stable(&mut pending).is_empty());
        let entry = pending.get(&growing).unwrap();
        assert_eq!(entry.size, 10);
        assert!(entry.since.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_note_event_tracks_only_media_files() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("movie.mkv");
        let other = dir.path().join("notes.txt");
        std::fs::write(&media, b"x").unwrap();
        std::fs::write(&other, b"x").unwrap();

        let mut pending = HashMap::new();
        let event = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(media.clone())
            .add_path(other);
        note_event(&mut pending, Ok(event));

        assert_eq!(pending.len(), 1);
        assert!(pending.contains_key(&media));
    }

    #[tokio::test]
    async fn test_startup_scan_submits_surviving_candidates() {
        let scratch = tempdir().unwrap();
        let media_dir = tempdir().unwrap();
        std::fs::write(
            media_dir.path().join("a.srt"),
            b"1\n00:00:01,000 --> 00:00:02,000\nHi\n\n",
        )
        .unwrap();
        // A file whose name already carries the target language is skipped
        std::fs::write(media_dir.path().join("b.zh.srt"), b"x").unwrap();

        let (supervisor, repo, scheduler) = supervisor(scratch.path());
        let created = supervisor
            .create(NewWatcher {
                path: media_dir.path().to_string_lossy().to_string(),
                target_language: "Chinese".to_string(),
                llm_provider: "openai".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert!(created.enabled);
        assert_eq!(supervisor.active_count(), 1);

        // The scan runs on a spawned task; poll briefly for its submission
        for _ in 0..50 {
            if scheduler.queue_len() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(scheduler.queue_len(), 1);
        let page = repo.list_tasks(None, 10, 0).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(page.tasks[0].file_path.ends_with("a.srt"));
    }

    #[tokio::test]
    async fn test_toggle_stops_and_restarts_watch() {
        let scratch = tempdir().unwrap();
        let media_dir = tempdir().unwrap();
        let (supervisor, _repo, _scheduler) = supervisor(scratch.path());

        let watcher = supervisor
            .create(NewWatcher {
                path: media_dir.path().to_string_lossy().to_string(),
                target_language: "Chinese".to_string(),
                llm_provider: "openai".to_string(),
            })
            .await
            .unwrap()
            .unwrap();

        let toggled = supervisor.toggle(watcher.id).await.unwrap().unwrap();
        assert!(!toggled.enabled);
        assert_eq!(supervisor.active_count(), 0);

        let toggled = supervisor.toggle(watcher.id).await.unwrap().unwrap();
        assert!(toggled.enabled);
        assert_eq!(supervisor.active_count(), 1);

        assert!(supervisor.delete(watcher.id).await.unwrap());
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_watcher_path_is_rejected() {
        let scratch = tempdir().unwrap();
        let media_dir = tempdir().unwrap();
        let (supervisor, _repo, _scheduler) = supervisor(scratch.path());

        let new = NewWatcher {
            path: media_dir.path().to_string_lossy().to_string(),
            target_language: "Chinese".to_string(),
            llm_provider: "openai".to_string(),
        };
        assert!(supervisor.create(new.clone()).await.unwrap().is_some());
        assert!(supervisor.create(new).await.unwrap().is_none());
        assert_eq!(supervisor.active_count(), 1);
    }
}
