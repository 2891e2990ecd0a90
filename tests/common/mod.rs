//! Shared fixtures for the integration suite.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use subsentry::app_config::{Settings, SettingsStore};
use subsentry::database::Repository;
use subsentry::database::models::NewTask;
use subsentry::errors::ProviderError;
use subsentry::progress::ProgressBus;
use subsentry::providers::ChatProvider;
use subsentry::providers::mock::MockChatProvider;
use subsentry::scheduler::{ProviderFactory, TaskScheduler};

/// Dictionary used by the scripted providers
pub const DICTIONARY: &[(&str, &str)] = &[
    ("Hello", "你好"),
    ("World", "世界"),
    ("Goodbye", "再见"),
];

/// A three-unit SRT fixture with known timecodes
pub const SAMPLE_SRT: &str = "1\n00:00:01,000 --> 00:00:04,000\nHello\n\n2\n00:00:05,000 --> 00:00:08,000\nWorld\n\n3\n00:00:09,000 --> 00:00:12,000\nGoodbye\n\n";

/// The translated counterpart: timecodes reproduced, text replaced
pub const SAMPLE_SRT_TRANSLATED: &str = "1\n00:00:01,000 --> 00:00:04,000\n你好\n\n2\n00:00:05,000 --> 00:00:08,000\n世界\n\n3\n00:00:09,000 --> 00:00:12,000\n再见\n\n";

/// An SRT document with `n` one-line units ("Line 1" .. "Line n")
pub fn srt_with_units(n: usize) -> String {
    let mut out = String::new();
    for i in 1..=n {
        let start = (i as u64) * 10_000;
        out.push_str(&format!(
            "{}\n{} --> {}\nLine {}\n\n",
            i,
            srt_timestamp(start),
            srt_timestamp(start + 5_000),
            i
        ));
    }
    out
}

/// What the echo mock produces for `srt_with_units(n)`
pub fn srt_with_units_translated(n: usize) -> String {
    let mut out = String::new();
    for i in 1..=n {
        let start = (i as u64) * 10_000;
        out.push_str(&format!(
            "{}\n{} --> {}\nLine {} [translated]\n\n",
            i,
            srt_timestamp(start),
            srt_timestamp(start + 5_000),
            i
        ));
    }
    out
}

fn srt_timestamp(ms: u64) -> String {
    format!(
        "{:02}:{:02}:{:02},{:03}",
        ms / 3_600_000,
        (ms % 3_600_000) / 60_000,
        (ms % 60_000) / 1_000,
        ms % 1_000
    )
}

/// A dictionary mock provider (echoes unknown texts with a suffix)
pub fn dictionary_mock() -> MockChatProvider {
    MockChatProvider::with_dictionary(DICTIONARY.iter().copied())
}

/// Provider factory producing fresh dictionary mocks
pub fn dictionary_factory() -> ProviderFactory {
    Arc::new(|_settings: &Settings, _provider: subsentry::app_config::LlmProvider| {
        Box::new(dictionary_mock()) as Box<dyn ChatProvider>
    })
}

/// Wraps a provider and fires a pause signal after N successful calls
pub struct PauseAfter {
    inner: MockChatProvider,
    pause: CancellationToken,
    after: usize,
    calls: AtomicUsize,
}

impl PauseAfter {
    pub fn new(inner: MockChatProvider, pause: CancellationToken, after: usize) -> Self {
        Self {
            inner,
            pause,
            after,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChatProvider for PauseAfter {
    async fn chat(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let result = self.inner.chat(system, user).await;
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.pause.cancel();
        }
        result
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.inner.test_connection().await
    }

    fn name(&self) -> &str {
        "PauseAfter"
    }
}

/// Wraps a provider and counts calls through a shared counter
pub struct CountingProvider {
    inner: MockChatProvider,
    calls: Arc<AtomicUsize>,
}

impl CountingProvider {
    pub fn new(inner: MockChatProvider, calls: Arc<AtomicUsize>) -> Self {
        Self { inner, calls }
    }
}

#[async_trait]
impl ChatProvider for CountingProvider {
    async fn chat(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.chat(system, user).await
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.inner.test_connection().await
    }

    fn name(&self) -> &str {
        "Counting"
    }
}

/// Shared state for [`GateProvider`] instances across workers
#[derive(Clone)]
pub struct GateState {
    pub open: CancellationToken,
    pub active: Arc<AtomicUsize>,
    pub max_seen: Arc<AtomicUsize>,
}

impl GateState {
    pub fn new() -> Self {
        Self {
            open: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
            max_seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn release(&self) {
        self.open.cancel();
    }
}

/// Blocks every chat call until the shared gate opens, tracking how many
/// calls were in flight at once
pub struct GateProvider {
    inner: MockChatProvider,
    gate: GateState,
}

impl GateProvider {
    pub fn new(gate: GateState) -> Self {
        Self {
            inner: dictionary_mock(),
            gate,
        }
    }
}

#[async_trait]
impl ChatProvider for GateProvider {
    async fn chat(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let now = self.gate.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.gate.max_seen.fetch_max(now, Ordering::SeqCst);
        self.gate.open.cancelled().await;
        let result = self.inner.chat(system, user).await;
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "Gate"
    }
}

/// Adds a fixed delay before every chat call
pub struct DelayProvider {
    inner: MockChatProvider,
    delay: Duration,
}

impl DelayProvider {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: dictionary_mock(),
            delay,
        }
    }
}

#[async_trait]
impl ChatProvider for DelayProvider {
    async fn chat(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.chat(system, user).await
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "Delay"
    }
}

/// A full scheduler stack over an in-memory store and temp scratch space
pub struct TestStack {
    pub repo: Repository,
    pub settings: Arc<SettingsStore>,
    pub bus: Arc<ProgressBus>,
    pub scheduler: TaskScheduler,
    pub data: TempDir,
}

impl TestStack {
    pub fn new(settings: Settings, factory: ProviderFactory) -> Self {
        let data = tempfile::tempdir().expect("tempdir");
        let repo = Repository::new_in_memory().expect("in-memory repo");
        let settings = Arc::new(SettingsStore::new(settings));
        let bus = Arc::new(ProgressBus::new());
        let scheduler = TaskScheduler::with_provider_factory(
            repo.clone(),
            Arc::clone(&bus),
            Arc::clone(&settings),
            data.path().join("scratch"),
            factory,
        );
        Self {
            repo,
            settings,
            bus,
            scheduler,
            data,
        }
    }

    pub fn scratch_root(&self) -> std::path::PathBuf {
        self.data.path().join("scratch")
    }
}

/// Task parameters for a file with this crate's defaults
pub fn task_for(path: &std::path::Path) -> NewTask {
    NewTask {
        file_path: path.to_string_lossy().to_string(),
        file_name: path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string(),
        source_language: None,
        target_language: "Chinese".to_string(),
        llm_provider: "openai".to_string(),
        subtitle_track: None,
        force_override: false,
    }
}
