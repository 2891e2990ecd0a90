/*!
 * # subsentry
 *
 * A service that automates subtitle translation: it watches directories
 * for videos (MKV) and standalone subtitle files (SRT/ASS), extracts
 * embedded subtitle tracks, translates dialogue through LLM chat
 * providers, and writes translated or bilingual subtitles back next to
 * the sources.
 *
 * ## Architecture
 *
 * - `app_config`: persisted settings singleton with env seeding
 * - `app_controller`: facade the transport layer calls into
 * - `database`: SQLite store for tasks, watchers, settings, history
 * - `errors`: typed error taxonomy
 * - `file_utils`: scratch arenas, atomic and cross-device file moves
 * - `language_utils`: language alias table and ISO code handling
 * - `media_toolbox`: ffprobe/ffmpeg/mkvmerge orchestration
 * - `pipeline`: per-task extract -> chunk -> translate -> place machine
 * - `progress`: broadcast bus of task events
 * - `providers`: chat clients for the supported LLM APIs
 * - `scheduler`: bounded-concurrency FIFO task dispatcher
 * - `skip`: rules deciding whether a file needs translation
 * - `subtitle`: SRT/ASS codecs, encoding sniffing, chunking
 * - `translation`: prompt contract, batching, retry policy
 * - `watcher`: directory watchers with debounce
 */

pub mod app_config;
pub mod app_controller;
pub mod database;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod media_toolbox;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod scheduler;
pub mod skip;
pub mod subtitle;
pub mod translation;
pub mod watcher;

// Re-export main types for easier usage
pub use app_config::{LlmProvider, OutputFormat, Settings, SettingsStore};
pub use app_controller::Controller;
pub use database::{DatabaseConnection, Repository};
pub use progress::{ProgressBus, TaskEvent};
pub use scheduler::TaskScheduler;
pub use skip::SkipOracle;
pub use watcher::WatcherSupervisor;
