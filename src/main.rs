use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use subsentry::app_config::{Settings, SettingsStore};
use subsentry::app_controller::Controller;
use subsentry::database::{DatabaseConnection, Repository};
use subsentry::file_utils::FileManager;
use subsentry::progress::ProgressBus;
use subsentry::scheduler::TaskScheduler;
use subsentry::skip::SkipOracle;
use subsentry::watcher::WatcherSupervisor;

/// subsentry - automatic subtitle translation service
///
/// Watches directories for videos and subtitle files and translates them
/// with LLM chat providers. External binaries ffmpeg, ffprobe, and mkvmerge
/// must be on PATH for MKV handling.
#[derive(Parser, Debug)]
#[command(name = "subsentry")]
#[command(version)]
#[command(about = "Automatic subtitle translation service")]
struct Cli {
    /// Data directory for the task store and scratch space
    #[arg(long, default_value = "data", env = "SUBSENTRY_DATA_DIR")]
    data_dir: PathBuf,

    /// Log filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "SUBSENTRY_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.clone()),
    )
    .init();

    FileManager::ensure_dir(&cli.data_dir)?;
    let db = DatabaseConnection::new(cli.data_dir.join("app.db"))?;
    let repo = Repository::new(db);

    // Environment variables seed the settings on first run; afterwards the
    // persisted singleton wins.
    let settings = match repo.load_settings().await? {
        Some(settings) => settings,
        None => {
            let settings = Settings::from_env();
            settings
                .validate()
                .context("Initial settings are invalid")?;
            repo.save_settings(&settings).await?;
            info!("Seeded settings from environment defaults");
            settings
        }
    };
    let settings = Arc::new(SettingsStore::new(settings));

    let bus = Arc::new(ProgressBus::new());
    let scratch_root = cli.data_dir.join("scratch");
    let scheduler = TaskScheduler::new(
        repo.clone(),
        Arc::clone(&bus),
        Arc::clone(&settings),
        scratch_root,
    );
    let oracle = SkipOracle::new(repo.clone(), Arc::clone(&settings));
    let supervisor = WatcherSupervisor::new(repo.clone(), scheduler.clone(), oracle.clone());
    let controller = Controller::new(
        repo,
        settings,
        scheduler,
        supervisor,
        oracle,
        Arc::clone(&bus),
    );

    controller.start().await?;

    // Mirror bus traffic into the logs for headless operation
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        debug!("event: {}", json);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    info!("subsentry running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    controller.shutdown().await;
    Ok(())
}
