/*!
 * Skip oracle: decides whether a `(file, target language)` pair warrants a
 * translation task.
 *
 * The rules run in a fixed order and the first match wins. The decision is
 * pure given the same filesystem, container, and store state, so evaluating
 * twice yields the same answer.
 */

use anyhow::Result;
use log::warn;
use std::path::Path;
use std::sync::Arc;

use crate::app_config::{OutputFormat, Settings, SettingsStore};
use crate::database::Repository;
use crate::file_utils::FileManager;
use crate::language_utils;
use crate::media_toolbox::{MediaToolbox, SubtitleTrack};

/// Why a candidate was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The MKV already carries a subtitle track in the target language
    AlreadyHasTrack,
    /// The predicted output file already exists
    OutputExists,
    /// A completion is on record for this (file, language)
    History,
    /// The filename stem ends in a marker equal to the target language
    FilenameMarker,
    /// An active task already covers this (file, language)
    InProgress,
}

impl SkipReason {
    /// Stable identifier used in responses and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyHasTrack => "already_has_track",
            Self::OutputExists => "output_exists",
            Self::History => "history",
            Self::FilenameMarker => "filename_marker",
            Self::InProgress => "in_progress",
        }
    }
}

/// Outcome of a skip evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    /// Create a task for the candidate
    Proceed,
    /// Do nothing, for the given reason
    Skip(SkipReason),
}

/// Decides whether a candidate file should be translated
#[derive(Clone)]
pub struct SkipOracle {
    repo: Repository,
    settings: Arc<SettingsStore>,
}

impl SkipOracle {
    /// Create an oracle over the given store and settings
    pub fn new(repo: Repository, settings: Arc<SettingsStore>) -> Self {
        Self { repo, settings }
    }

    /// Evaluate a candidate, probing the container for MKV inputs.
    ///
    /// A failed track probe is logged and treated as "no matching track":
    /// one unreadable container must not poison directory ingestion.
    pub async fn evaluate(
        &self,
        path: &Path,
        target_language: &str,
        force_override: bool,
    ) -> Result<SkipDecision> {
        let tracks = if !force_override && is_mkv(path) {
            match MediaToolbox::list_tracks(path).await {
                Ok(tracks) => Some(tracks),
                Err(e) => {
                    warn!("Track probe failed for {:?}: {}", path, e);
                    None
                }
            }
        } else {
            None
        };

        self.evaluate_with_tracks(path, target_language, force_override, tracks.as_deref())
            .await
    }

    /// Evaluate a candidate against an already-known track list.
    ///
    /// This is the full rule chain; `evaluate` is a thin wrapper that
    /// fetches the track list first.
    pub async fn evaluate_with_tracks(
        &self,
        path: &Path,
        target_language: &str,
        force_override: bool,
        tracks: Option<&[SubtitleTrack]>,
    ) -> Result<SkipDecision> {
        // Rule 1: explicit override wins over everything
        if force_override {
            return Ok(SkipDecision::Proceed);
        }

        // Rule 2: the container already carries the target language
        if let Some(tracks) = tracks {
            let has_target = tracks.iter().any(|t| {
                t.language
                    .as_deref()
                    .map(|lang| language_utils::languages_match(lang, target_language))
                    .unwrap_or(false)
            });
            if has_target {
                return Ok(SkipDecision::Skip(SkipReason::AlreadyHasTrack));
            }
        }

        // Rule 3: the pipeline's output for this input already exists
        let settings = self.settings.current();
        if let Some(output) = predicted_output_path(path, target_language, &settings) {
            if output.exists() {
                return Ok(SkipDecision::Skip(SkipReason::OutputExists));
            }
        }

        // Rule 4: a past completion is on record
        let canonical = FileManager::canonicalize_lossy(path);
        if self
            .repo
            .has_history(&canonical.to_string_lossy(), target_language)
            .await?
        {
            return Ok(SkipDecision::Skip(SkipReason::History));
        }

        // Rule 5: the filename already names the target language
        if let Some(stem) = path.file_stem().map(|s| s.to_string_lossy()) {
            if let Some(marker) = language_utils::filename_marker(&stem) {
                if language_utils::languages_match(&marker, target_language) {
                    return Ok(SkipDecision::Skip(SkipReason::FilenameMarker));
                }
            }
        }

        // Rule 6: an active task already covers the pair
        if self
            .repo
            .has_active_task(&path.to_string_lossy(), target_language)
            .await?
        {
            return Ok(SkipDecision::Skip(SkipReason::InProgress));
        }

        Ok(SkipDecision::Proceed)
    }
}

fn is_mkv(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("mkv"))
        .unwrap_or(false)
}

/// The output file the pipeline would produce for this input, when that is
/// a distinct new file. In-place MKV replacement and invalid combinations
/// return `None`; those cases are governed by other rules.
pub fn predicted_output_path(
    path: &Path,
    target_language: &str,
    settings: &Settings,
) -> Option<std::path::PathBuf> {
    let parent = path.parent()?;
    let stem = path.file_stem()?.to_string_lossy();

    match settings.subtitle_output_format {
        OutputFormat::Srt | OutputFormat::Ass => {
            let tag = language_utils::output_tag(target_language);
            let ext = settings.subtitle_output_format.extension();
            Some(parent.join(format!("{}.{}.{}", stem, tag, ext)))
        }
        OutputFormat::Mkv => {
            if !is_mkv(path) {
                return None;
            }
            if settings.overwrite_mkv {
                // In-place replacement: the "output" is the source itself
                None
            } else {
                Some(parent.join(format!("{}.translated.mkv", stem)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::Settings;
    use crate::database::models::NewTask;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn oracle() -> SkipOracle {
        let repo = Repository::new_in_memory().unwrap();
        let settings = Arc::new(SettingsStore::new(Settings::default()));
        SkipOracle::new(repo, settings)
    }

    fn track(lang: Option<&str>) -> SubtitleTrack {
        SubtitleTrack {
            index: 2,
            codec_name: "subrip".to_string(),
            language: lang.map(str::to_string),
            title: None,
        }
    }

    #[tokio::test]
    async fn test_force_override_always_proceeds() {
        let oracle = oracle();
        // Even with a matching track present
        let decision = oracle
            .evaluate_with_tracks(
                Path::new("/m/a.mkv"),
                "Chinese",
                true,
                Some(&[track(Some("chi"))]),
            )
            .await
            .unwrap();
        assert_eq!(decision, SkipDecision::Proceed);
    }

    #[tokio::test]
    async fn test_existing_target_track_skips() {
        let oracle = oracle();
        let decision = oracle
            .evaluate_with_tracks(
                Path::new("/m/a.mkv"),
                "Chinese",
                false,
                Some(&[track(Some("chi"))]),
            )
            .await
            .unwrap();
        assert_eq!(decision, SkipDecision::Skip(SkipReason::AlreadyHasTrack));
    }

    #[tokio::test]
    async fn test_non_matching_tracks_proceed() {
        let oracle = oracle();
        let decision = oracle
            .evaluate_with_tracks(
                Path::new("/m/a.mkv"),
                "Chinese",
                false,
                Some(&[track(Some("eng")), track(None)]),
            )
            .await
            .unwrap();
        assert_eq!(decision, SkipDecision::Proceed);
    }

    #[tokio::test]
    async fn test_existing_output_file_skips() {
        let oracle = oracle();
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.srt");
        std::fs::write(&source, "x").unwrap();
        // Default settings produce a sibling <stem>.zh.srt
        std::fs::write(dir.path().join("movie.zh.srt"), "x").unwrap();

        let decision = oracle
            .evaluate_with_tracks(&source, "Chinese", false, None)
            .await
            .unwrap();
        assert_eq!(decision, SkipDecision::Skip(SkipReason::OutputExists));
    }

    #[tokio::test]
    async fn test_history_record_skips() {
        let repo = Repository::new_in_memory().unwrap();
        let settings = Arc::new(SettingsStore::new(Settings::default()));
        let oracle = SkipOracle::new(repo.clone(), settings);

        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.srt");
        std::fs::write(&source, "x").unwrap();
        let canonical = FileManager::canonicalize_lossy(&source);
        repo.insert_history(&canonical.to_string_lossy(), "Chinese")
            .await
            .unwrap();

        let decision = oracle
            .evaluate_with_tracks(&source, "Chinese", false, None)
            .await
            .unwrap();
        assert_eq!(decision, SkipDecision::Skip(SkipReason::History));
    }

    #[tokio::test]
    async fn test_filename_marker_matching_target_skips() {
        let oracle = oracle();
        let decision = oracle
            .evaluate_with_tracks(Path::new("/m/movie.zh-Hans.srt"), "Chinese", false, None)
            .await
            .unwrap();
        assert_eq!(decision, SkipDecision::Skip(SkipReason::FilenameMarker));

        // A marker for another language does not skip
        let decision = oracle
            .evaluate_with_tracks(Path::new("/m/movie.en.srt"), "Chinese", false, None)
            .await
            .unwrap();
        assert_eq!(decision, SkipDecision::Proceed);
    }

    #[tokio::test]
    async fn test_active_task_skips() {
        let repo = Repository::new_in_memory().unwrap();
        let settings = Arc::new(SettingsStore::new(Settings::default()));
        let oracle = SkipOracle::new(repo.clone(), settings);

        repo.create_task(NewTask {
            file_path: "/m/movie.srt".to_string(),
            file_name: "movie.srt".to_string(),
            source_language: None,
            target_language: "Chinese".to_string(),
            llm_provider: "openai".to_string(),
            subtitle_track: None,
            force_override: false,
        })
        .await
        .unwrap()
        .unwrap();

        let decision = oracle
            .evaluate_with_tracks(Path::new("/m/movie.srt"), "Chinese", false, None)
            .await
            .unwrap();
        assert_eq!(decision, SkipDecision::Skip(SkipReason::InProgress));
    }

    #[tokio::test]
    async fn test_decision_is_idempotent() {
        let oracle = oracle();
        let path = Path::new("/m/fresh.srt");
        let first = oracle
            .evaluate_with_tracks(path, "Chinese", false, None)
            .await
            .unwrap();
        let second = oracle
            .evaluate_with_tracks(path, "Chinese", false, None)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_predicted_output_paths_per_format() {
        let mut settings = Settings::default();
        let mkv = Path::new("/m/movie.mkv");
        let srt = Path::new("/m/movie.srt");

        // External srt output
        assert_eq!(
            predicted_output_path(mkv, "Chinese", &settings),
            Some(PathBuf::from("/m/movie.zh.srt"))
        );

        // New-container mkv output
        settings.subtitle_output_format = OutputFormat::Mkv;
        settings.overwrite_mkv = false;
        assert_eq!(
            predicted_output_path(mkv, "Chinese", &settings),
            Some(PathBuf::from("/m/movie.translated.mkv"))
        );

        // In-place replacement predicts nothing
        settings.overwrite_mkv = true;
        assert_eq!(predicted_output_path(mkv, "Chinese", &settings), None);

        // mkv output from a subtitle source is not predictable output
        assert_eq!(predicted_output_path(srt, "Chinese", &settings), None);
    }
}
