/*!
 * Per-task translation pipeline.
 *
 * One worker drives one pipeline through extract -> chunk -> translate ->
 * assemble -> place. Cancel and pause are cooperative: they are observed
 * between chunks, before external tool invocations, and before filesystem
 * writes; inside an LLM call, cancellation aborts the in-flight request.
 * Pausing persists a checkpoint in the task's scratch directory so a resume
 * continues at the next chunk and reproduces the uninterrupted output.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::app_config::{OutputFormat, Settings};
use crate::database::Repository;
use crate::database::models::TaskRecord;
use crate::errors::TaskError;
use crate::file_utils::{FileManager, ScratchArena};
use crate::language_utils;
use crate::media_toolbox::{MediaToolbox, SubtitleTrack};
use crate::progress::{ProgressBus, TaskEvent};
use crate::subtitle::{self, SubtitleDocument, SubtitleFormat};
use crate::translation::{BatchError, BatchTranslator};

/// Checkpoint file name inside the scratch directory
const CHECKPOINT_FILE: &str = "checkpoint.json";

/// How a pipeline run ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Output placed, history recorded
    Completed,
    /// Paused between chunks; checkpoint and scratch retained
    Paused,
    /// Cancelled; scratch released
    Cancelled,
}

/// Resumable state persisted when a task pauses mid-translation
#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    /// Number of fully translated chunks
    chunks_done: usize,
    /// Chunking parameters the run was using; resume re-chunks with these
    /// so chunk boundaries line up even if settings changed meanwhile
    chunk_max_chars: usize,
    chunk_max_units: usize,
    /// Translations of the completed chunks, in order
    translated_chunks: Vec<Vec<String>>,
}

/// Progress formula for the TRANSLATING phase: the last 5% is reserved for
/// assembly and placement
fn translation_progress(chunks_done: usize, chunks_total: usize) -> i64 {
    if chunks_total == 0 {
        return 0;
    }
    (100.0 * chunks_done as f64 / chunks_total as f64 * 0.95).floor() as i64
}

/// Rewrite line-break tokens when text moves between formats
fn adapt_line_breaks(text: &str, from: SubtitleFormat, to: SubtitleFormat) -> String {
    if from == to {
        return text.to_string();
    }
    match to {
        SubtitleFormat::Srt => text.replace("\\N", "\n"),
        SubtitleFormat::Ass => text.replace('\n', "\\N"),
    }
}

/// Pick the track to extract when the task does not name one: prefer the
/// source language, then any track that is not already the target, then the
/// first track.
pub(crate) fn select_track<'a>(
    tracks: &'a [SubtitleTrack],
    explicit_index: Option<i64>,
    source_language: &str,
    target_language: &str,
) -> Result<&'a SubtitleTrack, TaskError> {
    if let Some(wanted) = explicit_index {
        return tracks
            .iter()
            .find(|t| t.index as i64 == wanted)
            .ok_or_else(|| {
                TaskError::Consistency(format!(
                    "subtitle track {} not present in container",
                    wanted
                ))
            });
    }

    if !source_language.eq_ignore_ascii_case("auto") {
        if let Some(track) = tracks.iter().find(|t| {
            t.language
                .as_deref()
                .map(|lang| language_utils::languages_match(lang, source_language))
                .unwrap_or(false)
        }) {
            return Ok(track);
        }
    }

    if let Some(track) = tracks.iter().find(|t| {
        t.language
            .as_deref()
            .map(|lang| !language_utils::languages_match(lang, target_language))
            .unwrap_or(true)
    }) {
        return Ok(track);
    }

    tracks
        .first()
        .ok_or_else(|| TaskError::Consistency("no subtitle tracks found in container".to_string()))
}

fn is_mkv(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("mkv"))
        .unwrap_or(false)
}

/// Drives one task from source file to placed output
pub struct TranslationPipeline {
    task: TaskRecord,
    settings: Arc<Settings>,
    repo: Repository,
    bus: Arc<ProgressBus>,
    translator: BatchTranslator,
    scratch: ScratchArena,
    cancel: CancellationToken,
    pause: CancellationToken,
}

impl TranslationPipeline {
    /// Build a pipeline for a task, creating its scratch arena
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task: TaskRecord,
        settings: Arc<Settings>,
        repo: Repository,
        bus: Arc<ProgressBus>,
        translator: BatchTranslator,
        scratch_root: &Path,
        cancel: CancellationToken,
        pause: CancellationToken,
    ) -> Result<Self, TaskError> {
        let scratch = ScratchArena::create(scratch_root, task.id)?;
        Ok(Self {
            task,
            settings,
            repo,
            bus,
            translator,
            scratch,
            cancel,
            pause,
        })
    }

    /// Run the pipeline to a terminal outcome or error.
    ///
    /// Scratch is released on every exit except PAUSED.
    pub async fn run(&self) -> Result<PipelineOutcome, TaskError> {
        let result = self.run_inner().await;

        let keep_scratch = matches!(result, Ok(PipelineOutcome::Paused));
        if !keep_scratch {
            if let Err(e) = self.scratch.release() {
                warn!("Task {}: scratch cleanup failed: {}", self.task.id, e);
            }
        }

        result
    }

    async fn run_inner(&self) -> Result<PipelineOutcome, TaskError> {
        let source = PathBuf::from(&self.task.file_path);
        if !source.exists() {
            return Err(TaskError::Internal(format!(
                "source file missing: {}",
                self.task.file_path
            )));
        }

        // EXTRACTING
        if self.cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled);
        }
        let (subtitle_path, source_format) = self.obtain_subtitle(&source).await?;

        // CHUNKING
        let mut doc = SubtitleDocument::parse_file(&subtitle_path)?;
        let originals: Vec<String> = doc.units.iter().map(|u| u.text.clone()).collect();

        let checkpoint = self.load_checkpoint();
        let (max_chars, max_units) = match &checkpoint {
            Some(cp) => (cp.chunk_max_chars, cp.chunk_max_units),
            None => (self.settings.chunk_max_chars, self.settings.chunk_max_units),
        };
        let chunks = subtitle::split_chunks(&doc.units, max_chars, max_units);
        let chunks_total = chunks.len();

        // Replay checkpointed chunks without resending them
        let mut translated_chunks: Vec<Vec<String>> = Vec::with_capacity(chunks_total);
        let mut resume_at = 0;
        if let Some(cp) = checkpoint {
            for (i, chunk) in chunks
                .iter()
                .enumerate()
                .take(cp.chunks_done.min(cp.translated_chunks.len()))
            {
                let texts = &cp.translated_chunks[i];
                if texts.len() != chunk.len() {
                    warn!(
                        "Task {}: checkpoint no longer matches chunking, retranslating from chunk {}",
                        self.task.id, i
                    );
                    break;
                }
                doc.apply_translations(chunk.clone(), texts);
                translated_chunks.push(texts.clone());
                resume_at = i + 1;
            }
            if resume_at > 0 {
                info!(
                    "Task {}: resuming at chunk {}/{}",
                    self.task.id,
                    resume_at + 1,
                    chunks_total
                );
            }
        }

        // TRANSLATING
        for (i, chunk) in chunks.iter().enumerate().skip(resume_at) {
            if self.cancel.is_cancelled() {
                return Ok(PipelineOutcome::Cancelled);
            }
            if self.pause.is_cancelled() {
                self.write_checkpoint(&Checkpoint {
                    chunks_done: i,
                    chunk_max_chars: max_chars,
                    chunk_max_units: max_units,
                    translated_chunks: translated_chunks.clone(),
                })?;
                info!("Task {}: paused after {}/{} chunks", self.task.id, i, chunks_total);
                return Ok(PipelineOutcome::Paused);
            }

            let texts: Vec<String> = originals[chunk.clone()].to_vec();
            let translated = match self.translator.translate_batch(&texts, &self.cancel).await {
                Ok(t) => t,
                Err(BatchError::Cancelled) => return Ok(PipelineOutcome::Cancelled),
                Err(BatchError::Provider(e)) => return Err(TaskError::Provider(e)),
            };
            if translated.len() != texts.len() {
                return Err(TaskError::Consistency(format!(
                    "chunk {}: expected {} translations, got {}",
                    i,
                    texts.len(),
                    translated.len()
                )));
            }

            doc.apply_translations(chunk.clone(), &translated);
            translated_chunks.push(translated);

            let progress = translation_progress(i + 1, chunks_total);
            self.repo.update_task_progress(self.task.id, progress).await?;
            self.bus.publish(TaskEvent::Progress {
                task_id: self.task.id,
                progress,
            });
        }

        // ASSEMBLING
        let output_doc_format = match self.settings.subtitle_output_format {
            OutputFormat::Srt => SubtitleFormat::Srt,
            OutputFormat::Ass => SubtitleFormat::Ass,
            // Muxed output keeps the track's native format
            OutputFormat::Mkv => source_format,
        };
        let mut out_doc = doc.convert_to(output_doc_format);

        if self.settings.bilingual_output {
            let separator = match self.settings.bilingual_separator.as_deref() {
                Some(sep) if !sep.is_empty() => sep.to_string(),
                _ => output_doc_format.newline_token().to_string(),
            };
            for (unit, original) in out_doc.units.iter_mut().zip(&originals) {
                let original = adapt_line_breaks(original, source_format, output_doc_format);
                unit.text = subtitle::bilingual_text(
                    &unit.text,
                    &original,
                    &separator,
                    self.settings.bilingual_original_first,
                );
            }
        }

        let serialized = out_doc.serialize();

        // PLACING
        if self.cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled);
        }
        self.place_output(&source, source_format, output_doc_format, &serialized)
            .await?;

        // DONE
        let canonical = FileManager::canonicalize_lossy(&source);
        self.repo
            .insert_history(&canonical.to_string_lossy(), &self.task.target_language)
            .await?;

        info!("Task {}: completed", self.task.id);
        Ok(PipelineOutcome::Completed)
    }

    /// Resolve the dialogue source: the file itself for SRT/ASS input, an
    /// extracted track for MKV input
    async fn obtain_subtitle(
        &self,
        source: &Path,
    ) -> Result<(PathBuf, SubtitleFormat), TaskError> {
        if !is_mkv(source) {
            let format = SubtitleFormat::from_path(source)?;
            return Ok((source.to_path_buf(), format));
        }

        let tracks = MediaToolbox::list_tracks(source).await?;
        if tracks.is_empty() {
            return Err(TaskError::Consistency(
                "no subtitle tracks found in container".to_string(),
            ));
        }

        let source_language = self
            .task
            .source_language
            .as_deref()
            .unwrap_or(&self.settings.source_language);
        let track = select_track(
            &tracks,
            self.task.subtitle_track,
            source_language,
            &self.task.target_language,
        )?;

        let extracted = MediaToolbox::extract_track(source, track, &self.scratch).await?;
        let format = match track.native_extension() {
            "ass" => SubtitleFormat::Ass,
            _ => SubtitleFormat::Srt,
        };
        Ok((extracted, format))
    }

    /// Write the finished subtitle to its destination per settings
    async fn place_output(
        &self,
        source: &Path,
        _source_format: SubtitleFormat,
        output_doc_format: SubtitleFormat,
        serialized: &str,
    ) -> Result<(), TaskError> {
        let parent = source
            .parent()
            .ok_or_else(|| TaskError::Internal("source file has no parent directory".to_string()))?;
        let stem = source.file_stem().unwrap_or_default().to_string_lossy();
        let tag = language_utils::output_tag(&self.task.target_language);

        match self.settings.subtitle_output_format {
            OutputFormat::Srt | OutputFormat::Ass => {
                let ext = self.settings.subtitle_output_format.extension();
                let staging = self.scratch.path(&format!("output.{}", ext));
                FileManager::write_atomic(&staging, serialized.as_bytes())?;

                let final_path = parent.join(format!("{}.{}.{}", stem, tag, ext));
                FileManager::persist(&staging, &final_path)?;
                info!("Task {}: wrote {:?}", self.task.id, final_path);
            }
            OutputFormat::Mkv => {
                if !is_mkv(source) {
                    return Err(TaskError::InvalidOutputFormat(
                        "cannot produce an MKV from a standalone subtitle source".to_string(),
                    ));
                }

                let sub_file = self
                    .scratch
                    .path(&format!("translated.{}", output_doc_format.extension()));
                FileManager::write_atomic(&sub_file, serialized.as_bytes())?;

                let track_name = language_utils::get_language_name(&self.task.target_language)
                    .unwrap_or_else(|_| self.task.target_language.clone());

                if self.settings.overwrite_mkv {
                    MediaToolbox::replace_in_place(source, &sub_file, &tag, &track_name, false)
                        .await?;
                } else {
                    let merged = self.scratch.path("merged.mkv");
                    MediaToolbox::merge_subtitle(
                        source, &merged, &sub_file, &tag, &track_name, false,
                    )
                    .await?;
                    let final_path = parent.join(format!("{}.translated.mkv", stem));
                    FileManager::persist(&merged, &final_path)?;
                    info!("Task {}: wrote {:?}", self.task.id, final_path);
                }
            }
        }

        Ok(())
    }

    fn load_checkpoint(&self) -> Option<Checkpoint> {
        let path = self.scratch.path(CHECKPOINT_FILE);
        if !path.exists() {
            return None;
        }
        match FileManager::read_to_string(&path)
            .and_then(|json| Ok(serde_json::from_str(&json)?))
        {
            Ok(cp) => Some(cp),
            Err(e) => {
                warn!("Task {}: unreadable checkpoint, starting over: {}", self.task.id, e);
                None
            }
        }
    }

    fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), TaskError> {
        let json = serde_json::to_string(checkpoint)
            .map_err(|e| TaskError::Internal(format!("checkpoint serialization: {}", e)))?;
        FileManager::write_atomic(self.scratch.path(CHECKPOINT_FILE), json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(index: usize, lang: Option<&str>) -> SubtitleTrack {
        SubtitleTrack {
            index,
            codec_name: "subrip".to_string(),
            language: lang.map(str::to_string),
            title: None,
        }
    }

    #[test]
    fn test_translation_progress_formula() {
        // 4 of 10 chunks: floor(40 * 0.95) = 38
        assert_eq!(translation_progress(4, 10), 38);
        assert_eq!(translation_progress(0, 10), 0);
        // All chunks done still leaves headroom for assembly
        assert_eq!(translation_progress(10, 10), 95);
        assert_eq!(translation_progress(0, 0), 0);
    }

    #[test]
    fn test_translation_progress_is_monotonic() {
        let mut last = -1;
        for done in 0..=37 {
            let p = translation_progress(done, 37);
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn test_select_track_prefers_explicit_index() {
        let tracks = vec![track(2, Some("eng")), track(3, Some("jpn"))];
        let selected = select_track(&tracks, Some(3), "auto", "Chinese").unwrap();
        assert_eq!(selected.index, 3);

        assert!(select_track(&tracks, Some(9), "auto", "Chinese").is_err());
    }

    #[test]
    fn test_select_track_prefers_source_language_match() {
        let tracks = vec![track(2, Some("jpn")), track(3, Some("eng"))];
        let selected = select_track(&tracks, None, "English", "Chinese").unwrap();
        assert_eq!(selected.index, 3);
    }

    #[test]
    fn test_select_track_avoids_target_language() {
        let tracks = vec![track(2, Some("chi")), track(3, Some("eng"))];
        let selected = select_track(&tracks, None, "auto", "Chinese").unwrap();
        assert_eq!(selected.index, 3);
    }

    #[test]
    fn test_select_track_falls_back_to_first() {
        let tracks = vec![track(2, Some("chi"))];
        let selected = select_track(&tracks, None, "auto", "Chinese").unwrap();
        assert_eq!(selected.index, 2);

        assert!(select_track(&[], None, "auto", "Chinese").is_err());
    }

    #[test]
    fn test_adapt_line_breaks_between_formats() {
        assert_eq!(
            adapt_line_breaks("a\\Nb", SubtitleFormat::Ass, SubtitleFormat::Srt),
            "a\nb"
        );
        assert_eq!(
            adapt_line_breaks("a\nb", SubtitleFormat::Srt, SubtitleFormat::Ass),
            "a\\Nb"
        );
        assert_eq!(
            adapt_line_breaks("a\nb", SubtitleFormat::Srt, SubtitleFormat::Srt),
            "a\nb"
        );
    }

    #[test]
    fn test_checkpoint_json_round_trip() {
        let cp = Checkpoint {
            chunks_done: 4,
            chunk_max_chars: 3000,
            chunk_max_units: 50,
            translated_chunks: vec![vec!["你好".to_string()], vec!["世界".to_string()]],
        };
        let json = serde_json::to_string(&cp).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.chunks_done, 4);
        assert_eq!(back.translated_chunks.len(), 2);
    }
}
