/*!
 * External media tool orchestration.
 *
 * Wraps ffprobe (track introspection), ffmpeg (subtitle extraction), and
 * mkvmerge (subtitle muxing). All three must be on PATH. Tool failures
 * surface as [`ToolError`] carrying the last kilobyte of stderr.
 */

use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;

use crate::errors::ToolError;
use crate::file_utils::{FileManager, ScratchArena};

/// Maximum stderr carried into an error message
const STDERR_TAIL_BYTES: usize = 1024;

/// One subtitle stream inside a media container
#[derive(Debug, Clone, Serialize)]
pub struct SubtitleTrack {
    /// Stream index within the container
    pub index: usize,
    /// Codec name as reported by ffprobe (subrip, ass, ...)
    pub codec_name: String,
    /// ISO 639 language tag, when tagged
    pub language: Option<String>,
    /// Track title, when tagged
    pub title: Option<String>,
}

impl SubtitleTrack {
    /// Native subtitle file extension for this track's codec
    pub fn native_extension(&self) -> &'static str {
        match self.codec_name.as_str() {
            "ass" | "ssa" => "ass",
            _ => "srt",
        }
    }
}

/// Orchestrator for the external media binaries
pub struct MediaToolbox;

impl MediaToolbox {
    /// List the subtitle streams of a media container
    pub async fn list_tracks<P: AsRef<Path>>(path: P) -> Result<Vec<SubtitleTrack>, ToolError> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy();

        let output = run_tool(
            "ffprobe",
            &[
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-select_streams",
                "s",
                &path_str,
            ],
        )
        .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        let json: Value = serde_json::from_str(&stdout).map_err(|e| ToolError {
            command: format!("ffprobe {}", path_str),
            exit_code: output.status.code(),
            stderr_tail: format!("unparseable ffprobe output: {}", e),
        })?;

        let mut tracks = Vec::new();
        if let Some(streams) = json.get("streams").and_then(|s| s.as_array()) {
            for stream in streams {
                let index = stream
                    .get("index")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize)
                    .unwrap_or(0);
                let codec_name = stream
                    .get("codec_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let language = stream
                    .get("tags")
                    .and_then(|t| t.get("language"))
                    .and_then(|l| l.as_str())
                    .map(|s| s.to_string());
                let title = stream
                    .get("tags")
                    .and_then(|t| t.get("title"))
                    .and_then(|l| l.as_str())
                    .map(|s| s.to_string());

                tracks.push(SubtitleTrack {
                    index,
                    codec_name,
                    language,
                    title,
                });
            }
        }

        info!(
            "Found {} subtitle streams in {:?}",
            tracks.len(),
            path.file_name().unwrap_or_default()
        );
        Ok(tracks)
    }

    /// Extract one subtitle stream into the task scratch directory in its
    /// native format, returning the extracted file path
    pub async fn extract_track(
        video_path: &Path,
        track: &SubtitleTrack,
        scratch: &ScratchArena,
    ) -> Result<PathBuf, ToolError> {
        let extension = track.native_extension();
        let out_path = scratch.path(&format!("track_{}.{}", track.index, extension));
        let video_str = video_path.to_string_lossy();
        let out_str = out_path.to_string_lossy();

        run_tool(
            "ffmpeg",
            &[
                "-y",
                "-i",
                &video_str,
                "-map",
                &format!("0:{}", track.index),
                "-c:s",
                extension,
                &out_str,
            ],
        )
        .await?;

        let size = std::fs::metadata(&out_path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(ToolError {
                command: format!("ffmpeg -i {} -map 0:{}", video_str, track.index),
                exit_code: Some(0),
                stderr_tail: "extracted subtitle file is empty".to_string(),
            });
        }

        info!("Extracted track {} to {:?}", track.index, out_path);
        Ok(out_path)
    }

    /// Mux a subtitle file into an MKV as an additional track
    pub async fn merge_subtitle(
        mkv_in: &Path,
        mkv_out: &Path,
        subtitle_path: &Path,
        language_tag: &str,
        track_name: &str,
        default_flag: bool,
    ) -> Result<(), ToolError> {
        let in_str = mkv_in.to_string_lossy();
        let out_str = mkv_out.to_string_lossy();
        let sub_str = subtitle_path.to_string_lossy();

        run_tool(
            "mkvmerge",
            &[
                "-o",
                &out_str,
                &in_str,
                "--language",
                &format!("0:{}", language_tag),
                "--track-name",
                &format!("0:{}", track_name),
                "--default-track",
                &format!("0:{}", if default_flag { "yes" } else { "no" }),
                &sub_str,
            ],
        )
        .await?;

        info!("Muxed {:?} into {:?}", subtitle_path, mkv_out);
        Ok(())
    }

    /// Replace an MKV in place: merge into a sibling temp file, then rename
    /// over the original. The sibling lives in the same directory, so the
    /// final rename never crosses a mount boundary.
    pub async fn replace_in_place(
        mkv: &Path,
        subtitle_path: &Path,
        language_tag: &str,
        track_name: &str,
        default_flag: bool,
    ) -> Result<(), ToolError> {
        let parent = mkv.parent().unwrap_or_else(|| Path::new("."));
        let stem = mkv.file_stem().unwrap_or_default().to_string_lossy();
        let temp_out = parent.join(format!(".{}.merge.tmp.mkv", stem));

        let result = Self::merge_subtitle(
            mkv,
            &temp_out,
            subtitle_path,
            language_tag,
            track_name,
            default_flag,
        )
        .await;

        if let Err(e) = result {
            if temp_out.exists() {
                let _ = std::fs::remove_file(&temp_out);
            }
            return Err(e);
        }

        FileManager::persist(&temp_out, mkv).map_err(|e| ToolError {
            command: format!("rename {:?} -> {:?}", temp_out, mkv),
            exit_code: None,
            stderr_tail: e.to_string(),
        })?;

        info!("Replaced {:?} in place", mkv);
        Ok(())
    }
}

/// Run one external tool invocation with captured output
async fn run_tool(program: &str, args: &[&str]) -> Result<Output, ToolError> {
    let rendered = format!("{} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| ToolError {
            command: rendered.clone(),
            exit_code: None,
            stderr_tail: format!("failed to spawn: {}", e),
        })?;

    if !output.status.success() {
        let tail = stderr_tail(&output.stderr);
        warn!("{} failed: {}", program, tail);
        return Err(ToolError {
            command: rendered,
            exit_code: output.status.code(),
            stderr_tail: tail,
        });
    }

    Ok(output)
}

/// Last kilobyte of stderr, lossily decoded
fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_extension_by_codec() {
        let track = |codec: &str| SubtitleTrack {
            index: 0,
            codec_name: codec.to_string(),
            language: None,
            title: None,
        };
        assert_eq!(track("subrip").native_extension(), "srt");
        assert_eq!(track("ass").native_extension(), "ass");
        assert_eq!(track("ssa").native_extension(), "ass");
        assert_eq!(track("mov_text").native_extension(), "srt");
    }

    #[test]
    fn test_stderr_tail_truncates_to_last_kilobyte() {
        let big = vec![b'x'; 4096];
        let tail = stderr_tail(&big);
        assert_eq!(tail.len(), STDERR_TAIL_BYTES);
    }

    #[tokio::test]
    async fn test_run_tool_with_missing_binary_should_report_spawn_failure() {
        let err = run_tool("definitely-not-a-real-binary-xyz", &["--version"])
            .await
            .unwrap_err();
        assert!(err.command.contains("definitely-not-a-real-binary-xyz"));
        assert!(err.exit_code.is_none());
        assert!(err.stderr_tail.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_list_tracks_parses_ffprobe_json_shape() {
        // Exercises only the JSON mapping; full invocations need real media
        // files and run in environments with ffprobe installed.
        let json: Value = serde_json::from_str(
            r#"{"streams":[{"index":2,"codec_name":"subrip","tags":{"language":"eng","title":"English"}},{"index":3,"codec_name":"ass"}]}"#,
        )
        .unwrap();
        let streams = json.get("streams").and_then(|s| s.as_array()).unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(
            streams[0].get("tags").and_then(|t| t.get("language")).and_then(|l| l.as_str()),
            Some("eng")
        );
    }
}
