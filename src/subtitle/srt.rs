//! SubRip (.srt) parsing and serialization.

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{DialogueUnit, SubtitleDocument, SubtitleFormat};
use crate::errors::CodecError;

/// Regex for SRT timing lines
static TIMING_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}):(\d{2}):(\d{2})[,.](\d{3}) --> (\d{2}):(\d{2}):(\d{2})[,.](\d{3})")
        .expect("SRT timing regex must compile")
});

/// Format a millisecond timestamp as `HH:MM:SS,mmm`
pub fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

fn capture_to_ms(caps: &regex::Captures, start_idx: usize) -> u64 {
    let field = |i: usize| -> u64 {
        caps.get(start_idx + i)
            .map_or(0, |m| m.as_str().parse().unwrap_or(0))
    };
    (field(0) * 3600 + field(1) * 60 + field(2)) * 1000 + field(3)
}

/// Parse SRT content into a document.
///
/// The parser is tolerant: malformed blocks are skipped with a warning,
/// entries are ordered by start time, and sequence numbers are rewritten to
/// be sequential.
pub fn parse(content: &str) -> Result<SubtitleDocument, CodecError> {
    let mut units: Vec<DialogueUnit> = Vec::new();

    let mut current_seq: Option<usize> = None;
    let mut current_times: Option<(u64, u64)> = None;
    let mut current_text = String::new();

    let mut flush =
        |seq: &mut Option<usize>, times: &mut Option<(u64, u64)>, text: &mut String| {
            if let (Some(seq_num), Some((start_ms, end_ms))) = (seq.take(), times.take()) {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    warn!("Skipping empty subtitle entry {}", seq_num);
                } else if end_ms <= start_ms {
                    warn!(
                        "Skipping entry {} with invalid time range {} -> {}",
                        seq_num, start_ms, end_ms
                    );
                } else {
                    units.push(DialogueUnit::new(
                        seq_num,
                        start_ms,
                        end_ms,
                        trimmed.to_string(),
                    ));
                }
            }
            text.clear();
        };

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush(&mut current_seq, &mut current_times, &mut current_text);
            continue;
        }

        // A new block starts with a bare sequence number
        if current_seq.is_none() && current_text.is_empty() {
            if let Ok(num) = trimmed.parse::<usize>() {
                current_seq = Some(num);
                continue;
            }
        }

        if current_seq.is_some() && current_times.is_none() {
            if let Some(caps) = TIMING_REGEX.captures(trimmed) {
                current_times = Some((capture_to_ms(&caps, 1), capture_to_ms(&caps, 5)));
                continue;
            }
        }

        if current_seq.is_some() && current_times.is_some() {
            if !current_text.is_empty() {
                current_text.push('\n');
            }
            current_text.push_str(trimmed);
        } else {
            warn!("Unexpected SRT line outside of an entry: {}", trimmed);
        }
    }
    flush(&mut current_seq, &mut current_times, &mut current_text);

    if units.is_empty() {
        return Err(CodecError::Parse(
            "no valid subtitle entries found".to_string(),
        ));
    }

    units.sort_by_key(|u| u.start_time_ms);
    for (i, unit) in units.iter_mut().enumerate() {
        unit.seq_num = i + 1;
    }

    Ok(SubtitleDocument {
        format: SubtitleFormat::Srt,
        header: Vec::new(),
        units,
    })
}

/// Serialize a document as SRT
pub fn serialize(doc: &SubtitleDocument) -> String {
    let mut out = String::new();
    for unit in &doc.units {
        out.push_str(&unit.seq_num.to_string());
        out.push('\n');
        out.push_str(&format_timestamp(unit.start_time_ms));
        out.push_str(" --> ");
        out.push_str(&format_timestamp(unit.end_time_ms));
        out.push('\n');
        out.push_str(&unit.text);
        out.push_str("\n\n");
    }
    out
}

/// Build an SRT document from units of another format.
///
/// ASS line-break tokens become real newlines; format metadata is dropped.
pub fn from_units(units: &[DialogueUnit]) -> SubtitleDocument {
    let converted = units
        .iter()
        .enumerate()
        .map(|(i, u)| {
            DialogueUnit::new(
                i + 1,
                u.start_time_ms,
                u.end_time_ms,
                u.text.replace("\\N", "\n").replace("\\n", "\n"),
            )
        })
        .collect();
    SubtitleDocument {
        format: SubtitleFormat::Srt,
        header: Vec::new(),
        units: converted,
    }
}
