//! Advanced SubStation Alpha (.ass/.ssa) parsing and serialization.
//!
//! Only the text field of `Dialogue:` events is ever rewritten. Script
//! info, style definitions, and the per-event layer/style/margin fields are
//! carried as opaque strings so styling survives translation untouched.

use log::warn;

use super::{DialogueUnit, SubtitleDocument, SubtitleFormat};
use crate::errors::CodecError;

/// Field count of the standard v4.00+ Events format line
const DEFAULT_EVENT_FIELDS: usize = 10;

/// Format a millisecond timestamp as ASS `H:MM:SS.CC`
pub fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let centis = (ms % 1_000) / 10;
    format!("{}:{:02}:{:02}.{:02}", hours, minutes, seconds, centis)
}

/// Parse an ASS `H:MM:SS.CC` timestamp to milliseconds
pub fn parse_timestamp(value: &str) -> Option<u64> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let rest = parts.next()?;
    let (seconds, centis) = match rest.split_once('.') {
        Some((s, c)) => {
            let seconds: u64 = s.parse().ok()?;
            // Normalize to centiseconds regardless of digit count
            let centis: u64 = match c.len() {
                0 => 0,
                1 => c.parse::<u64>().ok()? * 10,
                2 => c.parse().ok()?,
                _ => c[..2].parse().ok()?,
            };
            (seconds, centis)
        }
        None => (rest.parse().ok()?, 0),
    };
    Some((hours * 3600 + minutes * 60 + seconds) * 1000 + centis * 10)
}

/// Parse ASS content into a document.
///
/// Header lines (everything up to the first `Dialogue:` event) are kept
/// verbatim; each dialogue line is split into an opaque prefix and its text
/// payload so serialization reproduces untouched lines byte for byte.
pub fn parse(content: &str) -> Result<SubtitleDocument, CodecError> {
    let mut header: Vec<String> = Vec::new();
    let mut units: Vec<DialogueUnit> = Vec::new();

    let mut in_events = false;
    let mut event_fields = DEFAULT_EVENT_FIELDS;
    let mut start_field = 1usize;
    let mut end_field = 2usize;

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.eq_ignore_ascii_case("[events]") {
            in_events = true;
            header.push(line.to_string());
            continue;
        }
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            in_events = false;
            header.push(line.to_string());
            continue;
        }

        if in_events {
            if let Some(fields) = trimmed.strip_prefix("Format:") {
                let names: Vec<&str> = fields.split(',').map(str::trim).collect();
                event_fields = names.len().max(2);
                start_field = names
                    .iter()
                    .position(|n| n.eq_ignore_ascii_case("Start"))
                    .unwrap_or(1);
                end_field = names
                    .iter()
                    .position(|n| n.eq_ignore_ascii_case("End"))
                    .unwrap_or(2);
                header.push(line.to_string());
                continue;
            }

            if line.starts_with("Dialogue:") {
                match parse_dialogue_line(line, event_fields, start_field, end_field) {
                    Some(unit) => units.push(unit),
                    None => warn!("Skipping malformed ASS dialogue line: {}", line),
                }
                continue;
            }

            if units.is_empty() {
                header.push(line.to_string());
            } else if !trimmed.is_empty() {
                // Interleaved non-dialogue event lines (Comment: etc.) have
                // no translation payload and are dropped by the parser.
                warn!("Dropping non-dialogue event line: {}", line);
            }
            continue;
        }

        header.push(line.to_string());
    }

    if units.is_empty() {
        return Err(CodecError::Parse("no Dialogue events found".to_string()));
    }

    for (i, unit) in units.iter_mut().enumerate() {
        unit.seq_num = i + 1;
    }

    Ok(SubtitleDocument {
        format: SubtitleFormat::Ass,
        header,
        units,
    })
}

/// Split one `Dialogue:` line into prefix metadata and text payload
fn parse_dialogue_line(
    line: &str,
    event_fields: usize,
    start_field: usize,
    end_field: usize,
) -> Option<DialogueUnit> {
    let body = line.strip_prefix("Dialogue:")?;

    // The text field is the last one and may itself contain commas, so the
    // split is bounded by the declared field count.
    let mut comma_positions = Vec::with_capacity(event_fields - 1);
    for (pos, ch) in body.char_indices() {
        if ch == ',' {
            comma_positions.push(pos);
            if comma_positions.len() == event_fields - 1 {
                break;
            }
        }
    }
    if comma_positions.len() < event_fields - 1 {
        return None;
    }

    let text_start = comma_positions[event_fields - 2] + 1;
    let prefix = &line[..line.len() - body.len() + text_start];
    let text = &body[text_start..];

    let fields: Vec<&str> = body[..comma_positions[event_fields - 2]]
        .split(',')
        .collect();
    let start_ms = fields.get(start_field).and_then(|v| parse_timestamp(v))?;
    let end_ms = fields.get(end_field).and_then(|v| parse_timestamp(v))?;

    Some(DialogueUnit {
        seq_num: 0,
        start_time_ms: start_ms,
        end_time_ms: end_ms,
        format_meta: Some(prefix.to_string()),
        text: text.to_string(),
    })
}

/// Serialize a document as ASS
pub fn serialize(doc: &SubtitleDocument) -> String {
    let mut out = String::new();
    for line in &doc.header {
        out.push_str(line);
        out.push('\n');
    }
    for unit in &doc.units {
        match &unit.format_meta {
            Some(prefix) => {
                out.push_str(prefix);
                out.push_str(&unit.text);
            }
            None => {
                out.push_str(&format!(
                    "Dialogue: 0,{},{},Default,,0,0,0,,{}",
                    format_timestamp(unit.start_time_ms),
                    format_timestamp(unit.end_time_ms),
                    unit.text
                ));
            }
        }
        out.push('\n');
    }
    out
}

/// Build an ASS document from units of another format, synthesizing the
/// standard header and default style
pub fn from_units(units: &[DialogueUnit]) -> SubtitleDocument {
    let header = vec![
        "[Script Info]".to_string(),
        "ScriptType: v4.00+".to_string(),
        "WrapStyle: 0".to_string(),
        String::new(),
        "[V4+ Styles]".to_string(),
        "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding".to_string(),
        "Style: Default,Arial,20,&H00FFFFFF,&H000000FF,&H00000000,&H00000000,0,0,0,0,100,100,0,0,1,2,0,2,10,10,10,1".to_string(),
        String::new(),
        "[Events]".to_string(),
        "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text".to_string(),
    ];

    let converted = units
        .iter()
        .enumerate()
        .map(|(i, u)| DialogueUnit {
            seq_num: i + 1,
            start_time_ms: u.start_time_ms,
            end_time_ms: u.end_time_ms,
            format_meta: None,
            text: u.text.replace('\n', "\\N"),
        })
        .collect();

    SubtitleDocument {
        format: SubtitleFormat::Ass,
        header,
        units: converted,
    }
}
