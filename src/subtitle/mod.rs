/*!
 * Subtitle parsing, serialization, and chunking.
 *
 * Dialogue text is the only thing translation touches; timecodes and
 * styling metadata pass through opaquely. Parsing then serializing an
 * unmodified document reproduces it byte for byte, modulo line-ending
 * normalization.
 */

pub mod ass;
pub mod srt;

use std::ops::Range;
use std::path::Path;

use crate::errors::CodecError;

/// Supported subtitle formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    /// SubRip
    Srt,
    /// Advanced SubStation Alpha (also covers SSA input)
    Ass,
}

impl SubtitleFormat {
    /// Detect the format from a file extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let ext = path
            .as_ref()
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "srt" => Ok(Self::Srt),
            "ass" | "ssa" => Ok(Self::Ass),
            other => Err(CodecError::UnsupportedFormat(format!(
                "{:?} ({})",
                path.as_ref(),
                if other.is_empty() { "no extension" } else { other }
            ))),
        }
    }

    /// File extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::Ass => "ass",
        }
    }

    /// The in-text line break token for this format
    pub fn newline_token(&self) -> &'static str {
        match self {
            Self::Srt => "\n",
            Self::Ass => "\\N",
        }
    }
}

/// One timecoded text entry in a subtitle file
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueUnit {
    /// Sequence number (1-based)
    pub seq_num: usize,
    /// Start time in milliseconds
    pub start_time_ms: u64,
    /// End time in milliseconds
    pub end_time_ms: u64,
    /// Format-specific fields preserved verbatim. For ASS this is the whole
    /// line up to and including the comma before the text field.
    pub format_meta: Option<String>,
    /// Dialogue text payload
    pub text: String,
}

impl DialogueUnit {
    /// Create a new dialogue unit without format metadata
    pub fn new(seq_num: usize, start_time_ms: u64, end_time_ms: u64, text: String) -> Self {
        Self {
            seq_num,
            start_time_ms,
            end_time_ms,
            format_meta: None,
            text,
        }
    }

    /// Character count of the text payload
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// A parsed subtitle file: opaque header plus ordered dialogue units
#[derive(Debug, Clone)]
pub struct SubtitleDocument {
    /// Format the document was parsed from
    pub format: SubtitleFormat,
    /// Raw non-dialogue lines (ASS script info, styles, events format)
    pub header: Vec<String>,
    /// Ordered dialogue units
    pub units: Vec<DialogueUnit>,
}

impl SubtitleDocument {
    /// Parse a subtitle file, detecting format by extension and character
    /// encoding by BOM/content sniffing
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let format = SubtitleFormat::from_path(&path)?;
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| CodecError::Parse(format!("{:?}: {}", path.as_ref(), e)))?;
        let content = decode_bytes(&bytes);
        Self::parse_str(format, &content)
    }

    /// Parse subtitle content in a known format
    pub fn parse_str(format: SubtitleFormat, content: &str) -> Result<Self, CodecError> {
        match format {
            SubtitleFormat::Srt => srt::parse(content),
            SubtitleFormat::Ass => ass::parse(content),
        }
    }

    /// Serialize the document in its own format
    pub fn serialize(&self) -> String {
        match self.format {
            SubtitleFormat::Srt => srt::serialize(self),
            SubtitleFormat::Ass => ass::serialize(self),
        }
    }

    /// Convert the document to another format, rewriting line-break tokens
    /// and synthesizing format metadata as needed
    pub fn convert_to(&self, format: SubtitleFormat) -> SubtitleDocument {
        if format == self.format {
            return self.clone();
        }
        match format {
            SubtitleFormat::Srt => srt::from_units(&self.units),
            SubtitleFormat::Ass => ass::from_units(&self.units),
        }
    }

    /// Replace the text of the units in `range` with the given translations.
    ///
    /// Callers guarantee `translations.len() == range.len()`.
    pub fn apply_translations(&mut self, range: Range<usize>, translations: &[String]) {
        debug_assert_eq!(range.len(), translations.len());
        for (unit, translated) in self.units[range].iter_mut().zip(translations) {
            unit.text = translated.clone();
        }
    }

    /// Total character count across all units
    pub fn total_chars(&self) -> usize {
        self.units.iter().map(DialogueUnit::char_count).sum()
    }
}

/// Decode raw subtitle bytes to a string with normalized line endings.
///
/// Handles UTF-8 with or without BOM and UTF-16 LE/BE with BOM; bytes that
/// are not valid UTF-8 fall back to a Windows-1252 decode, which cannot
/// fail and covers the common legacy single-byte files.
pub fn decode_bytes(bytes: &[u8]) -> String {
    let decoded = if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        String::from_utf8_lossy(&bytes[3..]).into_owned()
    } else if bytes.starts_with(&[0xFF, 0xFE]) {
        encoding_rs::UTF_16LE.decode(bytes).0.into_owned()
    } else if bytes.starts_with(&[0xFE, 0xFF]) {
        encoding_rs::UTF_16BE.decode(bytes).0.into_owned()
    } else {
        match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        }
    };

    normalize_line_endings(&decoded)
}

/// Collapse CRLF and lone CR line endings to LF
pub fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

/// Split dialogue units into translation chunks.
///
/// Chunks are contiguous, non-overlapping index ranges in source order.
/// A chunk closes when adding the next unit would exceed the character
/// budget, or when it reaches `max_units`. A single oversized unit gets a
/// chunk of its own.
pub fn split_chunks(units: &[DialogueUnit], max_chars: usize, max_units: usize) -> Vec<Range<usize>> {
    let max_chars = max_chars.max(1);
    let max_units = max_units.max(1);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut current_chars = 0usize;

    for (idx, unit) in units.iter().enumerate() {
        let unit_chars = unit.char_count();
        let would_overflow = current_chars + unit_chars > max_chars && idx > start;
        let full = idx - start >= max_units;

        if would_overflow || full {
            chunks.push(start..idx);
            start = idx;
            current_chars = 0;
        }
        current_chars += unit_chars;
    }

    if start < units.len() {
        chunks.push(start..units.len());
    }

    chunks
}

/// Compose a bilingual dialogue text from a translation and its original
pub fn bilingual_text(
    translated: &str,
    original: &str,
    separator: &str,
    original_first: bool,
) -> String {
    if original_first {
        format!("{}{}{}", original, separator, translated)
    } else {
        format!("{}{}{}", translated, separator, original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(seq: usize, text: &str) -> DialogueUnit {
        DialogueUnit::new(seq, seq as u64 * 1000, seq as u64 * 1000 + 900, text.to_string())
    }

    #[test]
    fn test_format_detection_by_extension() {
        assert_eq!(SubtitleFormat::from_path("a.srt").unwrap(), SubtitleFormat::Srt);
        assert_eq!(SubtitleFormat::from_path("a.ASS").unwrap(), SubtitleFormat::Ass);
        assert_eq!(SubtitleFormat::from_path("a.ssa").unwrap(), SubtitleFormat::Ass);
        assert!(SubtitleFormat::from_path("a.sub").is_err());
        assert!(SubtitleFormat::from_path("noext").is_err());
    }

    #[test]
    fn test_decode_bytes_with_utf8_bom_should_strip_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("hello".as_bytes());
        assert_eq!(decode_bytes(&bytes), "hello");
    }

    #[test]
    fn test_decode_bytes_with_utf16le_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "héllo".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_bytes(&bytes), "héllo");
    }

    #[test]
    fn test_decode_bytes_with_utf16be_bom() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "héllo".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(decode_bytes(&bytes), "héllo");
    }

    #[test]
    fn test_decode_bytes_with_latin1_should_fall_back() {
        // "café" in Windows-1252: é = 0xE9, invalid as UTF-8
        let bytes = [0x63, 0x61, 0x66, 0xE9];
        assert_eq!(decode_bytes(&bytes), "café");
    }

    #[test]
    fn test_decode_bytes_normalizes_crlf() {
        assert_eq!(decode_bytes(b"a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn test_split_chunks_respects_char_budget() {
        let units: Vec<_> = (1..=6).map(|i| unit(i, "aaaaaaaaaa")).collect(); // 10 chars each
        let chunks = split_chunks(&units, 25, 50);
        assert_eq!(chunks, vec![0..2, 2..4, 4..6]);
    }

    #[test]
    fn test_split_chunks_respects_unit_cap() {
        let units: Vec<_> = (1..=7).map(|i| unit(i, "ab")).collect();
        let chunks = split_chunks(&units, 10_000, 3);
        assert_eq!(chunks, vec![0..3, 3..6, 6..7]);
    }

    #[test]
    fn test_split_chunks_gives_oversized_unit_its_own_chunk() {
        let units = vec![unit(1, "short"), unit(2, &"x".repeat(100)), unit(3, "tail")];
        let chunks = split_chunks(&units, 20, 50);
        assert_eq!(chunks, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn test_split_chunks_preserves_order_and_coverage() {
        let units: Vec<_> = (1..=23).map(|i| unit(i, "some dialogue text")).collect();
        let chunks = split_chunks(&units, 100, 4);
        let mut covered = Vec::new();
        for chunk in &chunks {
            covered.extend(chunk.clone());
        }
        assert_eq!(covered, (0..23).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_chunks_with_empty_input() {
        assert!(split_chunks(&[], 3000, 50).is_empty());
    }

    #[test]
    fn test_bilingual_text_default_order_is_translation_first() {
        assert_eq!(bilingual_text("你好", "Hello", "\n", false), "你好\nHello");
        assert_eq!(bilingual_text("你好", "Hello", "\\N", true), "Hello\\N你好");
    }

    #[test]
    fn test_apply_translations_replaces_range_in_order() {
        let mut doc = SubtitleDocument {
            format: SubtitleFormat::Srt,
            header: Vec::new(),
            units: vec![unit(1, "one"), unit(2, "two"), unit(3, "three")],
        };
        doc.apply_translations(1..3, &["二".to_string(), "三".to_string()]);
        assert_eq!(doc.units[0].text, "one");
        assert_eq!(doc.units[1].text, "二");
        assert_eq!(doc.units[2].text, "三");
    }
}
