use anyhow::{Result, anyhow};
use isolang::Language;

/// Language utilities for ISO language code handling.
///
/// Translation targets arrive in many spellings: human-readable names
/// ("Chinese"), ISO 639-1 codes ("zh"), ISO 639-2 codes ("zho", "chi"),
/// and regioned tags ("zh-CN", "zh-Hans"). Everything is normalized to a
/// canonical short tag before comparison; the alias table below covers the
/// spellings isolang cannot resolve on its own.

/// Fixed alias table: canonical tag followed by every accepted spelling.
///
/// Entries are matched case-insensitively against trimmed input.
const LANGUAGE_ALIASES: &[(&str, &[&str])] = &[
    (
        "zh",
        &[
            "chinese", "zh", "zh-cn", "zh-tw", "zh-hans", "zh-hant", "chi", "zho", "mandarin",
        ],
    ),
    ("en", &["english", "en", "eng"]),
];

/// Languages offered through the settings surface, as `(name, tag)` pairs.
pub const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("Chinese", "zh"),
    ("English", "en"),
    ("Japanese", "ja"),
    ("Korean", "ko"),
    ("French", "fr"),
    ("German", "de"),
    ("Spanish", "es"),
    ("Portuguese", "pt"),
    ("Russian", "ru"),
    ("Italian", "it"),
];

/// Map an ISO 639-2/B code to its 639-2/T equivalent.
///
/// isolang only knows the /T codes; media containers frequently carry the
/// bibliographic variants.
fn part2b_to_part2t(code: &str) -> &str {
    match code {
        "fre" => "fra",
        "ger" => "deu",
        "dut" => "nld",
        "gre" => "ell",
        "chi" => "zho",
        "cze" => "ces",
        "ice" => "isl",
        "alb" => "sqi",
        "arm" => "hye",
        "baq" => "eus",
        "bur" => "mya",
        "per" => "fas",
        "geo" => "kat",
        "may" => "msa",
        "mac" => "mkd",
        "rum" => "ron",
        "slo" => "slk",
        "wel" => "cym",
        other => other,
    }
}

/// Resolve any accepted spelling of a language to its canonical short tag.
///
/// Returns the ISO 639-1 code where one exists, the 639-3 code otherwise,
/// or `None` for input that is not a recognizable language.
pub fn resolve_tag(input: &str) -> Option<String> {
    let normalized = input.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    // The fixed alias table wins over ISO lookup so that regioned tags like
    // zh-Hans collapse onto the canonical family tag.
    for (canonical, aliases) in LANGUAGE_ALIASES {
        if aliases.contains(&normalized.as_str()) {
            return Some((*canonical).to_string());
        }
    }

    let lang = match normalized.len() {
        2 => Language::from_639_1(&normalized),
        3 => Language::from_639_3(part2b_to_part2t(&normalized)),
        _ => Language::from_name(&capitalize(&normalized)),
    }?;

    match lang.to_639_1() {
        Some(part1) => Some(part1.to_string()),
        None => Some(lang.to_639_3().to_string()),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Check if two language spellings refer to the same language
pub fn languages_match(a: &str, b: &str) -> bool {
    match (resolve_tag(a), resolve_tag(b)) {
        (Some(ta), Some(tb)) => ta == tb,
        _ => false,
    }
}

/// Get the English language name for a code or alias
pub fn get_language_name(code: &str) -> Result<String> {
    let tag = resolve_tag(code).ok_or_else(|| anyhow!("Invalid language code: {}", code))?;

    let lang = match tag.len() {
        2 => Language::from_639_1(&tag),
        _ => Language::from_639_3(&tag),
    }
    .ok_or_else(|| anyhow!("Could not find language name for code: {}", code))?;

    Ok(lang.to_name().to_string())
}

/// The tag used in output filenames and MKV track language fields
/// for a configured target language, e.g. `Chinese` -> `zh`.
pub fn output_tag(target_language: &str) -> String {
    resolve_tag(target_language).unwrap_or_else(|| target_language.trim().to_lowercase())
}

/// Detect a trailing language marker in a filename stem.
///
/// `movie.zh-Hans` and `movie.en` carry markers; `movie.s01e01` does not.
/// Returns the canonical tag of the marker when present.
pub fn filename_marker(stem: &str) -> Option<String> {
    let (_, suffix) = stem.rsplit_once('.')?;
    // Guard against episode numbering and release-group noise: markers are
    // short and alphabetic (plus an optional region part).
    if suffix.len() > 7 || !suffix.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
        return None;
    }
    resolve_tag(suffix)
}
