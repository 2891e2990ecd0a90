//! Prompt templates and response parsing for the numbered-list contract.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `N. text` / `N) text` item headers at line starts
static ITEM_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)[.)]\s?(.*)$").expect("item header regex must compile"));

/// System prompt instructing the model on the translation contract
pub fn system_prompt(source_language: &str, target_language: &str) -> String {
    let source_clause = if source_language.eq_ignore_ascii_case("auto") {
        "from the detected source language".to_string()
    } else {
        format!("from {}", source_language)
    };

    format!(
        "You are a professional subtitle translator. Translate the numbered list of subtitle texts {source_clause} into {target_language}.\n\
         Rules:\n\
         1. Reply with exactly one numbered translation per input item, keeping the same numbers and order.\n\
         2. Preserve inline markup untouched: ASS override tags like {{\\i1}} and HTML-style tags like <i>.\n\
         3. Keep line breaks inside an item where the original has them.\n\
         4. Output only the numbered translations, with no commentary."
    )
}

/// User message carrying a batch of texts as a numbered list
pub fn batch_user_message(texts: &[String]) -> String {
    let mut out = String::new();
    for (i, text) in texts.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, text));
    }
    out
}

/// Parse a numbered-list response back into its items.
///
/// Lines that do not start a new item are treated as continuations of the
/// current one; anything before the first numbered line is ignored so chatty
/// preambles do not break the parse. Returns items in response order.
pub fn parse_numbered_response(response: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    let mut current: Option<String> = None;

    for line in response.lines() {
        if let Some(caps) = ITEM_HEADER.captures(line) {
            if let Some(done) = current.take() {
                items.push(done.trim_end().to_string());
            }
            current = Some(caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string());
        } else if let Some(item) = current.as_mut() {
            if !line.trim().is_empty() {
                item.push('\n');
                item.push_str(line.trim_end());
            }
        }
        // Preamble lines before the first item fall through
    }
    if let Some(done) = current.take() {
        items.push(done.trim_end().to_string());
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_user_message_numbers_from_one() {
        let texts = vec!["Hello".to_string(), "World".to_string()];
        assert_eq!(batch_user_message(&texts), "1. Hello\n2. World\n");
    }

    #[test]
    fn test_parse_numbered_response_basic() {
        let items = parse_numbered_response("1. 你好\n2. 世界\n3. 再见");
        assert_eq!(items, vec!["你好", "世界", "再见"]);
    }

    #[test]
    fn test_parse_numbered_response_with_paren_style_and_preamble() {
        let items = parse_numbered_response("Here are the translations:\n1) alpha\n2) beta");
        assert_eq!(items, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_parse_numbered_response_keeps_continuation_lines() {
        let items = parse_numbered_response("1. first line\nsecond line\n2. next");
        assert_eq!(items, vec!["first line\nsecond line", "next"]);
    }

    #[test]
    fn test_parse_numbered_response_with_no_items() {
        assert!(parse_numbered_response("I cannot translate that.").is_empty());
        assert!(parse_numbered_response("").is_empty());
    }

    #[test]
    fn test_system_prompt_mentions_languages_and_markup() {
        let prompt = system_prompt("English", "Chinese");
        assert!(prompt.contains("from English"));
        assert!(prompt.contains("into Chinese"));
        assert!(prompt.contains("{\\i1}"));

        let auto = system_prompt("auto", "Chinese");
        assert!(auto.contains("detected source language"));
    }
}
