//! Parsing of free-form model output into tag lists.
//!
//! Models are asked for a JSON array but do not always comply. Parsing tries
//! the strict path first (a JSON array, possibly wrapped in prose or a code
//! fence, or a `{"tags": [...]}` object) and falls back to splitting the text
//! on commas, semicolons, newlines and list bullets. Every candidate is then
//! normalized, deduplicated and capped.
//!
//! An empty result is possible; the caller decides what to do with it.

use std::collections::HashSet;

/// Tags longer than this (in chars) are discarded.
pub const MAX_TAG_CHARS: usize = 50;

/// Tags with more words than this are discarded as sentences.
pub const MAX_TAG_WORDS: usize = 4;

/// Parse raw model output into at most `max` normalized, unique tags.
pub fn parse_tags(raw: &str, max: usize) -> Vec<String> {
    let cleaned = strip_code_fences(raw);

    let candidates = match parse_json_tags(&cleaned) {
        Some(list) => list,
        None => {
            let segments = split_delimited(&cleaned);
            if looks_like_prose(&segments) {
                return Vec::new();
            }
            segments
        }
    };

    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    for candidate in candidates {
        if tags.len() >= max {
            break;
        }
        if let Some(tag) = normalize_tag(&candidate) {
            if seen.insert(tag.clone()) {
                tags.push(tag);
            }
        }
    }
    tags
}

/// Lower-case and tidy a single candidate. Returns `None` if nothing
/// tag-like remains.
pub fn normalize_tag(candidate: &str) -> Option<String> {
    let lowered = candidate.to_lowercase();
    let trimmed = lowered.trim_matches(|c: char| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\'' | '`' | '#' | '[' | ']' | '(' | ')' | '{' | '}' | '.' | ',' | ':'
                    | ';' | '!' | '?' | '*' | '_' | '-' | '•'
            )
    });

    // Leftovers of a broken JSON document, e.g. `tags": "rust`
    if trimmed.contains(['"', '\\']) {
        return None;
    }

    let words: Vec<&str> = trimmed.split_whitespace().collect();
    if words.is_empty() || words.len() > MAX_TAG_WORDS {
        return None;
    }

    let tag = words.join(" ");
    if tag.chars().count() > MAX_TAG_CHARS || !tag.chars().any(|c| c.is_alphanumeric()) {
        return None;
    }

    Some(tag)
}

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````).
///
/// The fence may span lines or sit on a single line with its content.
fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };

    // Info string (`json`, `text`) only when it is followed by whitespace
    let lang_len = inner
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(inner.len());
    let inner = match inner[lang_len..].chars().next() {
        Some(c) if lang_len > 0 && c.is_whitespace() => &inner[lang_len..],
        None => "",
        _ => inner,
    };

    let inner = inner.trim_end();
    inner.strip_suffix("```").unwrap_or(inner).trim().to_string()
}

/// Strict path. `Some` only when a JSON document of a recognized shape parsed.
fn parse_json_tags(text: &str) -> Option<Vec<String>> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if let Some(list) = tags_from_value(&value) {
            return Some(list);
        }
    }

    // Array embedded in surrounding prose
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&text[start..=end]).ok()?;
    tags_from_value(&value)
}

fn tags_from_value(value: &serde_json::Value) -> Option<Vec<String>> {
    let array = match value {
        serde_json::Value::Array(a) => a,
        serde_json::Value::Object(o) => match o.get("tags")? {
            serde_json::Value::Array(a) => a,
            // `{"tags": "rust, async"}`
            serde_json::Value::String(s) => return Some(split_delimited(s)),
            _ => return None,
        },
        _ => return None,
    };

    Some(
        array
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
    )
}

/// Lenient path: split on delimiters and strip list markers.
fn split_delimited(text: &str) -> Vec<String> {
    text.split(|c: char| matches!(c, ',' | ';' | '\n' | '|'))
        .map(strip_list_marker)
        .map(strip_label)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// A delimited reply is prose, not a list, when sentence-length segments
/// are at least as common as tag-length ones ("I'm sorry, but I cannot...").
fn looks_like_prose(segments: &[String]) -> bool {
    let sentences = segments
        .iter()
        .filter(|s| s.split_whitespace().count() > MAX_TAG_WORDS)
        .count();
    sentences > 0 && sentences >= segments.len() - sentences
}

/// `- foo`, `* foo`, `• foo`, `1. foo`, `2) foo` → `foo`
fn strip_list_marker(item: &str) -> &str {
    let item = item.trim();
    let item = item.trim_start_matches(['-', '*', '•', '·']).trim_start();

    let digits = item.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &item[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return stripped.trim();
        }
    }
    item
}

/// `Tags: foo` → `foo`
fn strip_label(item: &str) -> &str {
    for label in ["tags:", "keywords:"] {
        let matches = item
            .get(..label.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(label));
        if matches {
            return item[label.len()..].trim();
        }
    }
    item
}
