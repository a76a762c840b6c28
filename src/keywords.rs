//! Keyword extraction for ontology suggestion.
//!
//! Tokenizes by lowercasing and splitting on non-alphanumeric characters,
//! then drops short tokens, pure numbers and common English stop words.
//! Tokens are weighted by where they appear: the title counts most, markdown
//! headings next, and body occurrences count once each.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::models::Keyword;

/// Tokens shorter than this (in chars) are ignored.
pub const MIN_TOKEN_CHARS: usize = 3;

const TITLE_WEIGHT: u32 = 3;
const HEADING_WEIGHT: u32 = 2;
const BODY_WEIGHT: u32 = 1;

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her",
        "was", "one", "our", "out", "has", "have", "him", "his", "how", "its", "may", "new",
        "now", "old", "see", "two", "who", "did", "get", "got", "let", "put", "say", "she",
        "too", "use", "used", "using", "with", "this", "that", "from", "they", "them", "then",
        "than", "there", "their", "these", "those", "what", "when", "where", "which", "while",
        "will", "would", "could", "should", "shall", "into", "onto", "about", "above", "after",
        "again", "also", "been", "being", "before", "below", "between", "both", "does", "doing",
        "down", "during", "each", "more", "most", "much", "must", "only", "other", "over",
        "same", "some", "such", "very", "your", "yours", "were", "here", "just", "like",
        "make", "made", "many", "because", "through", "under", "until", "upon", "within",
        "without", "via", "per", "etc", "every", "few", "further", "once", "own", "why",
        "whom", "whose", "yet", "else", "ever", "even", "still", "well", "want", "need",
    ]
    .into_iter()
    .collect()
});

/// Lowercase, split on non-alphanumeric, drop stop words, short tokens and numbers.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOP_WORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// Markdown ATX heading texts (`# Title`, `## Section`).
pub fn headings(body: &str) -> Vec<&str> {
    body.lines()
        .map(str::trim_start)
        .filter(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim())
        .filter(|text| !text.is_empty())
        .collect()
}

/// Rank keywords from a document's title and body.
///
/// Weights: title 3, heading 2, body 1 per occurrence (heading lines are
/// part of the body, so a heading token earns both). Ties keep first-seen
/// order. Scores are scaled so the top keyword is 100.
pub fn extract_keywords(title: &str, body: &str, limit: usize) -> Vec<Keyword> {
    let mut weights: HashMap<String, u32> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    let mut add = |token: String, weight: u32| {
        let entry = weights.entry(token.clone()).or_insert_with(|| {
            order.push(token);
            0
        });
        *entry += weight;
    };

    for token in tokenize(title) {
        add(token, TITLE_WEIGHT);
    }
    for heading in headings(body) {
        for token in tokenize(heading) {
            add(token, HEADING_WEIGHT);
        }
    }
    for token in tokenize(body) {
        add(token, BODY_WEIGHT);
    }

    let mut ranked: Vec<(String, u32)> = order
        .into_iter()
        .map(|t| {
            let w = weights[&t];
            (t, w)
        })
        .collect();

    // Stable sort keeps first-seen order among equal weights
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(limit);

    let top = ranked.first().map(|(_, w)| *w).unwrap_or(0);
    if top == 0 {
        return Vec::new();
    }

    ranked
        .into_iter()
        .map(|(term, w)| Keyword {
            term,
            score: round1(w as f64 * 100.0 / top as f64),
        })
        .collect()
}

pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_noise() {
        let tokens = tokenize("The 2024 ML-based fraud detection, with AI and Rust!");
        assert_eq!(tokens, vec!["based", "fraud", "detection", "rust"]);
    }

    #[test]
    fn headings_are_extracted() {
        let body = "# Overview\ntext\n  ## Data Model \n#\nplain # not heading";
        assert_eq!(headings(body), vec!["Overview", "Data Model"]);
    }

    #[test]
    fn title_outweighs_body_frequency() {
        let keywords = extract_keywords(
            "Fraud detection",
            "pipelines pipelines streaming",
            10,
        );
        let terms: Vec<&str> = keywords.iter().map(|k| k.term.as_str()).collect();
        assert_eq!(terms, vec!["fraud", "detection", "pipelines", "streaming"]);
        assert_eq!(keywords[0].score, 100.0);
        assert_eq!(keywords[2].score, 66.7);
    }

    #[test]
    fn headings_count_double_plus_body() {
        let keywords = extract_keywords("", "# Kafka\nkafka topics", 10);
        assert_eq!(keywords[0].term, "kafka");
        assert_eq!(keywords[0].score, 100.0);
        // kafka: heading 2 + body 2 = 4; topics: 1
        assert_eq!(keywords[1].term, "topics");
        assert_eq!(keywords[1].score, 25.0);
    }

    #[test]
    fn empty_input_has_no_keywords() {
        assert!(extract_keywords("", "", 10).is_empty());
        assert!(extract_keywords("the and", "of to", 10).is_empty());
    }

    #[test]
    fn limit_truncates() {
        let keywords = extract_keywords("", "alpha beta gamma delta epsilon", 2);
        assert_eq!(keywords.len(), 2);
        assert_eq!(keywords[0].term, "alpha");
        assert_eq!(keywords[1].term, "beta");
    }
}
