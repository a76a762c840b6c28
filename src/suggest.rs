//! Ontology term and related-document suggestion.
//!
//! Pure substring heuristics, no semantic modelling:
//!
//! 1. Extract ranked keywords from the document title, headings and body
//!    ([`crate::keywords`]). Each keyword carries a weight `w` in `[0, 1]`.
//! 2. Score each ontology term: name match `30w`, description match `10w`,
//!    domain match `5w`.
//! 3. Score each other document: title match `20w`, body match `5w`, plus up
//!    to `10` for length similarity when anything matched.
//! 4. Clamp to `[0, 100]`, drop zero scores, sort descending (ties keep input
//!    order) and truncate.
//!
//! [`suggest_with_pool`] never fails: database errors produce an empty
//! result and a log line.

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::cmp::Ordering;

use crate::config::{Config, SuggestConfig};
use crate::db;
use crate::keywords::{extract_keywords, round1};
use crate::models::{Keyword, KnowledgeSource, NoteSuggestion, OntologyTerm, Suggestions, TermSuggestion};
use crate::sources;
use crate::terms;

const TERM_NAME_WEIGHT: f64 = 30.0;
const TERM_DESCRIPTION_WEIGHT: f64 = 10.0;
const TERM_DOMAIN_WEIGHT: f64 = 5.0;
const NOTE_TITLE_WEIGHT: f64 = 20.0;
const NOTE_BODY_WEIGHT: f64 = 5.0;
const LENGTH_BONUS: f64 = 10.0;
const MAX_SCORE: f64 = 100.0;

/// Metadata key under which the last run is recorded on the source.
pub const METADATA_KEY: &str = "last_suggestion";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub title: String,
    /// The requesting document; excluded from related-document results.
    #[serde(default)]
    pub source_id: Option<String>,
}

/// Compute suggestions against in-memory candidates.
pub fn suggest(
    request: &SuggestRequest,
    terms: &[OntologyTerm],
    sources: &[KnowledgeSource],
    limits: &SuggestConfig,
) -> Suggestions {
    let keywords = extract_keywords(&request.title, &request.content, limits.keyword_limit);
    if keywords.is_empty() {
        return Suggestions::default();
    }

    let mut term_hits: Vec<TermSuggestion> = terms
        .iter()
        .filter_map(|t| score_term(t, &keywords))
        .collect();
    sort_desc(&mut term_hits, |t| t.score);
    term_hits.truncate(limits.term_limit);

    let content_len = request.content.chars().count();
    let mut note_hits: Vec<NoteSuggestion> = sources
        .iter()
        .filter(|s| request.source_id.as_deref() != Some(s.id.as_str()))
        .filter_map(|s| score_note(s, &keywords, content_len))
        .collect();
    sort_desc(&mut note_hits, |n| n.score);
    note_hits.truncate(limits.note_limit);

    Suggestions {
        terms: term_hits,
        notes: note_hits,
        keywords,
    }
}

fn score_term(term: &OntologyTerm, keywords: &[Keyword]) -> Option<TermSuggestion> {
    let name = term.name.to_lowercase();
    let description = term.description.to_lowercase();
    let domain = term.domain.to_lowercase();

    let mut raw = 0.0;
    let mut matched = Vec::new();

    for kw in keywords {
        let w = kw.score / MAX_SCORE;
        let mut hit = false;
        if name.contains(&kw.term) {
            raw += TERM_NAME_WEIGHT * w;
            hit = true;
        }
        if description.contains(&kw.term) {
            raw += TERM_DESCRIPTION_WEIGHT * w;
            hit = true;
        }
        if domain.contains(&kw.term) {
            raw += TERM_DOMAIN_WEIGHT * w;
            hit = true;
        }
        if hit {
            matched.push(kw.term.clone());
        }
    }

    let score = clamp_score(raw);
    if score <= 0.0 {
        return None;
    }

    Some(TermSuggestion {
        id: term.id.clone(),
        name: term.name.clone(),
        domain: term.domain.clone(),
        score,
        matched,
    })
}

fn score_note(
    source: &KnowledgeSource,
    keywords: &[Keyword],
    content_len: usize,
) -> Option<NoteSuggestion> {
    let title = source.title.to_lowercase();
    let body = source.body.to_lowercase();

    let mut raw = 0.0;
    let mut matched = Vec::new();

    for kw in keywords {
        let w = kw.score / MAX_SCORE;
        let mut hit = false;
        if title.contains(&kw.term) {
            raw += NOTE_TITLE_WEIGHT * w;
            hit = true;
        }
        if body.contains(&kw.term) {
            raw += NOTE_BODY_WEIGHT * w;
            hit = true;
        }
        if hit {
            matched.push(kw.term.clone());
        }
    }

    if raw <= 0.0 {
        return None;
    }
    raw += length_bonus(content_len, source.body.chars().count());

    let score = clamp_score(raw);
    if score <= 0.0 {
        return None;
    }

    Some(NoteSuggestion {
        id: source.id.clone(),
        title: source.title.clone(),
        score,
        matched,
    })
}

/// `LENGTH_BONUS * shorter / longer`; 0 when either side is empty.
fn length_bonus(a: usize, b: usize) -> f64 {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    if lo == 0 {
        return 0.0;
    }
    LENGTH_BONUS * lo as f64 / hi as f64
}

fn clamp_score(raw: f64) -> f64 {
    round1(raw.clamp(0.0, MAX_SCORE))
}

/// Descending by score. `sort_by` is stable, so equal scores keep input order.
fn sort_desc<T>(items: &mut [T], score: impl Fn(&T) -> f64) {
    items.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(Ordering::Equal));
}

// ============ Database-backed entry points ============

/// Load candidates, compute suggestions and record the run on the source.
///
/// Any database failure is logged and yields empty suggestions. Failing to
/// record the run is logged but does not discard the computed result.
pub async fn suggest_with_pool(
    pool: &SqlitePool,
    limits: &SuggestConfig,
    request: &SuggestRequest,
) -> Suggestions {
    let candidates = async {
        let terms = terms::list_terms(pool).await?;
        let sources = sources::list_sources(pool).await?;
        anyhow::Ok((terms, sources))
    }
    .await;

    let (terms, sources) = match candidates {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "could not load suggestion candidates");
            return Suggestions::default();
        }
    };

    let suggestions = suggest(request, &terms, &sources, limits);
    tracing::debug!(
        keywords = suggestions.keywords.len(),
        terms = suggestions.terms.len(),
        notes = suggestions.notes.len(),
        "computed suggestions"
    );

    if let Some(id) = request.source_id.as_deref().filter(|id| !id.is_empty()) {
        if let Err(e) = record_run(pool, id, &suggestions).await {
            tracing::warn!(source_id = id, error = %e, "could not record suggestion run");
        }
    }

    suggestions
}

/// Store the run verbatim under `metadata.last_suggestion`. Unknown ids are
/// skipped silently since the caller may be suggesting for an unsaved draft.
async fn record_run(pool: &SqlitePool, source_id: &str, suggestions: &Suggestions) -> Result<()> {
    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM sources WHERE id = ?")
        .bind(source_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Ok(());
    }

    let value = serde_json::json!({
        "ran_at": Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        "keywords": suggestions.keywords,
        "terms": suggestions.terms,
        "notes": suggestions.notes,
    });
    sources::update_metadata(pool, source_id, METADATA_KEY, value).await
}

/// CLI entry point: suggest for a stored source and print the result.
pub async fn run_suggest(config: &Config, source_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let source = match sources::get_source(&pool, source_id).await {
        Ok(s) => s,
        Err(e) => {
            pool.close().await;
            return Err(e);
        }
    };

    let request = SuggestRequest {
        content: source.body.clone(),
        title: source.title.clone(),
        source_id: Some(source.id.clone()),
    };
    let suggestions = suggest_with_pool(&pool, &config.suggest, &request).await;
    pool.close().await;

    if suggestions.is_empty() {
        println!("No suggestions.");
        return Ok(());
    }

    println!("--- Terms ({}) ---", suggestions.terms.len());
    for t in &suggestions.terms {
        println!("{:>6.1}  {:<24} {}", t.score, t.name, t.id);
    }
    println!();
    println!("--- Related ({}) ---", suggestions.notes.len());
    for n in &suggestions.notes {
        println!("{:>6.1}  {:<24} {}", n.score, n.title, n.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(id: &str, name: &str, domain: &str, description: &str) -> OntologyTerm {
        OntologyTerm {
            id: id.into(),
            name: name.into(),
            domain: domain.into(),
            description: description.into(),
            created_at: 0,
        }
    }

    fn source(id: &str, title: &str, body: &str) -> KnowledgeSource {
        KnowledgeSource {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            metadata: serde_json::json!({}),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn request(title: &str, content: &str, source_id: Option<&str>) -> SuggestRequest {
        SuggestRequest {
            content: content.into(),
            title: title.into(),
            source_id: source_id.map(|s| s.into()),
        }
    }

    fn assert_sorted_and_bounded(s: &Suggestions) {
        for w in s.terms.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
        for w in s.notes.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
        for t in &s.terms {
            assert!(t.score > 0.0 && t.score <= 100.0);
        }
        for n in &s.notes {
            assert!(n.score > 0.0 && n.score <= 100.0);
        }
    }

    #[test]
    fn name_match_beats_description_match() {
        let terms = vec![
            term("t1", "Analytics", "data", "covers fraud reporting"),
            term("t2", "Fraud", "finance", "financial crime"),
        ];
        let s = suggest(
            &request("Fraud detection", "fraud signals in payments", None),
            &terms,
            &[],
            &SuggestConfig::default(),
        );

        assert_eq!(s.terms[0].id, "t2");
        assert_eq!(s.terms[1].id, "t1");
        assert!(s.terms[0].matched.contains(&"fraud".to_string()));
        assert_sorted_and_bounded(&s);
    }

    #[test]
    fn title_match_beats_body_match_and_excludes_self() {
        let sources = vec![
            source("self", "Fraud detection", "fraud fraud"),
            source("body", "Misc", "notes about fraud"),
            source("title", "Fraud cases", "nothing"),
        ];
        let s = suggest(
            &request("Fraud detection", "fraud", Some("self")),
            &[],
            &sources,
            &SuggestConfig::default(),
        );

        let ids: Vec<&str> = s.notes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["title", "body"]);
        assert_sorted_and_bounded(&s);
    }

    #[test]
    fn no_overlap_returns_empty_lists() {
        let terms = vec![term("t1", "Astronomy", "science", "stars and planets")];
        let sources = vec![source("s1", "Cooking", "pasta recipes")];
        let s = suggest(
            &request("Kubernetes", "container orchestration", None),
            &terms,
            &sources,
            &SuggestConfig::default(),
        );
        assert!(s.terms.is_empty());
        assert!(s.notes.is_empty());
    }

    #[test]
    fn empty_request_returns_empty() {
        let terms = vec![term("t1", "Anything", "", "")];
        let s = suggest(&request("", "", None), &terms, &[], &SuggestConfig::default());
        assert!(s.is_empty());
        assert!(s.keywords.is_empty());
    }

    #[test]
    fn scores_are_clamped_to_one_hundred() {
        let description = "alpha beta gamma delta epsilon zeta theta iota kappa lambda";
        let terms = vec![term("t1", description, description, description)];
        let s = suggest(
            &request(description, description, None),
            &terms,
            &[],
            &SuggestConfig::default(),
        );
        assert_eq!(s.terms[0].score, 100.0);
    }

    #[test]
    fn ties_keep_input_order() {
        let terms = vec![
            term("first", "pipeline", "", ""),
            term("second", "pipeline stage", "", ""),
        ];
        let s = suggest(
            &request("", "pipeline", None),
            &terms,
            &[],
            &SuggestConfig::default(),
        );
        assert_eq!(s.terms[0].score, s.terms[1].score);
        assert_eq!(s.terms[0].id, "first");
        assert_eq!(s.terms[1].id, "second");
    }

    #[test]
    fn limits_truncate_results() {
        let terms: Vec<OntologyTerm> = (0..15)
            .map(|i| term(&format!("t{}", i), &format!("rust {}", i), "", ""))
            .collect();
        let sources: Vec<KnowledgeSource> = (0..8)
            .map(|i| source(&format!("s{}", i), "rust notes", "rust"))
            .collect();
        let s = suggest(
            &request("Rust", "rust", None),
            &terms,
            &sources,
            &SuggestConfig::default(),
        );
        assert_eq!(s.terms.len(), 10);
        assert_eq!(s.notes.len(), 5);
    }

    #[test]
    fn length_bonus_favors_similar_sizes() {
        assert_eq!(length_bonus(0, 10), 0.0);
        assert_eq!(length_bonus(10, 10), 10.0);
        assert_eq!(length_bonus(5, 10), 5.0);
        assert_eq!(length_bonus(10, 5), 5.0);
    }

    #[tokio::test]
    async fn records_last_run_on_source() {
        let pool = db::memory_pool().await;
        let me = sources::add_source(&pool, "Fraud detection", "fraud models")
            .await
            .unwrap();
        sources::add_source(&pool, "Fraud cases", "case files").await.unwrap();
        terms::add_term(&pool, "fraud", "finance", "").await.unwrap();

        let req = request(&me.title, &me.body, Some(&me.id));
        let s = suggest_with_pool(&pool, &SuggestConfig::default(), &req).await;
        assert_eq!(s.terms.len(), 1);
        assert_eq!(s.notes.len(), 1);

        let stored = sources::get_source(&pool, &me.id).await.unwrap();
        let last = &stored.metadata[METADATA_KEY];
        assert_eq!(last["terms"][0]["name"], "fraud");
        assert!(last["ran_at"].is_string());
        assert!(last["keywords"].as_array().is_some_and(|k| !k.is_empty()));
    }

    #[tokio::test]
    async fn database_failure_yields_empty() {
        let pool = db::memory_pool().await;
        sqlx::query("DROP TABLE source_terms").execute(&pool).await.unwrap();
        sqlx::query("DROP TABLE ontology_terms").execute(&pool).await.unwrap();

        let req = request("Fraud", "fraud", None);
        let s = suggest_with_pool(&pool, &SuggestConfig::default(), &req).await;
        assert!(s.is_empty());
    }
}
