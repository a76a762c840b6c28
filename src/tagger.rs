//! Tag generation pipeline.
//!
//! Turns arbitrary text into a short list of lower-cased descriptive tags:
//!
//! ```text
//! content ──▶ prompt ──▶ complete_with_retry ──▶ parse_tags ──▶ tags
//!                              │ failure             │ empty
//!                              └────────┬────────────┘
//!                                       ▼
//!                                 fallback tags
//! ```
//!
//! [`TagGenerator::generate`] cannot fail. Network errors, rate limiting,
//! unparseable output and persistence errors are all absorbed here and
//! reported through `tracing`; callers always receive between 1 and
//! `tags.max_tags` tags.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::config::{default_fallback_tags, Config, TagsConfig};
use crate::db;
use crate::llm::{self, CompletionProvider, DisabledProvider, RetryPolicy};
use crate::tag_parse::{normalize_tag, parse_tags};

const SYSTEM_PROMPT: &str = "You label documents in a personal knowledge base. \
Respond with a JSON array of short lower-case tags and nothing else.";

/// Where the returned tags came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagOrigin {
    Model,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedTags {
    pub tags: Vec<String>,
    pub origin: TagOrigin,
    /// Requests sent to the model (0 when the model was not consulted).
    pub attempts: u32,
}

pub struct TagGenerator {
    provider: Box<dyn CompletionProvider>,
    policy: RetryPolicy,
    max_tags: usize,
    max_content_chars: usize,
    fallback: Vec<String>,
}

impl TagGenerator {
    pub fn new(
        provider: Box<dyn CompletionProvider>,
        policy: RetryPolicy,
        tags: &TagsConfig,
        max_content_chars: usize,
    ) -> Self {
        let max_tags = tags.max_tags.clamp(1, crate::config::MAX_TAGS_LIMIT);
        Self {
            provider,
            policy,
            max_tags,
            max_content_chars,
            fallback: normalize_fallback(&tags.fallback, max_tags),
        }
    }

    /// Build a generator from configuration.
    ///
    /// If the configured provider cannot be created (e.g. the API key is
    /// missing) the generator still works and serves fallback tags.
    pub fn from_config(config: &Config) -> Self {
        let provider: Box<dyn CompletionProvider> = if !config.llm.is_enabled() {
            tracing::debug!("no llm provider configured, tags will use fallback");
            Box::new(DisabledProvider)
        } else {
            match llm::create_provider(&config.llm) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(
                        provider = %config.llm.provider,
                        error = %e,
                        "could not create completion provider, tags will use fallback"
                    );
                    Box::new(DisabledProvider)
                }
            }
        };

        Self::new(
            provider,
            RetryPolicy::from_config(&config.llm),
            &config.tags,
            config.llm.max_content_chars,
        )
    }

    pub async fn generate(&self, content: &str) -> GeneratedTags {
        if content.trim().is_empty() {
            tracing::debug!("empty content, returning fallback tags");
            return self.fallback_result(0);
        }

        let prompt = build_prompt(content, self.max_tags, self.max_content_chars);
        let outcome =
            llm::complete_with_retry(self.provider.as_ref(), &self.policy, SYSTEM_PROMPT, &prompt)
                .await;

        let raw = match outcome.result {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    model = self.provider.model_name(),
                    attempts = outcome.attempts,
                    error = %e,
                    "tag generation failed, using fallback tags"
                );
                return self.fallback_result(outcome.attempts);
            }
        };

        let tags = parse_tags(&raw, self.max_tags);
        if tags.is_empty() {
            tracing::warn!(
                model = self.provider.model_name(),
                response = %truncate_chars(&raw, 200),
                "model output contained no usable tags, using fallback tags"
            );
            return self.fallback_result(outcome.attempts);
        }

        GeneratedTags {
            tags,
            origin: TagOrigin::Model,
            attempts: outcome.attempts,
        }
    }

    fn fallback_result(&self, attempts: u32) -> GeneratedTags {
        GeneratedTags {
            tags: self.fallback.clone(),
            origin: TagOrigin::Fallback,
            attempts,
        }
    }
}

/// Normalize the configured fallback list. Falls back to the built-in
/// defaults if nothing usable remains.
fn normalize_fallback(configured: &[String], max_tags: usize) -> Vec<String> {
    let normalize = |list: &[String]| -> Vec<String> {
        let mut seen = HashSet::new();
        list.iter()
            .filter_map(|t| normalize_tag(t))
            .filter(|t| seen.insert(t.clone()))
            .take(max_tags)
            .collect()
    };

    let tags = normalize(configured);
    if tags.is_empty() {
        normalize(&default_fallback_tags())
    } else {
        tags
    }
}

/// Build the user prompt. Content is cut at `max_chars` characters.
pub fn build_prompt(content: &str, max_tags: usize, max_chars: usize) -> String {
    format!(
        r#"Generate between 1 and {max} tags that describe the following content.

Guidelines:
1. Use specific subject-matter terms, not generic words like "note" or "document"
2. Each tag is 1-3 words, lower-case
3. Order by relevance, most relevant first

Content:
{content}

Output ONLY a JSON array of strings. Example:
["machine learning", "fraud detection", "data pipelines"]"#,
        max = max_tags,
        content = truncate_chars(content.trim(), max_chars),
    )
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ============ Persistence ============

/// Insert tags for `content_id`. Existing `(name, content_id)` pairs are
/// left alone. Returns the number of new rows.
pub async fn save_tags(pool: &SqlitePool, content_id: &str, tags: &[String]) -> Result<u64> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for tag in tags {
        inserted += sqlx::query(
            "INSERT OR IGNORE INTO tags (id, name, content_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tag)
        .bind(content_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Saved tag names for `content_id`, in insertion order.
pub async fn list_tags(pool: &SqlitePool, content_id: &str) -> Result<Vec<String>> {
    let names: Vec<String> =
        sqlx::query_scalar("SELECT name FROM tags WHERE content_id = ? ORDER BY rowid ASC")
            .bind(content_id)
            .fetch_all(pool)
            .await?;
    Ok(names)
}

/// Generate tags and, when asked to, persist them.
///
/// Only tags that came from the model are stored; the generic fallback set
/// says nothing about the document. Persistence is best-effort: a missing pool, a missing `content_id`, or a
/// database error is logged and the generated tags are returned regardless.
pub async fn generate_and_store(
    generator: &TagGenerator,
    pool: Option<&SqlitePool>,
    content: &str,
    save: bool,
    content_id: Option<&str>,
) -> GeneratedTags {
    let generated = generator.generate(content).await;

    if !save {
        return generated;
    }
    if generated.origin == TagOrigin::Fallback {
        tracing::info!(
            content_id = content_id.unwrap_or("-"),
            "not saving fallback tags"
        );
        return generated;
    }

    match (pool, content_id.filter(|id| !id.trim().is_empty())) {
        (Some(pool), Some(id)) => match save_tags(pool, id, &generated.tags).await {
            Ok(n) => tracing::info!(content_id = id, inserted = n, "saved tags"),
            Err(e) => tracing::warn!(content_id = id, error = %e, "failed to save tags"),
        },
        (None, _) => tracing::warn!("save requested but no database is available"),
        (_, None) => tracing::warn!("save requested without a content id"),
    }

    generated
}

// ============ CLI entry points ============

pub async fn run_generate(
    config: &Config,
    content: &str,
    save: bool,
    content_id: Option<&str>,
) -> Result<()> {
    let generator = TagGenerator::from_config(config);

    let pool = if save {
        match db::connect(config).await {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(error = %e, "could not open database, tags will not be saved");
                None
            }
        }
    } else {
        None
    };

    let generated = generate_and_store(&generator, pool.as_ref(), content, save, content_id).await;
    if let Some(pool) = pool {
        pool.close().await;
    }

    println!(
        "origin: {}",
        match generated.origin {
            TagOrigin::Model => "model",
            TagOrigin::Fallback => "fallback",
        }
    );
    println!("attempts: {}", generated.attempts);
    println!("tags:");
    for tag in &generated.tags {
        println!("  - {}", tag);
    }
    Ok(())
}

pub async fn run_list(config: &Config, content_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let tags = list_tags(&pool, content_id).await;
    pool.close().await;
    let tags = tags?;

    if tags.is_empty() {
        println!("No tags.");
        return Ok(());
    }
    for tag in &tags {
        println!("{}", tag);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedProvider;
    use crate::llm::CompletionError;
    use std::sync::Arc;
    use std::time::Duration;

    /// Lets a test keep a handle on the provider after moving it into the generator.
    struct Shared(Arc<ScriptedProvider>);

    #[async_trait::async_trait]
    impl CompletionProvider for Shared {
        fn model_name(&self) -> &str {
            self.0.model_name()
        }
        async fn complete(&self, system: &str, prompt: &str) -> Result<String, CompletionError> {
            self.0.complete(system, prompt).await
        }
    }

    fn generator_with(script: Vec<Result<String, CompletionError>>) -> (TagGenerator, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(script));
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let generator = TagGenerator::new(
            Box::new(Shared(provider.clone())),
            policy,
            &TagsConfig::default(),
            4000,
        );
        (generator, provider)
    }

    fn assert_well_formed(tags: &[String]) {
        assert!(!tags.is_empty() && tags.len() <= 10, "bad count: {:?}", tags);
        for tag in tags {
            assert!(!tag.is_empty());
            assert_eq!(tag, &tag.to_lowercase());
        }
    }

    #[tokio::test]
    async fn model_tags_are_returned() {
        let (generator, _) = generator_with(vec![Ok(
            r#"["Machine Learning", "Fraud Detection", "Real-Time"]"#.into(),
        )]);
        let out = generator
            .generate("machine learning pipelines for real-time fraud detection")
            .await;

        assert_eq!(out.origin, TagOrigin::Model);
        assert_eq!(out.attempts, 1);
        assert_eq!(out.tags, vec!["machine learning", "fraud detection", "real-time"]);
        assert_well_formed(&out.tags);
    }

    #[tokio::test]
    async fn rate_limit_exhausts_retries_then_falls_back() {
        let (generator, provider) =
            generator_with(vec![Err(CompletionError::RateLimited("429".into()))]);
        let out = generator.generate("some text").await;

        assert_eq!(out.origin, TagOrigin::Fallback);
        assert_eq!(out.attempts, 4);
        assert_eq!(provider.calls(), 4);
        assert_eq!(out.tags, default_fallback_tags());
    }

    #[tokio::test]
    async fn malformed_output_falls_back() {
        let (generator, _) = generator_with(vec![Ok(
            "Unfortunately I cannot determine any meaningful labels here".into(),
        )]);
        let out = generator.generate("some text").await;

        assert_eq!(out.origin, TagOrigin::Fallback);
        assert_well_formed(&out.tags);
    }

    #[tokio::test]
    async fn empty_content_skips_model() {
        let (generator, provider) = generator_with(vec![Ok("[\"x\"]".into())]);
        let out = generator.generate("   \n ").await;

        assert_eq!(out.origin, TagOrigin::Fallback);
        assert_eq!(out.attempts, 0);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn output_is_capped_at_ten() {
        let many = (0..30).map(|i| format!("\"t{}\"", i)).collect::<Vec<_>>().join(",");
        let (generator, _) = generator_with(vec![Ok(format!("[{}]", many))]);
        let out = generator.generate("text").await;
        assert_eq!(out.tags.len(), 10);
    }

    #[test]
    fn fallback_is_normalized_and_capped() {
        let tags = TagsConfig {
            max_tags: 2,
            fallback: vec!["Alpha".into(), "alpha".into(), "Beta".into(), "Gamma".into()],
        };
        assert_eq!(normalize_fallback(&tags.fallback, tags.max_tags), vec!["alpha", "beta"]);
        assert_eq!(
            normalize_fallback(&["!!!".to_string()], 10),
            default_fallback_tags()
        );
    }

    #[test]
    fn prompt_truncates_on_char_boundary() {
        let content = "é".repeat(50);
        let prompt = build_prompt(&content, 10, 10);
        assert!(prompt.contains(&"é".repeat(10)));
        assert!(!prompt.contains(&"é".repeat(11)));
    }

    #[tokio::test]
    async fn save_and_list_tags_is_idempotent() {
        let pool = db::memory_pool().await;
        let tags = vec!["rust".to_string(), "async".to_string()];

        assert_eq!(save_tags(&pool, "doc-1", &tags).await.unwrap(), 2);
        assert_eq!(save_tags(&pool, "doc-1", &tags).await.unwrap(), 0);
        assert_eq!(list_tags(&pool, "doc-1").await.unwrap(), tags);
        assert!(list_tags(&pool, "doc-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_does_not_affect_result() {
        let pool = db::memory_pool().await;
        sqlx::query("DROP TABLE tags").execute(&pool).await.unwrap();

        let (generator, _) = generator_with(vec![Ok("[\"kept\"]".into())]);
        let out = generate_and_store(&generator, Some(&pool), "text", true, Some("doc")).await;
        assert_eq!(out.tags, vec!["kept"]);
        assert_eq!(out.origin, TagOrigin::Model);
    }

    #[tokio::test]
    async fn fallback_tags_are_not_saved() {
        let pool = db::memory_pool().await;
        let (generator, _) =
            generator_with(vec![Err(CompletionError::RateLimited("429".into()))]);
        let out = generate_and_store(&generator, Some(&pool), "text", true, Some("doc")).await;

        assert_eq!(out.origin, TagOrigin::Fallback);
        assert_eq!(out.tags, default_fallback_tags());
        assert!(list_tags(&pool, "doc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_tags_are_saved() {
        let pool = db::memory_pool().await;
        let (generator, _) = generator_with(vec![Ok("[\"rust\", \"sqlite\"]".into())]);
        generate_and_store(&generator, Some(&pool), "text", true, Some("doc")).await;
        assert_eq!(list_tags(&pool, "doc").await.unwrap(), vec!["rust", "sqlite"]);
    }

    #[test]
    fn disabled_config_uses_disabled_provider() {
        let config = crate::config::parse_config(
            "[db]\npath = \"x.sqlite\"\n[server]\nbind = \"127.0.0.1:0\"\n",
        )
        .unwrap();
        let generator = TagGenerator::from_config(&config);
        assert_eq!(generator.provider.model_name(), "disabled");
    }

    #[tokio::test]
    async fn save_without_content_id_is_skipped() {
        let pool = db::memory_pool().await;
        let (generator, _) = generator_with(vec![Ok("[\"kept\"]".into())]);
        let out = generate_and_store(&generator, Some(&pool), "text", true, None).await;
        assert_eq!(out.tags, vec!["kept"]);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
