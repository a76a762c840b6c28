//! Knowledge-source storage.
//!
//! Sources are markdown documents with a title and a free-form JSON metadata
//! object. The ontology suggester reads them as candidates and writes its
//! last run into `metadata.last_suggestion`.

use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::models::KnowledgeSource;

pub async fn add_source(pool: &SqlitePool, title: &str, body: &str) -> Result<KnowledgeSource> {
    if title.trim().is_empty() {
        bail!("title must not be empty");
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();

    sqlx::query(
        "INSERT INTO sources (id, title, body, metadata_json, created_at, updated_at) VALUES (?, ?, ?, '{}', ?, ?)",
    )
    .bind(&id)
    .bind(title.trim())
    .bind(body)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(KnowledgeSource {
        id,
        title: title.trim().to_string(),
        body: body.to_string(),
        metadata: serde_json::json!({}),
        created_at: now,
        updated_at: now,
    })
}

pub async fn get_source(pool: &SqlitePool, id: &str) -> Result<KnowledgeSource> {
    let row = sqlx::query(
        "SELECT id, title, body, metadata_json, created_at, updated_at FROM sources WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(source_from_row(&row)),
        None => bail!("source not found: {}", id),
    }
}

/// All sources, oldest first. Ties on `created_at` fall back to `id` so the
/// order is reproducible.
pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<KnowledgeSource>> {
    let rows = sqlx::query(
        "SELECT id, title, body, metadata_json, created_at, updated_at FROM sources ORDER BY created_at ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(source_from_row).collect())
}

/// Remove a source together with its tags and term links.
pub async fn delete_source(pool: &SqlitePool, id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM tags WHERE content_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM source_terms WHERE source_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM sources WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if deleted == 0 {
        tx.rollback().await?;
        bail!("source not found: {}", id);
    }

    tx.commit().await?;
    Ok(())
}

/// Merge a single key into the source's metadata object.
///
/// Non-object metadata (or unparseable JSON) is replaced by a fresh object.
pub async fn update_metadata(
    pool: &SqlitePool,
    id: &str,
    key: &str,
    value: serde_json::Value,
) -> Result<()> {
    let current: Option<String> =
        sqlx::query_scalar("SELECT metadata_json FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    let current = match current {
        Some(c) => c,
        None => bail!("source not found: {}", id),
    };

    let mut metadata: serde_json::Value =
        serde_json::from_str(&current).unwrap_or_else(|_| serde_json::json!({}));
    if !metadata.is_object() {
        metadata = serde_json::json!({});
    }
    if let Some(obj) = metadata.as_object_mut() {
        obj.insert(key.to_string(), value);
    }

    sqlx::query("UPDATE sources SET metadata_json = ?, updated_at = ? WHERE id = ?")
        .bind(serde_json::to_string(&metadata)?)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

fn source_from_row(row: &SqliteRow) -> KnowledgeSource {
    let metadata_json: String = row.get("metadata_json");
    KnowledgeSource {
        id: row.get("id"),
        title: row.get("title"),
        body: row.get("body"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============ CLI entry points ============

pub async fn run_add(config: &Config, title: &str, body: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let source = add_source(&pool, title, body).await?;
    pool.close().await;
    println!("added source {}", source.id);
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let sources = list_sources(&pool).await?;
    pool.close().await;

    if sources.is_empty() {
        println!("No sources.");
        return Ok(());
    }

    println!("{:<38} {:<8} TITLE", "ID", "CHARS");
    for s in &sources {
        println!("{:<38} {:<8} {}", s.id, s.body.chars().count(), s.title);
    }
    Ok(())
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let source = get_source(&pool, id).await;
    pool.close().await;
    let source = source?;

    println!("--- Source ---");
    println!("id:         {}", source.id);
    println!("title:      {}", source.title);
    println!("created_at: {}", format_ts_iso(source.created_at));
    println!("updated_at: {}", format_ts_iso(source.updated_at));
    println!("metadata:   {}", source.metadata);
    println!();
    println!("--- Body ---");
    println!("{}", source.body);
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = delete_source(&pool, id).await;
    pool.close().await;
    result?;
    println!("deleted source {}", id);
    Ok(())
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_get_roundtrip() {
        let pool = db::memory_pool().await;
        let added = add_source(&pool, "  Fraud notes ", "# Heading\nbody").await.unwrap();
        assert_eq!(added.title, "Fraud notes");

        let fetched = get_source(&pool, &added.id).await.unwrap();
        assert_eq!(fetched.title, "Fraud notes");
        assert_eq!(fetched.body, "# Heading\nbody");
        assert_eq!(fetched.metadata, serde_json::json!({}));
    }

    #[tokio::test]
    async fn empty_title_rejected() {
        let pool = db::memory_pool().await;
        assert!(add_source(&pool, "   ", "body").await.is_err());
    }

    #[tokio::test]
    async fn get_missing_source_errors() {
        let pool = db::memory_pool().await;
        let err = get_source(&pool, "nope").await.unwrap_err();
        assert!(err.to_string().contains("source not found"));
    }

    #[tokio::test]
    async fn delete_removes_source_and_tags() {
        let pool = db::memory_pool().await;
        let s = add_source(&pool, "A", "alpha").await.unwrap();
        sqlx::query("INSERT INTO tags (id, name, content_id, created_at) VALUES ('t1', 'x', ?, 0)")
            .bind(&s.id)
            .execute(&pool)
            .await
            .unwrap();

        delete_source(&pool, &s.id).await.unwrap();

        assert!(get_source(&pool, &s.id).await.is_err());
        let tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(tags, 0);
        assert!(delete_source(&pool, &s.id).await.is_err());
    }

    #[tokio::test]
    async fn update_metadata_merges_keys() {
        let pool = db::memory_pool().await;
        let s = add_source(&pool, "A", "alpha").await.unwrap();

        update_metadata(&pool, &s.id, "one", serde_json::json!(1)).await.unwrap();
        update_metadata(&pool, &s.id, "two", serde_json::json!({"x": true}))
            .await
            .unwrap();

        let fetched = get_source(&pool, &s.id).await.unwrap();
        assert_eq!(fetched.metadata["one"], 1);
        assert_eq!(fetched.metadata["two"]["x"], true);
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let pool = db::memory_pool().await;
        for (id, ts) in [("b", 2), ("a", 2), ("c", 1)] {
            sqlx::query(
                "INSERT INTO sources (id, title, body, created_at, updated_at) VALUES (?, ?, '', ?, ?)",
            )
            .bind(id)
            .bind(id)
            .bind(ts)
            .bind(ts)
            .execute(&pool)
            .await
            .unwrap();
        }

        let ids: Vec<String> = list_sources(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
