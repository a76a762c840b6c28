//! Ontology terms and their links to knowledge sources.

use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::models::OntologyTerm;

pub async fn add_term(
    pool: &SqlitePool,
    name: &str,
    domain: &str,
    description: &str,
) -> Result<OntologyTerm> {
    let name = name.trim();
    if name.is_empty() {
        bail!("term name must not be empty");
    }

    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM ontology_terms WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        bail!("term already exists: {}", name);
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();

    sqlx::query(
        "INSERT INTO ontology_terms (id, name, domain, description, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(domain.trim())
    .bind(description.trim())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(OntologyTerm {
        id,
        name: name.to_string(),
        domain: domain.trim().to_string(),
        description: description.trim().to_string(),
        created_at: now,
    })
}

/// All terms, oldest first, then by name.
pub async fn list_terms(pool: &SqlitePool) -> Result<Vec<OntologyTerm>> {
    let rows = sqlx::query(
        "SELECT id, name, domain, description, created_at FROM ontology_terms ORDER BY created_at ASC, name ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(term_from_row).collect())
}

/// Link a term to a source. Linking twice is a no-op; returns whether a new
/// link was created.
pub async fn link_term(pool: &SqlitePool, source_id: &str, term_id: &str) -> Result<bool> {
    let source: Option<String> = sqlx::query_scalar("SELECT id FROM sources WHERE id = ?")
        .bind(source_id)
        .fetch_optional(pool)
        .await?;
    if source.is_none() {
        bail!("source not found: {}", source_id);
    }

    let term: Option<String> = sqlx::query_scalar("SELECT id FROM ontology_terms WHERE id = ?")
        .bind(term_id)
        .fetch_optional(pool)
        .await?;
    if term.is_none() {
        bail!("term not found: {}", term_id);
    }

    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO source_terms (source_id, term_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(source_id)
    .bind(term_id)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?
    .rows_affected();

    Ok(inserted > 0)
}

pub async fn linked_terms(pool: &SqlitePool, source_id: &str) -> Result<Vec<OntologyTerm>> {
    let rows = sqlx::query(
        r#"
        SELECT t.id, t.name, t.domain, t.description, t.created_at
        FROM source_terms st
        JOIN ontology_terms t ON t.id = st.term_id
        WHERE st.source_id = ?
        ORDER BY st.created_at ASC, t.name ASC
        "#,
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(term_from_row).collect())
}

fn term_from_row(row: &SqliteRow) -> OntologyTerm {
    OntologyTerm {
        id: row.get("id"),
        name: row.get("name"),
        domain: row.get("domain"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}

// ============ CLI entry points ============

pub async fn run_add(config: &Config, name: &str, domain: &str, description: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let term = add_term(&pool, name, domain, description).await;
    pool.close().await;
    let term = term?;
    println!("added term {} ({})", term.name, term.id);
    Ok(())
}

pub async fn run_list(config: &Config, source_id: Option<&str>) -> Result<()> {
    let pool = db::connect(config).await?;
    let terms = match source_id {
        Some(id) => linked_terms(&pool, id).await,
        None => list_terms(&pool).await,
    };
    pool.close().await;
    let terms = terms?;

    if terms.is_empty() {
        println!("No terms.");
        return Ok(());
    }

    println!("{:<38} {:<24} {:<16} DESCRIPTION", "ID", "NAME", "DOMAIN");
    for t in &terms {
        println!(
            "{:<38} {:<24} {:<16} {}",
            t.id, t.name, t.domain, t.description
        );
    }
    Ok(())
}

pub async fn run_link(config: &Config, source_id: &str, term_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let created = link_term(&pool, source_id, term_id).await;
    pool.close().await;
    if created? {
        println!("linked term {} to source {}", term_id, source_id);
    } else {
        println!("term {} already linked to source {}", term_id, source_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::add_source;

    #[tokio::test]
    async fn duplicate_term_name_rejected() {
        let pool = db::memory_pool().await;
        add_term(&pool, "Machine Learning", "ai", "Statistical learning")
            .await
            .unwrap();
        let err = add_term(&pool, "Machine Learning", "ai", "again")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn link_is_idempotent() {
        let pool = db::memory_pool().await;
        let source = add_source(&pool, "Doc", "body").await.unwrap();
        let term = add_term(&pool, "fraud", "finance", "").await.unwrap();

        assert!(link_term(&pool, &source.id, &term.id).await.unwrap());
        assert!(!link_term(&pool, &source.id, &term.id).await.unwrap());

        let linked = linked_terms(&pool, &source.id).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].name, "fraud");
    }

    #[tokio::test]
    async fn link_requires_existing_rows() {
        let pool = db::memory_pool().await;
        let source = add_source(&pool, "Doc", "body").await.unwrap();
        let err = link_term(&pool, &source.id, "missing").await.unwrap_err();
        assert!(err.to_string().contains("term not found"));
        let err = link_term(&pool, "missing", "missing").await.unwrap_err();
        assert!(err.to_string().contains("source not found"));
    }
}
