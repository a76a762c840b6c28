//! Core data models used throughout Knowledge Assist.
//!
//! Persisted rows (sources, ontology terms) and the request-scoped results
//! produced by the tag generator and the ontology suggester.

use serde::{Deserialize, Serialize};

/// A user-authored markdown document.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeSource {
    pub id: String,
    pub title: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A taxonomy label that can be suggested to and linked with sources.
#[derive(Debug, Clone, Serialize)]
pub struct OntologyTerm {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub description: String,
    pub created_at: i64,
}

/// A ranked keyword extracted from a document. `score` is in `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub term: String,
    pub score: f64,
}

/// An ontology term proposed for a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermSuggestion {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub score: f64,
    /// Keywords that contributed to the score.
    pub matched: Vec<String>,
}

/// A related document proposed for a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteSuggestion {
    pub id: String,
    pub title: String,
    pub score: f64,
    pub matched: Vec<String>,
}

/// Result of one ontology suggestion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Suggestions {
    pub terms: Vec<TermSuggestion>,
    pub notes: Vec<NoteSuggestion>,
    #[serde(default)]
    pub keywords: Vec<Keyword>,
}

impl Suggestions {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.notes.is_empty()
    }
}
