//! # Knowledge Assist
//!
//! Assistive services for a markdown knowledge base: LLM-backed tag
//! generation and heuristic ontology-term suggestion, over a local SQLite
//! store of knowledge sources, tags and ontology terms.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌───────────────┐
//! │   CLI    │──▶│ tagger           │──▶│ llm (OpenAI / │
//! │(kassist) │   │ prompt/parse/    │   │ Ollama, retry)│
//! └──────────┘   │ fallback         │   └───────────────┘
//!       │        └──────────────────┘
//!       │        ┌──────────────────┐
//! ┌──────────┐──▶│ suggest          │
//! │   HTTP   │   │ keywords/scoring │
//! └──────────┘   └────────┬─────────┘
//!                         ▼
//!                  ┌─────────────┐
//!                  │   SQLite    │
//!                  └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kassist init
//! kassist source add "Fraud detection" --file notes/fraud.md
//! kassist tags generate "machine learning pipelines for real-time fraud detection"
//! kassist suggest <source-id>
//! kassist serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sources`] | Knowledge-source storage |
//! | [`terms`] | Ontology terms and links |
//! | [`llm`] | Completion providers and retry |
//! | [`tag_parse`] | Model output → tags |
//! | [`tagger`] | Tag generation pipeline |
//! | [`keywords`] | Keyword extraction |
//! | [`suggest`] | Ontology and related-document suggestion |
//! | [`server`] | HTTP server |
//! | [`logging`] | `tracing` subscriber setup |

pub mod config;
pub mod db;
pub mod keywords;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod server;
pub mod sources;
pub mod suggest;
pub mod tag_parse;
pub mod tagger;
pub mod terms;
