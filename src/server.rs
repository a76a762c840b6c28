//! HTTP server for the tag generator and the ontology suggester.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/functions/generate-tags` | `{ content, save?, contentId? }` → `{ tags }` |
//! | `POST` | `/functions/suggest-ontology` | `{ content, title, sourceId }` → `{ terms, notes }` |
//! | `GET`  | `/sources/{id}/tags` | Saved tags for a source |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "content must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500).
//!
//! `suggest-ontology` never returns an error status: any failure, including
//! a malformed request body, produces empty lists with HTTP 200.
//! `generate-tags` only rejects empty content; every other failure degrades
//! to fallback tags.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser clients can
//! call the functions directly.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{NoteSuggestion, TermSuggestion};
use crate::suggest::{suggest_with_pool, SuggestRequest};
use crate::tagger::{generate_and_store, list_tags, TagGenerator};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    tagger: Arc<TagGenerator>,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        let tagger = TagGenerator::from_config(&config);
        Self::with_tagger(config, pool, tagger)
    }

    /// Use a pre-built tag generator (e.g. one backed by a custom provider).
    pub fn with_tagger(config: Config, pool: SqlitePool, tagger: TagGenerator) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            tagger: Arc::new(tagger),
        }
    }
}

/// Build the router with all routes and middleware.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/functions/generate-tags", post(handle_generate_tags))
        .route("/functions/suggest-ontology", post(handle_suggest_ontology))
        .route("/sources/{id}/tags", get(handle_list_tags))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind`, applies schema migrations, and serves until
/// Ctrl-C is received.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let state = AppState::new(config.clone(), pool.clone());
    tracing::info!(
        provider = %config.llm.provider,
        model = config.llm.model.as_deref().unwrap_or("-"),
        "tag generator ready"
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /functions/generate-tags ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateTagsRequest {
    #[serde(default)]
    content: String,
    #[serde(default)]
    save: bool,
    #[serde(default)]
    content_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct TagsResponse {
    tags: Vec<String>,
}

async fn handle_generate_tags(
    State(state): State<AppState>,
    body: Result<Json<GenerateTagsRequest>, JsonRejection>,
) -> Result<Json<TagsResponse>, AppError> {
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;
    if req.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }

    let generated = generate_and_store(
        &state.tagger,
        Some(&state.pool),
        &req.content,
        req.save,
        req.content_id.as_deref(),
    )
    .await;

    Ok(Json(TagsResponse {
        tags: generated.tags,
    }))
}

// ============ POST /functions/suggest-ontology ============

#[derive(Debug, Serialize)]
struct SuggestResponse {
    terms: Vec<TermSuggestion>,
    notes: Vec<NoteSuggestion>,
}

async fn handle_suggest_ontology(
    State(state): State<AppState>,
    body: Result<Json<SuggestRequest>, JsonRejection>,
) -> Json<SuggestResponse> {
    let req = match body {
        Ok(Json(req)) => req,
        Err(e) => {
            tracing::warn!(error = %e.body_text(), "malformed suggest request");
            return Json(SuggestResponse {
                terms: Vec::new(),
                notes: Vec::new(),
            });
        }
    };

    let suggestions = suggest_with_pool(&state.pool, &state.config.suggest, &req).await;
    Json(SuggestResponse {
        terms: suggestions.terms,
        notes: suggestions.notes,
    })
}

// ============ GET /sources/{id}/tags ============

async fn handle_list_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TagsResponse>, AppError> {
    let tags = list_tags(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(TagsResponse { tags }))
}
