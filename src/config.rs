//! TOML configuration.
//!
//! Every command takes a `--config` path. The file carries the database
//! location, the server bind address, the LLM provider settings, and the
//! tuning knobs for tag generation and ontology suggestion. Secrets are
//! never stored here: the LLM API key is read from the environment variable
//! named by `llm.api_key_env`.
//!
//! ```toml
//! [db]
//! path = "./data/kassist.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! max_retries = 3
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tags: TagsConfig,
    #[serde(default)]
    pub suggest: SuggestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Settings for the text-generation backend used by the tag generator.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override (e.g. a proxy or a local Ollama instance).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Content longer than this is truncated before it goes into the prompt.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_content_chars() -> usize {
    4000
}

/// Upper bound on tags per request, independent of configuration.
pub const MAX_TAGS_LIMIT: usize = 10;

#[derive(Debug, Deserialize, Clone)]
pub struct TagsConfig {
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
    /// Returned whenever the model cannot produce usable tags.
    #[serde(default = "default_fallback_tags")]
    pub fallback: Vec<String>,
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            max_tags: default_max_tags(),
            fallback: default_fallback_tags(),
        }
    }
}

fn default_max_tags() -> usize {
    MAX_TAGS_LIMIT
}

pub fn default_fallback_tags() -> Vec<String> {
    ["content", "document", "text", "analysis", "metadata"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SuggestConfig {
    #[serde(default = "default_term_limit")]
    pub term_limit: usize,
    #[serde(default = "default_note_limit")]
    pub note_limit: usize,
    #[serde(default = "default_keyword_limit")]
    pub keyword_limit: usize,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            term_limit: default_term_limit(),
            note_limit: default_note_limit(),
            keyword_limit: default_keyword_limit(),
        }
    }
}

fn default_term_limit() -> usize {
    10
}
fn default_note_limit() -> usize {
    5
}
fn default_keyword_limit() -> usize {
    20
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate tags
    if config.tags.max_tags == 0 || config.tags.max_tags > MAX_TAGS_LIMIT {
        anyhow::bail!("tags.max_tags must be in [1, {}]", MAX_TAGS_LIMIT);
    }
    if !config
        .tags
        .fallback
        .iter()
        .any(|t| !t.trim().is_empty())
    {
        anyhow::bail!("tags.fallback must contain at least one non-empty tag");
    }

    // Validate suggest
    if config.suggest.keyword_limit == 0 {
        anyhow::bail!("suggest.keyword_limit must be > 0");
    }

    // Validate llm
    if config.llm.max_delay_ms < config.llm.base_delay_ms {
        anyhow::bail!("llm.max_delay_ms must be >= llm.base_delay_ms");
    }
    if config.llm.max_content_chars == 0 {
        anyhow::bail!("llm.max_content_chars must be > 0");
    }

    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.llm.model.is_none() {
                anyhow::bail!(
                    "llm.model must be specified when provider is '{}'",
                    config.llm.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(config)
}
