//! # Knowledge Assist CLI (`kassist`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kassist init` | Create the SQLite database and run schema migrations |
//! | `kassist serve` | Start the HTTP server |
//! | `kassist source add\|list\|get\|delete` | Manage knowledge sources |
//! | `kassist term add\|list\|link` | Manage ontology terms |
//! | `kassist tags generate\|list` | Generate or list tags |
//! | `kassist suggest <id>` | Suggest ontology terms and related sources |
//!
//! ## Examples
//!
//! ```bash
//! kassist --config ./config/kassist.toml init
//! kassist source add "Fraud detection" --file ./notes/fraud.md
//! kassist tags generate --file ./notes/fraud.md --save --content-id <id>
//! kassist suggest <id>
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use knowledge_assist::{config, logging, migrate, server, sources, suggest, tagger, terms};

/// Knowledge Assist: tag generation and ontology suggestion for a markdown
/// knowledge base.
#[derive(Parser)]
#[command(
    name = "kassist",
    about = "Knowledge Assist: tag generation and ontology suggestion for a markdown knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kassist.toml")]
    config: PathBuf,

    /// Verbose diagnostics on stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Manage knowledge sources.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Manage ontology terms.
    Term {
        #[command(subcommand)]
        action: TermAction,
    },

    /// Generate or list tags.
    Tags {
        #[command(subcommand)]
        action: TagsAction,
    },

    /// Suggest ontology terms and related sources for a stored source.
    ///
    /// The run is recorded in the source's `metadata.last_suggestion`.
    Suggest {
        /// Source UUID.
        id: String,
    },
}

#[derive(Subcommand)]
enum SourceAction {
    /// Add a markdown source.
    Add {
        title: String,
        /// Read the body from this file.
        #[arg(long, conflicts_with = "body")]
        file: Option<PathBuf>,
        /// Body text given inline.
        #[arg(long)]
        body: Option<String>,
    },
    /// List all sources.
    List,
    /// Print a source with its metadata.
    Get { id: String },
    /// Delete a source, its tags and term links.
    Delete { id: String },
}

#[derive(Subcommand)]
enum TermAction {
    /// Add an ontology term.
    Add {
        name: String,
        #[arg(long, default_value = "")]
        domain: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List terms, or only those linked to `--source`.
    List {
        #[arg(long)]
        source: Option<String>,
    },
    /// Link a term to a source.
    Link { source_id: String, term_id: String },
}

#[derive(Subcommand)]
enum TagsAction {
    /// Generate tags for text. Never fails; falls back to default tags.
    Generate {
        /// Text to tag.
        #[arg(conflicts_with = "file")]
        text: Option<String>,
        /// Read the text from this file.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Persist the tags against `--content-id`.
        #[arg(long, requires = "content_id")]
        save: bool,
        #[arg(long)]
        content_id: Option<String>,
    },
    /// List saved tags for a content id.
    List { content_id: String },
}

fn read_text(inline: Option<String>, file: Option<&Path>) -> Result<String> {
    match (inline, file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => bail!("provide text inline or with --file"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Source { action } => match action {
            SourceAction::Add { title, file, body } => {
                let body = read_text(body, file.as_deref())?;
                sources::run_add(&cfg, &title, &body).await?;
            }
            SourceAction::List => sources::run_list(&cfg).await?,
            SourceAction::Get { id } => sources::run_get(&cfg, &id).await?,
            SourceAction::Delete { id } => sources::run_delete(&cfg, &id).await?,
        },
        Commands::Term { action } => match action {
            TermAction::Add {
                name,
                domain,
                description,
            } => terms::run_add(&cfg, &name, &domain, &description).await?,
            TermAction::List { source } => terms::run_list(&cfg, source.as_deref()).await?,
            TermAction::Link { source_id, term_id } => {
                terms::run_link(&cfg, &source_id, &term_id).await?
            }
        },
        Commands::Tags { action } => match action {
            TagsAction::Generate {
                text,
                file,
                save,
                content_id,
            } => {
                let text = read_text(text, file.as_deref())?;
                tagger::run_generate(&cfg, &text, save, content_id.as_deref()).await?;
            }
            TagsAction::List { content_id } => tagger::run_list(&cfg, &content_id).await?,
        },
        Commands::Suggest { id } => {
            suggest::run_suggest(&cfg, &id).await?;
        }
    }

    Ok(())
}
