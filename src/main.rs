//! # Drive Agent CLI (`dra`)
//!
//! The `dra` binary is the primary interface for Drive Agent. It provides
//! commands for syncing the drive corpus, running agent tasks, searching
//! the store, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! dra --config ./config/agent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dra sync` | Run one incremental drive → vector store sync |
//! | `dra task "<prompt>"` | Run an agent task to completion |
//! | `dra search "<query>"` | Query the store directly (operator debugging) |
//! | `dra stats` | Collection statistics and last sync record |
//! | `dra reset --yes` | Empty the collection |
//! | `dra serve` | Start the HTTP server, optionally with periodic sync |
//!
//! ## Environment
//!
//! | Variable | Purpose |
//! |----------|---------|
//! | `GEMINI_API_KEY` | model + embedding API key (required) |
//! | `GOOGLE_OAUTH_TOKEN` | drive/gmail bearer token (required for sync/email) |
//! | `GOOGLE_DRIVE_FOLDER_ID` | overrides `[drive] folder_id` |
//! | `GOOGLE_DRIVE_FOLDER_ROOT_NAME` | overrides `[drive] root_name` |
//! | `VECTOR_STORE_URL` | overrides `[vector] url` |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use drive_agent::agent::AgentOrchestrator;
use drive_agent::config::{load_config, Config};
use drive_agent::drive::GoogleDriveClient;
use drive_agent::email::{DisabledSender, EmailSender, GmailSender};
use drive_agent::ingest::{IngestionPipeline, PipelineConfig};
use drive_agent::model::GeminiClient;
use drive_agent::server::run_server;
use drive_agent::sync_cache::SyncCache;
use drive_agent::tools::{ToolContext, ToolRegistry};
use drive_agent::vector_store::{DocumentStore, HttpBackend, SearchOptions};

/// Drive Agent — a retrieval-augmented agent runtime over a Google Drive
/// corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/agent.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dra",
    about = "Drive Agent — retrieval-augmented agent runtime over a Google Drive corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Run one incremental sync of the drive folder into the vector store.
    ///
    /// Lists the folder tree, diffs it against the store, applies
    /// additions, updates, and deletions, and refreshes the sync cache.
    Sync {
        /// Override the folder traversal bound from config.
        #[arg(long)]
        max_folders: Option<usize>,
    },

    /// Run an agent task to completion and print the answer.
    Task {
        /// The natural-language task.
        prompt: String,

        /// Iteration bound for the tool loop (1..=10).
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Print the full outcome (tool calls included) as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Query the vector store directly, bypassing the agent.
    Search {
        /// The search query string.
        query: String,

        /// Require this keyword in the document text (case-insensitive).
        #[arg(long)]
        keyword: Option<String>,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Drop results farther than this distance.
        #[arg(long)]
        max_distance: Option<f32>,
    },

    /// Print collection statistics and the last sync record.
    Stats,

    /// Delete every document in the collection.
    Reset {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Start the HTTP server.
    Serve {
        /// Also run the ingestion pipeline every N seconds.
        #[arg(long)]
        sync_interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Sync { max_folders } => run_sync(&config, max_folders).await,
        Commands::Task {
            prompt,
            max_iterations,
            json,
        } => run_task(&config, &prompt, max_iterations, json).await,
        Commands::Search {
            query,
            keyword,
            limit,
            max_distance,
        } => run_search(&config, &query, keyword, limit, max_distance).await,
        Commands::Stats => run_stats(&config).await,
        Commands::Reset { yes } => run_reset(&config, yes).await,
        Commands::Serve { sync_interval } => run_serve(&config, sync_interval).await,
    }
}

/// Open the vector backend and wrap it in the store façade.
async fn open_store(config: &Config) -> Result<DocumentStore> {
    let model = Arc::new(GeminiClient::from_env(&config.model)?);
    let backend = HttpBackend::open(
        &config.vector.url,
        &config.vector.collection,
        config.vector.dims,
    )
    .await?;
    Ok(DocumentStore::new(
        Arc::new(backend),
        model,
        config.drive.root_name.clone(),
    ))
}

fn build_pipeline(config: &Config, store: DocumentStore, max_folders: Option<usize>) -> Result<IngestionPipeline> {
    if config.drive.folder_id.trim().is_empty() {
        bail!("drive.folder_id must be set (or GOOGLE_DRIVE_FOLDER_ID exported)");
    }

    let drive = Arc::new(GoogleDriveClient::from_env()?);
    let cache = SyncCache::new(config.sync.cache_path.clone());

    Ok(IngestionPipeline::new(
        drive,
        store,
        cache,
        PipelineConfig {
            root_folder_id: config.drive.folder_id.clone(),
            max_folders: max_folders.unwrap_or(config.drive.max_folders),
            batch_size: config.sync.batch_size,
        },
    ))
}

fn build_agent(config: &Config, store: DocumentStore) -> Result<AgentOrchestrator> {
    let model = Arc::new(GeminiClient::from_env(&config.model)?);
    let email: Arc<dyn EmailSender> = if config.email.enabled {
        Arc::new(GmailSender::from_env()?)
    } else {
        Arc::new(DisabledSender)
    };

    let ctx = ToolContext {
        store,
        email,
        model: model.clone(),
        distance_cutoff: config.agent.distance_cutoff,
    };

    Ok(AgentOrchestrator::new(
        model,
        ToolRegistry::with_builtins(),
        ctx,
        Duration::from_secs(config.agent.tool_timeout_secs),
    ))
}

async fn run_sync(config: &Config, max_folders: Option<usize>) -> Result<()> {
    let store = open_store(config).await?;
    let pipeline = build_pipeline(config, store, max_folders)?;
    pipeline.run().await?;
    Ok(())
}

async fn run_task(
    config: &Config,
    prompt: &str,
    max_iterations: Option<usize>,
    json: bool,
) -> Result<()> {
    let max_iterations = max_iterations.unwrap_or(config.agent.max_iterations);
    if !(1..=10).contains(&max_iterations) {
        bail!("--max-iterations must be in 1..=10");
    }

    let store = open_store(config).await?;
    let agent = build_agent(config, store)?;

    let outcome = agent
        .execute_task(prompt, max_iterations, None)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.answer);
    }
    Ok(())
}

async fn run_search(
    config: &Config,
    query: &str,
    keyword: Option<String>,
    limit: usize,
    max_distance: Option<f32>,
) -> Result<()> {
    let store = open_store(config).await?;
    let hits = store
        .search(
            query,
            limit,
            &SearchOptions {
                keyword,
                max_distance,
                metadata_filter: None,
            },
        )
        .await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, hit.distance, hit.path);
        if hit.keyword_count > 0 {
            println!("    keyword matches: {}", hit.keyword_count);
        }
        println!("    link: {}", hit.drive_link);
    }
    Ok(())
}

async fn run_stats(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let stats = store.stats().await?;

    println!("Drive Agent — Corpus Stats");
    println!("==========================");
    println!();
    println!("  Collection:  {}", stats.name);
    println!("  Documents:   {}", stats.count);

    let cache = SyncCache::new(config.sync.cache_path.clone());
    match cache.load() {
        Some(record) => {
            println!("  Last sync:   {}", record.last_sync_time);
            println!("  Files seen:  {}", record.file_count);
        }
        None => println!("  Last sync:   never"),
    }
    Ok(())
}

async fn run_reset(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to reset without --yes");
    }
    let store = open_store(config).await?;
    store.reset().await?;
    println!("collection emptied");
    Ok(())
}

async fn run_serve(config: &Config, sync_interval: Option<u64>) -> Result<()> {
    let store = open_store(config).await?;
    let agent = Arc::new(build_agent(config, store.clone())?);

    let periodic = match sync_interval {
        Some(secs) => {
            if secs == 0 {
                bail!("--sync-interval must be > 0");
            }
            let pipeline = Arc::new(build_pipeline(config, store.clone(), None)?);
            Some((pipeline, secs))
        }
        None => None,
    };

    run_server(&config.server.bind, agent, store, periodic).await
}
