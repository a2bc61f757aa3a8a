//! CLI command definitions and handlers.

use crate::config::Config;
use crate::db::{Database, PersistentQueue, SqliteQueue};
use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;
use crate::types::WorkItem;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Multi-worker download orchestrator for ESGF dataset instances.
#[derive(Parser, Debug)]
#[command(name = "esgf-dl")]
#[command(about = "Download queued ESGF dataset instances with a per-host worker pool")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// JSON configuration file.
    #[arg(short, long, env = "ESGF_DL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Database path, overriding `persistence.database_path`.
    #[arg(short, long, env = "ESGF_DL_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Download everything in the download queue.
    Run,

    /// Add work items from a JSON file (one item or an array) to the download queue.
    Enqueue {
        /// File holding the items.
        file: PathBuf,
    },

    /// Move every item of the failure queue back into the download queue.
    Requeue,

    /// Print queue lengths and the number of downloaded datasets.
    Status,
}

/// Parse command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Execute the parsed command, returning the process exit code.
pub async fn run_with_cli(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref(), cli.database)?;

    match cli.command {
        Commands::Run => {
            let orchestrator = Orchestrator::new(config).await?;
            let status = orchestrator.run().await?;
            tracing::info!(?status, code = status.code(), "Exiting");
            Ok(ExitCode::from(status.code() as u8))
        }
        Commands::Enqueue { file } => {
            let queues = Queues::open(&config).await?;
            let (added, skipped) = enqueue_file(&queues.downloads, &file).await?;
            println!("enqueued {added} item(s), skipped {skipped}");
            queues.db.close().await;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Requeue => {
            let queues = Queues::open(&config).await?;
            let moved = requeue_failures(&queues.failures, &queues.downloads).await?;
            println!("moved {moved} item(s) back to '{}'", queues.downloads.name());
            queues.db.close().await;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let queues = Queues::open(&config).await?;
            println!(
                "{}: {} ({} claimed)",
                queues.downloads.name(),
                queues.downloads.len().await?,
                queues.downloads.claimed_len().await?
            );
            println!("{}: {}", queues.failures.name(), queues.failures.len().await?);
            println!("downloaded: {}", queues.db.count_downloaded().await?);
            queues.db.close().await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>, database: Option<PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(database) = database {
        config.persistence.database_path = database;
    }
    config.validate()?;
    Ok(config)
}

struct Queues {
    db: Arc<Database>,
    downloads: SqliteQueue,
    failures: SqliteQueue,
}

impl Queues {
    async fn open(config: &Config) -> Result<Self> {
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        Ok(Self {
            downloads: SqliteQueue::new(db.clone(), config.persistence.download_queue.clone()),
            failures: SqliteQueue::new(db.clone(), config.persistence.failure_queue.clone()),
            db,
        })
    }
}

/// Parse a file holding one work item or an array of them
pub(crate) fn parse_items(content: &str) -> Result<Vec<WorkItem>> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<WorkItem>),
        One(Box<WorkItem>),
    }

    match serde_json::from_str(content)? {
        OneOrMany::Many(items) => Ok(items),
        OneOrMany::One(item) => Ok(vec![*item]),
    }
}

/// Append valid items from `file` (deduplicated), returning `(added, skipped)`
pub(crate) async fn enqueue_file(queue: &dyn PersistentQueue, file: &Path) -> Result<(usize, usize)> {
    let content = tokio::fs::read_to_string(file).await?;
    let items = parse_items(&content)?;

    let mut added = 0;
    let mut skipped = 0;
    for item in &items {
        if let Err(e) = item.validate() {
            tracing::warn!(instance_id = %item.instance_id, error = %e, "Skipping invalid item");
            skipped += 1;
            continue;
        }
        if queue.append(item, true).await? {
            added += 1;
        } else {
            tracing::debug!(instance_id = %item.instance_id, "Already queued");
            skipped += 1;
        }
    }

    Ok((added, skipped))
}

/// Drain `failures` into `downloads` (deduplicated), returning how many items were moved
pub(crate) async fn requeue_failures(
    failures: &dyn PersistentQueue,
    downloads: &dyn PersistentQueue,
) -> Result<usize> {
    let mut moved = 0;

    let released = failures.release_claimed().await?;
    if released > 0 {
        tracing::warn!(released, "Released failure-queue items left claimed by an earlier requeue");
    }

    loop {
        let item = match failures.pop().await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(Error::Database(crate::error::DatabaseError::CorruptPayload { .. })) => continue,
            Err(e) => return Err(e),
        };

        if let Err(e) = downloads.append(&item, true).await {
            // Un-claim it so the failure stays poppable
            if let Err(release) = failures.release_claimed().await {
                tracing::error!(
                    instance_id = %item.instance_id,
                    error = %release,
                    "Failed to release failure-queue claims"
                );
            }
            return Err(e);
        }
        failures.ack(&item.instance_id).await?;
        moved += 1;
    }

    Ok(moved)
}
