//! # esgf-dl
//!
//! Multi-worker download orchestrator for ESGF dataset instances.
//!
//! A run takes every pending [`WorkItem`] from a durable SQLite queue,
//! routes it to a per-host pool of workers, downloads and verifies its
//! files, and records the outcome: successes update the dataset record,
//! failures land in a separate failure queue for a later run.
//!
//! ## Design
//!
//! - **Message passing only** - workers and the collector share nothing but
//!   their queues
//! - **One durable writer** - only the [`ResultCollector`] writes records and
//!   the failure queue during a run
//! - **Nothing lost on interrupt** - SIGINT/SIGTERM moves pending items to the
//!   failure queue before exiting
//! - **Typed sentinels** - workers stop on [`Task::Shutdown`], never on a
//!   null value
//!
//! ## Quick Start
//!
//! ```no_run
//! use esgf_dl::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_json(r#"{ "downloads": { "n": 4, "host_limits": { "esgf.ceda.ac.uk": 2 } } }"#)?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let status = orchestrator.run().await?;
//!     std::process::exit(status.code());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Command-line interface
pub mod cli;
/// Result collection and durable recording
pub mod collector;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// File fetching and verification
pub mod downloader;
/// Error types
pub mod error;
/// Event relay
pub mod events;
/// Run coordination
pub mod orchestrator;
/// Joinable in-process queue
pub mod queue;
/// Retry logic with exponential backoff
pub mod retry;
/// Host-based worker partitioning
pub mod routing;
/// Core types and events
pub mod types;
/// Download workers
pub mod worker;

// Re-export commonly used types
pub use collector::{CollectorStats, ResultCollector};
pub use config::{Config, DownloadsConfig};
pub use db::{DatasetRecord, Database, PersistentQueue, RecordStore, SqliteQueue};
pub use downloader::{Downloader, HttpDownloader};
pub use error::{DatabaseError, DownloadError, Error, Result};
pub use events::{EventSink, LogSink};
pub use orchestrator::{Collaborators, ExitStatus, Orchestrator};
pub use queue::JoinableQueue;
pub use routing::{RouteKey, RoutingTable};
pub use types::{
    ChecksumType, DownloadResult, Event, FileSpec, Outcome, ResultEnvelope, ResultMessage, Task,
    WorkItem,
};

use tokio_util::sync::CancellationToken;

/// Token cancelled when the process receives a termination signal
///
/// - **Unix:** SIGTERM and SIGINT, with fallbacks if registration fails.
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Must be called inside a tokio runtime.
pub fn interrupt_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
