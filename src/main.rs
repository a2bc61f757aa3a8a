//! esgf-dl CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = esgf_dl::cli::parse_cli();

    // RUST_LOG overrides --log-level
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    match esgf_dl::cli::run_with_cli(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "esgf-dl failed");
            ExitCode::FAILURE
        }
    }
}
