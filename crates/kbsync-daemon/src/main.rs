//! kbsync
//!
//! Keeps a knowledge index in sync with a document repository.
//!
//! # Usage
//!
//! ```bash
//! kbsync run [--repository-root PATH] [--index-dir PATH] < events.jsonl
//! kbsync extract FILE... [--force-external]
//! kbsync status --user USER --org ORG
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/kbsync/config.toml)
//! 3. Environment variables (KBSYNC_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use kbsync_daemon::{extract_files, run_pipeline, show_status, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            repository_root,
            index_dir,
        } => {
            run_pipeline(
                cli.config.as_deref(),
                cli.log_level.as_deref(),
                repository_root.as_deref(),
                index_dir.as_deref(),
            )
            .await?;
        }
        Commands::Extract {
            files,
            force_external,
        } => {
            extract_files(
                cli.config.as_deref(),
                cli.log_level.as_deref(),
                &files,
                force_external,
            )
            .await?;
        }
        Commands::Status {
            user,
            org,
            index_dir,
        } => {
            show_status(
                cli.config.as_deref(),
                cli.log_level.as_deref(),
                user,
                org,
                index_dir.as_deref(),
            )
            .await?;
        }
    }

    Ok(())
}
