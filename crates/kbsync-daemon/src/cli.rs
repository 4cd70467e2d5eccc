//! CLI argument parsing for the kbsync daemon.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

/// kbsync
///
/// Keeps a knowledge index in sync with a document repository.
#[derive(Parser, Debug)]
#[command(name = "kbsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/kbsync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process file mutation events read as JSON lines from stdin
    Run {
        /// Override repository root
        #[arg(long)]
        repository_root: Option<String>,

        /// Override index directory
        #[arg(long)]
        index_dir: Option<String>,
    },

    /// Extract and print the text of files
    Extract {
        /// Files to extract
        #[arg(required = true)]
        files: Vec<String>,

        /// Send plain text and HTML through the external worker too
        #[arg(long)]
        force_external: bool,
    },

    /// Show ingestion progress for one tenant
    Status {
        /// User ID
        #[arg(long)]
        user: Option<String>,

        /// Organization ID
        #[arg(long)]
        org: Option<String>,

        /// Override index directory
        #[arg(long)]
        index_dir: Option<String>,
    },
}
