//! kbsync daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, extract, status)
//! - `pipeline`: Bus, controller and ledger wiring
//! - `repository`: Filesystem content repository
//! - `index`: Directory-backed knowledge index
//! - `plugins`: Built-in file plugins

pub mod cli;
pub mod commands;
pub mod index;
pub mod pipeline;
pub mod plugins;
pub mod repository;

pub use cli::{Cli, Commands};
pub use commands::{extract_files, run_pipeline, show_status};
pub use index::{DirectoryIndex, DEFAULT_KNOWLEDGE_BASE};
pub use pipeline::Pipeline;
pub use plugins::{builtin_registry, IgnoredFilesPlugin};
pub use repository::FsRepository;
