//! # kbsync-lifecycle
//!
//! Turns file mutation events into knowledge index operations.
//!
//! ## Flow
//! 1. A mutation arrives on the bus and is dispatched to the controller
//! 2. A `processing` progress event is published
//! 3. The first plugin claiming the file runs; otherwise the default
//!    repository-to-index path does
//! 4. The knowledge base is rebuilt and flushed once
//! 5. A `processed` progress event carries the result

pub mod collaborators;
pub mod context;
pub mod controller;
pub mod error;
pub mod mock;
pub mod plugin;

pub use collaborators::{
    ByteStream, IndexOutcome, IngestRequest, KnowledgeIndex, Repository, TextExtraction,
    TextSource,
};
pub use context::{Collaborators, IngestionContext, RenameTarget};
pub use controller::{LifecycleController, DEFAULT_MINIMUM_SUCCESS_FRACTION};
pub use error::{SyncError, PLUGIN_VALIDATION_FAILED};
pub use plugin::{FilePlugin, PluginChain, PluginFactory, PluginRegistry};
