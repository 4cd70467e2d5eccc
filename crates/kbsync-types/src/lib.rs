//! # kbsync-types
//!
//! Shared types for the kbsync document ingestion pipeline.
//!
//! ## Core Types
//! - `FileMutationEvent`: A change observed on a repository file
//! - `ProgressEvent` / `ProgressRecord`: Lifecycle progress and its ledger view
//! - `OperationResult`: Outcome of a lifecycle operation
//! - `EventBus` / `BusMessage`: Topic-addressed publish/subscribe
//! - `Settings`: Layered configuration

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod progress;

pub use bus::{BusMessage, EventBus, DEFAULT_BUS_CAPACITY, INDEX_TOPIC, REPOSITORY_TOPIC};
pub use config::{ExtractionSettings, ProgressWeights, Settings};
pub use error::KbSyncError;
pub use event::{FileMutationEvent, Identity, MutationKind};
pub use progress::{
    OperationKind, OperationResult, ProgressEvent, ProgressPhase, ProgressRecord, ProgressStep,
    StepName,
};
