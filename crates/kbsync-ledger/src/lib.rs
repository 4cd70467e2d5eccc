//! # kbsync-ledger
//!
//! Tracks the latest lifecycle progress of every file, per tenant, and
//! answers status queries over it.

pub mod ledger;
pub mod status;
pub mod subscriber;

pub use ledger::{ProgressLedger, TenantProgress, TenantSnapshot};
pub use status::{StatusRequest, StatusResponse, StatusService};
pub use subscriber::spawn_ledger_subscriber;
