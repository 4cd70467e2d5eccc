//! Progress events, ledger records and operation results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::event::Identity;

/// Whether an operation has started or finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Processing,
    Processed,
}

/// The lifecycle operation a progress event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Ingested,
    Uningested,
    Renamed,
    Modified,
}

/// Named weighting bucket for intermediate progress steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Initial,
    Pregen,
}

/// Intermediate step reported while an operation is still processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub name: StepName,
    pub no_of_steps: u32,
}

/// A lifecycle progress notification published on the index topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub subtype: OperationKind,
    pub user_id: String,
    pub org_id: String,
    /// Absolute path of the file
    pub path: PathBuf,
    /// Root-relative path used as the ledger key
    pub index_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<ProgressStep>,
    #[serde(default)]
    pub extra_info: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Start notification for an operation.
    pub fn processing(
        subtype: OperationKind,
        identity: &Identity,
        path: impl Into<PathBuf>,
        index_path: impl Into<String>,
    ) -> Self {
        Self {
            phase: ProgressPhase::Processing,
            subtype,
            user_id: identity.user_id.clone(),
            org_id: identity.org_id.clone(),
            path: path.into(),
            index_path: index_path.into(),
            result: None,
            cause: None,
            step: None,
            extra_info: Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Completion notification carrying the operation result.
    pub fn processed(
        subtype: OperationKind,
        identity: &Identity,
        path: impl Into<PathBuf>,
        index_path: impl Into<String>,
        outcome: &OperationResult,
    ) -> Self {
        Self {
            phase: ProgressPhase::Processed,
            result: Some(outcome.result),
            cause: outcome.cause.clone(),
            ..Self::processing(subtype, identity, path, index_path)
        }
    }

    pub fn with_step(mut self, name: StepName, no_of_steps: u32) -> Self {
        self.step = Some(ProgressStep { name, no_of_steps });
        self
    }

    pub fn with_extra_info(mut self, extra_info: Value) -> Self {
        self.extra_info = extra_info;
        self
    }

    pub fn identity(&self) -> Identity {
        Identity::new(&self.user_id, &self.org_id)
    }

    pub fn is_done(&self) -> bool {
        self.phase == ProgressPhase::Processed
    }
}

/// Latest known progress for one file of one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,
    pub percentage: f64,
    pub subtype: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            result: true,
            cause: None,
        }
    }

    pub fn failed(cause: impl Into<String>) -> Self {
        Self {
            result: false,
            cause: Some(cause.into()),
        }
    }

    /// Result without a cause, as reported by plugins and the index.
    pub fn from_bool(result: bool) -> Self {
        Self {
            result,
            cause: None,
        }
    }
}
