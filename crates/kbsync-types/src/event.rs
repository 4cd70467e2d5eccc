//! File mutation events published by repository and index sources.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

/// Tenant scope of every event and ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub org_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: org_id.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.user_id, self.org_id)
    }
}

/// Kind of change observed on a repository file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Created,
    Deleted,
    Renamed,
    Modified,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationKind::Created => "created",
            MutationKind::Deleted => "deleted",
            MutationKind::Renamed => "renamed",
            MutationKind::Modified => "modified",
        };
        f.write_str(s)
    }
}

/// A change to a file in the repository.
///
/// Renames carry `from_path` and `to_path`; every other kind carries `path`.
/// Events without the paths their kind requires are ignored by consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMutationEvent {
    pub kind: MutationKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_path: Option<PathBuf>,

    #[serde(default)]
    pub is_directory: bool,

    pub user_id: String,

    pub org_id: String,

    /// Language hint forwarded to the knowledge index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Opaque metadata carried through to progress events
    #[serde(default)]
    pub extra_info: Value,
}

impl FileMutationEvent {
    fn new(kind: MutationKind, identity: &Identity) -> Self {
        Self {
            kind,
            path: None,
            from_path: None,
            to_path: None,
            is_directory: false,
            user_id: identity.user_id.clone(),
            org_id: identity.org_id.clone(),
            language: None,
            extra_info: Value::Null,
        }
    }

    pub fn created(path: impl Into<PathBuf>, identity: &Identity) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(MutationKind::Created, identity)
        }
    }

    pub fn deleted(path: impl Into<PathBuf>, identity: &Identity) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(MutationKind::Deleted, identity)
        }
    }

    pub fn modified(path: impl Into<PathBuf>, identity: &Identity) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(MutationKind::Modified, identity)
        }
    }

    pub fn renamed(
        from_path: impl Into<PathBuf>,
        to_path: impl Into<PathBuf>,
        identity: &Identity,
    ) -> Self {
        Self {
            from_path: Some(from_path.into()),
            to_path: Some(to_path.into()),
            ..Self::new(MutationKind::Renamed, identity)
        }
    }

    pub fn as_directory(mut self) -> Self {
        self.is_directory = true;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_extra_info(mut self, extra_info: Value) -> Self {
        self.extra_info = extra_info;
        self
    }

    pub fn identity(&self) -> Identity {
        Identity::new(&self.user_id, &self.org_id)
    }

    /// The path this event is about: the destination for renames.
    pub fn subject_path(&self) -> Option<&Path> {
        match self.kind {
            MutationKind::Renamed => self.to_path.as_deref(),
            _ => self.path.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let identity = Identity::new("u1", "o1");
        assert_eq!(identity.to_string(), "u1_o1");
    }

    #[test]
    fn test_event_deserializes_with_defaults() {
        let json = r#"{"kind":"created","path":"/a/report.pdf","user_id":"u1","org_id":"o1"}"#;
        let event: FileMutationEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, MutationKind::Created);
        assert_eq!(event.path.as_deref(), Some(Path::new("/a/report.pdf")));
        assert!(!event.is_directory);
        assert!(event.language.is_none());
        assert_eq!(event.extra_info, Value::Null);
    }

    #[test]
    fn test_subject_path_for_rename() {
        let identity = Identity::new("u1", "o1");
        let event = FileMutationEvent::renamed("/a/old.pdf", "/a/new.pdf", &identity);
        assert_eq!(event.subject_path(), Some(Path::new("/a/new.pdf")));
        assert!(event.path.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let identity = Identity::new("u1", "o1");
        let event = FileMutationEvent::created("/a/docs", &identity)
            .as_directory()
            .with_language("de")
            .with_extra_info(serde_json::json!({"knowledge_base": "kb"}));
        assert!(event.is_directory);
        assert_eq!(event.language.as_deref(), Some("de"));
        assert_eq!(event.identity(), identity);
        assert_eq!(event.extra_info["knowledge_base"], "kb");
    }
}
