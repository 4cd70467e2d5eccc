//! Interfaces to the external systems the lifecycle drives.
//!
//! The content repository owns the files, the knowledge index owns the
//! searchable text, and text extraction turns one into the other.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use kbsync_extract::{ExtractionService, TextStream};
use kbsync_types::Identity;

use crate::error::SyncError;

/// Raw bytes of a repository file.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Content repository holding tenant files.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Absolute path of a root-relative path in the tenant's space.
    fn full_path(&self, identity: &Identity, relative: &str) -> PathBuf;

    /// Root-relative path of an absolute path in the tenant's space.
    fn root_relative_path(&self, identity: &Identity, full_path: &Path)
        -> Result<String, SyncError>;

    async fn open_read(&self, full_path: &Path) -> Result<ByteStream, SyncError>;

    /// Store a file. With `notify` set, a mutation event is published.
    async fn write_file(
        &self,
        identity: &Identity,
        relative: &str,
        contents: ByteStream,
        comment: &str,
        notify: bool,
    ) -> Result<(), SyncError>;

    async fn delete_file(
        &self,
        identity: &Identity,
        relative: &str,
        notify: bool,
    ) -> Result<(), SyncError>;

    async fn rename_file(
        &self,
        identity: &Identity,
        from_relative: &str,
        to_relative: &str,
        notify: bool,
    ) -> Result<(), SyncError>;
}

/// Result reported by the knowledge index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOutcome {
    pub result: bool,
}

impl IndexOutcome {
    pub fn success() -> Self {
        Self { result: true }
    }

    pub fn failure() -> Self {
        Self { result: false }
    }
}

/// Everything the index needs to ingest one file.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestRequest {
    pub full_path: PathBuf,
    pub index_path: String,
    pub identity: Identity,
    pub knowledge_base_id: String,
    pub language: Option<String>,
    /// The caller rebuilds once the operation is finalized
    pub defer_rebuild: bool,
}

/// Knowledge index ingesting extracted text.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Knowledge base the tenant's files go to.
    async fn knowledge_base_id(
        &self,
        identity: &Identity,
        extra_info: &Value,
    ) -> Result<String, SyncError>;

    async fn ingest_file(
        &self,
        request: &IngestRequest,
        text: TextSource,
    ) -> Result<IndexOutcome, SyncError>;

    async fn uningest_file(
        &self,
        full_path: &Path,
        identity: &Identity,
        knowledge_base_id: &str,
    ) -> Result<IndexOutcome, SyncError>;

    async fn rename_file(
        &self,
        from: &Path,
        to: &Path,
        to_index_path: &str,
        identity: &Identity,
        knowledge_base_id: &str,
    ) -> Result<IndexOutcome, SyncError>;

    async fn rebuild(&self, identity: &Identity, knowledge_base_id: &str) -> Result<(), SyncError>;

    async fn flush(&self, identity: &Identity, knowledge_base_id: &str) -> Result<(), SyncError>;
}

/// Converts document bytes to plain text.
#[async_trait]
pub trait TextExtraction: Send + Sync {
    async fn extract_text(
        &self,
        input: ByteStream,
        path: &Path,
        force_external: bool,
    ) -> Result<TextStream, SyncError>;
}

#[async_trait]
impl TextExtraction for ExtractionService {
    async fn extract_text(
        &self,
        input: ByteStream,
        path: &Path,
        force_external: bool,
    ) -> Result<TextStream, SyncError> {
        Ok(self.extract(input, path, force_external).await?)
    }
}

/// Lazily extracted text of one repository file.
///
/// Nothing is read or extracted until the index asks for it.
#[derive(Clone)]
pub struct TextSource {
    path: PathBuf,
    repository: Arc<dyn Repository>,
    extraction: Arc<dyn TextExtraction>,
}

impl TextSource {
    pub fn new(
        path: impl Into<PathBuf>,
        repository: Arc<dyn Repository>,
        extraction: Arc<dyn TextExtraction>,
    ) -> Self {
        Self {
            path: path.into(),
            repository,
            extraction,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn open(&self) -> Result<TextStream, SyncError> {
        let input = self.repository.open_read(&self.path).await?;
        self.extraction.extract_text(input, &self.path, false).await
    }

    pub async fn read_to_string(&self) -> Result<String, SyncError> {
        let mut stream = self.open().await?;
        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .await
            .map_err(|e| SyncError::Extraction(e.into()))?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}
