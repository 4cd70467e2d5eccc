//! Per-operation ingestion context handed to plugins and the default path.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, warn};

use kbsync_extract::TextStream;
use kbsync_types::{
    BusMessage, EventBus, Identity, OperationKind, OperationResult, ProgressEvent, StepName,
    INDEX_TOPIC,
};

use crate::collaborators::{
    ByteStream, IngestRequest, KnowledgeIndex, Repository, TextExtraction, TextSource,
};
use crate::error::SyncError;

/// Shared handles to the systems a lifecycle operation talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn Repository>,
    pub index: Arc<dyn KnowledgeIndex>,
    pub extraction: Arc<dyn TextExtraction>,
    pub bus: Arc<EventBus>,
}

/// Destination of a rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameTarget {
    pub full_path: PathBuf,
    pub index_path: String,
}

/// Everything known about the file one lifecycle operation is about.
pub struct IngestionContext {
    /// Absolute path of the file (the source, for renames)
    pub path: PathBuf,
    /// Root-relative path; the ledger key
    pub index_path: String,
    pub target: Option<RenameTarget>,
    pub identity: Identity,
    pub language: Option<String>,
    pub knowledge_base_id: String,
    pub extra_info: Value,
    /// Fraction of sub-operations that must succeed for overall success
    pub minimum_success_fraction: f64,
    operation: OperationKind,
    collaborators: Collaborators,
    finalized: AtomicBool,
}

impl IngestionContext {
    pub fn new(
        operation: OperationKind,
        path: impl Into<PathBuf>,
        index_path: impl Into<String>,
        identity: Identity,
        knowledge_base_id: impl Into<String>,
        collaborators: Collaborators,
        minimum_success_fraction: f64,
    ) -> Self {
        Self {
            path: path.into(),
            index_path: index_path.into(),
            target: None,
            identity,
            language: None,
            knowledge_base_id: knowledge_base_id.into(),
            extra_info: Value::Null,
            minimum_success_fraction,
            operation,
            collaborators,
            finalized: AtomicBool::new(false),
        }
    }

    pub fn with_target(mut self, target: RenameTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn with_extra_info(mut self, extra_info: Value) -> Self {
        self.extra_info = extra_info;
        self
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.collaborators.repository
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Raw bytes of the file, or of `override_path` when given.
    pub async fn read_stream(&self, override_path: Option<&Path>) -> Result<ByteStream, SyncError> {
        let path = override_path.unwrap_or(&self.path);
        self.collaborators.repository.open_read(path).await
    }

    /// Plain text of the file, or of `override_path` when given.
    pub async fn text_stream(&self, override_path: Option<&Path>) -> Result<TextStream, SyncError> {
        self.text_source(override_path).open().await
    }

    /// Lazy text handle for the file, or for `override_path` when given.
    pub fn text_source(&self, override_path: Option<&Path>) -> TextSource {
        TextSource::new(
            override_path.unwrap_or(&self.path),
            Arc::clone(&self.collaborators.repository),
            Arc::clone(&self.collaborators.extraction),
        )
    }

    /// Full text of the file. `None` when it cannot be read or extracted.
    pub async fn text_contents(&self) -> Option<String> {
        let mut stream = match self.text_stream(None).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not extract text");
                return None;
            }
        };
        let mut raw = Vec::new();
        match stream.read_to_end(&mut raw).await {
            Ok(_) => Some(String::from_utf8_lossy(&raw).into_owned()),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read extracted text");
                None
            }
        }
    }

    /// Store a file in the tenant's repository space.
    pub async fn add_to_repository(
        &self,
        relative: &str,
        contents: ByteStream,
        comment: &str,
        notify: bool,
    ) -> bool {
        let outcome = self
            .collaborators
            .repository
            .write_file(&self.identity, relative, contents, comment, notify)
            .await;
        log_repository_outcome("write", relative, outcome)
    }

    pub async fn delete_from_repository(&self, relative: &str, notify: bool) -> bool {
        let outcome = self
            .collaborators
            .repository
            .delete_file(&self.identity, relative, notify)
            .await;
        log_repository_outcome("delete", relative, outcome)
    }

    pub async fn rename_in_repository(&self, from: &str, to: &str, notify: bool) -> bool {
        let outcome = self
            .collaborators
            .repository
            .rename_file(&self.identity, from, to, notify)
            .await;
        log_repository_outcome("rename", from, outcome)
    }

    /// Ingest this file into the knowledge index.
    pub async fn add_to_index(&self) -> OperationResult {
        self.add_path_to_index(&self.path, &self.index_path, self.language.clone())
            .await
    }

    /// Ingest another repository file on behalf of this operation.
    pub async fn add_path_to_index(
        &self,
        full_path: &Path,
        index_path: &str,
        language: Option<String>,
    ) -> OperationResult {
        let request = IngestRequest {
            full_path: full_path.to_path_buf(),
            index_path: index_path.to_string(),
            identity: self.identity.clone(),
            knowledge_base_id: self.knowledge_base_id.clone(),
            language,
            defer_rebuild: true,
        };
        let text = self.text_source(Some(full_path));
        index_outcome(
            "ingest",
            index_path,
            self.collaborators.index.ingest_file(&request, text).await,
        )
    }

    pub async fn remove_from_index(&self) -> OperationResult {
        let outcome = self
            .collaborators
            .index
            .uningest_file(&self.path, &self.identity, &self.knowledge_base_id)
            .await;
        index_outcome("uningest", &self.index_path, outcome)
    }

    pub async fn rename_in_index(&self) -> OperationResult {
        let Some(target) = &self.target else {
            return OperationResult::failed("rename has no destination");
        };
        let outcome = self
            .collaborators
            .index
            .rename_file(
                &self.path,
                &target.full_path,
                &target.index_path,
                &self.identity,
                &self.knowledge_base_id,
            )
            .await;
        index_outcome("rename", &self.index_path, outcome)
    }

    /// Rebuild and flush the knowledge base. Runs at most once per context.
    ///
    /// Returns false when it already ran or either step failed.
    pub async fn finalize(&self) -> bool {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return false;
        }
        let index = &self.collaborators.index;
        let outcome = async {
            index.rebuild(&self.identity, &self.knowledge_base_id).await?;
            index.flush(&self.identity, &self.knowledge_base_id).await
        }
        .await;
        match outcome {
            Ok(()) => true,
            Err(e) => {
                error!(
                    knowledge_base = %self.knowledge_base_id,
                    error = %e,
                    "Knowledge base rebuild failed"
                );
                false
            }
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Publish an intermediate progress step for this operation.
    pub fn report_step(&self, step: StepName, no_of_steps: u32) {
        let event = ProgressEvent::processing(
            self.operation,
            &self.identity,
            &self.path,
            &self.index_path,
        )
        .with_step(step, no_of_steps)
        .with_extra_info(self.extra_info.clone());
        self.collaborators
            .bus
            .publish(INDEX_TOPIC, BusMessage::Progress(event));
    }

    /// Whether `succeeded` of `total` sub-operations meets the threshold.
    pub fn meets_success_threshold(&self, succeeded: usize, total: usize) -> bool {
        if total == 0 {
            return true;
        }
        succeeded as f64 / total as f64 >= self.minimum_success_fraction
    }
}

fn log_repository_outcome(op: &str, relative: &str, outcome: Result<(), SyncError>) -> bool {
    match outcome {
        Ok(()) => {
            debug!(op, path = relative, "Repository operation done");
            true
        }
        Err(e) => {
            error!(op, path = relative, error = %e, "Repository operation failed");
            false
        }
    }
}

fn index_outcome(
    op: &str,
    index_path: &str,
    outcome: Result<crate::collaborators::IndexOutcome, SyncError>,
) -> OperationResult {
    match outcome {
        Ok(outcome) => OperationResult::from_bool(outcome.result),
        Err(e) => {
            error!(op, path = index_path, error = %e, "Knowledge index call failed");
            OperationResult::failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{IndexCall, MockExtraction, MockIndex, MockRepository};
    use kbsync_types::ProgressPhase;

    fn context(index: Arc<MockIndex>, bus: Arc<EventBus>) -> IngestionContext {
        let repository = Arc::new(MockRepository::new("/a"));
        repository.insert("/a/report.pdf", b"quarterly".to_vec());
        let collaborators = Collaborators {
            repository,
            index,
            extraction: Arc::new(MockExtraction::new()),
            bus,
        };
        IngestionContext::new(
            OperationKind::Ingested,
            "/a/report.pdf",
            "report.pdf",
            Identity::new("u1", "o1"),
            "kb",
            collaborators,
            0.5,
        )
    }

    #[tokio::test]
    async fn test_finalize_runs_once() {
        let index = Arc::new(MockIndex::new());
        let ctx = context(Arc::clone(&index), Arc::new(EventBus::default()));

        assert!(ctx.finalize().await);
        assert!(!ctx.finalize().await);
        assert!(ctx.is_finalized());
        assert_eq!(index.calls(), vec![IndexCall::Rebuild, IndexCall::Flush]);
    }

    #[tokio::test]
    async fn test_text_contents() {
        let ctx = context(Arc::new(MockIndex::new()), Arc::new(EventBus::default()));
        assert_eq!(ctx.text_contents().await.as_deref(), Some("QUARTERLY"));
    }

    #[tokio::test]
    async fn test_text_contents_none_on_failure() {
        let ctx = context(Arc::new(MockIndex::new()), Arc::new(EventBus::default()));
        let missing = ctx.text_stream(Some(Path::new("/a/missing.pdf"))).await;
        assert!(missing.is_err());

        let mut ctx = ctx;
        ctx.path = PathBuf::from("/a/missing.pdf");
        assert!(ctx.text_contents().await.is_none());
    }

    #[tokio::test]
    async fn test_add_to_index_reports_index_failure() {
        let index = Arc::new(MockIndex::new().failing_ingest());
        let ctx = context(index, Arc::new(EventBus::default()));
        let outcome = ctx.add_to_index().await;
        assert!(!outcome.result);
        assert!(outcome.cause.is_some());
    }

    #[tokio::test]
    async fn test_report_step_publishes_processing() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe(INDEX_TOPIC);
        let ctx = context(Arc::new(MockIndex::new()), Arc::clone(&bus));

        ctx.report_step(StepName::Pregen, 3);
        match rx.recv().await.unwrap() {
            BusMessage::Progress(event) => {
                assert_eq!(event.phase, ProgressPhase::Processing);
                assert_eq!(event.index_path, "report.pdf");
                assert_eq!(event.step.map(|s| s.no_of_steps), Some(3));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_threshold() {
        let ctx = context(Arc::new(MockIndex::new()), Arc::new(EventBus::default()));
        assert!(ctx.meets_success_threshold(1, 2));
        assert!(!ctx.meets_success_threshold(1, 3));
        assert!(ctx.meets_success_threshold(0, 0));
    }

    #[tokio::test]
    async fn test_repository_ops_report_outcome() {
        let repository = Arc::new(MockRepository::new("/a"));
        let ctx = IngestionContext::new(
            OperationKind::Ingested,
            "/a/archive.zip",
            "archive.zip",
            Identity::new("u1", "o1"),
            "kb",
            Collaborators {
                repository: repository.clone(),
                index: Arc::new(MockIndex::new()),
                extraction: Arc::new(MockExtraction::new()),
                bus: Arc::new(EventBus::default()),
            },
            0.5,
        );

        assert!(ctx.add_to_repository("inner.txt", Box::new(&b"hi"[..]), "unpacked", false).await);
        assert_eq!(repository.contents("/a/inner.txt"), Some(b"hi".to_vec()));
        assert!(ctx.rename_in_repository("inner.txt", "moved.txt", false).await);
        assert!(ctx.delete_from_repository("moved.txt", false).await);
        assert!(!ctx.delete_from_repository("moved.txt", false).await);
    }
}
