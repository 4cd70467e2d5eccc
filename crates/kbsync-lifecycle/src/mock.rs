//! In-memory collaborators for testing.
//!
//! Deterministic stand-ins for the repository, knowledge index, text
//! extraction and plugins, recording every call they receive.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncReadExt;

use kbsync_extract::TextStream;
use kbsync_types::{BusMessage, EventBus, FileMutationEvent, Identity, REPOSITORY_TOPIC};

use crate::collaborators::{
    ByteStream, IndexOutcome, IngestRequest, KnowledgeIndex, Repository, TextExtraction,
    TextSource,
};
use crate::context::IngestionContext;
use crate::error::SyncError;
use crate::plugin::FilePlugin;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Repository keeping file contents in memory under a single root.
pub struct MockRepository {
    root: PathBuf,
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    bus: Option<Arc<EventBus>>,
}

impl MockRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: Mutex::new(HashMap::new()),
            bus: None,
        }
    }

    /// Publish mutation events for notifying writes.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn insert(&self, full_path: impl Into<PathBuf>, contents: Vec<u8>) {
        lock(&self.files).insert(full_path.into(), contents);
    }

    pub fn contents(&self, full_path: impl AsRef<Path>) -> Option<Vec<u8>> {
        lock(&self.files).get(full_path.as_ref()).cloned()
    }

    fn notify(&self, event: FileMutationEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(REPOSITORY_TOPIC, BusMessage::FileMutation(event));
        }
    }
}

#[async_trait]
impl Repository for MockRepository {
    fn full_path(&self, _identity: &Identity, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn root_relative_path(
        &self,
        _identity: &Identity,
        full_path: &Path,
    ) -> Result<String, SyncError> {
        full_path
            .strip_prefix(&self.root)
            .map(|p| p.to_string_lossy().to_string())
            .map_err(|_| {
                SyncError::Validation(format!("{} is outside the repository", full_path.display()))
            })
    }

    async fn open_read(&self, full_path: &Path) -> Result<ByteStream, SyncError> {
        let contents = self.contents(full_path).ok_or_else(|| {
            SyncError::Repository(format!("no such file: {}", full_path.display()))
        })?;
        Ok(Box::new(Cursor::new(contents)))
    }

    async fn write_file(
        &self,
        identity: &Identity,
        relative: &str,
        mut contents: ByteStream,
        _comment: &str,
        notify: bool,
    ) -> Result<(), SyncError> {
        let mut raw = Vec::new();
        contents
            .read_to_end(&mut raw)
            .await
            .map_err(|e| SyncError::Repository(e.to_string()))?;
        let full_path = self.full_path(identity, relative);
        self.insert(full_path.clone(), raw);
        if notify {
            self.notify(FileMutationEvent::created(full_path, identity));
        }
        Ok(())
    }

    async fn delete_file(
        &self,
        identity: &Identity,
        relative: &str,
        notify: bool,
    ) -> Result<(), SyncError> {
        let full_path = self.full_path(identity, relative);
        lock(&self.files)
            .remove(&full_path)
            .ok_or_else(|| SyncError::Repository(format!("no such file: {}", relative)))?;
        if notify {
            self.notify(FileMutationEvent::deleted(full_path, identity));
        }
        Ok(())
    }

    async fn rename_file(
        &self,
        identity: &Identity,
        from_relative: &str,
        to_relative: &str,
        notify: bool,
    ) -> Result<(), SyncError> {
        let from = self.full_path(identity, from_relative);
        let to = self.full_path(identity, to_relative);
        {
            let mut files = lock(&self.files);
            let contents = files
                .remove(&from)
                .ok_or_else(|| SyncError::Repository(format!("no such file: {}", from_relative)))?;
            files.insert(to.clone(), contents);
        }
        if notify {
            self.notify(FileMutationEvent::renamed(from, to, identity));
        }
        Ok(())
    }
}

/// One call received by [`MockIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCall {
    IngestStarted(String),
    IngestFinished(String),
    UningestStarted(PathBuf),
    UningestFinished(PathBuf),
    Rename { from: PathBuf, to_index_path: String },
    Rebuild,
    Flush,
}

/// Knowledge index storing extracted text by index path.
pub struct MockIndex {
    knowledge_base_id: String,
    calls: Mutex<Vec<IndexCall>>,
    /// Index path -> (full path, text)
    documents: Mutex<BTreeMap<String, (PathBuf, String)>>,
    fail_ingest: AtomicBool,
    fail_rebuild: AtomicBool,
}

impl MockIndex {
    pub fn new() -> Self {
        Self {
            knowledge_base_id: "kb-default".to_string(),
            calls: Mutex::new(Vec::new()),
            documents: Mutex::new(BTreeMap::new()),
            fail_ingest: AtomicBool::new(false),
            fail_rebuild: AtomicBool::new(false),
        }
    }

    pub fn failing_ingest(self) -> Self {
        self.fail_ingest.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_rebuild(self) -> Self {
        self.fail_rebuild.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<IndexCall> {
        lock(&self.calls).clone()
    }

    pub fn document(&self, index_path: &str) -> Option<String> {
        lock(&self.documents)
            .get(index_path)
            .map(|(_, text)| text.clone())
    }

    fn record(&self, call: IndexCall) {
        lock(&self.calls).push(call);
    }
}

impl Default for MockIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeIndex for MockIndex {
    async fn knowledge_base_id(
        &self,
        _identity: &Identity,
        extra_info: &Value,
    ) -> Result<String, SyncError> {
        Ok(extra_info
            .get("knowledge_base")
            .and_then(Value::as_str)
            .unwrap_or(&self.knowledge_base_id)
            .to_string())
    }

    async fn ingest_file(
        &self,
        request: &IngestRequest,
        text: TextSource,
    ) -> Result<IndexOutcome, SyncError> {
        self.record(IndexCall::IngestStarted(request.index_path.clone()));
        tokio::task::yield_now().await;
        if self.fail_ingest.load(Ordering::SeqCst) {
            return Err(SyncError::IndexSync("index offline".to_string()));
        }
        let contents = text.read_to_string().await?;
        lock(&self.documents).insert(
            request.index_path.clone(),
            (request.full_path.clone(), contents),
        );
        self.record(IndexCall::IngestFinished(request.index_path.clone()));
        Ok(IndexOutcome::success())
    }

    async fn uningest_file(
        &self,
        full_path: &Path,
        _identity: &Identity,
        _knowledge_base_id: &str,
    ) -> Result<IndexOutcome, SyncError> {
        self.record(IndexCall::UningestStarted(full_path.to_path_buf()));
        tokio::task::yield_now().await;
        let removed = {
            let mut documents = lock(&self.documents);
            let before = documents.len();
            documents.retain(|_, (path, _)| path.as_path() != full_path);
            before - documents.len()
        };
        self.record(IndexCall::UningestFinished(full_path.to_path_buf()));
        Ok(IndexOutcome { result: removed > 0 })
    }

    async fn rename_file(
        &self,
        from: &Path,
        to: &Path,
        to_index_path: &str,
        _identity: &Identity,
        _knowledge_base_id: &str,
    ) -> Result<IndexOutcome, SyncError> {
        self.record(IndexCall::Rename {
            from: from.to_path_buf(),
            to_index_path: to_index_path.to_string(),
        });
        let mut documents = lock(&self.documents);
        let moved = documents
            .iter()
            .find(|(_, (path, _))| path.as_path() == from)
            .map(|(key, _)| key.clone());
        match moved.and_then(|key| documents.remove(&key)) {
            Some((_, text)) => {
                documents.insert(to_index_path.to_string(), (to.to_path_buf(), text));
                Ok(IndexOutcome::success())
            }
            None => Ok(IndexOutcome::failure()),
        }
    }

    async fn rebuild(&self, _identity: &Identity, _knowledge_base_id: &str) -> Result<(), SyncError> {
        self.record(IndexCall::Rebuild);
        if self.fail_rebuild.load(Ordering::SeqCst) {
            return Err(SyncError::IndexSync("rebuild failed".to_string()));
        }
        Ok(())
    }

    async fn flush(&self, _identity: &Identity, _knowledge_base_id: &str) -> Result<(), SyncError> {
        self.record(IndexCall::Flush);
        Ok(())
    }
}

/// Extraction that uppercases the input bytes.
#[derive(Default)]
pub struct MockExtraction {
    calls: AtomicUsize,
}

impl MockExtraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtraction for MockExtraction {
    async fn extract_text(
        &self,
        mut input: ByteStream,
        _path: &Path,
        _force_external: bool,
    ) -> Result<TextStream, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut raw = Vec::new();
        input
            .read_to_end(&mut raw)
            .await
            .map_err(|e| SyncError::Extraction(e.into()))?;
        let text = String::from_utf8_lossy(&raw).to_uppercase();
        Ok(Box::new(Cursor::new(text.into_bytes())))
    }
}

/// Plugin claiming files by extension, with scriptable failures.
pub struct ScriptedPlugin {
    name: String,
    extension: String,
    can_handle_error: bool,
    init_error: bool,
    result: bool,
    can_handle_calls: AtomicUsize,
    operations: Mutex<Vec<String>>,
}

impl ScriptedPlugin {
    pub fn claiming(name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
            can_handle_error: false,
            init_error: false,
            result: true,
            can_handle_calls: AtomicUsize::new(0),
            operations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_can_handle_error(mut self) -> Self {
        self.can_handle_error = true;
        self
    }

    pub fn with_init_error(mut self) -> Self {
        self.init_error = true;
        self
    }

    pub fn with_result(mut self, result: bool) -> Self {
        self.result = result;
        self
    }

    pub fn can_handle_calls(&self) -> usize {
        self.can_handle_calls.load(Ordering::SeqCst)
    }

    /// Operations run so far, as `"{op} {index_path}"`.
    pub fn operations(&self) -> Vec<String> {
        lock(&self.operations).clone()
    }

    fn run(&self, op: &str, ctx: &IngestionContext) -> Result<bool, SyncError> {
        lock(&self.operations).push(format!("{} {}", op, ctx.index_path));
        Ok(self.result)
    }
}

#[async_trait]
impl FilePlugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> Result<(), SyncError> {
        if self.init_error {
            return Err(SyncError::Plugin("missing credentials".to_string()));
        }
        Ok(())
    }

    async fn can_handle(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        self.can_handle_calls.fetch_add(1, Ordering::SeqCst);
        if self.can_handle_error {
            return Err(SyncError::Plugin("cannot inspect file".to_string()));
        }
        Ok(ctx.file_name().ends_with(&self.extension))
    }

    async fn ingest(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        self.run("ingest", ctx)
    }

    async fn uningest(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        self.run("uningest", ctx)
    }

    async fn rename(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        self.run("rename", ctx)
    }
}
