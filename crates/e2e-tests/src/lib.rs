//! End-to-end test infrastructure for kbsync.
//!
//! Provides a shared TestHarness wiring a real filesystem repository,
//! directory index and extraction service to the pipeline, with an
//! in-process extractor standing in for the external worker.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use kbsync_daemon::{DirectoryIndex, FsRepository, Pipeline};
use kbsync_extract::{ExtractError, ExtractionService, Extractor, WorkerJob};
use kbsync_ledger::ProgressLedger;
use kbsync_lifecycle::{Collaborators, PluginChain, Repository};
use kbsync_types::{EventBus, Identity, Settings};

/// Extractor that uppercases `.pdf` inputs and records overlap.
pub struct CountingExtractor {
    delay: Duration,
    runs: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl CountingExtractor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            runs: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for CountingExtractor {
    fn name(&self) -> &str {
        "counting"
    }

    fn supports(&self, extension: &str) -> bool {
        extension == ".pdf"
    }

    async fn run(
        &self,
        job: &WorkerJob,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), ExtractError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        let raw = tokio::fs::read_to_string(&job.input).await?;
        sink.write_all(raw.to_uppercase().as_bytes()).await?;
        Ok(())
    }
}

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub settings: Settings,
    pub bus: Arc<EventBus>,
    pub repository: Arc<FsRepository>,
    pub index: Arc<DirectoryIndex>,
    pub extraction: Arc<ExtractionService>,
    pub extractor: Arc<CountingExtractor>,
    pub identity: Identity,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    /// Create a harness after adjusting the default settings.
    pub async fn with_settings(adjust: impl FnOnce(&mut Settings)) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let mut settings = Settings {
            repository_root: temp_dir.path().join("repository"),
            index_dir: temp_dir.path().join("index"),
            ..Settings::default()
        };
        settings.extraction.work_dir = temp_dir.path().join("extraction");
        adjust(&mut settings);

        let bus = Arc::new(EventBus::new(settings.bus_capacity));
        let extractor = Arc::new(CountingExtractor::new(Duration::from_millis(20)));
        let extraction = ExtractionService::with_extractor(
            &settings.extraction.work_dir,
            settings.extraction.max_workers,
            extractor.clone(),
        )
        .await
        .expect("Failed to create extraction service");

        Self {
            repository: Arc::new(FsRepository::new(&settings.repository_root, Arc::clone(&bus))),
            index: Arc::new(DirectoryIndex::new(&settings.index_dir)),
            extraction: Arc::new(extraction),
            extractor,
            bus,
            settings,
            identity: Identity::new("u1", "o1"),
            _temp_dir: temp_dir,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            repository: self.repository.clone(),
            index: self.index.clone(),
            extraction: self.extraction.clone(),
            bus: Arc::clone(&self.bus),
        }
    }

    /// Start a pipeline over the harness collaborators with a fresh ledger.
    pub async fn start(&self, plugins: PluginChain) -> Pipeline {
        Pipeline::start(
            &self.settings,
            self.collaborators(),
            plugins,
            Arc::new(ProgressLedger::new(self.settings.progress.clone())),
        )
        .await
        .expect("Failed to start pipeline")
    }

    /// Write a file into the harness tenant's repository space without
    /// publishing an event. Returns its absolute path.
    pub async fn put_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.repository.full_path(&self.identity, relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .expect("Failed to create repository dir");
        }
        tokio::fs::write(&path, contents)
            .await
            .expect("Failed to write repository file");
        path
    }

    /// Create a directory in the harness tenant's repository space.
    pub async fn repository_dir(&self, relative: &str) -> PathBuf {
        let path = self.repository.full_path(&self.identity, relative);
        tokio::fs::create_dir_all(&path)
            .await
            .expect("Failed to create repository dir");
        path
    }

    /// Indexed text of a document in the default knowledge base.
    pub async fn indexed_text(&self, index_path: &str) -> Option<String> {
        self.index
            .document_text(&self.identity, kbsync_daemon::DEFAULT_KNOWLEDGE_BASE, index_path)
            .await
            .expect("Failed to read index")
    }
}
