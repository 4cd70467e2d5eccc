//! Extraction service: passthrough, markup stripping, and cached worker runs.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info};

use kbsync_types::ExtractionSettings;

use crate::cache::{ExtractionCache, Fingerprint};
use crate::error::ExtractError;
use crate::markup::strip_markup;
use crate::ticket::TicketPool;
use crate::worker::{Extractor, ProcessExtractor, WorkerJob};

/// Readable plain-text result of an extraction.
pub type TextStream = Box<dyn AsyncRead + Send + Unpin>;

const PLAIN_TEXT_EXTENSIONS: [&str; 2] = [".txt", ".text"];
const MARKUP_EXTENSIONS: [&str; 2] = [".html", ".htm"];

/// Lowercase extension of `path` including the leading dot.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

pub struct ExtractionService {
    cache: ExtractionCache,
    tickets: TicketPool,
    extractor: Arc<dyn Extractor>,
}

impl ExtractionService {
    /// Service backed by the configured external worker.
    pub async fn new(settings: &ExtractionSettings) -> Result<Self, ExtractError> {
        let cache = ExtractionCache::new(&settings.work_dir);
        let extractor = ProcessExtractor::new(settings.clone(), cache.temp_dir()).await?;
        Self::with_extractor(&settings.work_dir, settings.max_workers, Arc::new(extractor)).await
    }

    pub async fn with_extractor(
        work_dir: impl AsRef<Path>,
        max_workers: usize,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, ExtractError> {
        let cache = ExtractionCache::new(work_dir);
        cache.prepare().await?;
        info!(
            extractor = extractor.name(),
            max_workers, "Extraction service ready"
        );
        Ok(Self {
            cache,
            tickets: TicketPool::new(max_workers),
            extractor,
        })
    }

    pub fn tickets(&self) -> &TicketPool {
        &self.tickets
    }

    pub fn cache(&self) -> &ExtractionCache {
        &self.cache
    }

    /// Produce the plain text of the file at `path` whose bytes are `input`.
    ///
    /// Plain text and markup are handled in-process unless `force_external`
    /// is set. Everything else goes through the cache; only a miss takes a
    /// worker ticket.
    pub async fn extract<R>(
        &self,
        mut input: R,
        path: &Path,
        force_external: bool,
    ) -> Result<TextStream, ExtractError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let extension = dotted_extension(path);

        if !force_external && PLAIN_TEXT_EXTENSIONS.contains(&extension.as_str()) {
            debug!(path = %path.display(), "Plain text passthrough");
            return Ok(Box::new(input));
        }

        if !force_external && MARKUP_EXTENSIONS.contains(&extension.as_str()) {
            let mut raw = Vec::new();
            input.read_to_end(&mut raw).await?;
            let text = strip_markup(&String::from_utf8_lossy(&raw));
            debug!(path = %path.display(), chars = text.len(), "Stripped markup in-process");
            return Ok(Box::new(Cursor::new(text.into_bytes())));
        }

        if !self.extractor.supports(&extension) {
            return Err(ExtractError::UnsupportedFormat(path.display().to_string()));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ExtractError::UnsupportedFormat(path.display().to_string()))?;
        let fingerprint = Fingerprint::of_file(path).await?;
        let slots = self.cache.slots(&fingerprint, &file_name);

        let state = self.cache.lookup(&slots).await;
        if state.is_hit() {
            debug!(path = %path.display(), fingerprint = fingerprint.as_str(), "Extraction cache hit");
            return Ok(Box::new(fs::File::open(&slots.output).await?));
        }

        if !state.input_ready {
            self.cache.stage_input(&mut input, &slots).await?;
        }

        let working = ExtractionCache::working_path(&slots.output);
        let job = WorkerJob {
            input: slots.input.clone(),
            file_name,
        };

        let outcome = {
            let _ticket = self.tickets.acquire(&path.display().to_string()).await?;
            match fs::File::create(&working).await {
                Ok(mut sink) => {
                    let run = self.extractor.run(&job, &mut sink).await;
                    match run {
                        Ok(()) => sink.flush().await.map_err(ExtractError::from),
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e.into()),
            }
        };

        match outcome {
            Ok(()) => {
                self.cache.publish_output(&working, &slots).await?;
                Ok(Box::new(fs::File::open(&slots.output).await?))
            }
            Err(e) => {
                let _ = fs::remove_file(&working).await;
                error!(path = %path.display(), error = %e, "Extraction failed");
                Err(e)
            }
        }
    }

    /// Extract the file at `path` and return its trimmed text.
    pub async fn read_text(&self, path: &Path, force_external: bool) -> Result<String, ExtractError> {
        let file = fs::File::open(path).await?;
        let mut stream = self.extract(file, path, force_external).await?;
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await?;
        Ok(String::from_utf8_lossy(&raw).trim().to_string())
    }
}
