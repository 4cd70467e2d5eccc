//! External extraction workers.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use kbsync_types::ExtractionSettings;

use crate::cache::ExtractionCache;
use crate::error::ExtractError;
use crate::ocr::{render_worker_config, OcrPlan, DEFAULT_CONFIG_TEMPLATE};

/// Longest stderr excerpt kept in a failure message.
const STDERR_EXCERPT: usize = 2048;

/// One extraction job handed to a worker.
#[derive(Debug, Clone)]
pub struct WorkerJob {
    /// Staged input in the cache
    pub input: PathBuf,
    /// Base name of the original file, used for OCR tagging
    pub file_name: String,
}

/// Something that turns a document into plain text.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Name for logs
    fn name(&self) -> &str;

    /// Whether documents with this lowercase extension (e.g. `.pdf`) are handled.
    fn supports(&self, extension: &str) -> bool;

    /// Write the text of `job.input` to `sink`.
    async fn run(
        &self,
        job: &WorkerJob,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), ExtractError>;
}

/// Extractor backed by an external process writing text to stdout.
pub struct ProcessExtractor {
    settings: ExtractionSettings,
    config_dir: PathBuf,
    template: String,
}

impl ProcessExtractor {
    /// Build an extractor writing its configuration files under `config_dir`.
    pub async fn new(
        settings: ExtractionSettings,
        config_dir: impl Into<PathBuf>,
    ) -> Result<Self, ExtractError> {
        let template = match &settings.config_template {
            Some(path) => fs::read_to_string(path).await.map_err(|e| {
                ExtractError::Config(format!(
                    "cannot read config template {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => DEFAULT_CONFIG_TEMPLATE.to_string(),
        };
        Ok(Self {
            settings,
            config_dir: config_dir.into(),
            template,
        })
    }

    /// Render the configuration for `plan` and make sure the file on disk
    /// matches it. A file left by a run with other settings is replaced.
    async fn ensure_config(&self, plan: &OcrPlan) -> Result<PathBuf, ExtractError> {
        let path = self.config_dir.join(plan.config_file_name());
        let rendered = render_worker_config(&self.template, plan, &self.settings);
        if let Ok(existing) = fs::read_to_string(&path).await {
            if existing == rendered {
                return Ok(path);
            }
        }
        fs::create_dir_all(&self.config_dir).await?;
        let working = ExtractionCache::working_path(&path);
        fs::write(&working, rendered).await?;
        fs::rename(&working, &path).await?;
        debug!(config = %path.display(), ocr = plan.enabled, "Wrote worker configuration");
        Ok(path)
    }

    fn command(&self, input: &Path, config: &Path) -> Command {
        let input = input.to_string_lossy();
        let config = config.to_string_lossy();
        let mut command = Command::new(&self.settings.worker_command);
        for arg in &self.settings.worker_args {
            command.arg(arg.replace("{input}", &input).replace("{config}", &config));
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Extractor for ProcessExtractor {
    fn name(&self) -> &str {
        &self.settings.worker_command
    }

    fn supports(&self, extension: &str) -> bool {
        self.settings
            .supported_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(extension))
    }

    async fn run(
        &self,
        job: &WorkerJob,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), ExtractError> {
        let plan = OcrPlan::for_file(&job.file_name, &self.settings);
        let config = self.ensure_config(&plan).await?;

        info!(
            file = %job.file_name,
            ocr = plan.enabled,
            languages = %plan.languages,
            "Starting extraction worker"
        );

        let mut child = self.command(&job.input, &config).spawn().map_err(|e| {
            ExtractError::WorkerFailure(format!(
                "failed to start {}: {}",
                self.settings.worker_command, e
            ))
        })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::WorkerFailure("worker stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();
        // Drain stderr to EOF; closing the pipe early kills a chatty worker.
        let stderr_task = tokio::spawn(async move {
            let mut excerpt = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = (&mut stderr)
                    .take(STDERR_EXCERPT as u64)
                    .read_to_end(&mut excerpt)
                    .await;
                let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
            }
            String::from_utf8_lossy(&excerpt).into_owned()
        });

        let secs = self.settings.worker_timeout_secs;
        let outcome = tokio::time::timeout(Duration::from_secs(secs), async {
            let bytes = tokio::io::copy(&mut stdout, sink).await?;
            sink.flush().await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((bytes, status))
        })
        .await;

        match outcome {
            Err(_) => {
                warn!(file = %job.file_name, secs, "Extraction worker timed out, killing");
                let _ = child.kill().await;
                stderr_task.abort();
                Err(ExtractError::WorkerTimeout {
                    file: job.file_name.clone(),
                    secs,
                })
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                stderr_task.abort();
                Err(ExtractError::WorkerFailure(e.to_string()))
            }
            Ok(Ok((bytes, status))) if status.success() => {
                stderr_task.abort();
                info!(file = %job.file_name, bytes, "Extraction worker finished");
                Ok(())
            }
            Ok(Ok((_, status))) => {
                let stderr = stderr_task.await.unwrap_or_default();
                Err(ExtractError::WorkerFailure(format!(
                    "{} exited with {}: {}",
                    self.settings.worker_command,
                    status,
                    stderr.trim()
                )))
            }
        }
    }
}
