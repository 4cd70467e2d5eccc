//! Command implementations for the kbsync daemon.
//!
//! Handles:
//! - run: Build the pipeline, feed it stdin events, persist the ledger
//! - extract: Extract text from files through the extraction service
//! - status: Query the persisted ledger for one tenant

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

use kbsync_extract::ExtractionService;
use kbsync_ledger::{ProgressLedger, StatusRequest, StatusService, TenantSnapshot};
use kbsync_lifecycle::Collaborators;
use kbsync_types::{EventBus, FileMutationEvent, Settings};

use crate::index::DirectoryIndex;
use crate::pipeline::Pipeline;
use crate::plugins::builtin_registry;
use crate::repository::FsRepository;

/// Ledger snapshot file inside the index directory.
pub const LEDGER_FILE: &str = "ledger.json";

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. Logs go to stderr.
pub fn init_tracing(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

pub fn ledger_path(index_dir: &Path) -> PathBuf {
    index_dir.join(LEDGER_FILE)
}

/// Read a ledger snapshot. A missing file is an empty ledger.
pub async fn read_ledger(path: &Path, settings: &Settings) -> Result<ProgressLedger> {
    let snapshot: Vec<TenantSnapshot> = match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse ledger {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read ledger {}", path.display()))
        }
    };
    Ok(ProgressLedger::restore(settings.progress.clone(), snapshot))
}

pub async fn write_ledger(path: &Path, ledger: &ProgressLedger) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create index directory")?;
    }
    let raw = serde_json::to_vec_pretty(&ledger.snapshot()).context("Failed to encode ledger")?;
    let working = path.with_extension("json.partial");
    tokio::fs::write(&working, raw)
        .await
        .context("Failed to write ledger")?;
    tokio::fs::rename(&working, path)
        .await
        .context("Failed to replace ledger")?;
    Ok(())
}

/// Run the pipeline over JSON-lines events from stdin until EOF or Ctrl+C.
pub async fn run_pipeline(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    repository_root_override: Option<&str>,
    index_dir_override: Option<&str>,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level_override)?;
    if let Some(root) = repository_root_override {
        settings.repository_root = PathBuf::from(root);
    }
    if let Some(dir) = index_dir_override {
        settings.index_dir = PathBuf::from(dir);
    }
    init_tracing(&settings)?;

    info!("kbsync starting...");
    info!("Configuration:");
    info!("  Repository root: {}", settings.repository_root.display());
    info!("  Index directory: {}", settings.index_dir.display());
    info!("  Extraction work dir: {}", settings.extraction.work_dir.display());
    info!("  Max workers: {}", settings.extraction.max_workers);
    info!("  Plugins: {:?}", settings.plugins);

    let bus = Arc::new(EventBus::new(settings.bus_capacity));
    let extraction = ExtractionService::new(&settings.extraction)
        .await
        .context("Failed to start extraction service")?;
    let collaborators = Collaborators {
        repository: Arc::new(FsRepository::new(&settings.repository_root, Arc::clone(&bus))),
        index: Arc::new(DirectoryIndex::new(&settings.index_dir)),
        extraction: Arc::new(extraction),
        bus,
    };
    let plugins = builtin_registry()
        .build_chain(&settings)
        .context("Failed to configure plugins")?;

    let ledger_file = ledger_path(&settings.index_dir);
    let ledger = Arc::new(read_ledger(&ledger_file, &settings).await?);
    let pipeline = Pipeline::start(&settings, collaborators, plugins, ledger)
        .await
        .context("Failed to start pipeline")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = 0usize;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match serde_json::from_str::<FileMutationEvent>(&line) {
                        Ok(event) => {
                            accepted += 1;
                            pipeline.publish(event);
                        }
                        Err(e) => warn!(error = %e, "Skipping malformed event"),
                    },
                    None => break,
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    info!(accepted, "Input closed, waiting for outstanding operations");
    let ledger = pipeline.shutdown().await;
    if ledger.missed_events() > 0 {
        warn!(
            missed = ledger.missed_events(),
            bus_capacity = settings.bus_capacity,
            "Progress events were lost to bus lag; raise bus_capacity"
        );
    }
    write_ledger(&ledger_file, &ledger).await?;

    let snapshot = serde_json::to_string_pretty(&ledger.snapshot())?;
    println!("{}", snapshot);
    Ok(())
}

/// Extract every file concurrently and print its text.
pub async fn extract_files(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    files: &[String],
    force_external: bool,
) -> Result<()> {
    let settings = load_settings(config_path, log_level_override)?;
    init_tracing(&settings)?;

    let service = ExtractionService::new(&settings.extraction)
        .await
        .context("Failed to start extraction service")?;

    let results = futures::future::join_all(
        files
            .iter()
            .map(|file| service.read_text(Path::new(file), force_external)),
    )
    .await;

    let mut failures = 0;
    for (file, result) in files.iter().zip(results) {
        match result {
            Ok(text) => println!("==> {} <==\n{}\n", file, text),
            Err(e) => {
                failures += 1;
                error!(file = %file, error = %e, "Extraction failed");
            }
        }
    }
    if failures > 0 {
        bail!("{} of {} files failed to extract", failures, files.len());
    }
    Ok(())
}

/// Print the progress of one tenant from the persisted ledger.
pub async fn show_status(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    user: Option<String>,
    org: Option<String>,
    index_dir_override: Option<&str>,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level_override)?;
    if let Some(dir) = index_dir_override {
        settings.index_dir = PathBuf::from(dir);
    }
    init_tracing(&settings)?;

    let ledger = read_ledger(&ledger_path(&settings.index_dir), &settings).await?;
    let service = StatusService::new(Arc::new(ledger));
    let response = service.list_events(&StatusRequest {
        user_id: user,
        org_id: org,
    });
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.result {
        bail!("status query needs --user and --org");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_types::{Identity, OperationKind, OperationResult, ProgressEvent};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ledger_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = ledger_path(dir.path());
        let settings = Settings::default();

        let empty = read_ledger(&path, &settings).await.unwrap();
        assert_eq!(empty.tenant_count(), 0);

        let identity = Identity::new("u1", "o1");
        empty.record(&ProgressEvent::processed(
            OperationKind::Ingested,
            &identity,
            "/a/report.pdf",
            "report.pdf",
            &OperationResult::ok(),
        ));
        write_ledger(&path, &empty).await.unwrap();

        let loaded = read_ledger(&path, &settings).await.unwrap();
        let record = loaded.get(&identity, "report.pdf").unwrap();
        assert!(record.done);
        assert_eq!(record.result, Some(true));
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = ledger_path(dir.path());
        tokio::fs::write(&path, b"not json").await.unwrap();
        assert!(read_ledger(&path, &Settings::default()).await.is_err());
    }
}
