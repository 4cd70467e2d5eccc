//! Pipeline E2E tests for kbsync.
//!
//! File mutations published on the bus flow through the lifecycle
//! controller, extraction service and directory index, and land in the
//! progress ledger.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use e2e_tests::TestHarness;
use kbsync_ledger::{ProgressLedger, StatusRequest, StatusService};
use kbsync_lifecycle::mock::{MockExtraction, MockIndex, MockRepository};
use kbsync_lifecycle::{Collaborators, PluginChain};
use kbsync_types::{EventBus, FileMutationEvent, Identity, OperationKind, Settings};
use kbsync_daemon::Pipeline;

/// A created file is reported done, successful and complete.
#[tokio::test]
async fn test_created_file_reaches_ledger() {
    let bus = Arc::new(EventBus::default());
    let repository = Arc::new(MockRepository::new("/a"));
    repository.insert("/a/report.pdf", b"quarterly".to_vec());
    let collaborators = Collaborators {
        repository,
        index: Arc::new(MockIndex::new()),
        extraction: Arc::new(MockExtraction::new()),
        bus,
    };
    let pipeline = Pipeline::start(
        &Settings::default(),
        collaborators,
        PluginChain::new(),
        Arc::new(ProgressLedger::default()),
    )
    .await
    .unwrap();

    let identity = Identity::new("u1", "o1");
    pipeline.publish(FileMutationEvent::created("/a/report.pdf", &identity));
    let ledger = pipeline.shutdown().await;

    let response = StatusService::new(ledger).list_events(&StatusRequest::new("u1", "o1"));
    assert!(response.result);
    let events = response.events.unwrap();
    let record = &events["report.pdf"];
    assert!(record.done);
    assert_eq!(record.result, Some(true));
    assert_eq!(record.percentage, 100.0);
    assert_eq!(record.subtype, OperationKind::Ingested);
}

/// The real repository, extraction service and index cooperate.
#[tokio::test]
async fn test_pdf_ingested_through_extraction_cache() {
    let harness = TestHarness::new().await;
    let path = harness.put_file("reports/q1.pdf", "revenue up").await;

    let pipeline = harness.start(PluginChain::new()).await;
    pipeline.publish(FileMutationEvent::created(&path, &harness.identity));
    let ledger = pipeline.shutdown().await;

    let record = ledger.get(&harness.identity, "reports/q1.pdf").unwrap();
    assert_eq!(record.result, Some(true));
    assert_eq!(
        harness.indexed_text("reports/q1.pdf").await.as_deref(),
        Some("REVENUE UP")
    );
    assert_eq!(harness.extraction.tickets().issued(), 1);
}

/// Re-ingesting an unchanged file is served from the cache.
#[tokio::test]
async fn test_unchanged_file_takes_no_new_ticket() {
    let harness = TestHarness::new().await;
    let path = harness.put_file("a.pdf", "same bytes").await;

    let pipeline = harness.start(PluginChain::new()).await;
    pipeline.publish(FileMutationEvent::created(&path, &harness.identity));
    pipeline.shutdown().await;

    let pipeline = harness.start(PluginChain::new()).await;
    pipeline.publish(FileMutationEvent::modified(&path, &harness.identity));
    let ledger = pipeline.shutdown().await;

    assert_eq!(harness.extraction.tickets().issued(), 1);
    assert_eq!(harness.extractor.runs(), 1);
    let record = ledger.get(&harness.identity, "a.pdf").unwrap();
    assert_eq!(record.subtype, OperationKind::Modified);
    assert_eq!(record.result, Some(true));
}

/// A modified file is re-extracted and replaces the indexed text.
#[tokio::test]
async fn test_modified_file_is_reextracted() {
    let harness = TestHarness::new().await;
    let path = harness.put_file("a.pdf", "first").await;

    let pipeline = harness.start(PluginChain::new()).await;
    pipeline.publish(FileMutationEvent::created(&path, &harness.identity));
    pipeline.shutdown().await;

    harness.put_file("a.pdf", "second version").await;
    let pipeline = harness.start(PluginChain::new()).await;
    pipeline.publish(FileMutationEvent::modified(&path, &harness.identity));
    pipeline.shutdown().await;

    assert_eq!(harness.extraction.tickets().issued(), 2);
    assert_eq!(
        harness.indexed_text("a.pdf").await.as_deref(),
        Some("SECOND VERSION")
    );
}

/// Deleting and renaming keep the index in step with the repository.
#[tokio::test]
async fn test_rename_then_delete() {
    let harness = TestHarness::new().await;
    let path = harness.put_file("notes.txt", "plain words").await;

    let pipeline = harness.start(PluginChain::new()).await;
    pipeline.publish(FileMutationEvent::created(&path, &harness.identity));
    pipeline.shutdown().await;
    assert_eq!(harness.indexed_text("notes.txt").await.as_deref(), Some("plain words"));

    let moved = harness.put_file("archive/notes.txt", "plain words").await;
    tokio::fs::remove_file(&path).await.unwrap();
    let pipeline = harness.start(PluginChain::new()).await;
    pipeline.publish(FileMutationEvent::renamed(&path, &moved, &harness.identity));
    let ledger = pipeline.shutdown().await;

    let record = ledger.get(&harness.identity, "archive/notes.txt").unwrap();
    assert_eq!(record.subtype, OperationKind::Renamed);
    assert_eq!(record.result, Some(true));
    assert_eq!(
        harness.indexed_text("archive/notes.txt").await.as_deref(),
        Some("plain words")
    );
    assert!(harness.indexed_text("notes.txt").await.is_none());

    let pipeline = harness.start(PluginChain::new()).await;
    pipeline.publish(FileMutationEvent::deleted(&moved, &harness.identity));
    let ledger = pipeline.shutdown().await;
    assert_eq!(
        ledger.get(&harness.identity, "archive/notes.txt").unwrap().subtype,
        OperationKind::Uningested
    );
    assert!(harness.indexed_text("archive/notes.txt").await.is_none());
}

/// Directory events never reach the ledger or the index.
#[tokio::test]
async fn test_directory_events_ignored() {
    let harness = TestHarness::new().await;
    let dir = harness.repository_dir("reports").await;

    let pipeline = harness.start(PluginChain::new()).await;
    pipeline.publish(FileMutationEvent::created(&dir, &harness.identity).as_directory());
    let ledger = pipeline.shutdown().await;

    assert_eq!(ledger.tenant_count(), 0);
    assert_eq!(harness.extraction.tickets().issued(), 0);
}

/// Unsupported formats fail without taking a ticket.
#[tokio::test]
async fn test_unsupported_format_fails_cleanly() {
    let harness = TestHarness::new().await;
    let path = harness.put_file("data.bin", "\u{1}\u{2}").await;

    let pipeline = harness.start(PluginChain::new()).await;
    pipeline.publish(FileMutationEvent::created(&path, &harness.identity));
    let ledger = pipeline.shutdown().await;

    let record = ledger.get(&harness.identity, "data.bin").unwrap();
    assert!(record.done);
    assert_eq!(record.result, Some(false));
    assert!(record.cause.as_deref().unwrap_or("").contains("Unsupported format"));
    assert_eq!(harness.extraction.tickets().issued(), 0);
}

/// A disabled controller leaves events unprocessed.
#[tokio::test]
async fn test_disabled_controller_processes_nothing() {
    let harness = TestHarness::with_settings(|s| s.enabled = false).await;
    let path = harness.put_file("a.pdf", "x").await;

    let pipeline = harness.start(PluginChain::new()).await;
    assert!(!pipeline.is_processing());
    pipeline.publish(FileMutationEvent::created(&path, &harness.identity));
    let ledger = pipeline.shutdown().await;

    assert_eq!(ledger.tenant_count(), 0);
    assert!(harness.indexed_text("a.pdf").await.is_none());
}

/// Files outside the tenant's repository are never read or indexed.
#[tokio::test]
async fn test_foreign_paths_are_rejected() {
    let harness = TestHarness::new().await;
    let outside = tempfile::TempDir::new().unwrap();
    let secret = outside.path().join("secret.pdf");
    tokio::fs::write(&secret, "top secret").await.unwrap();
    let other_tenant = {
        use kbsync_lifecycle::Repository;
        let path = harness
            .repository
            .full_path(&Identity::new("u2", "o1"), "theirs.pdf");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "not yours").await.unwrap();
        path
    };

    let pipeline = harness.start(PluginChain::new()).await;
    pipeline.publish(FileMutationEvent::created(&secret, &harness.identity));
    pipeline.publish(FileMutationEvent::created(&other_tenant, &harness.identity));
    let ledger = pipeline.shutdown().await;

    assert_eq!(ledger.tenant_count(), 0);
    assert_eq!(harness.extractor.runs(), 0);
    assert!(harness
        .indexed_text(&secret.to_string_lossy())
        .await
        .is_none());
}
