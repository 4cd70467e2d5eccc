//! Progress reporting E2E tests for kbsync.

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use e2e_tests::TestHarness;
use kbsync_ledger::ProgressLedger;
use kbsync_lifecycle::{FilePlugin, IngestionContext, PluginChain, SyncError};
use kbsync_types::{BusMessage, FileMutationEvent, StepName, INDEX_TOPIC};

/// Claims PDFs and reports its pre-generation steps before indexing.
struct SteppedPlugin;

#[async_trait]
impl FilePlugin for SteppedPlugin {
    fn name(&self) -> &str {
        "stepped"
    }

    async fn can_handle(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        Ok(ctx.file_name().ends_with(".pdf"))
    }

    async fn ingest(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        ctx.report_step(StepName::Initial, 1);
        ctx.report_step(StepName::Pregen, 2);
        ctx.report_step(StepName::Pregen, 2);
        Ok(ctx.add_to_index().await.result)
    }

    async fn uningest(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        Ok(ctx.remove_from_index().await.result)
    }

    async fn rename(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        Ok(ctx.rename_in_index().await.result)
    }
}

/// Percentages climb through the reported steps and end at 100.
#[tokio::test]
async fn test_step_percentages_are_monotonic() {
    let harness = TestHarness::new().await;
    let path = harness.put_file("deck.pdf", "slides").await;
    let mut rx = harness.bus.subscribe(INDEX_TOPIC);

    let pipeline = harness.start(PluginChain::new().with(Arc::new(SteppedPlugin))).await;
    pipeline.publish(FileMutationEvent::created(&path, &harness.identity));
    let ledger = pipeline.shutdown().await;

    let observer = ProgressLedger::new(harness.settings.progress.clone());
    let mut seen = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let BusMessage::Progress(event) = message {
            observer.record(&event);
            let record = observer.get(&harness.identity, "deck.pdf").unwrap();
            seen.push((record.percentage, record.done));
        }
    }

    assert_eq!(
        seen,
        vec![
            (0.0, false),
            (10.0, false),
            (50.0, false),
            (90.0, false),
            (100.0, true),
        ]
    );
    let record = ledger.get(&harness.identity, "deck.pdf").unwrap();
    assert_eq!(record.percentage, 100.0);
    assert_eq!(record.result, Some(true));
    assert_eq!(harness.indexed_text("deck.pdf").await.as_deref(), Some("SLIDES"));
}
