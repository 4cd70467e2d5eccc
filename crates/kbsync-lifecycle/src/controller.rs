//! Lifecycle controller reacting to file mutation events.
//!
//! Every handled operation is bracketed by a `processing` and a `processed`
//! progress event on the index topic. Directory events, events without
//! the paths their kind requires and events for paths outside the tenant's
//! repository are dropped without any side effect.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use kbsync_types::{
    BusMessage, FileMutationEvent, Identity, MutationKind, OperationKind, OperationResult,
    ProgressEvent, INDEX_TOPIC,
};

use crate::context::{Collaborators, IngestionContext, RenameTarget};
use crate::error::{SyncError, PLUGIN_VALIDATION_FAILED};
use crate::plugin::{FilePlugin, PluginChain};

/// Default fraction of plugin sub-operations that must succeed.
pub const DEFAULT_MINIMUM_SUCCESS_FRACTION: f64 = 0.5;

pub struct LifecycleController {
    collaborators: Collaborators,
    plugins: PluginChain,
    minimum_success_fraction: f64,
    tasks: TaskTracker,
}

impl LifecycleController {
    pub fn new(collaborators: Collaborators, plugins: PluginChain) -> Self {
        Self {
            collaborators,
            plugins,
            minimum_success_fraction: DEFAULT_MINIMUM_SUCCESS_FRACTION,
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_minimum_success_fraction(mut self, fraction: f64) -> Self {
        self.minimum_success_fraction = fraction;
        self
    }

    pub fn plugins(&self) -> &PluginChain {
        &self.plugins
    }

    /// Handle one mutation. `None` when the event was ignored.
    pub async fn handle(&self, event: &FileMutationEvent) -> Option<OperationResult> {
        match event.kind {
            MutationKind::Created => self.on_created(event).await,
            MutationKind::Deleted => self.on_deleted(event).await,
            MutationKind::Renamed => self.on_renamed(event).await,
            MutationKind::Modified => self.on_modified(event).await,
        }
    }

    pub async fn on_created(&self, event: &FileMutationEvent) -> Option<OperationResult> {
        let path = accepted_path(event, event.path.as_deref())?;
        let identity = event.identity();
        let index_path = self.index_path_for(&identity, path)?;
        let outcome = self
            .tracked(
                OperationKind::Ingested,
                event,
                path,
                &index_path,
                self.ingest(event, path, &index_path, OperationKind::Ingested),
            )
            .await;
        Some(outcome)
    }

    pub async fn on_deleted(&self, event: &FileMutationEvent) -> Option<OperationResult> {
        let path = accepted_path(event, event.path.as_deref())?;
        let identity = event.identity();
        let index_path = self.index_path_for(&identity, path)?;
        let outcome = self
            .tracked(
                OperationKind::Uningested,
                event,
                path,
                &index_path,
                self.uningest(event, path, &index_path, OperationKind::Uningested),
            )
            .await;
        Some(outcome)
    }

    pub async fn on_renamed(&self, event: &FileMutationEvent) -> Option<OperationResult> {
        let from = accepted_path(event, event.from_path.as_deref())?;
        let to = accepted_path(event, event.to_path.as_deref())?;
        let identity = event.identity();
        let from_index_path = self.index_path_for(&identity, from)?;
        let target = RenameTarget {
            full_path: to.to_path_buf(),
            index_path: self.index_path_for(&identity, to)?,
        };
        let outcome = self
            .tracked(
                OperationKind::Renamed,
                event,
                to,
                &target.index_path,
                self.rename(event, from, &from_index_path, target.clone()),
            )
            .await;
        Some(outcome)
    }

    /// Re-ingest a changed file. The old content is fully removed before
    /// progress reporting starts.
    pub async fn on_modified(&self, event: &FileMutationEvent) -> Option<OperationResult> {
        let path = accepted_path(event, event.path.as_deref())?;
        let identity = event.identity();
        let index_path = self.index_path_for(&identity, path)?;
        let removed = self
            .uningest(event, path, &index_path, OperationKind::Modified)
            .await;
        if !removed.result {
            debug!(path = %index_path, cause = ?removed.cause, "Nothing removed before re-ingest");
        }
        let outcome = self
            .tracked(
                OperationKind::Modified,
                event,
                path,
                &index_path,
                self.ingest(event, path, &index_path, OperationKind::Modified),
            )
            .await;
        Some(outcome)
    }

    /// Handle `event` on a tracked background task.
    pub fn dispatch(self: &Arc<Self>, event: FileMutationEvent) {
        let controller = Arc::clone(self);
        self.tasks.spawn(async move {
            controller.handle(&event).await;
        });
    }

    /// Wait until every dispatched operation has finished.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Dispatch every mutation published on `topic` until `cancel` fires.
    ///
    /// Mutations already queued when cancellation is observed are still
    /// dispatched.
    pub fn spawn_subscriber(
        self: &Arc<Self>,
        topic: &str,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = self.collaborators.bus.subscribe(topic);
        let controller = Arc::clone(self);
        let topic = topic.to_string();

        tokio::spawn(async move {
            info!(topic = %topic, plugins = ?controller.plugins.names(), "Lifecycle controller subscribed");
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(BusMessage::FileMutation(event)) => controller.dispatch(event),
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            error!(topic = %topic, skipped, "Lifecycle controller lagged behind bus, mutations lost");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = cancel.cancelled() => {
                        loop {
                            match rx.try_recv() {
                                Ok(BusMessage::FileMutation(event)) => controller.dispatch(event),
                                Ok(_) => {}
                                Err(TryRecvError::Lagged(skipped)) => {
                                    error!(topic = %topic, skipped, "Lifecycle controller lagged behind bus, mutations lost");
                                }
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            info!(topic = %topic, "Lifecycle controller unsubscribed");
        })
    }

    /// Ledger key of `path`. `None` rejects the event: paths outside the
    /// tenant's repository are never read or indexed.
    fn index_path_for(&self, identity: &Identity, path: &Path) -> Option<String> {
        match self
            .collaborators
            .repository
            .root_relative_path(identity, path)
        {
            Ok(index_path) if !index_path.is_empty() => Some(index_path),
            Ok(_) => {
                error!(
                    path = %path.display(),
                    user_id = %identity.user_id,
                    "Validation failure: event names the repository root"
                );
                None
            }
            Err(e) => {
                let e = SyncError::Validation(e.to_string());
                error!(
                    path = %path.display(),
                    user_id = %identity.user_id,
                    error = %e,
                    "Validation failure: path outside repository"
                );
                None
            }
        }
    }

    fn publish(&self, event: ProgressEvent) {
        self.collaborators
            .bus
            .publish(INDEX_TOPIC, BusMessage::Progress(event));
    }

    /// Run `operation` between a processing and a processed notification.
    async fn tracked<F>(
        &self,
        kind: OperationKind,
        event: &FileMutationEvent,
        path: &Path,
        index_path: &str,
        operation: F,
    ) -> OperationResult
    where
        F: Future<Output = OperationResult>,
    {
        let identity = event.identity();
        self.publish(
            ProgressEvent::processing(kind, &identity, path, index_path)
                .with_extra_info(event.extra_info.clone()),
        );

        let outcome = operation.await;

        info!(
            operation = ?kind,
            path = %index_path,
            user_id = %identity.user_id,
            org_id = %identity.org_id,
            result = outcome.result,
            "Lifecycle operation finished"
        );
        self.publish(
            ProgressEvent::processed(kind, &identity, path, index_path, &outcome)
                .with_extra_info(event.extra_info.clone()),
        );
        outcome
    }

    async fn context(
        &self,
        event: &FileMutationEvent,
        path: &Path,
        index_path: &str,
        operation: OperationKind,
    ) -> Result<IngestionContext, SyncError> {
        let identity = event.identity();
        let knowledge_base_id = self
            .collaborators
            .index
            .knowledge_base_id(&identity, &event.extra_info)
            .await?;
        Ok(IngestionContext::new(
            operation,
            path,
            index_path,
            identity,
            knowledge_base_id,
            self.collaborators.clone(),
            self.minimum_success_fraction,
        )
        .with_language(event.language.clone())
        .with_extra_info(event.extra_info.clone()))
    }

    async fn ingest(
        &self,
        event: &FileMutationEvent,
        path: &Path,
        index_path: &str,
        operation: OperationKind,
    ) -> OperationResult {
        let ctx = match self.context(event, path, index_path, operation).await {
            Ok(ctx) => ctx,
            Err(e) => return context_failure(index_path, e),
        };
        let outcome = match self.plugins.resolve(&ctx).await {
            Ok(Some(plugin)) => plugin_outcome(&*plugin, "ingest", plugin.ingest(&ctx).await),
            Ok(None) => ctx.add_to_index().await,
            Err(_) => OperationResult::failed(PLUGIN_VALIDATION_FAILED),
        };
        ctx.finalize().await;
        outcome
    }

    async fn uningest(
        &self,
        event: &FileMutationEvent,
        path: &Path,
        index_path: &str,
        operation: OperationKind,
    ) -> OperationResult {
        let ctx = match self.context(event, path, index_path, operation).await {
            Ok(ctx) => ctx,
            Err(e) => return context_failure(index_path, e),
        };
        let outcome = match self.plugins.resolve(&ctx).await {
            Ok(Some(plugin)) => plugin_outcome(&*plugin, "uningest", plugin.uningest(&ctx).await),
            Ok(None) => ctx.remove_from_index().await,
            Err(_) => OperationResult::failed(PLUGIN_VALIDATION_FAILED),
        };
        ctx.finalize().await;
        outcome
    }

    async fn rename(
        &self,
        event: &FileMutationEvent,
        from: &Path,
        from_index_path: &str,
        target: RenameTarget,
    ) -> OperationResult {
        let ctx = match self
            .context(event, from, from_index_path, OperationKind::Renamed)
            .await
        {
            Ok(ctx) => ctx.with_target(target),
            Err(e) => return context_failure(from_index_path, e),
        };
        let outcome = match self.plugins.resolve(&ctx).await {
            Ok(Some(plugin)) => plugin_outcome(&*plugin, "rename", plugin.rename(&ctx).await),
            Ok(None) => ctx.rename_in_index().await,
            Err(_) => OperationResult::failed(PLUGIN_VALIDATION_FAILED),
        };
        ctx.finalize().await;
        outcome
    }
}

/// The path to act on, or `None` when the event must be ignored.
fn accepted_path<'a>(event: &FileMutationEvent, path: Option<&'a Path>) -> Option<&'a Path> {
    if event.is_directory {
        debug!(kind = %event.kind, "Ignoring directory event");
        return None;
    }
    if path.is_none() {
        debug!(kind = %event.kind, "Ignoring event without path");
    }
    path
}

fn context_failure(index_path: &str, e: SyncError) -> OperationResult {
    error!(path = %index_path, error = %e, "Could not prepare ingestion context");
    OperationResult::failed(e.to_string())
}

fn plugin_outcome(
    plugin: &dyn FilePlugin,
    op: &str,
    outcome: Result<bool, SyncError>,
) -> OperationResult {
    match outcome {
        Ok(result) => OperationResult::from_bool(result),
        Err(e) => {
            error!(plugin = plugin.name(), op, error = %e, "Plugin operation failed");
            OperationResult::failed(e.to_string())
        }
    }
}
