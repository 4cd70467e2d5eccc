//! Wires the bus, lifecycle controller and progress ledger together.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kbsync_ledger::{spawn_ledger_subscriber, ProgressLedger};
use kbsync_lifecycle::{Collaborators, LifecycleController, PluginChain, SyncError};
use kbsync_types::{BusMessage, EventBus, FileMutationEvent, Settings, INDEX_TOPIC, REPOSITORY_TOPIC};

/// Running subscribers of one daemon session.
pub struct Pipeline {
    bus: Arc<EventBus>,
    ledger: Arc<ProgressLedger>,
    controller: Option<Arc<LifecycleController>>,
    controller_cancel: CancellationToken,
    controller_handles: Vec<JoinHandle<()>>,
    ledger_cancel: CancellationToken,
    ledger_handle: JoinHandle<()>,
}

impl Pipeline {
    /// Initialize plugins and subscribe the ledger and, when enabled, the
    /// lifecycle controller.
    pub async fn start(
        settings: &Settings,
        collaborators: Collaborators,
        plugins: PluginChain,
        ledger: Arc<ProgressLedger>,
    ) -> Result<Self, SyncError> {
        plugins.init_all().await?;

        let bus = Arc::clone(&collaborators.bus);
        let ledger_cancel = CancellationToken::new();
        let ledger_handle =
            spawn_ledger_subscriber(&bus, INDEX_TOPIC, Arc::clone(&ledger), ledger_cancel.clone());

        let controller_cancel = CancellationToken::new();
        let mut controller_handles = Vec::new();
        let controller = if settings.enabled {
            let controller = Arc::new(
                LifecycleController::new(collaborators, plugins)
                    .with_minimum_success_fraction(settings.minimum_success_fraction),
            );
            for topic in [REPOSITORY_TOPIC, INDEX_TOPIC] {
                controller_handles.push(controller.spawn_subscriber(topic, controller_cancel.clone()));
            }
            Some(controller)
        } else {
            warn!("Lifecycle controller disabled, file events will not be processed");
            None
        };

        info!(enabled = settings.enabled, "Pipeline started");
        Ok(Self {
            bus,
            ledger,
            controller,
            controller_cancel,
            controller_handles,
            ledger_cancel,
            ledger_handle,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn ledger(&self) -> &Arc<ProgressLedger> {
        &self.ledger
    }

    pub fn is_processing(&self) -> bool {
        self.controller.is_some()
    }

    /// Publish a mutation observed on the repository.
    pub fn publish(&self, event: FileMutationEvent) {
        self.bus
            .publish(REPOSITORY_TOPIC, BusMessage::FileMutation(event));
    }

    /// Finish every queued and running operation, then stop all subscribers.
    pub async fn shutdown(self) -> Arc<ProgressLedger> {
        self.controller_cancel.cancel();
        for handle in self.controller_handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Controller subscriber ended abnormally");
            }
        }
        if let Some(controller) = &self.controller {
            controller.wait_idle().await;
        }

        self.ledger_cancel.cancel();
        if let Err(e) = self.ledger_handle.await {
            warn!(error = %e, "Ledger subscriber ended abnormally");
        }
        info!("Pipeline stopped");
        self.ledger
    }
}
