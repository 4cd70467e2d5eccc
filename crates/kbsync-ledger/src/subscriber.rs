//! Bus subscriber feeding progress events into the ledger.

use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use kbsync_types::{BusMessage, EventBus};

use crate::ledger::ProgressLedger;

/// Record every progress event published on `topic` until `cancel` fires.
///
/// Messages already queued when cancellation is observed are still recorded.
/// Messages the bus dropped because this subscriber fell more than the bus
/// capacity behind are counted in [`ProgressLedger::missed_events`].
pub fn spawn_ledger_subscriber(
    bus: &EventBus,
    topic: &str,
    ledger: Arc<ProgressLedger>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe(topic);
    let topic = topic.to_string();

    tokio::spawn(async move {
        info!(topic = %topic, "Progress ledger subscribed");
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(message) => apply(&ledger, &message),
                    Err(RecvError::Lagged(skipped)) => {
                        ledger.record_missed(skipped);
                        error!(topic = %topic, skipped, "Progress ledger lagged behind bus, events lost");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = cancel.cancelled() => {
                    loop {
                        match rx.try_recv() {
                            Ok(message) => apply(&ledger, &message),
                            Err(TryRecvError::Lagged(skipped)) => {
                                ledger.record_missed(skipped);
                                error!(topic = %topic, skipped, "Progress ledger lagged behind bus, events lost");
                            }
                            Err(_) => break,
                        }
                    }
                    break;
                }
            }
        }
        info!(topic = %topic, "Progress ledger unsubscribed");
    })
}

fn apply(ledger: &ProgressLedger, message: &BusMessage) {
    if let BusMessage::Progress(event) = message {
        ledger.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_types::{
        FileMutationEvent, Identity, OperationKind, OperationResult, ProgressEvent, INDEX_TOPIC,
    };

    #[tokio::test]
    async fn test_subscriber_records_progress_and_ignores_mutations() {
        let bus = EventBus::new(16);
        let ledger = Arc::new(ProgressLedger::default());
        let cancel = CancellationToken::new();
        let handle = spawn_ledger_subscriber(&bus, INDEX_TOPIC, Arc::clone(&ledger), cancel.clone());

        let identity = Identity::new("u1", "o1");
        bus.publish(
            INDEX_TOPIC,
            BusMessage::FileMutation(FileMutationEvent::created("/a/x.pdf", &identity)),
        );
        bus.publish(
            INDEX_TOPIC,
            BusMessage::Progress(ProgressEvent::processing(
                OperationKind::Ingested,
                &identity,
                "/a/x.pdf",
                "x.pdf",
            )),
        );
        bus.publish(
            INDEX_TOPIC,
            BusMessage::Progress(ProgressEvent::processed(
                OperationKind::Ingested,
                &identity,
                "/a/x.pdf",
                "x.pdf",
                &OperationResult::ok(),
            )),
        );

        cancel.cancel();
        handle.await.unwrap();

        let events = ledger.list_events(&identity);
        assert_eq!(events.len(), 1);
        assert!(events["x.pdf"].done);
        assert_eq!(ledger.missed_events(), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_counts_lost_events() {
        let bus = EventBus::new(1);
        let ledger = Arc::new(ProgressLedger::default());
        let cancel = CancellationToken::new();
        let handle = spawn_ledger_subscriber(&bus, INDEX_TOPIC, Arc::clone(&ledger), cancel.clone());

        let identity = Identity::new("u1", "o1");
        for name in ["a.pdf", "b.pdf", "c.pdf"] {
            bus.publish(
                INDEX_TOPIC,
                BusMessage::Progress(ProgressEvent::processing(
                    OperationKind::Ingested,
                    &identity,
                    format!("/a/{}", name),
                    name,
                )),
            );
        }

        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(ledger.missed_events(), 2);
        let events = ledger.list_events(&identity);
        assert_eq!(events.keys().cloned().collect::<Vec<_>>(), vec!["c.pdf".to_string()]);
    }
}
