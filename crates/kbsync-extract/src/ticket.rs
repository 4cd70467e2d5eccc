//! Bounded ticket pool for external extraction workers.
//!
//! At most `max_tickets` tickets are outstanding at any time. Waiters are
//! served in request order. A ticket is returned to the pool when dropped,
//! whether the guarded work succeeded or failed.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info};

use crate::error::ExtractError;

/// RAII permission to run one worker.
#[derive(Debug)]
pub struct Ticket {
    id: u64,
    outstanding: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Ticket {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug!(ticket = self.id, "Ticket released");
    }
}

/// FIFO-fair pool of worker tickets.
#[derive(Debug)]
pub struct TicketPool {
    semaphore: Arc<Semaphore>,
    max_tickets: usize,
    outstanding: Arc<AtomicUsize>,
    peak: AtomicUsize,
    issued: AtomicU64,
}

impl TicketPool {
    pub fn new(max_tickets: usize) -> Self {
        let max_tickets = max_tickets.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_tickets)),
            max_tickets,
            outstanding: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
            issued: AtomicU64::new(0),
        }
    }

    /// Wait for a ticket. `label` identifies the requester in logs.
    pub async fn acquire(&self, label: &str) -> Result<Ticket, ExtractError> {
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                info!(
                    requester = label,
                    max_tickets = self.max_tickets,
                    "All extraction workers busy, waiting for a ticket"
                );
                Arc::clone(&self.semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| ExtractError::Closed)?
            }
            Err(TryAcquireError::Closed) => return Err(ExtractError::Closed),
        };

        let id = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        debug!(ticket = id, requester = label, outstanding = now, "Ticket granted");

        Ok(Ticket {
            id,
            outstanding: Arc::clone(&self.outstanding),
            _permit: permit,
        })
    }

    /// Stop granting tickets. Current waiters fail with `Closed`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn max_tickets(&self) -> usize {
        self.max_tickets
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Tickets currently held.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Highest number of tickets ever held at once.
    pub fn peak_outstanding(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total tickets granted since creation.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }
}
