//! In-memory progress ledger keyed by tenant and root-relative path.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use kbsync_types::{Identity, ProgressEvent, ProgressPhase, ProgressRecord, ProgressStep, ProgressWeights, StepName};

/// Progress of every file of one tenant, keyed by root-relative path.
pub type TenantProgress = BTreeMap<String, ProgressRecord>;

/// Serializable copy of one tenant's ledger entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub user_id: String,
    pub org_id: String,
    pub events: TenantProgress,
}

/// Latest progress per file, per tenant.
///
/// Percentages never decrease while an operation is processing and reach
/// 100 once it is processed, whatever its result.
pub struct ProgressLedger {
    tenants: DashMap<Identity, TenantProgress>,
    weights: ProgressWeights,
    missed: AtomicU64,
}

impl ProgressLedger {
    pub fn new(weights: ProgressWeights) -> Self {
        Self {
            tenants: DashMap::new(),
            weights,
            missed: AtomicU64::new(0),
        }
    }

    fn step_weight(&self, step: &ProgressStep) -> f64 {
        match step.name {
            StepName::Initial => self.weights.initial_weight,
            StepName::Pregen => self.weights.pregen_weight / f64::from(step.no_of_steps.max(1)),
        }
    }

    /// Fold a progress event into the ledger.
    pub fn record(&self, event: &ProgressEvent) {
        if event.index_path.is_empty() {
            return;
        }

        let mut tenant = self.tenants.entry(event.identity()).or_default();
        let previous = tenant
            .get(&event.index_path)
            .map(|r| r.percentage)
            .unwrap_or(0.0);

        let (done, percentage) = match event.phase {
            ProgressPhase::Processed => (true, 100.0),
            ProgressPhase::Processing => {
                let added = event.step.as_ref().map(|s| self.step_weight(s)).unwrap_or(0.0);
                (false, (previous + added).min(100.0).max(previous))
            }
        };

        debug!(
            user_id = %event.user_id,
            org_id = %event.org_id,
            path = %event.index_path,
            done,
            percentage,
            "Recorded progress"
        );

        tenant.insert(
            event.index_path.clone(),
            ProgressRecord {
                done,
                result: event.result,
                percentage,
                subtype: event.subtype,
                cause: event.cause.clone(),
                updated_at: Utc::now(),
            },
        );
    }

    /// Every record of one tenant. Empty when the tenant is unknown.
    pub fn list_events(&self, identity: &Identity) -> TenantProgress {
        self.tenants
            .get(identity)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn get(&self, identity: &Identity, index_path: &str) -> Option<ProgressRecord> {
        self.tenants
            .get(identity)
            .and_then(|entry| entry.get(index_path).cloned())
    }

    /// Drop every record of one tenant.
    pub fn evict(&self, identity: &Identity) -> Option<TenantProgress> {
        self.tenants.remove(identity).map(|(_, records)| records)
    }

    /// Count progress events the bus dropped before they were recorded.
    pub fn record_missed(&self, skipped: u64) {
        self.missed.fetch_add(skipped, Ordering::SeqCst);
    }

    /// Progress events lost to subscriber lag. Records may be stale when
    /// this is nonzero.
    pub fn missed_events(&self) -> u64 {
        self.missed.load(Ordering::SeqCst)
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    pub fn snapshot(&self) -> Vec<TenantSnapshot> {
        let mut tenants: Vec<TenantSnapshot> = self
            .tenants
            .iter()
            .map(|entry| TenantSnapshot {
                user_id: entry.key().user_id.clone(),
                org_id: entry.key().org_id.clone(),
                events: entry.value().clone(),
            })
            .collect();
        tenants.sort_by(|a, b| (&a.user_id, &a.org_id).cmp(&(&b.user_id, &b.org_id)));
        tenants
    }

    pub fn restore(weights: ProgressWeights, snapshot: Vec<TenantSnapshot>) -> Self {
        let ledger = Self::new(weights);
        for tenant in snapshot {
            ledger
                .tenants
                .insert(Identity::new(tenant.user_id, tenant.org_id), tenant.events);
        }
        ledger
    }
}

impl Default for ProgressLedger {
    fn default() -> Self {
        Self::new(ProgressWeights::default())
    }
}
