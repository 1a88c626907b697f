//! Re-inserts gateway transactions whose local write failed after the gateway
//! had already accepted them.
//!
//! The orchestrator journals such records in `orphaned_gateway_transactions`.
//! Every retry is keyed on the order reference, and a duplicate-key result
//! means an earlier attempt already landed.

use crate::models::OrphanedGatewayTransaction;
use crate::services::repository::{StoreError, TransactionStore};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn TransactionStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// One pass over the journal, oldest first.
    pub async fn reconcile_orphans(&self) -> Result<ReconcileReport, AppError> {
        let orphans = self.store.list_orphans(BATCH_SIZE).await?;
        let mut report = ReconcileReport::default();

        for orphan in orphans {
            if self.settle(&orphan).await {
                report.inserted += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.inserted > 0 || report.failed > 0 {
            tracing::info!(
                inserted = report.inserted,
                failed = report.failed,
                "Reconciliation pass finished"
            );
        }
        Ok(report)
    }

    /// Reconcile a single order reference. Returns `true` when the transaction
    /// is now stored locally.
    pub async fn reconcile_order(&self, order_ref: &str) -> Result<bool, AppError> {
        match self.store.find_orphan(order_ref).await? {
            Some(orphan) => Ok(self.settle(&orphan).await),
            None => Ok(false),
        }
    }

    async fn settle(&self, orphan: &OrphanedGatewayTransaction) -> bool {
        let order_ref = orphan.order_ref.as_str();

        match self.store.insert_transaction(&orphan.transaction).await {
            Ok(()) | Err(StoreError::Duplicate(_)) => {
                if let Err(e) = self.store.remove_orphan(order_ref).await {
                    // The next pass sees a duplicate and tries the removal again.
                    tracing::warn!(order_ref = %order_ref, error = %e, "Failed to clear orphan record");
                }
                tracing::info!(order_ref = %order_ref, attempts = orphan.attempts + 1, "Orphaned transaction reconciled");
                metrics::counter!("orphans_reconciled_total").increment(1);
                true
            }
            Err(e) => {
                tracing::warn!(order_ref = %order_ref, error = %e, "Orphan insert retry failed");
                if let Err(note_err) = self.store.note_orphan_attempt(order_ref, &e.to_string()).await {
                    tracing::warn!(order_ref = %order_ref, error = %note_err, "Failed to record orphan attempt");
                }
                false
            }
        }
    }

    /// Run [`Reconciler::reconcile_orphans`] every `interval` until the task is
    /// aborted.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = self.reconcile_orphans().await {
                    tracing::error!(error = %e, "Reconciliation pass failed");
                }
            }
        })
    }
}
