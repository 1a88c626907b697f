//! Storage seams for the storefront.
//!
//! Each concern is a trait so the orchestrator and handlers can run against
//! MongoDB in production and an in-memory store in tests and local runs.

mod memory;
mod mongo;

pub use memory::InMemoryRepository;
pub use mongo::MongoRepository;

use crate::models::{
    BankAccount, FonnteSettings, FulfillmentStatus, OrphanedGatewayTransaction, PaymentStatus,
    Transaction, TripaySettings, XenditSettings,
};
use async_trait::async_trait;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate order reference: {0}")]
    Duplicate(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Backend(anyhow::Error::new(err))
    }
}

/// Status pair stored on every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPair {
    pub status: FulfillmentStatus,
    pub payment_status: PaymentStatus,
}

impl StatusPair {
    pub fn of(transaction: &Transaction) -> Self {
        Self {
            status: transaction.status,
            payment_status: transaction.payment_status,
        }
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new transaction. Fails with [`StoreError::Duplicate`] when the
    /// order reference already exists.
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn find_transaction(&self, order_ref: &str) -> Result<Option<Transaction>, StoreError>;

    /// Compare-and-set on the status pair. Returns `false` when the stored pair
    /// no longer equals `expected`.
    async fn transition_status(
        &self,
        order_ref: &str,
        expected: StatusPair,
        next: StatusPair,
    ) -> Result<bool, StoreError>;

    async fn record_orphan(&self, orphan: &OrphanedGatewayTransaction) -> Result<(), StoreError>;

    /// Oldest orphans first.
    async fn list_orphans(&self, limit: i64) -> Result<Vec<OrphanedGatewayTransaction>, StoreError>;

    async fn find_orphan(
        &self,
        order_ref: &str,
    ) -> Result<Option<OrphanedGatewayTransaction>, StoreError>;

    async fn note_orphan_attempt(&self, order_ref: &str, error: &str) -> Result<(), StoreError>;

    async fn remove_orphan(&self, order_ref: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BankAccountStore: Send + Sync {
    async fn find_bank_account(&self, bank_id: &str) -> Result<Option<BankAccount>, StoreError>;

    async fn list_bank_accounts(&self) -> Result<Vec<BankAccount>, StoreError>;
}

/// Read access to the active provider credential records.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn tripay_settings(&self) -> Result<Option<TripaySettings>, StoreError>;

    async fn xendit_settings(&self) -> Result<Option<XenditSettings>, StoreError>;

    async fn fonnte_settings(&self) -> Result<Option<FonnteSettings>, StoreError>;
}

/// Convenience bound for a backend that serves every storage concern.
pub trait Repository: TransactionStore + BankAccountStore + SettingsStore + 'static {}

impl<T> Repository for T where T: TransactionStore + BankAccountStore + SettingsStore + 'static {}
