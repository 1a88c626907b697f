use super::{BankAccountStore, SettingsStore, StatusPair, StoreError, TransactionStore};
use crate::models::{
    BankAccount, FonnteSettings, OrphanedGatewayTransaction, Transaction, TripaySettings,
    XenditSettings,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Process-local store for tests and local runs without MongoDB.
#[derive(Default)]
pub struct InMemoryRepository {
    transactions: RwLock<HashMap<String, Transaction>>,
    orphans: RwLock<HashMap<String, OrphanedGatewayTransaction>>,
    bank_accounts: RwLock<Vec<BankAccount>>,
    tripay: RwLock<Option<TripaySettings>>,
    xendit: RwLock<Option<XenditSettings>>,
    fonnte: RwLock<Option<FonnteSettings>>,
    fail_transaction_inserts: AtomicBool,
    duplicate_transaction_inserts: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bank_account(mut self, account: BankAccount) -> Self {
        self.bank_accounts.get_mut().push(account);
        self
    }

    pub fn with_tripay(mut self, settings: TripaySettings) -> Self {
        *self.tripay.get_mut() = Some(settings);
        self
    }

    pub fn with_xendit(mut self, settings: XenditSettings) -> Self {
        *self.xendit.get_mut() = Some(settings);
        self
    }

    pub fn with_fonnte(mut self, settings: FonnteSettings) -> Self {
        *self.fonnte.get_mut() = Some(settings);
        self
    }

    /// Make every transaction insert fail, simulating a database outage.
    pub fn fail_transaction_inserts(&self, fail: bool) {
        self.fail_transaction_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every transaction insert report an order reference collision.
    pub fn report_duplicate_inserts(&self, duplicate: bool) {
        self.duplicate_transaction_inserts
            .store(duplicate, Ordering::SeqCst);
    }

    pub async fn transaction_count(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn orphan_count(&self) -> usize {
        self.orphans.read().await.len()
    }
}

#[async_trait]
impl TransactionStore for InMemoryRepository {
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        if self.fail_transaction_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "simulated write failure"
            )));
        }
        if self.duplicate_transaction_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Duplicate(transaction.order_ref.clone()));
        }

        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&transaction.order_ref) {
            return Err(StoreError::Duplicate(transaction.order_ref.clone()));
        }
        transactions.insert(transaction.order_ref.clone(), transaction.clone());
        Ok(())
    }

    async fn find_transaction(&self, order_ref: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self.transactions.read().await.get(order_ref).cloned())
    }

    async fn transition_status(
        &self,
        order_ref: &str,
        expected: StatusPair,
        next: StatusPair,
    ) -> Result<bool, StoreError> {
        let mut transactions = self.transactions.write().await;
        match transactions.get_mut(order_ref) {
            Some(transaction) if StatusPair::of(transaction) == expected => {
                transaction.status = next.status;
                transaction.payment_status = next.payment_status;
                transaction.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_orphan(&self, orphan: &OrphanedGatewayTransaction) -> Result<(), StoreError> {
        self.orphans
            .write()
            .await
            .entry(orphan.order_ref.clone())
            .or_insert_with(|| orphan.clone());
        Ok(())
    }

    async fn list_orphans(&self, limit: i64) -> Result<Vec<OrphanedGatewayTransaction>, StoreError> {
        let mut orphans: Vec<_> = self.orphans.read().await.values().cloned().collect();
        orphans.sort_by_key(|o| o.recorded_at);
        orphans.truncate(limit.max(0) as usize);
        Ok(orphans)
    }

    async fn find_orphan(
        &self,
        order_ref: &str,
    ) -> Result<Option<OrphanedGatewayTransaction>, StoreError> {
        Ok(self.orphans.read().await.get(order_ref).cloned())
    }

    async fn note_orphan_attempt(&self, order_ref: &str, error: &str) -> Result<(), StoreError> {
        if let Some(orphan) = self.orphans.write().await.get_mut(order_ref) {
            orphan.attempts += 1;
            orphan.last_error = error.to_string();
        }
        Ok(())
    }

    async fn remove_orphan(&self, order_ref: &str) -> Result<(), StoreError> {
        self.orphans.write().await.remove(order_ref);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl BankAccountStore for InMemoryRepository {
    async fn find_bank_account(&self, bank_id: &str) -> Result<Option<BankAccount>, StoreError> {
        Ok(self
            .bank_accounts
            .read()
            .await
            .iter()
            .find(|a| a.bank_id == bank_id)
            .cloned())
    }

    async fn list_bank_accounts(&self) -> Result<Vec<BankAccount>, StoreError> {
        Ok(self.bank_accounts.read().await.clone())
    }
}

#[async_trait]
impl SettingsStore for InMemoryRepository {
    async fn tripay_settings(&self) -> Result<Option<TripaySettings>, StoreError> {
        Ok(self.tripay.read().await.clone())
    }

    async fn xendit_settings(&self) -> Result<Option<XenditSettings>, StoreError> {
        Ok(self.xendit.read().await.clone())
    }

    async fn fonnte_settings(&self) -> Result<Option<FonnteSettings>, StoreError> {
        Ok(self.fonnte.read().await.clone())
    }
}
