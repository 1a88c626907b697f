use super::{BankAccountStore, SettingsStore, StatusPair, StoreError, TransactionStore};
use crate::models::settings::{FONNTE_SETTINGS_ID, TRIPAY_SETTINGS_ID, XENDIT_SETTINGS_ID};
use crate::models::{
    BankAccount, FonnteSettings, OrphanedGatewayTransaction, Transaction, TripaySettings,
    XenditSettings,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, DateTime as BsonDateTime, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
    Collection, Database, IndexModel,
};
use serde::de::DeserializeOwned;

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoRepository {
    db: Database,
    transactions: Collection<Transaction>,
    orphans: Collection<OrphanedGatewayTransaction>,
    bank_accounts: Collection<BankAccount>,
    settings: Collection<Document>,
}

impl MongoRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            transactions: db.collection("transactions"),
            orphans: db.collection("orphaned_gateway_transactions"),
            bank_accounts: db.collection("bank_accounts"),
            settings: db.collection("provider_settings"),
        }
    }

    /// Create the unique order reference index and the lookup indexes used by
    /// the admin dashboard and webhook updates.
    pub async fn init_indexes(&self) -> Result<(), StoreError> {
        let order_ref_index = IndexModel::builder()
            .keys(doc! { "order_ref": 1 })
            .options(
                IndexOptions::builder()
                    .name("order_ref_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        let buyer_index = IndexModel::builder()
            .keys(doc! { "buyer_id": 1 })
            .options(IndexOptions::builder().name("buyer_idx".to_string()).build())
            .build();

        let status_index = IndexModel::builder()
            .keys(doc! { "status": 1 })
            .options(IndexOptions::builder().name("status_idx".to_string()).build())
            .build();

        let payment_status_index = IndexModel::builder()
            .keys(doc! { "payment_status": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_status_idx".to_string())
                    .build(),
            )
            .build();

        let created_index = IndexModel::builder()
            .keys(doc! { "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("created_at_idx".to_string())
                    .build(),
            )
            .build();

        let buyer_status_index = IndexModel::builder()
            .keys(doc! { "buyer_id": 1, "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("buyer_status_idx".to_string())
                    .build(),
            )
            .build();

        self.transactions
            .create_indexes(
                [
                    order_ref_index,
                    buyer_index,
                    status_index,
                    payment_status_index,
                    created_index,
                    buyer_status_index,
                ],
                None,
            )
            .await?;

        let bank_id_index = IndexModel::builder()
            .keys(doc! { "bank_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("bank_id_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.bank_accounts
            .create_indexes([bank_id_index], None)
            .await?;

        tracing::info!("Storefront indexes initialized");
        Ok(())
    }

    async fn settings_record<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, StoreError> {
        let Some(document) = self.settings.find_one(doc! { "_id": id }, None).await? else {
            return Ok(None);
        };

        let settings = mongodb::bson::from_document(document).map_err(|e| {
            tracing::error!(settings_id = %id, error = %e, "Malformed provider settings record");
            StoreError::Backend(anyhow::anyhow!("Malformed provider settings '{}': {}", id, e))
        })?;

        Ok(Some(settings))
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

fn bson_of<T: serde::Serialize>(value: &T) -> Result<mongodb::bson::Bson, StoreError> {
    to_bson(value).map_err(|e| StoreError::Backend(anyhow::Error::new(e)))
}

#[async_trait]
impl TransactionStore for MongoRepository {
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        match self.transactions.insert_one(transaction, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                Err(StoreError::Duplicate(transaction.order_ref.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_transaction(&self, order_ref: &str) -> Result<Option<Transaction>, StoreError> {
        let transaction = self
            .transactions
            .find_one(doc! { "order_ref": order_ref }, None)
            .await?;
        Ok(transaction)
    }

    async fn transition_status(
        &self,
        order_ref: &str,
        expected: StatusPair,
        next: StatusPair,
    ) -> Result<bool, StoreError> {
        let filter = doc! {
            "order_ref": order_ref,
            "status": bson_of(&expected.status)?,
            "payment_status": bson_of(&expected.payment_status)?,
        };
        let update = doc! {
            "$set": {
                "status": bson_of(&next.status)?,
                "payment_status": bson_of(&next.payment_status)?,
                "updated_at": BsonDateTime::now(),
            }
        };

        let result = self.transactions.update_one(filter, update, None).await?;
        Ok(result.matched_count > 0)
    }

    async fn record_orphan(&self, orphan: &OrphanedGatewayTransaction) -> Result<(), StoreError> {
        match self.orphans.insert_one(orphan, None).await {
            Ok(_) => Ok(()),
            // Already journaled by an earlier attempt.
            Err(e) if is_duplicate_key(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_orphans(&self, limit: i64) -> Result<Vec<OrphanedGatewayTransaction>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "recorded_at": 1 })
            .limit(limit)
            .build();

        let cursor = self.orphans.find(doc! {}, Some(options)).await?;
        let orphans: Vec<OrphanedGatewayTransaction> = cursor.try_collect().await?;
        Ok(orphans)
    }

    async fn find_orphan(
        &self,
        order_ref: &str,
    ) -> Result<Option<OrphanedGatewayTransaction>, StoreError> {
        let orphan = self.orphans.find_one(doc! { "_id": order_ref }, None).await?;
        Ok(orphan)
    }

    async fn note_orphan_attempt(&self, order_ref: &str, error: &str) -> Result<(), StoreError> {
        self.orphans
            .update_one(
                doc! { "_id": order_ref },
                doc! {
                    "$inc": { "attempts": 1 },
                    "$set": { "last_error": error },
                },
                None,
            )
            .await?;
        Ok(())
    }

    async fn remove_orphan(&self, order_ref: &str) -> Result<(), StoreError> {
        self.orphans.delete_one(doc! { "_id": order_ref }, None).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }
}

#[async_trait]
impl BankAccountStore for MongoRepository {
    async fn find_bank_account(&self, bank_id: &str) -> Result<Option<BankAccount>, StoreError> {
        let account = self
            .bank_accounts
            .find_one(doc! { "bank_id": bank_id }, None)
            .await?;
        Ok(account)
    }

    async fn list_bank_accounts(&self) -> Result<Vec<BankAccount>, StoreError> {
        let options = FindOptions::builder().sort(doc! { "label": 1 }).build();
        let cursor = self.bank_accounts.find(doc! {}, Some(options)).await?;
        let accounts: Vec<BankAccount> = cursor.try_collect().await?;
        Ok(accounts)
    }
}

#[async_trait]
impl SettingsStore for MongoRepository {
    async fn tripay_settings(&self) -> Result<Option<TripaySettings>, StoreError> {
        self.settings_record(TRIPAY_SETTINGS_ID).await
    }

    async fn xendit_settings(&self) -> Result<Option<XenditSettings>, StoreError> {
        self.settings_record(XENDIT_SETTINGS_ID).await
    }

    async fn fonnte_settings(&self) -> Result<Option<FonnteSettings>, StoreError> {
        self.settings_record(FONNTE_SETTINGS_ID).await
    }
}
