//! Transaction creation.
//!
//! Picks the bank-transfer or gateway path, writes exactly one transaction
//! record, then queues a best-effort notice for the buyer.

use crate::models::{
    Customer, FulfillmentStatus, OrphanedGatewayTransaction, PaymentChannel, PaymentStatus,
    ProductRef, Transaction,
};
use crate::services::metrics;
use crate::services::notification::{NotificationDispatcher, NotificationJob};
use crate::services::repository::{BankAccountStore, StoreError, TransactionStore};
use crate::services::tripay::{GatewayOrder, OrderItem, RemoteTransaction, TripayClient};
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

const PAYMENT_WINDOW_SECS: i64 = 3600;

/// Validated, sanitized creation input.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub server_id: String,
    pub buyer_id: Option<String>,
    pub username: String,
    pub amount: i64,
    pub method_code: Option<String>,
    pub customer: Customer,
    pub product: ProductRef,
    pub values: BTreeMap<String, String>,
    pub unique_code: Option<i64>,
    pub bank_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRoute {
    BankTransfer { bank_id: String, unique_code: i64 },
    Gateway,
}

impl PaymentRoute {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentRoute::BankTransfer { .. } => "bank_transfer",
            PaymentRoute::Gateway => "gateway",
        }
    }
}

impl NewTransaction {
    /// Bank transfer needs both a non-zero unique code and a bank id. Anything
    /// else goes to the gateway.
    pub fn route(&self) -> PaymentRoute {
        match (self.unique_code, self.bank_id.as_deref()) {
            (Some(code), Some(bank_id)) if code != 0 && !bank_id.trim().is_empty() => {
                PaymentRoute::BankTransfer {
                    bank_id: bank_id.trim().to_string(),
                    unique_code: code,
                }
            }
            _ => PaymentRoute::Gateway,
        }
    }
}

/// `<initials><YYYYMMDDHHMMSS><6 random>` with up to three brand initials.
pub fn generate_order_ref(brand: &str, now: DateTime<Utc>) -> String {
    let mut initials: String = brand
        .split_whitespace()
        .filter_map(|word| word.chars().find(|c| c.is_ascii_alphanumeric()))
        .take(3)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if initials.is_empty() {
        initials.push_str("TRX");
    }

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();

    format!("{}{}{}", initials, now.format("%Y%m%d%H%M%S"), suffix)
}

#[derive(Clone)]
pub struct TransactionOrchestrator {
    transactions: Arc<dyn TransactionStore>,
    bank_accounts: Arc<dyn BankAccountStore>,
    gateway: TripayClient,
    notifier: NotificationDispatcher,
}

impl TransactionOrchestrator {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        bank_accounts: Arc<dyn BankAccountStore>,
        gateway: TripayClient,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            transactions,
            bank_accounts,
            gateway,
            notifier,
        }
    }

    pub async fn create_transaction(&self, input: NewTransaction) -> Result<Transaction, AppError> {
        let now = Utc::now();
        let order_ref = generate_order_ref(&input.product.brand, now);
        let route = input.route();

        tracing::info!(
            order_ref = %order_ref,
            route = route.label(),
            amount = input.amount,
            product = %input.product.code,
            "Creating transaction"
        );

        let result = match &route {
            PaymentRoute::BankTransfer {
                bank_id,
                unique_code,
            } => {
                self.create_bank_transfer(&input, order_ref.clone(), bank_id, *unique_code, now)
                    .await
            }
            PaymentRoute::Gateway => self.create_gateway(&input, order_ref.clone(), now).await,
        };

        match result {
            Ok(transaction) => {
                metrics::record_transaction_created(route.label());
                tracing::info!(
                    order_ref = %transaction.order_ref,
                    status = %transaction.status,
                    payment_status = %transaction.payment_status,
                    "Transaction created"
                );
                self.notifier
                    .enqueue(NotificationJob::TransactionNotice(Box::new(transaction.clone())));
                Ok(transaction)
            }
            Err(e) => {
                metrics::record_transaction_failed(route.label());
                tracing::error!(order_ref = %order_ref, route = route.label(), error = %e, "Transaction creation failed");
                self.notifier.enqueue(NotificationJob::OwnerAlert(format!(
                    "Transaksi {} gagal: {}",
                    order_ref, e
                )));
                Err(e)
            }
        }
    }

    async fn create_bank_transfer(
        &self,
        input: &NewTransaction,
        order_ref: String,
        bank_id: &str,
        unique_code: i64,
        now: DateTime<Utc>,
    ) -> Result<Transaction, AppError> {
        let account = self
            .bank_accounts
            .find_bank_account(bank_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Bank account not found")))?;

        let transaction = Transaction {
            id: Uuid::new_v4(),
            order_ref,
            user_id: input.user_id.clone(),
            server_id: input.server_id.clone(),
            buyer_id: input.buyer_id.clone(),
            username: input.username.clone(),
            customer: input.customer.clone(),
            product: input.product.clone(),
            amount: input.amount,
            fee: 0,
            values: input.values.clone(),
            payment_method: account.label.clone(),
            payment_name: account.label.clone(),
            channel: PaymentChannel::BankTransfer {
                bank_id: account.bank_id.clone(),
                account_number: account.account_number.clone(),
                unique_code,
            },
            status: FulfillmentStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            expired_time: now + Duration::seconds(PAYMENT_WINDOW_SECS),
            created_at: now,
            updated_at: now,
        };

        self.transactions.insert_transaction(&transaction).await?;
        Ok(transaction)
    }

    async fn create_gateway(
        &self,
        input: &NewTransaction,
        order_ref: String,
        now: DateTime<Utc>,
    ) -> Result<Transaction, AppError> {
        let order = GatewayOrder {
            order_ref,
            amount: input.amount,
            method: input.method_code.clone(),
            customer_name: input.customer.name.clone(),
            customer_email: input.customer.email.clone(),
            customer_phone: input.customer.phone.clone(),
            items: vec![OrderItem {
                sku: input.product.code.clone(),
                name: input.product.name.clone(),
                price: input.product.price,
                quantity: 1,
            }],
            expired_time: now.timestamp() + PAYMENT_WINDOW_SECS,
        };

        let remote = self.gateway.create_transaction(&order).await?;
        let transaction = mirror_remote(input, &order.order_ref, remote, now)?;

        match self.transactions.insert_transaction(&transaction).await {
            Ok(()) => Ok(transaction),
            Err(e @ StoreError::Duplicate(_)) => {
                // Only failed writes are journaled; the existing row belongs to another order.
                tracing::error!(
                    order_ref = %transaction.order_ref,
                    channel = ?transaction.channel,
                    "Gateway accepted transaction but its order reference already exists locally"
                );
                Err(e.into())
            }
            Err(e) => {
                tracing::error!(
                    order_ref = %transaction.order_ref,
                    error = %e,
                    "Gateway accepted transaction but local write failed; journaling for reconciliation"
                );
                let orphan = OrphanedGatewayTransaction {
                    order_ref: transaction.order_ref.clone(),
                    transaction,
                    last_error: e.to_string(),
                    attempts: 0,
                    recorded_at: Utc::now(),
                };
                if let Err(journal_err) = self.transactions.record_orphan(&orphan).await {
                    tracing::error!(
                        order_ref = %orphan.order_ref,
                        error = %journal_err,
                        "Failed to journal orphaned gateway transaction"
                    );
                }
                Err(e.into())
            }
        }
    }
}

/// Local record mirroring what the gateway reported.
fn mirror_remote(
    input: &NewTransaction,
    order_ref: &str,
    remote: RemoteTransaction,
    now: DateTime<Utc>,
) -> Result<Transaction, AppError> {
    let expired_time = DateTime::from_timestamp(remote.expired_time, 0).ok_or_else(|| {
        AppError::UpstreamFailure(format!("Invalid expiry from gateway: {}", remote.expired_time))
    })?;

    let payment_status = PaymentStatus::from_provider(&remote.status).unwrap_or_else(|| {
        tracing::warn!(order_ref = %order_ref, status = %remote.status, "Unknown gateway status, treating as unpaid");
        PaymentStatus::Unpaid
    });
    let status = if payment_status == PaymentStatus::Paid {
        FulfillmentStatus::Process
    } else {
        FulfillmentStatus::Pending
    };

    let item = remote.order_items.first();
    let product = ProductRef {
        code: item
            .and_then(|i| i.sku.clone())
            .unwrap_or_else(|| input.product.code.clone()),
        name: item
            .map(|i| i.name.clone())
            .unwrap_or_else(|| input.product.name.clone()),
        brand: input.product.brand.clone(),
        price: item.map(|i| i.price).unwrap_or(input.product.price),
    };

    Ok(Transaction {
        id: Uuid::new_v4(),
        order_ref: order_ref.to_string(),
        user_id: input.user_id.clone(),
        server_id: input.server_id.clone(),
        buyer_id: input.buyer_id.clone(),
        username: input.username.clone(),
        customer: input.customer.clone(),
        product,
        amount: remote.amount,
        fee: remote.total_fee,
        values: input.values.clone(),
        payment_method: remote.payment_method,
        payment_name: remote.payment_name,
        channel: PaymentChannel::Gateway {
            reference: remote.reference,
            pay_code: remote.pay_code,
            qr_string: remote.qr_string,
            qr_url: remote.qr_url,
        },
        status,
        payment_status,
        expired_time,
        created_at: now,
        updated_at: now,
    })
}
