use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Transaction {
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// Externally visible order reference; webhook join key. Never mutated.
    pub order_ref: String,
    /// Game/account identifier the goods are delivered to.
    pub user_id: String,
    pub server_id: String,
    /// Authenticated buyer; `None` for guest checkout.
    pub buyer_id: Option<String>,
    /// Name used to greet the buyer in messages; `Guest` when not given.
    pub username: String,
    pub customer: Customer,
    pub product: ProductRef,
    pub amount: i64,
    pub fee: i64,
    /// Free-form per-product fields, e.g. `server_id` for a game top-up.
    pub values: BTreeMap<String, String>,
    pub payment_method: String,
    pub payment_name: String,
    pub channel: PaymentChannel,
    pub status: FulfillmentStatus,
    pub payment_status: PaymentStatus,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expired_time: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Amount the buyer has to pay, surcharges included.
    pub fn total_payable(&self) -> i64 {
        self.amount + self.fee + self.unique_code().unwrap_or(0)
    }

    pub fn unique_code(&self) -> Option<i64> {
        match &self.channel {
            PaymentChannel::BankTransfer { unique_code, .. } => Some(*unique_code),
            PaymentChannel::Gateway { .. } => None,
        }
    }

    pub fn pay_code(&self) -> Option<&str> {
        match &self.channel {
            PaymentChannel::Gateway { pay_code, .. } => pay_code.as_deref(),
            PaymentChannel::BankTransfer { .. } => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Customer {
    pub name: String,
    pub email: String,
    /// Digits only.
    pub phone: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProductRef {
    pub code: String,
    pub name: String,
    pub brand: String,
    pub price: i64,
}

/// Payment artifacts. Exactly one variant exists per transaction, fixed at
/// creation time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentChannel {
    BankTransfer {
        bank_id: String,
        account_number: String,
        unique_code: i64,
    },
    Gateway {
        reference: String,
        pay_code: Option<String>,
        qr_string: Option<String>,
        qr_url: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    Pending,
    Process,
    Success,
    Failed,
}

impl fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FulfillmentStatus::Pending => "pending",
            FulfillmentStatus::Process => "process",
            FulfillmentStatus::Success => "success",
            FulfillmentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Payment state as reported by the provider.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Expired,
    Failed,
    Refund,
}

impl PaymentStatus {
    /// Parse a provider status string. Xendit reports `SETTLED` for a paid
    /// invoice that has been disbursed, and `PENDING` for an unpaid one.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status.to_ascii_uppercase().as_str() {
            "UNPAID" | "PENDING" => Some(PaymentStatus::Unpaid),
            "PAID" | "SETTLED" => Some(PaymentStatus::Paid),
            "EXPIRED" => Some(PaymentStatus::Expired),
            "FAILED" => Some(PaymentStatus::Failed),
            "REFUND" | "REFUNDED" => Some(PaymentStatus::Refund),
            _ => None,
        }
    }

    /// Fulfillment status implied by this payment status.
    pub fn fulfillment(self) -> FulfillmentStatus {
        match self {
            PaymentStatus::Unpaid => FulfillmentStatus::Pending,
            PaymentStatus::Paid => FulfillmentStatus::Process,
            PaymentStatus::Expired | PaymentStatus::Failed | PaymentStatus::Refund => {
                FulfillmentStatus::Failed
            }
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refund => "REFUND",
        };
        f.write_str(s)
    }
}

/// A gateway transaction the provider accepted but that could not be stored
/// locally. Kept until the reconciler manages to insert it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OrphanedGatewayTransaction {
    /// Order reference of the orphaned transaction.
    #[serde(rename = "_id")]
    pub order_ref: String,
    pub transaction: Transaction,
    pub last_error: String,
    pub attempts: u32,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub recorded_at: DateTime<Utc>,
}
