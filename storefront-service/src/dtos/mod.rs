use crate::models::{
    BankAccount, Customer, FulfillmentStatus, PaymentChannel, PaymentStatus, ProductRef,
    Transaction,
};
use crate::services::orchestrator::NewTransaction;
use axum::{
    extract::{FromRequest, Request},
    Json,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::collections::BTreeMap;
use validator::{Validate, ValidationError};

pub const DEFAULT_SERVER_ID: &str = "default_server_id";
pub const GUEST_USERNAME: &str = "Guest";

/// Normalization applied to a request body before it is validated.
pub trait Sanitize {
    fn sanitize(&mut self);
}

/// JSON body that has been sanitized and validated.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + Sanitize + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(mut value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e)))?;

        value.sanitize();
        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTransactionRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "User ID harus diisi"))]
    pub user_id: String,

    #[validate(length(max = 255))]
    pub server_id: Option<String>,

    #[validate(
        required(message = "Jumlah pembayaran harus diisi"),
        range(min = 1, max = 100_000_000, message = "Jumlah pembayaran minimal Rp 1")
    )]
    pub amount: Option<i64>,

    #[validate(length(max = 50))]
    pub method_code: Option<String>,

    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "Nama pelanggan harus diisi"))]
    pub customer_name: String,

    #[serde(default)]
    #[validate(
        email(message = "Format email tidak valid"),
        length(max = 255, message = "Email terlalu panjang")
    )]
    pub email_customer: String,

    #[serde(default)]
    #[validate(custom(function = "validate_phone"))]
    pub phone_number: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "Kode produk harus diisi"))]
    pub product_code: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "Nama produk harus diisi"))]
    pub product_name: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "Brand produk harus diisi"))]
    pub product_brand: String,

    #[validate(
        required(message = "Harga produk harus diisi"),
        range(min = 1, message = "Harga produk minimal Rp 1")
    )]
    pub product_price: Option<i64>,

    #[serde(default)]
    pub values: Option<BTreeMap<String, serde_json::Value>>,

    #[validate(range(min = 0, max = 999))]
    pub unique_code: Option<i64>,

    #[serde(rename = "bankID", alias = "bank_id")]
    #[validate(length(max = 255))]
    pub bank_id: Option<String>,

    #[validate(length(max = 255))]
    pub username: Option<String>,
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let valid = (10..=15).contains(&phone.len()) && phone.chars().all(|c| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("phone");
        err.message = Some("Format nomor telepon tidak valid (10-15 digit)".into());
        Err(err)
    }
}

impl Sanitize for CreateTransactionRequest {
    fn sanitize(&mut self) {
        self.user_id = self.user_id.trim().to_string();
        self.customer_name = strip_tags(&self.customer_name).trim().to_string();
        self.email_customer = sanitize_email(&self.email_customer);
        self.phone_number = self.phone_number.chars().filter(char::is_ascii_digit).collect();
        self.product_code = self.product_code.trim().to_string();
        self.product_name = self.product_name.trim().to_string();
        self.product_brand = self.product_brand.trim().to_string();
        self.username = self
            .username
            .as_deref()
            .map(|u| strip_tags(u).trim().to_string());
        self.server_id = self.server_id.as_deref().map(|s| s.trim().to_string());
        self.method_code = self.method_code.as_deref().map(|m| m.trim().to_string());
        self.bank_id = self.bank_id.as_deref().map(|b| b.trim().to_string());
    }
}

/// Remove anything that looks like an HTML tag.
pub fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Keep only characters that may appear in an email address.
pub fn sanitize_email(input: &str) -> String {
    const ALLOWED: &str = "!#$%&'*+-=?^_`{|}~@.[]";
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || ALLOWED.contains(*c))
        .collect()
}

fn value_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

impl CreateTransactionRequest {
    /// Convert a validated request into orchestrator input.
    pub fn into_new_transaction(self, buyer_id: Option<String>) -> NewTransaction {
        NewTransaction {
            user_id: self.user_id,
            server_id: self
                .server_id
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SERVER_ID.to_string()),
            buyer_id,
            username: self
                .username
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| GUEST_USERNAME.to_string()),
            amount: self.amount.unwrap_or_default(),
            method_code: self.method_code.filter(|m| !m.is_empty()),
            customer: Customer {
                name: self.customer_name,
                email: self.email_customer,
                phone: self.phone_number,
            },
            product: ProductRef {
                code: self.product_code,
                name: self.product_name,
                brand: self.product_brand,
                price: self.product_price.unwrap_or_default(),
            },
            values: self
                .values
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, value_to_string(v)))
                .collect(),
            unique_code: self.unique_code,
            bank_id: self.bank_id.filter(|b| !b.is_empty()),
        }
    }
}

/// Success envelope shared by every JSON endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub order_ref: String,
    pub user_id: String,
    pub server_id: String,
    pub buyer_id: Option<String>,
    pub username: String,
    pub customer: Customer,
    pub product: ProductRef,
    pub amount: i64,
    pub fee: i64,
    pub unique_code: Option<i64>,
    pub total_payable: i64,
    pub values: BTreeMap<String, String>,
    pub payment_method: String,
    pub payment_name: String,
    pub payment: PaymentChannel,
    pub status: FulfillmentStatus,
    pub payment_status: PaymentStatus,
    pub expired_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            unique_code: t.unique_code(),
            total_payable: t.total_payable(),
            order_ref: t.order_ref,
            user_id: t.user_id,
            server_id: t.server_id,
            buyer_id: t.buyer_id,
            username: t.username,
            customer: t.customer,
            product: t.product,
            amount: t.amount,
            fee: t.fee,
            values: t.values,
            payment_method: t.payment_method,
            payment_name: t.payment_name,
            payment: t.channel,
            status: t.status,
            payment_status: t.payment_status,
            expired_time: t.expired_time,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionDetailResponse {
    pub transaction: TransactionResponse,
    pub bank_account: Option<BankAccount>,
    pub payment_instruction: Option<serde_json::Value>,
}
