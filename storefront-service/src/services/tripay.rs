//! Tripay payment gateway client.
//!
//! Implements closed-payment transaction creation and payment instruction
//! lookup. Credentials come from the active `tripay` settings record.

use crate::config::TripayConfig;
use crate::models::TripaySettings;
use crate::services::repository::SettingsStore;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::utils::signature::hmac_sha256_hex;
use std::sync::Arc;

/// Tripay client for interacting with the Tripay API.
#[derive(Clone)]
pub struct TripayClient {
    client: Client,
    config: TripayConfig,
    settings: Arc<dyn SettingsStore>,
}

/// A single line on the gateway invoice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub sku: String,
    pub name: String,
    pub price: i64,
    pub quantity: u32,
}

/// Everything needed to open a transaction at the gateway.
#[derive(Debug, Clone)]
pub struct GatewayOrder {
    pub order_ref: String,
    pub amount: i64,
    /// Tripay channel code, e.g. "QRIS" or "BRIVA".
    pub method: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub items: Vec<OrderItem>,
    /// Unix seconds.
    pub expired_time: i64,
}

/// Request body for `transaction/create`.
#[derive(Debug, Serialize)]
struct CreateTransactionRequest<'a> {
    method: Option<&'a str>,
    merchant_ref: &'a str,
    amount: i64,
    customer_name: &'a str,
    customer_email: &'a str,
    customer_phone: &'a str,
    order_items: &'a [OrderItem],
    expired_time: i64,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct TripayEnvelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

/// Transaction as reported back by Tripay.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTransaction {
    pub reference: String,
    pub merchant_ref: String,
    pub payment_method: String,
    pub payment_name: String,
    pub amount: i64,
    #[serde(default)]
    pub total_fee: i64,
    pub status: String,
    /// Unix seconds.
    pub expired_time: i64,
    #[serde(default)]
    pub pay_code: Option<String>,
    #[serde(default)]
    pub qr_string: Option<String>,
    #[serde(default)]
    pub qr_url: Option<String>,
    #[serde(default)]
    pub order_items: Vec<RemoteOrderItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteOrderItem {
    #[serde(default)]
    pub sku: Option<String>,
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Deserialize)]
struct TripayErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl TripayClient {
    pub fn new(client: Client, config: TripayConfig, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            client,
            config,
            settings,
        }
    }

    /// Active settings, or `NotConfigured` when the record is missing or has
    /// empty credentials.
    async fn active_settings(&self) -> Result<TripaySettings, AppError> {
        match self.settings.tripay_settings().await? {
            Some(settings) if settings.is_complete() => Ok(settings),
            _ => {
                tracing::error!("Tripay settings record missing or incomplete");
                Err(AppError::NotConfigured(
                    "Payment gateway not configured".to_string(),
                ))
            }
        }
    }

    fn endpoint(&self, settings: &TripaySettings, path: &str) -> String {
        let base = if settings.is_production {
            &self.config.production_url
        } else {
            &self.config.sandbox_url
        };
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    /// Create a closed-payment transaction at Tripay.
    ///
    /// Nothing is persisted here; the caller stores the local record only once
    /// this returns `Ok`.
    pub async fn create_transaction(&self, order: &GatewayOrder) -> Result<RemoteTransaction, AppError> {
        let settings = self.active_settings().await?;
        let signature = generate_signature(&settings, &order.order_ref, order.amount)?;

        let request = CreateTransactionRequest {
            method: order.method.as_deref(),
            merchant_ref: &order.order_ref,
            amount: order.amount,
            customer_name: &order.customer_name,
            customer_email: &order.customer_email,
            customer_phone: &order.customer_phone,
            order_items: &order.items,
            expired_time: order.expired_time,
            signature,
        };

        tracing::info!(
            order_ref = %order.order_ref,
            amount = order.amount,
            method = ?order.method,
            "Creating Tripay transaction"
        );

        let response = self
            .client
            .post(self.endpoint(&settings, "transaction/create"))
            .bearer_auth(settings.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(order_ref = %order.order_ref, error = %e, "Tripay unreachable");
                AppError::UpstreamFailure(format!("Tripay unreachable: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AppError::UpstreamFailure(format!("Failed to read Tripay response: {}", e))
        })?;

        tracing::debug!(status = %status, "Tripay create transaction response");

        if !status.is_success() {
            let message = serde_json::from_str::<TripayErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            tracing::error!(
                order_ref = %order.order_ref,
                status = %status,
                message = %message,
                "Tripay transaction creation failed"
            );
            return Err(AppError::UpstreamFailure(message));
        }

        let envelope: TripayEnvelope<RemoteTransaction> = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(order_ref = %order.order_ref, error = %e, "Unexpected Tripay response body");
            AppError::UpstreamFailure(format!("Unexpected Tripay response: {}", e))
        })?;

        match envelope {
            TripayEnvelope {
                success: true,
                data: Some(remote),
                ..
            } => {
                tracing::info!(
                    order_ref = %remote.merchant_ref,
                    reference = %remote.reference,
                    status = %remote.status,
                    "Tripay transaction created"
                );
                Ok(remote)
            }
            TripayEnvelope { message, .. } => {
                let message = message.unwrap_or_else(|| "Transaction failed".to_string());
                tracing::error!(order_ref = %order.order_ref, message = %message, "Tripay rejected transaction");
                Err(AppError::UpstreamFailure(message))
            }
        }
    }

    /// Human-readable payment steps for a channel. Returns `None` on any
    /// failure; callers only use this to enrich a detail page.
    pub async fn fetch_payment_instructions(
        &self,
        method: &str,
        pay_code: Option<&str>,
        amount: i64,
    ) -> Option<serde_json::Value> {
        let settings = self.active_settings().await.ok()?;

        let mut query: Vec<(&str, String)> = vec![
            ("code", method.to_string()),
            ("amount", amount.to_string()),
            ("allow_html", "1".to_string()),
        ];
        if let Some(pay_code) = pay_code {
            query.push(("pay_code", pay_code.to_string()));
        }

        let response = self
            .client
            .get(self.endpoint(&settings, "payment/instruction"))
            .bearer_auth(settings.api_key.expose_secret())
            .query(&query)
            .send()
            .await
            .map_err(|e| tracing::warn!(method = %method, error = %e, "Payment instruction request failed"))
            .ok()?;

        if !response.status().is_success() {
            tracing::warn!(method = %method, status = %response.status(), "Payment instruction lookup rejected");
            return None;
        }

        response.json::<serde_json::Value>().await.ok()
    }
}

/// `HMAC-SHA256(merchant_code + merchant_ref + amount, private_key)` as hex.
pub fn generate_signature(
    settings: &TripaySettings,
    merchant_ref: &str,
    amount: i64,
) -> Result<String, AppError> {
    let payload = format!("{}{}{}", settings.merchant_code, merchant_ref, amount);
    hmac_sha256_hex(settings.private_key.expose_secret(), payload.as_bytes())
        .map_err(AppError::InternalError)
}
