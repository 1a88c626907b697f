//! Inbound payment callbacks.
//!
//! Verification and interpretation are separate steps: [`SignatureVerifier`]
//! authenticates the raw body, then [`CallbackProcessor`] parses it and moves
//! the transaction's status pair.

use crate::models::{FulfillmentStatus, PaymentStatus};
use crate::services::reconciler::Reconciler;
use crate::services::repository::{SettingsStore, StatusPair, TransactionStore};
use axum::http::HeaderMap;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::utils::signature::{secure_compare, verify_hmac_sha256_hex};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const TRIPAY_SIGNATURE_HEADER: &str = "x-callback-signature";
pub const XENDIT_TOKEN_HEADER: &str = "x-callback-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookProvider {
    /// Body signed with HMAC-SHA256 using the gateway private key.
    Tripay,
    /// Static callback token.
    Xendit,
}

impl FromStr for WebhookProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tripay" => Ok(WebhookProvider::Tripay),
            "xendit" => Ok(WebhookProvider::Xendit),
            other => Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid webhook provider: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for WebhookProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebhookProvider::Tripay => f.write_str("tripay"),
            WebhookProvider::Xendit => f.write_str("xendit"),
        }
    }
}

#[derive(Clone)]
pub struct SignatureVerifier {
    settings: Arc<dyn SettingsStore>,
}

impl SignatureVerifier {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    /// Authenticate a callback. Missing provider configuration is a server
    /// fault and is reported as such whatever the request carries.
    pub async fn verify(
        &self,
        provider: WebhookProvider,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), AppError> {
        match provider {
            WebhookProvider::Tripay => self.verify_tripay(headers, body).await,
            WebhookProvider::Xendit => self.verify_xendit(headers).await,
        }
    }

    async fn verify_tripay(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), AppError> {
        let settings = self
            .settings
            .tripay_settings()
            .await?
            .filter(|s| !s.private_key.expose_secret().is_empty())
            .ok_or_else(|| {
                tracing::error!(provider = "tripay", "Webhook received but gateway is not configured");
                AppError::NotConfigured("Payment gateway not configured".to_string())
            })?;

        let signature = header_str(headers, TRIPAY_SIGNATURE_HEADER);
        let valid = verify_hmac_sha256_hex(settings.private_key.expose_secret(), body, signature)
            .map_err(AppError::InternalError)?;

        if !valid {
            tracing::warn!(provider = "tripay", "Webhook signature mismatch");
            return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid signature")));
        }
        Ok(())
    }

    async fn verify_xendit(&self, headers: &HeaderMap) -> Result<(), AppError> {
        let settings = self
            .settings
            .xendit_settings()
            .await?
            .filter(|s| !s.webhook_token.expose_secret().is_empty())
            .ok_or_else(|| {
                tracing::error!(provider = "xendit", "Webhook received but token is not configured");
                AppError::NotConfigured("Webhook token not configured".to_string())
            })?;

        let token = header_str(headers, XENDIT_TOKEN_HEADER);
        if !secure_compare(settings.webhook_token.expose_secret(), token) {
            tracing::warn!(provider = "xendit", "Webhook token mismatch");
            return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid callback token")));
        }
        Ok(())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct TripayCallback {
    merchant_ref: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct XenditCallback {
    external_id: String,
    status: String,
}

/// Provider-neutral view of a verified callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCallback {
    pub order_ref: String,
    pub payment_status: PaymentStatus,
}

pub fn parse_callback(provider: WebhookProvider, body: &[u8]) -> Result<StatusCallback, AppError> {
    let (order_ref, status) = match provider {
        WebhookProvider::Tripay => {
            let cb: TripayCallback = serde_json::from_slice(body)
                .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed callback: {}", e)))?;
            (cb.merchant_ref, cb.status)
        }
        WebhookProvider::Xendit => {
            let cb: XenditCallback = serde_json::from_slice(body)
                .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed callback: {}", e)))?;
            (cb.external_id, cb.status)
        }
    };

    let payment_status = PaymentStatus::from_provider(&status).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Unknown payment status: {}", status))
    })?;

    Ok(StatusCallback {
        order_ref,
        payment_status,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// Status pair moved.
    Applied,
    /// The stored pair already matches the callback.
    Unchanged,
    /// Transaction has left `pending`; late callbacks do not move it.
    Ignored,
}

#[derive(Clone)]
pub struct CallbackProcessor {
    store: Arc<dyn TransactionStore>,
    reconciler: Reconciler,
}

impl CallbackProcessor {
    pub fn new(store: Arc<dyn TransactionStore>, reconciler: Reconciler) -> Self {
        Self { store, reconciler }
    }

    pub async fn apply(&self, callback: &StatusCallback) -> Result<CallbackOutcome, AppError> {
        let order_ref = callback.order_ref.as_str();

        let transaction = match self.store.find_transaction(order_ref).await? {
            Some(t) => t,
            None => {
                // The gateway may call back before the orphan journal drained.
                let reconciled = if self.reconciler.reconcile_order(order_ref).await? {
                    self.store.find_transaction(order_ref).await?
                } else {
                    None
                };
                reconciled.ok_or_else(|| {
                    AppError::NotFound(anyhow::anyhow!("Transaction {} not found", order_ref))
                })?
            }
        };

        let current = StatusPair::of(&transaction);
        let next = StatusPair {
            status: callback.payment_status.fulfillment(),
            payment_status: callback.payment_status,
        };

        if current == next {
            return Ok(CallbackOutcome::Unchanged);
        }
        if current.status != FulfillmentStatus::Pending {
            tracing::info!(
                order_ref = %order_ref,
                status = %current.status,
                callback_status = %callback.payment_status,
                "Ignoring callback for settled transaction"
            );
            return Ok(CallbackOutcome::Ignored);
        }

        if self.store.transition_status(order_ref, current, next).await? {
            tracing::info!(
                order_ref = %order_ref,
                status = %next.status,
                payment_status = %next.payment_status,
                "Transaction status updated from callback"
            );
            metrics::counter!("webhook_status_updates_total", "payment_status" => next.payment_status.to_string())
                .increment(1);
            Ok(CallbackOutcome::Applied)
        } else {
            // Lost a race with a concurrent callback.
            tracing::info!(order_ref = %order_ref, "Status changed concurrently; callback ignored");
            Ok(CallbackOutcome::Ignored)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TripaySettings, XenditSettings};
    use crate::services::repository::InMemoryRepository;
    use axum::http::HeaderValue;
    use secrecy::Secret;
    use service_core::utils::signature::hmac_sha256_hex;

    fn repo() -> InMemoryRepository {
        InMemoryRepository::new()
            .with_tripay(TripaySettings {
                merchant_code: "T0001".to_string(),
                api_key: Secret::new("api".to_string()),
                private_key: Secret::new("private".to_string()),
                is_production: false,
            })
            .with_xendit(XenditSettings {
                webhook_token: Secret::new("xnd-token".to_string()),
            })
    }

    fn signed(body: &[u8], key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let sig = hmac_sha256_hex(key, body).unwrap();
        headers.insert(TRIPAY_SIGNATURE_HEADER, HeaderValue::from_str(&sig).unwrap());
        headers
    }

    #[test]
    fn provider_discriminator() {
        assert_eq!("tripay".parse::<WebhookProvider>().unwrap(), WebhookProvider::Tripay);
        assert_eq!("xendit".parse::<WebhookProvider>().unwrap(), WebhookProvider::Xendit);
        assert!(matches!(
            "midtrans".parse::<WebhookProvider>(),
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn tripay_accepts_matching_hmac() {
        let verifier = SignatureVerifier::new(Arc::new(repo()));
        let body = br#"{"merchant_ref":"MLB1","status":"PAID"}"#;
        verifier
            .verify(WebhookProvider::Tripay, &signed(body, "private"), body)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tripay_rejects_mutated_body_or_signature() {
        let verifier = SignatureVerifier::new(Arc::new(repo()));
        let body = br#"{"merchant_ref":"MLB1","status":"PAID"}"#;
        let headers = signed(body, "private");

        let tampered = br#"{"merchant_ref":"MLB1","status":"PAIX"}"#;
        assert!(matches!(
            verifier.verify(WebhookProvider::Tripay, &headers, tampered).await,
            Err(AppError::Unauthorized(_))
        ));

        assert!(matches!(
            verifier.verify(WebhookProvider::Tripay, &signed(body, "other"), body).await,
            Err(AppError::Unauthorized(_))
        ));

        assert!(matches!(
            verifier.verify(WebhookProvider::Tripay, &HeaderMap::new(), body).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn missing_configuration_is_never_unauthorized() {
        let verifier = SignatureVerifier::new(Arc::new(InMemoryRepository::new()));
        let body = b"{}";

        assert!(matches!(
            verifier.verify(WebhookProvider::Tripay, &signed(body, "private"), body).await,
            Err(AppError::NotConfigured(_))
        ));
        assert!(matches!(
            verifier.verify(WebhookProvider::Xendit, &HeaderMap::new(), body).await,
            Err(AppError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn xendit_compares_token() {
        let verifier = SignatureVerifier::new(Arc::new(repo()));
        let mut headers = HeaderMap::new();
        headers.insert(XENDIT_TOKEN_HEADER, HeaderValue::from_static("xnd-token"));
        verifier.verify(WebhookProvider::Xendit, &headers, b"{}").await.unwrap();

        headers.insert(XENDIT_TOKEN_HEADER, HeaderValue::from_static("xnd-tokem"));
        assert!(matches!(
            verifier.verify(WebhookProvider::Xendit, &headers, b"{}").await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn parses_provider_bodies() {
        let cb = parse_callback(
            WebhookProvider::Tripay,
            br#"{"reference":"T1","merchant_ref":"MLB1","status":"PAID"}"#,
        )
        .unwrap();
        assert_eq!(cb.order_ref, "MLB1");
        assert_eq!(cb.payment_status, PaymentStatus::Paid);

        let cb = parse_callback(
            WebhookProvider::Xendit,
            br#"{"id":"inv_1","external_id":"MLB2","status":"EXPIRED"}"#,
        )
        .unwrap();
        assert_eq!(cb.order_ref, "MLB2");
        assert_eq!(cb.payment_status, PaymentStatus::Expired);

        assert!(matches!(
            parse_callback(WebhookProvider::Tripay, br#"{"merchant_ref":"MLB1","status":"WAT"}"#),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            parse_callback(WebhookProvider::Xendit, b"not json"),
            Err(AppError::BadRequest(_))
        ));
    }
}
