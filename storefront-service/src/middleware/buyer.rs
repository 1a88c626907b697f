//! Buyer identity extraction.
//!
//! The fronting web tier authenticates buyers and forwards their id in the
//! `X-Buyer-ID` header. A request without it is a guest checkout.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const BUYER_ID_HEADER: &str = "X-Buyer-ID";

/// Buyer context extracted from request headers.
#[derive(Debug, Clone, Default)]
pub struct BuyerContext {
    /// `None` for guest checkout.
    pub buyer_id: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for BuyerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let buyer_id = match parts.headers.get(BUYER_ID_HEADER) {
            None => None,
            Some(value) => {
                let value = value.to_str().map_err(|_| {
                    AppError::BadRequest(anyhow::anyhow!("Invalid {} header", BUYER_ID_HEADER))
                })?;
                Some(value.trim().to_string()).filter(|v| !v.is_empty())
            }
        };

        if let Some(ref id) = buyer_id {
            tracing::Span::current().record("buyer_id", id.as_str());
        }

        Ok(BuyerContext { buyer_id })
    }
}
