//! Webhook authentication.
//!
//! Runs as a route layer on `/webhooks/:provider`. The provider is resolved
//! first, then the raw body is buffered up to [`MAX_WEBHOOK_BODY_BYTES`] and
//! checked, and only a verified request reaches the handler. The resolved [`WebhookProvider`] is passed on
//! as a request extension.

use crate::services::webhook::WebhookProvider;
use crate::startup::AppState;
use axum::{
    body::Body,
    extract::{Path, Request, State},
    middleware::Next,
    response::Response,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use service_core::error::AppError;

/// Provider callbacks are a few hundred bytes of JSON.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 64 * 1024;

pub async fn verify_webhook_signature(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provider: WebhookProvider = provider.parse()?;

    let (mut parts, body) = request.into_parts();
    let bytes = Limited::new(body, MAX_WEBHOOK_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                tracing::warn!(provider = %provider, "Webhook body exceeds size limit");
                AppError::PayloadTooLarge("Request body too large".to_string())
            } else {
                AppError::BadRequest(anyhow::anyhow!("Failed to read body: {}", e))
            }
        })?
        .to_bytes();

    state
        .verifier
        .verify(provider, &parts.headers, &bytes)
        .await?;

    tracing::debug!(provider = %provider, "Webhook verified");

    parts.extensions.insert(provider);
    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}
