//! Payment provider callbacks. Authentication happens in
//! [`crate::middleware::verify_webhook_signature`] before these run.

use axum::{body::Bytes, extract::State, Extension, Json};
use serde::Serialize;
use service_core::error::AppError;

use crate::{
    dtos::ApiResponse,
    services::webhook::{parse_callback, CallbackOutcome, WebhookProvider},
    startup::AppState,
};

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub order_ref: String,
    pub outcome: CallbackOutcome,
}

pub async fn handle_callback(
    State(state): State<AppState>,
    Extension(provider): Extension<WebhookProvider>,
    body: Bytes,
) -> Result<Json<ApiResponse<CallbackResponse>>, AppError> {
    let callback = parse_callback(provider, &body)?;

    tracing::info!(
        provider = %provider,
        order_ref = %callback.order_ref,
        payment_status = %callback.payment_status,
        "Processing payment callback"
    );

    let outcome = state.callbacks.apply(&callback).await?;

    Ok(Json(ApiResponse::ok(
        "Callback processed",
        CallbackResponse {
            order_ref: callback.order_ref,
            outcome,
        },
    )))
}
