//! Transaction creation and lookup.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        ApiResponse, CreateTransactionRequest, TransactionDetailResponse, TransactionResponse,
        ValidatedJson,
    },
    middleware::BuyerContext,
    models::PaymentChannel,
    startup::AppState,
};

/// Create a transaction on the bank-transfer or gateway path.
pub async fn create_transaction(
    State(state): State<AppState>,
    buyer: BuyerContext,
    ValidatedJson(payload): ValidatedJson<CreateTransactionRequest>,
) -> Result<(StatusCode, HeaderMap, Json<ApiResponse<TransactionResponse>>), AppError> {
    let input = payload.into_new_transaction(buyer.buyer_id);
    let transaction = state.orchestrator.create_transaction(input).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) =
        HeaderValue::from_str(&format!("/transactions/{}", transaction.order_ref))
    {
        headers.insert(header::LOCATION, location);
    }

    Ok((
        StatusCode::CREATED,
        headers,
        Json(ApiResponse::ok(
            "Transaksi berhasil dibuat",
            TransactionResponse::from(transaction),
        )),
    ))
}

/// Transaction detail with the receiving bank account or the gateway's
/// payment instructions.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(order_ref): Path<String>,
) -> Result<Json<ApiResponse<TransactionDetailResponse>>, AppError> {
    tracing::info!(order_ref = %order_ref, "Fetching transaction");

    let transaction = state
        .transactions
        .find_transaction(&order_ref)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

    let (bank_account, payment_instruction) = match &transaction.channel {
        PaymentChannel::BankTransfer { bank_id, .. } => {
            (state.bank_accounts.find_bank_account(bank_id).await?, None)
        }
        PaymentChannel::Gateway { pay_code, .. } => {
            let instruction = state
                .gateway
                .fetch_payment_instructions(
                    &transaction.payment_method,
                    pay_code.as_deref(),
                    transaction.amount,
                )
                .await;
            (None, instruction)
        }
    };

    Ok(Json(ApiResponse::ok(
        "Transaction retrieved",
        TransactionDetailResponse {
            transaction: TransactionResponse::from(transaction),
            bank_account,
            payment_instruction,
        },
    )))
}
