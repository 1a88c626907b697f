use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{dtos::ApiResponse, models::BankAccount, startup::AppState};

/// Bank accounts available for bank-transfer checkout.
pub async fn list_bank_accounts(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<BankAccount>>>, AppError> {
    let accounts = state.bank_accounts.list_bank_accounts().await?;
    Ok(Json(ApiResponse::ok("Bank accounts retrieved", accounts)))
}
