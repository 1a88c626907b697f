use serde::{Deserialize, Serialize};

/// Merchant-owned account that receives bank-transfer payments.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BankAccount {
    pub bank_id: String,
    /// Display label, e.g. "BCA".
    pub label: String,
    pub account_number: String,
    pub account_name: String,
}
