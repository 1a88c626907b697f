//! Provider credential records.
//!
//! Each provider has exactly one record in `provider_settings`, addressed by a
//! fixed `_id`. That record is the active configuration; there is no "latest
//! row" selection.

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

pub const TRIPAY_SETTINGS_ID: &str = "tripay";
pub const XENDIT_SETTINGS_ID: &str = "xendit";
pub const FONNTE_SETTINGS_ID: &str = "fonnte";

/// Tripay payment gateway credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct TripaySettings {
    pub merchant_code: String,
    pub api_key: Secret<String>,
    pub private_key: Secret<String>,
    #[serde(default)]
    pub is_production: bool,
}

impl TripaySettings {
    pub fn is_complete(&self) -> bool {
        !self.merchant_code.is_empty()
            && !self.api_key.expose_secret().is_empty()
            && !self.private_key.expose_secret().is_empty()
    }
}

/// Xendit callback verification token.
#[derive(Debug, Clone, Deserialize)]
pub struct XenditSettings {
    pub webhook_token: Secret<String>,
}

/// Fonnte WhatsApp gateway credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct FonnteSettings {
    pub token: Secret<String>,
    /// Owner phone that receives system failure alerts.
    pub owner_phone: Option<String>,
}
