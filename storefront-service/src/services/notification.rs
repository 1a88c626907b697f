//! WhatsApp notifications through Fonnte.
//!
//! Sending never fails the caller: every error is logged and reported as
//! `false`. Creation paths hand jobs to [`NotificationDispatcher`], which runs
//! them on its own task so a slow or panicking send cannot reach the request.

use crate::config::{FonnteConfig, StoreIdentityConfig};
use crate::models::Transaction;
use crate::services::repository::SettingsStore;
use chrono::{FixedOffset, Locale};
use futures::FutureExt;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification channel not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Message error: {0}")]
    Message(String),
}

#[derive(Debug, Clone)]
pub struct WhatsAppMessage {
    pub to: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
struct FonnteRequest<'a> {
    target: &'a str,
    message: &'a str,
    #[serde(rename = "countryCode")]
    country_code: &'a str,
}

#[derive(Debug, Deserialize)]
struct FonnteResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Fonnte WhatsApp API client. The token is read from the `fonnte` settings
/// record on every send.
#[derive(Clone)]
pub struct FonnteClient {
    client: Client,
    config: FonnteConfig,
    settings: Arc<dyn SettingsStore>,
}

impl FonnteClient {
    pub fn new(client: Client, config: FonnteConfig, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            client,
            config,
            settings,
        }
    }

    pub async fn send(&self, message: &WhatsAppMessage) -> Result<(), NotificationError> {
        if message.to.is_empty() {
            return Err(NotificationError::InvalidRecipient(
                "Phone number is empty".to_string(),
            ));
        }

        let settings = self
            .settings
            .fonnte_settings()
            .await
            .map_err(|e| NotificationError::NotConfigured(e.to_string()))?
            .filter(|s| !s.token.expose_secret().is_empty())
            .ok_or_else(|| NotificationError::NotConfigured("fonnte".to_string()))?;

        let request = FonnteRequest {
            target: &message.to,
            message: &message.body,
            country_code: &self.config.country_code,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", settings.token.expose_secret().as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| NotificationError::Connection(format!("Failed to reach Fonnte: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::SendFailed(format!(
                "Fonnte returned {}: {}",
                status, body
            )));
        }

        // Fonnte answers 200 with `status: false` for rejected targets.
        let body: FonnteResponse = response.json().await.map_err(|e| {
            NotificationError::SendFailed(format!("Failed to parse Fonnte response: {}", e))
        })?;
        if !body.status {
            return Err(NotificationError::SendFailed(
                body.reason.unwrap_or_else(|| "rejected".to_string()),
            ));
        }

        Ok(())
    }
}

/// Renders customer and owner messages.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    identity: StoreIdentityConfig,
}

impl MessageFormatter {
    pub fn new(identity: StoreIdentityConfig) -> Self {
        Self { identity }
    }

    fn short_app_name(&self) -> &str {
        self.identity
            .app_name
            .split(" |")
            .next()
            .unwrap_or(&self.identity.app_name)
    }

    pub fn invoice(&self, transaction: &Transaction) -> Result<String, NotificationError> {
        let offset = FixedOffset::east_opt(self.identity.utc_offset_hours * 3600).ok_or_else(|| {
            NotificationError::Message(format!(
                "Invalid UTC offset: {}",
                self.identity.utc_offset_hours
            ))
        })?;
        let deadline = transaction
            .expired_time
            .with_timezone(&offset)
            .format_localized("%d %B %Y, %H:%M:%S", Locale::id_ID)
            .to_string();

        let mut lines = vec![
            format!("Halo {},", transaction.username),
            String::new(),
            "Terima kasih telah melakukan transaksi. Berikut adalah detail transaksi Anda:".to_string(),
            String::new(),
            format!("ID Transaksi: *{}*", transaction.order_ref),
            format!("Status: *{}*", capitalize(&transaction.status.to_string())),
        ];

        if !transaction.values.is_empty() {
            lines.push(String::new());
            lines.extend(
                transaction
                    .values
                    .iter()
                    .map(|(key, value)| format!("{}: {}", title_case(key), value)),
            );
        }

        lines.push(String::new());
        lines.push(format!("Produk: *{}*", transaction.product.name.to_uppercase()));
        lines.push(format!("Brand: *{}*", transaction.product.brand.to_uppercase()));
        lines.push(format!("Harga: *Rp{}*", rupiah(transaction.product.price)));

        if transaction.fee > 0 {
            lines.push(format!("Biaya Admin: *Rp{}*", rupiah(transaction.fee)));
        }
        if let Some(code) = transaction.unique_code().filter(|c| *c != 0) {
            lines.push(format!("Kode Unik: *{}*", code));
        }

        lines.push(String::new());
        lines.push(format!(
            "*Total Pembayaran: Rp{}*",
            rupiah(transaction.total_payable())
        ));
        lines.push(format!("Metode Pembayaran: *{}*", transaction.payment_name));
        if let Some(pay_code) = transaction.pay_code() {
            lines.push(format!("Kode Pembayaran: *{}*", pay_code));
        }

        lines.extend([
            String::new(),
            format!("Batas Waktu: *{}*", deadline),
            String::new(),
            format!(
                "Detail: {}/transaction/{}",
                self.identity.app_url.trim_end_matches('/'),
                transaction.order_ref
            ),
            String::new(),
            "Jika ada pertanyaan, silakan hubungi kami.".to_string(),
            String::new(),
            "Terima kasih,".to_string(),
            self.short_app_name().to_string(),
        ]);

        let msg = lines.join("\n");
        Ok(msg)
    }

    pub fn owner_alert(&self, error: &str) -> String {
        format!(
            "Halo Admin,\n\nAda kegagalan sistem:\n\n{}\n\nMohon segera ditindaklanjuti.\n\n- System {}",
            error, self.identity.app_name
        )
    }
}

/// `1500000` -> `1.500.000`
pub fn rupiah(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `server_id` -> `Server Id`
fn title_case(key: &str) -> String {
    key.replace('_', " ")
        .split(' ')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats and sends notifications. Every method reports success as a bool.
#[derive(Clone)]
pub struct NotificationSender {
    fonnte: FonnteClient,
    formatter: MessageFormatter,
    settings: Arc<dyn SettingsStore>,
}

impl NotificationSender {
    pub fn new(
        fonnte: FonnteClient,
        formatter: MessageFormatter,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            fonnte,
            formatter,
            settings,
        }
    }

    pub async fn send_transaction_notice(&self, transaction: &Transaction) -> bool {
        if transaction.customer.phone.is_empty() {
            tracing::debug!(order_ref = %transaction.order_ref, "No phone number, skipping notice");
            return false;
        }

        let body = match self.formatter.invoice(transaction) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(order_ref = %transaction.order_ref, error = %e, "Failed to build invoice message");
                return false;
            }
        };

        let message = WhatsAppMessage {
            to: transaction.customer.phone.clone(),
            body,
        };
        match self.fonnte.send(&message).await {
            Ok(()) => {
                tracing::info!(order_ref = %transaction.order_ref, "Transaction notice sent");
                metrics::counter!("notifications_total", "kind" => "notice", "outcome" => "sent")
                    .increment(1);
                true
            }
            Err(e) => {
                tracing::error!(order_ref = %transaction.order_ref, error = %e, "Transaction notice failed");
                metrics::counter!("notifications_total", "kind" => "notice", "outcome" => "failed")
                    .increment(1);
                false
            }
        }
    }

    pub async fn send_owner_alert(&self, error: &str) -> bool {
        let owner_phone = match self.settings.fonnte_settings().await {
            Ok(Some(settings)) => settings.owner_phone.filter(|p| !p.is_empty()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load notification settings");
                None
            }
        };
        let Some(to) = owner_phone else {
            tracing::debug!("No owner phone configured, skipping alert");
            return false;
        };

        let message = WhatsAppMessage {
            to,
            body: self.formatter.owner_alert(error),
        };
        match self.fonnte.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Owner alert failed");
                false
            }
        }
    }
}

#[derive(Debug)]
pub enum NotificationJob {
    TransactionNotice(Box<Transaction>),
    OwnerAlert(String),
}

/// Queue in front of [`NotificationSender`]. Enqueueing never waits; a full
/// queue drops the job with a warning.
#[derive(Clone)]
pub struct NotificationDispatcher {
    queue: mpsc::Sender<NotificationJob>,
}

impl NotificationDispatcher {
    pub fn spawn(sender: NotificationSender) -> (Self, JoinHandle<()>) {
        let (queue, mut jobs) = mpsc::channel::<NotificationJob>(QUEUE_CAPACITY);

        let worker = tokio::spawn(async move {
            while let Some(job) = jobs.recv().await {
                let outcome = AssertUnwindSafe(run_job(&sender, &job)).catch_unwind().await;
                if outcome.is_err() {
                    tracing::error!(job = ?job, "Notification job panicked");
                }
            }
            tracing::info!("Notification worker stopped");
        });

        (Self { queue }, worker)
    }

    pub fn enqueue(&self, job: NotificationJob) {
        if let Err(e) = self.queue.try_send(job) {
            tracing::warn!(error = %e, "Dropping notification job");
        }
    }
}

async fn run_job(sender: &NotificationSender, job: &NotificationJob) -> bool {
    match job {
        NotificationJob::TransactionNotice(transaction) => {
            sender.send_transaction_notice(transaction).await
        }
        NotificationJob::OwnerAlert(error) => sender.send_owner_alert(error).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Customer, FonnteSettings, FulfillmentStatus, PaymentChannel, PaymentStatus, ProductRef,
    };
    use crate::services::repository::InMemoryRepository;
    use chrono::{TimeZone, Utc};
    use secrecy::Secret;
    use std::collections::BTreeMap;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn identity(offset: i32) -> StoreIdentityConfig {
        StoreIdentityConfig {
            app_name: "Topup Murah | Termurah se-Indonesia".to_string(),
            app_url: "https://topup.example".to_string(),
            utc_offset_hours: offset,
        }
    }

    fn transaction(channel: PaymentChannel, fee: i64) -> Transaction {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 3, 4, 5).unwrap();
        let mut values = BTreeMap::new();
        values.insert("server_id".to_string(), "2001".to_string());
        Transaction {
            id: Uuid::new_v4(),
            order_ref: "MLB20261016030405ABCDEF".to_string(),
            user_id: "12345".to_string(),
            server_id: "2001".to_string(),
            buyer_id: None,
            username: "Budi".to_string(),
            customer: Customer {
                name: "Budi".to_string(),
                email: "budi@example.com".to_string(),
                phone: "081234567890".to_string(),
            },
            product: ProductRef {
                code: "ML86".to_string(),
                name: "86 Diamonds".to_string(),
                brand: "Mobile Legends".to_string(),
                price: 1500000,
            },
            amount: 1500000,
            fee,
            values,
            payment_method: "BCA".to_string(),
            payment_name: "Transfer BCA".to_string(),
            channel,
            status: FulfillmentStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            expired_time: at,
            created_at: at,
            updated_at: at,
        }
    }

    fn bank_channel() -> PaymentChannel {
        PaymentChannel::BankTransfer {
            bank_id: "B1".to_string(),
            account_number: "1234567890".to_string(),
            unique_code: 99,
        }
    }

    fn sender(server: &MockServer, repo: InMemoryRepository, offset: i32) -> NotificationSender {
        let settings: Arc<dyn SettingsStore> = Arc::new(repo);
        let fonnte = FonnteClient::new(
            Client::new(),
            FonnteConfig {
                api_url: format!("{}/send", server.uri()),
                country_code: "62".to_string(),
            },
            settings.clone(),
        );
        NotificationSender::new(fonnte, MessageFormatter::new(identity(offset)), settings)
    }

    fn fonnte_settings() -> FonnteSettings {
        FonnteSettings {
            token: Secret::new("fonnte-token".to_string()),
            owner_phone: Some("6281111111111".to_string()),
        }
    }

    #[test]
    fn rupiah_groups_thousands_with_dots() {
        assert_eq!(rupiah(0), "0");
        assert_eq!(rupiah(999), "999");
        assert_eq!(rupiah(10000), "10.000");
        assert_eq!(rupiah(1500000), "1.500.000");
    }

    #[test]
    fn title_case_replaces_underscores() {
        assert_eq!(title_case("server_id"), "Server Id");
        assert_eq!(title_case("zone"), "Zone");
    }

    #[test]
    fn invoice_contains_bank_transfer_lines() {
        let formatter = MessageFormatter::new(identity(7));
        let msg = formatter.invoice(&transaction(bank_channel(), 0)).unwrap();

        assert!(msg.starts_with("Halo Budi,\n\n"));
        assert!(msg.contains("ID Transaksi: *MLB20261016030405ABCDEF*\n"));
        assert!(msg.contains("Status: *Pending*\n"));
        assert!(msg.contains("Server Id: 2001\n"));
        assert!(msg.contains("Produk: *86 DIAMONDS*\n"));
        assert!(msg.contains("Brand: *MOBILE LEGENDS*\n"));
        assert!(msg.contains("Harga: *Rp1.500.000*\n"));
        assert!(!msg.contains("Biaya Admin"));
        assert!(msg.contains("Kode Unik: *99*\n"));
        assert!(msg.contains("*Total Pembayaran: Rp1.500.099*\n"));
        assert!(!msg.contains("Kode Pembayaran"));
        assert!(msg.contains("Batas Waktu: *16 Oktober 2026, 10:04:05*\n"));
        assert!(msg.contains("Detail: https://topup.example/transaction/MLB20261016030405ABCDEF\n"));
        assert!(msg.ends_with("Terima kasih,\nTopup Murah"));
    }

    #[test]
    fn invoice_sections_are_separated_by_blank_lines() {
        let formatter = MessageFormatter::new(identity(7));
        let msg = formatter.invoice(&transaction(bank_channel(), 0)).unwrap();

        let expected = "Halo Budi,\n\n\
            Terima kasih telah melakukan transaksi. Berikut adalah detail transaksi Anda:\n\n\
            ID Transaksi: *MLB20261016030405ABCDEF*\n\
            Status: *Pending*\n\n\
            Server Id: 2001\n\n\
            Produk: *86 DIAMONDS*\n\
            Brand: *MOBILE LEGENDS*\n\
            Harga: *Rp1.500.000*\n\
            Kode Unik: *99*\n\n\
            *Total Pembayaran: Rp1.500.099*\n\
            Metode Pembayaran: *Transfer BCA*\n\n\
            Batas Waktu: *16 Oktober 2026, 10:04:05*\n\n\
            Detail: https://topup.example/transaction/MLB20261016030405ABCDEF\n\n\
            Jika ada pertanyaan, silakan hubungi kami.\n\n\
            Terima kasih,\nTopup Murah";
        assert_eq!(msg, expected);
    }

    #[test]
    fn invoice_contains_gateway_lines() {
        let formatter = MessageFormatter::new(identity(7));
        let channel = PaymentChannel::Gateway {
            reference: "T0001".to_string(),
            pay_code: Some("8277012345".to_string()),
            qr_string: None,
            qr_url: None,
        };
        let msg = formatter.invoice(&transaction(channel, 4250)).unwrap();

        assert!(msg.contains("Biaya Admin: *Rp4.250*\n"));
        assert!(!msg.contains("Kode Unik"));
        assert!(msg.contains("*Total Pembayaran: Rp1.504.250*\n"));
        assert!(msg.contains("Kode Pembayaran: *8277012345*\n"));
    }

    #[tokio::test]
    async fn empty_phone_skips_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let sender = sender(&server, InMemoryRepository::new().with_fonnte(fonnte_settings()), 7);
        let mut tx = transaction(bank_channel(), 0);
        tx.customer.phone.clear();

        assert!(!sender.send_transaction_notice(&tx).await);
    }

    #[tokio::test]
    async fn invalid_offset_reports_false_without_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let sender = sender(&server, InMemoryRepository::new().with_fonnte(fonnte_settings()), 99);
        assert!(!sender.send_transaction_notice(&transaction(bank_channel(), 0)).await);
    }

    #[tokio::test]
    async fn notice_posts_to_fonnte_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Authorization", "fonnte-token"))
            .and(body_partial_json(serde_json::json!({
                "target": "081234567890",
                "countryCode": "62"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": true })))
            .expect(1)
            .mount(&server)
            .await;

        let sender = sender(&server, InMemoryRepository::new().with_fonnte(fonnte_settings()), 7);
        assert!(sender.send_transaction_notice(&transaction(bank_channel(), 0)).await);
    }

    #[tokio::test]
    async fn provider_errors_are_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sender = sender(&server, InMemoryRepository::new().with_fonnte(fonnte_settings()), 7);
        assert!(!sender.send_transaction_notice(&transaction(bank_channel(), 0)).await);

        let unconfigured = sender_without_settings(&server);
        assert!(!unconfigured.send_transaction_notice(&transaction(bank_channel(), 0)).await);
    }

    fn sender_without_settings(server: &MockServer) -> NotificationSender {
        sender(server, InMemoryRepository::new(), 7)
    }

    #[tokio::test]
    async fn owner_alert_goes_to_owner_phone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "target": "6281111111111" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": true })))
            .expect(1)
            .mount(&server)
            .await;

        let sender = sender(&server, InMemoryRepository::new().with_fonnte(fonnte_settings()), 7);
        assert!(sender.send_owner_alert("Tripay unreachable").await);
    }
}
