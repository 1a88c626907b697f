#![allow(dead_code)]

use chrono::{Duration, Utc};
use secrecy::Secret;
use service_core::config::Config;
use std::collections::BTreeMap;
use std::sync::Arc;
use storefront_service::config::{
    FonnteConfig, HttpClientConfig, MongoConfig, ObservabilityConfig, RateLimitConfig,
    ReconciliationConfig, StoreIdentityConfig, StorefrontConfig, TripayConfig,
};
use storefront_service::models::{
    BankAccount, Customer, FonnteSettings, FulfillmentStatus, PaymentChannel, PaymentStatus,
    ProductRef, Transaction, TripaySettings, XenditSettings,
};
use storefront_service::services::repository::TransactionStore;
use storefront_service::services::InMemoryRepository;
use storefront_service::startup::Application;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TRIPAY_PRIVATE_KEY: &str = "test-private-key";
pub const XENDIT_TOKEN: &str = "test-xendit-token";

pub struct TestApp {
    pub address: String,
    pub repository: Arc<InMemoryRepository>,
    pub tripay_server: MockServer,
    pub fonnte_server: MockServer,
    pub client: reqwest::Client,
}

pub fn tripay_settings() -> TripaySettings {
    TripaySettings {
        merchant_code: "T0001".to_string(),
        api_key: Secret::new("test-api-key".to_string()),
        private_key: Secret::new(TRIPAY_PRIVATE_KEY.to_string()),
        is_production: false,
    }
}

pub fn bank_account() -> BankAccount {
    BankAccount {
        bank_id: "B1".to_string(),
        label: "BCA".to_string(),
        account_number: "1234567890".to_string(),
        account_name: "PT Toko Digital".to_string(),
    }
}

/// Store with every provider configured and one bank account.
pub fn configured_repository() -> InMemoryRepository {
    InMemoryRepository::new()
        .with_bank_account(bank_account())
        .with_tripay(tripay_settings())
        .with_xendit(XenditSettings {
            webhook_token: Secret::new(XENDIT_TOKEN.to_string()),
        })
        .with_fonnte(FonnteSettings {
            token: Secret::new("test-fonnte-token".to_string()),
            owner_phone: Some("6281111111111".to_string()),
        })
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(configured_repository(), 1000).await
    }

    pub async fn spawn_with(repository: InMemoryRepository, transactions_per_minute: u32) -> Self {
        let (app, test_app) = Self::build(repository, transactions_per_minute).await;
        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });
        test_app.wait_until_up().await;
        test_app
    }

    /// Spawn an app that stops when the returned sender fires. The handle
    /// resolves once shutdown has finished.
    pub async fn spawn_with_shutdown() -> (Self, oneshot::Sender<()>, JoinHandle<std::io::Result<()>>) {
        let (app, test_app) = Self::build(configured_repository(), 1000).await;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(app.run_until(async move {
            stop_rx.await.ok();
        }));
        test_app.wait_until_up().await;
        (test_app, stop_tx, server)
    }

    async fn build(repository: InMemoryRepository, transactions_per_minute: u32) -> (Application, Self) {
        let tripay_server = MockServer::start().await;
        let fonnte_server = MockServer::start().await;

        let config = StorefrontConfig {
            common: Config {
                port: 0,
                environment: "test".to_string(),
            },
            mongodb: MongoConfig {
                uri: Secret::new("mongodb://unused".to_string()),
                database: "unused".to_string(),
            },
            tripay: TripayConfig {
                production_url: "http://127.0.0.1:9/api/".to_string(),
                sandbox_url: format!("{}/api-sandbox/", tripay_server.uri()),
            },
            fonnte: FonnteConfig {
                api_url: format!("{}/send", fonnte_server.uri()),
                country_code: "62".to_string(),
            },
            http: HttpClientConfig {
                connect_timeout_secs: 2,
                request_timeout_secs: 5,
            },
            storefront: StoreIdentityConfig {
                app_name: "Topup Test | Storefront".to_string(),
                app_url: "http://storefront.test".to_string(),
                utc_offset_hours: 7,
            },
            rate_limit: RateLimitConfig {
                transactions_per_minute,
            },
            reconciliation: ReconciliationConfig {
                interval_secs: 3600,
            },
            observability: ObservabilityConfig {
                log_level: "error".to_string(),
                otlp_endpoint: None,
            },
        };

        let repository = Arc::new(repository);
        let app = Application::build_with_repository(config, repository.clone())
            .await
            .expect("Failed to build test application");

        let test_app = TestApp {
            address: format!("http://127.0.0.1:{}", app.port()),
            repository,
            tripay_server,
            fonnte_server,
            client: reqwest::Client::new(),
        };
        (app, test_app)
    }

    async fn wait_until_up(&self) {
        let health_url = format!("{}/health", self.address);
        for _ in 0..50 {
            if self.client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    pub async fn post_transaction(&self, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/transactions", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_transaction(&self, order_ref: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/transactions/{}", self.address, order_ref))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_webhook(
        &self,
        provider: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> reqwest::Response {
        let mut request = self
            .client
            .post(format!("{}/webhooks/{}", self.address, provider))
            .header("content-type", "application/json")
            .body(body.to_vec());
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.send().await.expect("Failed to execute request")
    }

    /// Fonnte answers every send with success.
    pub async fn mount_fonnte_ok(&self) {
        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": true })),
            )
            .mount(&self.fonnte_server)
            .await;
    }

    pub async fn mount_tripay_create(&self, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/api-sandbox/transaction/create"))
            .respond_with(response)
            .mount(&self.tripay_server)
            .await;
    }

    /// Wait until Fonnte has seen at least `count` requests, or give up after
    /// two seconds. Returns what was received.
    pub async fn wait_for_fonnte(&self, count: usize) -> Vec<wiremock::Request> {
        for _ in 0..40 {
            let received = self
                .fonnte_server
                .received_requests()
                .await
                .unwrap_or_default();
            if received.len() >= count {
                return received;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        self.fonnte_server
            .received_requests()
            .await
            .unwrap_or_default()
    }

    pub async fn stored(&self, order_ref: &str) -> Option<Transaction> {
        self.repository
            .find_transaction(order_ref)
            .await
            .expect("store lookup failed")
    }
}

pub fn bank_transfer_body() -> serde_json::Value {
    serde_json::json!({
        "user_id": "12345",
        "server_id": "2001",
        "amount": 10000,
        "customer_name": "Budi",
        "email_customer": "budi@example.com",
        "phone_number": "081234567890",
        "product_code": "ML86",
        "product_name": "86 Diamonds",
        "product_brand": "Mobile Legends",
        "product_price": 10000,
        "values": { "server_id": "2001" },
        "unique_code": 99,
        "bankID": "B1"
    })
}

pub fn gateway_body() -> serde_json::Value {
    let mut body = bank_transfer_body();
    let map = body.as_object_mut().expect("object body");
    map.remove("unique_code");
    map.remove("bankID");
    map.insert("method_code".to_string(), serde_json::json!("QRIS"));
    body
}

pub fn tripay_success(status: &str, total_fee: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "success": true,
        "message": "",
        "data": {
            "reference": "T0001000123",
            "merchant_ref": "ignored-by-client",
            "payment_method": "QRIS",
            "payment_name": "QRIS by ShopeePay",
            "amount": 10000 + total_fee,
            "total_fee": total_fee,
            "status": status,
            "expired_time": (Utc::now() + Duration::hours(1)).timestamp(),
            "qr_string": "00020101021226",
            "qr_url": "https://tripay.test/qr/T0001000123",
            "order_items": [{ "sku": "ML86", "name": "86 Diamonds", "price": 10000, "quantity": 1 }]
        }
    }))
}

/// A pending gateway transaction as it would be stored after creation.
pub fn pending_gateway_transaction(order_ref: &str) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: Uuid::new_v4(),
        order_ref: order_ref.to_string(),
        user_id: "12345".to_string(),
        server_id: "2001".to_string(),
        buyer_id: None,
        username: "Guest".to_string(),
        customer: Customer {
            name: "Budi".to_string(),
            email: "budi@example.com".to_string(),
            phone: "081234567890".to_string(),
        },
        product: ProductRef {
            code: "ML86".to_string(),
            name: "86 Diamonds".to_string(),
            brand: "Mobile Legends".to_string(),
            price: 10000,
        },
        amount: 10500,
        fee: 500,
        values: BTreeMap::new(),
        payment_method: "QRIS".to_string(),
        payment_name: "QRIS".to_string(),
        channel: PaymentChannel::Gateway {
            reference: "T0001000123".to_string(),
            pay_code: None,
            qr_string: Some("00020101021226".to_string()),
            qr_url: None,
        },
        status: FulfillmentStatus::Pending,
        payment_status: PaymentStatus::Unpaid,
        expired_time: now + Duration::hours(1),
        created_at: now,
        updated_at: now,
    }
}
