//! Application startup and lifecycle management.

use crate::config::StorefrontConfig;
use crate::handlers;
use crate::middleware::verify_webhook_signature;
use crate::services::repository::{
    BankAccountStore, MongoRepository, Repository, SettingsStore, TransactionStore,
};
use crate::services::{
    CallbackProcessor, FonnteClient, MessageFormatter, NotificationDispatcher,
    NotificationSender, Reconciler, SignatureVerifier, TransactionOrchestrator, TripayClient,
};
use axum::{
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    create_ip_rate_limiter, ip_rate_limit_middleware, metrics_middleware, IpRateLimiter,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// How long shutdown waits for queued notifications to be sent.
const NOTIFICATION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: TransactionOrchestrator,
    pub transactions: Arc<dyn TransactionStore>,
    pub bank_accounts: Arc<dyn BankAccountStore>,
    pub gateway: TripayClient,
    pub verifier: SignatureVerifier,
    pub callbacks: CallbackProcessor,
    pub rate_limiter: IpRateLimiter,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    notification_worker: JoinHandle<()>,
    reconciler: JoinHandle<()>,
}

impl Application {
    /// Build the application against MongoDB.
    pub async fn build(config: StorefrontConfig) -> Result<Self, AppError> {
        let mut client_options = ClientOptions::parse(config.mongodb.uri.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!("Failed to parse MongoDB connection string: {}", e);
                AppError::DatabaseError(e.into())
            })?;
        client_options.app_name = Some("storefront-service".to_string());

        let client = Client::with_options(client_options).map_err(|e| {
            tracing::error!("Failed to create MongoDB client: {}", e);
            AppError::DatabaseError(e.into())
        })?;
        let db = client.database(&config.mongodb.database);

        let repository = MongoRepository::new(&db);
        repository.init_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            AppError::from(e)
        })?;

        Self::build_with_repository(config, Arc::new(repository)).await
    }

    /// Build the application on any storage backend.
    pub async fn build_with_repository<R: Repository>(
        config: StorefrontConfig,
        repository: Arc<R>,
    ) -> Result<Self, AppError> {
        let http = config.http.build_client()?;

        let settings: Arc<dyn SettingsStore> = repository.clone();
        let transactions: Arc<dyn TransactionStore> = repository.clone();
        let bank_accounts: Arc<dyn BankAccountStore> = repository;

        let gateway = TripayClient::new(http.clone(), config.tripay.clone(), settings.clone());

        let sender = NotificationSender::new(
            FonnteClient::new(http, config.fonnte.clone(), settings.clone()),
            MessageFormatter::new(config.storefront.clone()),
            settings.clone(),
        );
        let (notifier, notification_worker) = NotificationDispatcher::spawn(sender);

        let reconciler = Reconciler::new(transactions.clone());
        let reconciler_task = reconciler
            .clone()
            .spawn(Duration::from_secs(config.reconciliation.interval_secs.max(1)));

        let orchestrator = TransactionOrchestrator::new(
            transactions.clone(),
            bank_accounts.clone(),
            gateway.clone(),
            notifier,
        );

        let state = AppState {
            orchestrator,
            transactions: transactions.clone(),
            bank_accounts,
            gateway,
            verifier: SignatureVerifier::new(settings),
            callbacks: CallbackProcessor::new(transactions, reconciler),
            rate_limiter: create_ip_rate_limiter(config.rate_limit.transactions_per_minute, 60),
        };

        let router = build_router(state, &config);

        // Port 0 binds a random port for tests.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, "Storefront service bound");

        Ok(Self {
            port,
            listener,
            router,
            notification_worker,
            reconciler: reconciler_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until SIGINT/SIGTERM.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves. In-flight requests finish first, then
    /// the reconciler stops and the notification queue drains.
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let result = axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        self.reconciler.abort();

        // The router owned every queue handle, so the worker exits once the
        // remaining jobs are sent.
        match tokio::time::timeout(NOTIFICATION_DRAIN_TIMEOUT, self.notification_worker).await {
            Ok(Ok(())) => tracing::info!("Notification queue drained"),
            Ok(Err(e)) => tracing::error!(error = %e, "Notification worker failed"),
            Err(_) => tracing::warn!(
                timeout_secs = NOTIFICATION_DRAIN_TIMEOUT.as_secs(),
                "Notification queue not drained before shutdown"
            ),
        }

        result
    }
}

pub fn build_router(state: AppState, config: &StorefrontConfig) -> Router {
    let rate_limited = Router::new()
        .route(
            "/transactions",
            post(handlers::transactions::create_transaction),
        )
        .route_layer(from_fn_with_state(
            state.rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let webhooks = Router::new()
        .route(
            "/webhooks/:provider",
            post(handlers::webhooks::handle_callback),
        )
        .route_layer(from_fn_with_state(state.clone(), verify_webhook_signature));

    let origin = match config
        .storefront
        .app_url
        .trim_end_matches('/')
        .parse::<HeaderValue>()
    {
        Ok(value) => AllowOrigin::exact(value),
        Err(e) => {
            tracing::error!("Invalid CORS origin '{}': {}. Allowing any origin.", config.storefront.app_url, e);
            AllowOrigin::any()
        }
    };

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/transactions/:order_ref",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/bank-accounts",
            get(handlers::bank_accounts::list_bank_accounts),
        )
        .merge(rate_limited)
        .merge(webhooks)
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    buyer_id = tracing::field::Empty,
                )
            }),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    HeaderName::from_static("x-buyer-id"),
                ]),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
