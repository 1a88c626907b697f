use service_core::error::AppError;
use service_core::observability::init_tracing;
use storefront_service::{config::StorefrontConfig, services::init_metrics, Application};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = StorefrontConfig::load()?;

    init_tracing(
        "storefront-service",
        &config.observability.log_level,
        config.observability.otlp_endpoint.as_deref(),
    )?;
    init_metrics()?;

    tracing::info!(
        environment = %config.common.environment,
        port = config.common.port,
        "Starting storefront service"
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}
