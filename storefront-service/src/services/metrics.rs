use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use service_core::error::AppError;
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder. Call once at startup.
pub fn init_metrics() -> Result<(), AppError> {
    let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("failed to install Prometheus recorder: {}", e))
    })?;

    METRICS_HANDLE
        .set(handle)
        .map_err(|_| AppError::ConfigError(anyhow::anyhow!("metrics already initialized")))
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// Count a stored transaction by payment route.
pub fn record_transaction_created(route: &str) {
    metrics::counter!("storefront_transactions_total", "route" => route.to_string(), "outcome" => "created")
        .increment(1);
}

/// Count a creation attempt that ended in an error after validation.
pub fn record_transaction_failed(route: &str) {
    metrics::counter!("storefront_transactions_total", "route" => route.to_string(), "outcome" => "failed")
        .increment(1);
}
