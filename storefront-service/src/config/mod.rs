use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Process-level configuration. Provider credentials are not part of it: they
/// live in the `provider_settings` collection.
#[derive(Debug, Clone, Deserialize)]
pub struct StorefrontConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub tripay: TripayConfig,
    pub fonnte: FonnteConfig,
    pub http: HttpClientConfig,
    pub storefront: StoreIdentityConfig,
    pub rate_limit: RateLimitConfig,
    pub reconciliation: ReconciliationConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: Secret<String>,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TripayConfig {
    pub production_url: String,
    pub sandbox_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FonnteConfig {
    pub api_url: String,
    pub country_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpClientConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl HttpClientConfig {
    /// Shared outbound client with bounded connect and total request time.
    pub fn build_client(&self) -> Result<reqwest::Client, AppError> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("HTTP client: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreIdentityConfig {
    /// Display name; anything after " |" is dropped in customer messages.
    pub app_name: String,
    pub app_url: String,
    /// Offset used to render local times in customer messages (WIB = +7).
    pub utc_offset_hours: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub transactions_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

impl StorefrontConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = common_config.is_production();

        Ok(StorefrontConfig {
            common: common_config,
            mongodb: MongoConfig {
                uri: Secret::new(get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?),
                database: get_env("MONGODB_DATABASE", Some("storefront_db"), is_prod)?,
            },
            tripay: TripayConfig {
                production_url: get_env(
                    "TRIPAY_PRODUCTION_URL",
                    Some("https://tripay.co.id/api/"),
                    is_prod,
                )?,
                sandbox_url: get_env(
                    "TRIPAY_SANDBOX_URL",
                    Some("https://tripay.co.id/api-sandbox/"),
                    is_prod,
                )?,
            },
            fonnte: FonnteConfig {
                api_url: get_env("FONNTE_API_URL", Some("https://api.fonnte.com/send"), is_prod)?,
                country_code: get_env("FONNTE_COUNTRY_CODE", Some("62"), is_prod)?,
            },
            http: HttpClientConfig {
                connect_timeout_secs: get_parsed("HTTP_CONNECT_TIMEOUT_SECS", 5)?,
                request_timeout_secs: get_parsed("HTTP_REQUEST_TIMEOUT_SECS", 10)?,
            },
            storefront: StoreIdentityConfig {
                app_name: get_env("APP_NAME", Some("Storefront"), is_prod)?,
                app_url: get_env("APP_URL", Some("http://localhost:8080"), is_prod)?,
                utc_offset_hours: get_parsed("APP_UTC_OFFSET_HOURS", 7)?,
            },
            rate_limit: RateLimitConfig {
                transactions_per_minute: get_parsed("TRANSACTION_RATE_LIMIT_PER_MINUTE", 10)?,
            },
            reconciliation: ReconciliationConfig {
                interval_secs: get_parsed("RECONCILIATION_INTERVAL_SECS", 60)?,
            },
            observability: ObservabilityConfig {
                log_level: env::var("LOG_LEVEL")
                    .unwrap_or_else(|_| "info,storefront_service=debug".to_string()),
                otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn get_parsed<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(val) => val.parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, val))
        }),
        Err(_) => Ok(default),
    }
}
