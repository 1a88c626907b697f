pub mod metrics;
pub mod rate_limit;

pub use metrics::metrics_middleware;
pub use rate_limit::{IpRateLimiter, create_ip_rate_limiter, ip_rate_limit_middleware};
