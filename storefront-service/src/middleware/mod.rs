pub mod buyer;
pub mod webhook;

pub use buyer::BuyerContext;
pub use webhook::verify_webhook_signature;
