pub mod metrics;
pub mod notification;
pub mod orchestrator;
pub mod reconciler;
pub mod repository;
pub mod tripay;
pub mod webhook;

pub use metrics::{get_metrics, init_metrics};
pub use notification::{FonnteClient, MessageFormatter, NotificationDispatcher, NotificationSender};
pub use orchestrator::{NewTransaction, TransactionOrchestrator};
pub use reconciler::Reconciler;
pub use repository::{InMemoryRepository, MongoRepository, Repository};
pub use tripay::TripayClient;
pub use webhook::{CallbackProcessor, SignatureVerifier, WebhookProvider};
