pub mod bank_account;
pub mod settings;
pub mod transaction;

pub use bank_account::BankAccount;
pub use settings::{FonnteSettings, TripaySettings, XenditSettings};
pub use transaction::{
    Customer, FulfillmentStatus, OrphanedGatewayTransaction, PaymentChannel, PaymentStatus,
    ProductRef, Transaction,
};
