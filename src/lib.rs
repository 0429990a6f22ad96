pub mod access_token;
pub mod checkout;
pub mod config;
pub mod database;
pub mod error;
pub mod paymongo;
pub mod provider;
pub mod reconcile;
pub mod routes;
pub mod store;
pub mod transaction;
pub mod webhook;

pub use error::{GatewayError, Result};
pub use provider::{PaymentProviderStrategy, PayMongoProvider, ProviderRegistry};
pub use routes::{router, AppState};
pub use store::{InMemoryStore, TransactionStore};
pub use transaction::{Currency, Transaction, TransactionState};
