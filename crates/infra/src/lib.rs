//! Infrastructure layer: configuration and persistence.
//!
//! Domain crates stay free of IO; everything that touches the environment or
//! a database lives here. The API crate depends on the [`store::Store`]
//! boundary and picks an implementation at startup:
//!
//! - [`store::InMemoryStore`] for development and tests
//! - `store::PostgresStore` (feature `postgres`) for production

pub mod config;
pub mod store;

pub use config::{AppConfig, ConfigError, Environment};
pub use store::{
    Acceptance, InMemoryStore, PurchaseReceipt, PurchaseRequest, Refund, Store, StoreError,
    StoreResult,
};

#[cfg(feature = "postgres")]
pub use store::PostgresStore;
