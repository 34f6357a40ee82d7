//! Configuration store for notify-guard
//!
//! Holds the rate-limit and retry policy rows the resolvers read on every
//! send. Two backends are provided:
//! - `InMemoryConfigStore` for tests and single-process runs
//! - `SqliteConfigStore` for durable deployments

pub mod seed;
pub mod sqlite_store;
pub mod store;

pub use seed::{default_rate_limit_configs, default_retry_policies, seed_defaults};
pub use sqlite_store::SqliteConfigStore;
pub use store::{ConfigStore, InMemoryConfigStore, StoreError};
