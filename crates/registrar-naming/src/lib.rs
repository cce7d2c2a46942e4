//! Registrar Naming - the registry core
//!
//! This crate holds the replicated lease table and everything that reads or
//! prunes it locally:
//! - `store`: lease table with tombstones and merge rules
//! - `eviction`: periodic removal of expired leases
//! - `protection`: self-preservation guard
//! - `query`: cached lookups for clients

pub mod config;
pub mod eviction;
pub mod protection;
pub mod query;
pub mod store;

pub use config::{EvictionConfig, ProtectionConfig, QueryConfig, StoreConfig};
pub use eviction::{EvictionScheduler, SweepOutcome};
pub use protection::SelfPreservationGuard;
pub use query::QueryEngine;
pub use store::{ChangeOrigin, Registration, RegistryEvent, RegistryListener, RegistryStore};
