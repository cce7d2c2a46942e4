//! Registrar Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all Registrar components:
//! - Error types and error codes
//! - Time and key helpers
//! - Common constants

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{ErrorCode, RegistrarError, RegistrarResult};
pub use utils::{build_instance_key, current_time_ms, default_node_id};

/// Default lease duration in seconds
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 90;

/// Default expected client renewal interval in seconds
pub const DEFAULT_RENEWAL_INTERVAL_SECS: u64 = 30;

/// Default HTTP port
pub const DEFAULT_SERVER_PORT: u16 = 8761;
