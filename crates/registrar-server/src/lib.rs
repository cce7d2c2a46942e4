//! Registrar server
//!
//! Wires a `RegistryNode` to its HTTP interface, configuration, logging,
//! metrics and shutdown handling.

pub mod api;
pub mod metrics;
pub mod model;
pub mod startup;
