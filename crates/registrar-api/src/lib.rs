//! Registrar API - wire models shared by clients, the registry core and peers
//!
//! This crate provides:
//! - Lease, tombstone and replication record models
//! - Request and response bodies of the HTTP interface
//! - Boundary input validation

pub mod model;
pub mod validation;

pub use model::{
    Lease, LeaseStatus, NodeHealth, NodeStatus, PeerStatus, ProtectionStatus, PushEventsRequest,
    PushEventsResponse, RegisterRequest, RegistrySnapshot, ReplicationOp, ReplicationRecord,
    RestResult, Stamp, StatusQuery, Tombstone,
};
