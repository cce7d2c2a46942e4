//! Registrar Core - everything that spans more than one node
//!
//! - `replication`: asynchronous peer gossip with coalescing and anti-entropy
//! - `peer`: transport to peer nodes
//! - `circuit_breaker`: per-peer failure isolation
//! - `lifecycle`: node state machine
//! - `node`: the registry node tying the core together

pub mod circuit_breaker;
pub mod lifecycle;
pub mod node;
pub mod peer;
pub mod replication;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use lifecycle::{NodeLifecycle, NodeState};
pub use node::{NodeConfig, RegistryNode};
pub use peer::{HttpPeerClient, PeerClient};
pub use replication::{BackoffConfig, MergeStats, ReplicationConfig, ReplicationProtocol, apply_records};
