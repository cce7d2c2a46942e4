//! Node lifecycle
//!
//! ```text
//! STARTING -> WARMING -> SERVING -> DRAINING -> STOPPED
//!                 \_________________/
//! ```
//!
//! A warming node accepts writes but refuses client queries until it has
//! pulled state from a peer or given up waiting. A draining node keeps
//! answering queries and renewals but refuses new registrations.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::info;

use registrar_common::{RegistrarError, RegistrarResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Starting,
    Warming,
    Serving,
    Draining,
    Stopped,
}

impl NodeState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => NodeState::Starting,
            1 => NodeState::Warming,
            2 => NodeState::Serving,
            3 => NodeState::Draining,
            _ => NodeState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            NodeState::Starting => 0,
            NodeState::Warming => 1,
            NodeState::Serving => 2,
            NodeState::Draining => 3,
            NodeState::Stopped => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Starting => "STARTING",
            NodeState::Warming => "WARMING",
            NodeState::Serving => "SERVING",
            NodeState::Draining => "DRAINING",
            NodeState::Stopped => "STOPPED",
        }
    }

    pub fn can_transition_to(self, next: NodeState) -> bool {
        matches!(
            (self, next),
            (NodeState::Starting, NodeState::Warming)
                | (NodeState::Starting, NodeState::Stopped)
                | (NodeState::Warming, NodeState::Serving)
                | (NodeState::Warming, NodeState::Draining)
                | (NodeState::Serving, NodeState::Draining)
                | (NodeState::Draining, NodeState::Stopped)
        )
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct NodeLifecycle {
    state: AtomicU8,
}

impl Default for NodeLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeLifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(NodeState::Starting.as_u8()),
        }
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move to `next`, returning the previous state
    pub fn transition(&self, next: NodeState) -> RegistrarResult<NodeState> {
        let mut current = self.state();
        loop {
            if !current.can_transition_to(next) {
                return Err(RegistrarError::InvariantViolation(format!(
                    "illegal node state transition {} -> {}",
                    current, next
                )));
            }
            match self.state.compare_exchange(
                current.as_u8(),
                next.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    info!(from = %current, to = %next, "Node state changed");
                    metrics::gauge!("registrar_node_state").set(next.as_u8() as f64);
                    return Ok(current);
                }
                Err(actual) => current = NodeState::from_u8(actual),
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == NodeState::Serving
    }

    /// Client queries: SERVING and DRAINING only
    pub fn check_query(&self) -> RegistrarResult<()> {
        match self.state() {
            NodeState::Serving | NodeState::Draining => Ok(()),
            state => Err(RegistrarError::NotReady(state.to_string())),
        }
    }

    /// Registrations and status changes
    pub fn check_register(&self) -> RegistrarResult<()> {
        match self.state() {
            NodeState::Draining => Err(RegistrarError::Draining),
            NodeState::Stopped => Err(RegistrarError::NotReady(NodeState::Stopped.to_string())),
            _ => Ok(()),
        }
    }

    /// Renewals, cancellations and replicated writes
    pub fn check_write(&self) -> RegistrarResult<()> {
        match self.state() {
            NodeState::Stopped => Err(RegistrarError::NotReady(NodeState::Stopped.to_string())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let lifecycle = NodeLifecycle::new();
        assert_eq!(lifecycle.state(), NodeState::Starting);
        assert_eq!(
            lifecycle.transition(NodeState::Warming).unwrap(),
            NodeState::Starting
        );
        lifecycle.transition(NodeState::Serving).unwrap();
        assert!(lifecycle.is_ready());
        lifecycle.transition(NodeState::Draining).unwrap();
        lifecycle.transition(NodeState::Stopped).unwrap();
        assert_eq!(lifecycle.state(), NodeState::Stopped);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let lifecycle = NodeLifecycle::new();
        assert!(lifecycle.transition(NodeState::Serving).is_err());
        assert!(lifecycle.transition(NodeState::Draining).is_err());
        assert_eq!(lifecycle.state(), NodeState::Starting);

        lifecycle.transition(NodeState::Warming).unwrap();
        lifecycle.transition(NodeState::Serving).unwrap();
        assert!(lifecycle.transition(NodeState::Warming).is_err());
        assert!(lifecycle.transition(NodeState::Stopped).is_err());
    }

    #[test]
    fn test_gates_per_state() {
        let lifecycle = NodeLifecycle::new();
        lifecycle.transition(NodeState::Warming).unwrap();
        assert!(matches!(
            lifecycle.check_query(),
            Err(RegistrarError::NotReady(_))
        ));
        assert!(lifecycle.check_register().is_ok());

        lifecycle.transition(NodeState::Serving).unwrap();
        assert!(lifecycle.check_query().is_ok());

        lifecycle.transition(NodeState::Draining).unwrap();
        assert!(lifecycle.check_query().is_ok());
        assert!(lifecycle.check_write().is_ok());
        assert_eq!(lifecycle.check_register(), Err(RegistrarError::Draining));

        lifecycle.transition(NodeState::Stopped).unwrap();
        assert!(lifecycle.check_write().is_err());
        assert!(lifecycle.check_query().is_err());
    }
}
