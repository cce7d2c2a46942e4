//! Error types and error codes for Registrar
//!
//! This module defines:
//! - `RegistrarError`: Registry-specific error enum
//! - `ErrorCode`: Structured error codes for API responses

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Registry error taxonomy
///
/// Every variant is local to one lease or one request. Background tasks
/// (eviction, replication) log these and continue.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrarError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("instance '{instance_id}' of service '{service_name}' not found")]
    NotFound {
        service_name: String,
        instance_id: String,
    },

    #[error("stale record for {service_name}/{instance_id} ignored (version {version})")]
    ConflictIgnored {
        service_name: String,
        instance_id: String,
        version: u64,
    },

    #[error("peer '{peer}' unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("store invariant violated: {0}")]
    InvariantViolation(String),

    #[error("node is not ready to serve queries (state: {0})")]
    NotReady(String),

    #[error("node is draining, new registrations are refused")]
    Draining,

    #[error("configuration error: {0}")]
    Config(String),
}

impl RegistrarError {
    pub fn not_found(service_name: &str, instance_id: &str) -> Self {
        RegistrarError::NotFound {
            service_name: service_name.to_string(),
            instance_id: instance_id.to_string(),
        }
    }

    pub fn peer_unreachable(peer: &str, reason: impl Display) -> Self {
        RegistrarError::PeerUnreachable {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Structured error code used in API responses
    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            RegistrarError::IllegalArgument(_) => PARAMETER_VALIDATE_ERROR,
            RegistrarError::NotFound { .. } => INSTANCE_NOT_FOUND,
            RegistrarError::ConflictIgnored { .. } => STALE_RECORD,
            RegistrarError::PeerUnreachable { .. } => PEER_UNREACHABLE,
            RegistrarError::InvariantViolation(_) => STORE_INVARIANT_VIOLATED,
            RegistrarError::NotReady(_) => NODE_NOT_READY,
            RegistrarError::Draining => NODE_DRAINING,
            RegistrarError::Config(_) => SERVER_ERROR,
        }
    }
}

/// Result alias used across the registry crates
pub type RegistrarResult<T> = Result<T, RegistrarError>;

/// Error code structure for API responses
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const INSTANCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 21003,
    message: "instance not found",
};

pub const STALE_RECORD: ErrorCode<'static> = ErrorCode {
    code: 22001,
    message: "stale replication record",
};

pub const PEER_UNREACHABLE: ErrorCode<'static> = ErrorCode {
    code: 22002,
    message: "peer unreachable",
};

pub const STORE_INVARIANT_VIOLATED: ErrorCode<'static> = ErrorCode {
    code: 22003,
    message: "store invariant violated",
};

pub const NODE_NOT_READY: ErrorCode<'static> = ErrorCode {
    code: 23001,
    message: "node not ready",
};

pub const NODE_DRAINING: ErrorCode<'static> = ErrorCode {
    code: 23002,
    message: "node draining",
};

pub const SERVER_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30000,
    message: "server error",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrar_error_display() {
        let err = RegistrarError::IllegalArgument("invalid param".to_string());
        assert_eq!(format!("{}", err), "caused: invalid param");

        let err = RegistrarError::not_found("billing", "i-1");
        assert_eq!(
            format!("{}", err),
            "instance 'i-1' of service 'billing' not found"
        );

        let err = RegistrarError::peer_unreachable("10.0.0.2:8761", "connection refused");
        assert_eq!(
            format!("{}", err),
            "peer '10.0.0.2:8761' unreachable: connection refused"
        );
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            RegistrarError::not_found("a", "b").error_code(),
            INSTANCE_NOT_FOUND
        );
        assert_eq!(RegistrarError::Draining.error_code(), NODE_DRAINING);
        assert_eq!(
            RegistrarError::NotReady("WARMING".to_string()).error_code(),
            NODE_NOT_READY
        );
    }

    #[test]
    fn test_error_code_constants() {
        assert_eq!(SUCCESS.code, 0);
        assert_eq!(SUCCESS.message, "success");
        assert_eq!(NODE_DRAINING.code, 23002);
    }
}
