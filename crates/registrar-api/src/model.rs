//! Registry wire models
//!
//! These types travel between clients, the registry core and peer nodes:
//! - `Lease`: one instance registration and its liveness contract
//! - `ReplicationRecord`: a mutation propagated to peers
//! - `Tombstone`: retained marker of a removed lease
//! - `RegistrySnapshot`: full registry state served to pulling peers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use registrar_common::build_instance_key;

use crate::validation::{validate_endpoint, validate_metadata};

/// Lower bound accepted for a client supplied lease duration
pub const MIN_LEASE_DURATION_SECS: u64 = 1;

/// Upper bound accepted for a client supplied lease duration (one day)
pub const MAX_LEASE_DURATION_SECS: u64 = 86_400;

/// Instance status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseStatus {
    #[default]
    Up,
    Down,
    Starting,
    OutOfService,
    Unknown,
}

impl LeaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaseStatus::Up => "UP",
            LeaseStatus::Down => "DOWN",
            LeaseStatus::Starting => "STARTING",
            LeaseStatus::OutOfService => "OUT_OF_SERVICE",
            LeaseStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LeaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UP" => Ok(LeaseStatus::Up),
            "DOWN" => Ok(LeaseStatus::Down),
            "STARTING" => Ok(LeaseStatus::Starting),
            "OUT_OF_SERVICE" => Ok(LeaseStatus::OutOfService),
            "UNKNOWN" => Ok(LeaseStatus::Unknown),
            _ => Err(format!("unknown instance status: {}", s)),
        }
    }
}

/// Merge stamp of a stored entry or a replicated record
///
/// Field order is the comparison order: version, then timestamp, then
/// removals over live leases, then the authoring node id. The order is
/// total, so keeping the greatest stamp converges regardless of arrival
/// order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    pub version: u64,
    pub timestamp: i64,
    pub removed: bool,
    pub origin: String,
}

/// One registered instance of a service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub service_name: String,
    pub instance_id: String,
    /// Routable address, `host:port`
    pub endpoint: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub status: LeaseStatus,
    pub registered_at: i64,
    pub last_renewed_at: i64,
    pub lease_duration_secs: u64,
    pub version: u64,
    /// Node that authored the latest write of this lease
    #[serde(default)]
    pub origin: String,
}

impl Lease {
    pub fn stamp(&self) -> Stamp {
        Stamp {
            version: self.version,
            timestamp: self.last_renewed_at,
            removed: false,
            origin: self.origin.clone(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == LeaseStatus::Up
    }

    /// Milliseconds since epoch after which the lease may be evicted
    pub fn expires_at(&self, grace_factor: f64) -> i64 {
        let window_ms = (self.lease_duration_secs as f64 * 1000.0 * grace_factor) as i64;
        self.last_renewed_at.saturating_add(window_ms)
    }

    /// Same registration payload, ignoring timestamps, version and author
    pub fn same_registration(&self, other: &Lease) -> bool {
        self.endpoint == other.endpoint
            && self.metadata == other.metadata
            && self.status == other.status
            && self.lease_duration_secs == other.lease_duration_secs
    }
}

/// Marker left behind by a removed lease
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub service_name: String,
    pub instance_id: String,
    pub version: u64,
    pub timestamp: i64,
    pub origin: String,
}

impl Tombstone {
    pub fn stamp(&self) -> Stamp {
        Stamp {
            version: self.version,
            timestamp: self.timestamp,
            removed: true,
            origin: self.origin.clone(),
        }
    }
}

/// Replicated operation type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationOp {
    Register,
    Renew,
    Cancel,
    StatusChange,
}

impl std::fmt::Display for ReplicationOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationOp::Register => write!(f, "REGISTER"),
            ReplicationOp::Renew => write!(f, "RENEW"),
            ReplicationOp::Cancel => write!(f, "CANCEL"),
            ReplicationOp::StatusChange => write!(f, "STATUS_CHANGE"),
        }
    }
}

/// A registry mutation propagated between peers
///
/// For `Cancel` the lease snapshot carries the tombstone stamp: its
/// `version`, `last_renewed_at` and `origin` describe the removal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationRecord {
    pub op: ReplicationOp,
    pub lease: Lease,
    /// Node that emitted the record
    pub origin: String,
    pub version: u64,
}

impl ReplicationRecord {
    pub fn new(op: ReplicationOp, lease: Lease, origin: &str) -> Self {
        let version = lease.version;
        Self {
            op,
            lease,
            origin: origin.to_string(),
            version,
        }
    }

    /// Record describing a removal
    pub fn cancel(tombstone: &Tombstone, last_known: Option<&Lease>, origin: &str) -> Self {
        let lease = match last_known {
            Some(lease) => Lease {
                version: tombstone.version,
                registered_at: lease.registered_at.min(tombstone.timestamp),
                last_renewed_at: tombstone.timestamp,
                origin: tombstone.origin.clone(),
                ..lease.clone()
            },
            None => Lease {
                service_name: tombstone.service_name.clone(),
                instance_id: tombstone.instance_id.clone(),
                endpoint: String::new(),
                metadata: BTreeMap::new(),
                status: LeaseStatus::Unknown,
                registered_at: tombstone.timestamp,
                last_renewed_at: tombstone.timestamp,
                lease_duration_secs: 0,
                version: tombstone.version,
                origin: tombstone.origin.clone(),
            },
        };
        Self::new(ReplicationOp::Cancel, lease, origin)
    }

    pub fn is_removal(&self) -> bool {
        self.op == ReplicationOp::Cancel
    }

    pub fn stamp(&self) -> Stamp {
        Stamp {
            version: self.lease.version,
            timestamp: self.lease.last_renewed_at,
            removed: self.is_removal(),
            origin: self.lease.origin.clone(),
        }
    }

    /// Tombstone equivalent of a `Cancel` record
    pub fn to_tombstone(&self) -> Tombstone {
        Tombstone {
            service_name: self.lease.service_name.clone(),
            instance_id: self.lease.instance_id.clone(),
            version: self.lease.version,
            timestamp: self.lease.last_renewed_at,
            origin: self.lease.origin.clone(),
        }
    }

    /// Coalescing key: one pending record per instance
    pub fn key(&self) -> String {
        build_instance_key(&self.lease.service_name, &self.lease.instance_id)
    }
}

/// Full registry state served to pulling peers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub node_id: String,
    pub taken_at: i64,
    pub services: BTreeMap<String, Vec<Lease>>,
    #[serde(default)]
    pub tombstones: Vec<Tombstone>,
}

impl RegistrySnapshot {
    pub fn lease_count(&self) -> usize {
        self.services.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lease_count() == 0 && self.tombstones.is_empty()
    }
}

/// Registration body of `PUT /apps/{service}/{instanceId}`
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(custom(function = "validate_endpoint"))]
    pub endpoint: String,
    #[validate(custom(function = "validate_metadata"))]
    pub metadata: BTreeMap<String, String>,
    pub status: Option<LeaseStatus>,
    #[validate(range(min = MIN_LEASE_DURATION_SECS, max = MAX_LEASE_DURATION_SECS))]
    pub lease_duration_secs: Option<u64>,
}

/// Query string of `PUT /apps/{service}/{instanceId}/status`
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatusQuery {
    pub value: String,
}

/// Envelope of every HTTP response body
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestResult<T> {
    pub code: i32,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> RestResult<T> {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Body of `POST /peer/events`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventsRequest {
    pub origin: String,
    pub records: Vec<ReplicationRecord>,
}

/// Outcome of applying a batch of replicated records
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventsResponse {
    pub applied: usize,
    pub ignored: usize,
    pub rejected: usize,
}

/// Self-preservation guard report
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionStatus {
    pub enabled: bool,
    pub tripped: bool,
    pub expected_renewals: u64,
    pub observed_renewals: u64,
    pub threshold: f64,
}

/// Replication health of one peer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    pub address: String,
    pub circuit: String,
    pub degraded: bool,
    pub pending: usize,
}

/// Readiness report of `GET /health`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealth {
    pub node_id: String,
    pub state: String,
    pub ready: bool,
}

/// Operational report of `GET /status`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub node_id: String,
    pub state: String,
    pub lease_count: usize,
    pub service_count: usize,
    pub tombstone_count: usize,
    pub self_preservation: ProtectionStatus,
    pub peers: Vec<PeerStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(version: u64, renewed: i64) -> Lease {
        Lease {
            service_name: "billing".to_string(),
            instance_id: "i-1".to_string(),
            endpoint: "10.0.0.5:8080".to_string(),
            metadata: BTreeMap::new(),
            status: LeaseStatus::Up,
            registered_at: 1_000,
            last_renewed_at: renewed,
            lease_duration_secs: 90,
            version,
            origin: "node-a".to_string(),
        }
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("up".parse::<LeaseStatus>().unwrap(), LeaseStatus::Up);
        assert_eq!(
            "OUT_OF_SERVICE".parse::<LeaseStatus>().unwrap(),
            LeaseStatus::OutOfService
        );
        assert!("sideways".parse::<LeaseStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&LeaseStatus::OutOfService).unwrap();
        assert_eq!(json, "\"OUT_OF_SERVICE\"");
    }

    #[test]
    fn test_stamp_orders_version_before_timestamp() {
        assert!(lease(7, 1_000).stamp() > lease(5, 9_000).stamp());
        assert!(lease(5, 2_000).stamp() > lease(5, 1_000).stamp());
    }

    #[test]
    fn test_removal_wins_on_equal_version_and_timestamp() {
        let live = lease(3, 5_000);
        let tombstone = Tombstone {
            service_name: live.service_name.clone(),
            instance_id: live.instance_id.clone(),
            version: 3,
            timestamp: 5_000,
            origin: "node-a".to_string(),
        };
        assert!(tombstone.stamp() > live.stamp());
    }

    #[test]
    fn test_expires_at_applies_grace_factor() {
        let l = lease(1, 10_000);
        assert_eq!(l.expires_at(1.0), 100_000);
        assert_eq!(l.expires_at(2.0), 190_000);
    }

    #[test]
    fn test_cancel_record_carries_tombstone_stamp() {
        let l = lease(4, 8_000);
        let tombstone = Tombstone {
            service_name: "billing".to_string(),
            instance_id: "i-1".to_string(),
            version: 5,
            timestamp: 9_000,
            origin: "node-b".to_string(),
        };
        let record = ReplicationRecord::cancel(&tombstone, Some(&l), "node-b");
        assert!(record.is_removal());
        assert_eq!(record.version, 5);
        assert_eq!(record.to_tombstone(), tombstone);
        assert_eq!(record.key(), "billing@@i-1");
    }

    #[test]
    fn test_lease_json_is_camel_case() {
        let json = serde_json::to_value(lease(1, 1_000)).unwrap();
        assert_eq!(json["serviceName"], "billing");
        assert_eq!(json["leaseDurationSecs"], 90);
        assert_eq!(json["status"], "UP");
    }

    #[test]
    fn test_rest_result_decodes_envelope() {
        let json = r#"{"code":0,"message":"success","data":{"applied":2,"ignored":1,"rejected":0}}"#;
        let result: RestResult<PushEventsResponse> = serde_json::from_str(json).unwrap();
        assert!(result.is_success());
        assert_eq!(result.data.unwrap().applied, 2);

        let json = r#"{"code":23001,"message":"node not ready","data":null}"#;
        let result: RestResult<RegistrySnapshot> = serde_json::from_str(json).unwrap();
        assert!(!result.is_success());
        assert!(result.data.is_none());
    }

    #[test]
    fn test_register_request_validation() {
        let ok = RegisterRequest {
            endpoint: "10.0.0.5:8080".to_string(),
            lease_duration_secs: Some(90),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let bad_endpoint = RegisterRequest {
            endpoint: "no-port".to_string(),
            ..Default::default()
        };
        assert!(bad_endpoint.validate().is_err());

        let bad_duration = RegisterRequest {
            endpoint: "10.0.0.5:8080".to_string(),
            lease_duration_secs: Some(0),
            ..Default::default()
        };
        assert!(bad_duration.validate().is_err());
    }
}
