//! In-memory lease table
//!
//! Leases live in a two level map: service name, then instance id. A removed
//! instance keeps a tombstone in its slot until retention expires, so a
//! delayed replicated write for it cannot bring it back.
//!
//! Every stored entry carries a [`Stamp`]. Local writes always produce a stamp
//! greater than the one they replace; replicated writes are applied only when
//! their stamp is greater than the stored one. Because the stamp order is
//! total, nodes that saw the same records converge whatever the arrival order.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tracing::{debug, info};

use registrar_api::{
    Lease, LeaseStatus, RegisterRequest, RegistrySnapshot, ReplicationOp, ReplicationRecord, Stamp,
    Tombstone,
};
use registrar_common::{RegistrarError, RegistrarResult, current_time_ms};

use crate::config::StoreConfig;

#[derive(Clone, Debug)]
enum Slot {
    Live(Lease),
    Removed {
        tombstone: Tombstone,
        /// Local time the marker was written, drives retention
        recorded_at: i64,
    },
}

impl Slot {
    fn stamp(&self) -> Stamp {
        match self {
            Slot::Live(lease) => lease.stamp(),
            Slot::Removed { tombstone, .. } => tombstone.stamp(),
        }
    }

    fn live(&self) -> Option<&Lease> {
        match self {
            Slot::Live(lease) => Some(lease),
            Slot::Removed { .. } => None,
        }
    }

    fn from_record(record: &ReplicationRecord, now: i64) -> Self {
        if record.is_removal() {
            Slot::Removed {
                tombstone: record.to_tombstone(),
                recorded_at: now,
            }
        } else {
            Slot::Live(record.lease.clone())
        }
    }
}

/// Where a change entered this node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A client call handled by this node, or a local eviction
    Local,
    /// A record received from a peer
    Replicated,
}

/// A committed mutation of the lease table
#[derive(Clone, Debug)]
pub struct RegistryEvent {
    pub record: ReplicationRecord,
    pub origin: ChangeOrigin,
}

impl RegistryEvent {
    pub fn service_name(&self) -> &str {
        &self.record.lease.service_name
    }

    /// Registrations and renewals both prove a client is alive
    pub fn is_renewal(&self) -> bool {
        matches!(
            self.record.op,
            ReplicationOp::Register | ReplicationOp::Renew
        )
    }
}

/// Observer of committed mutations
///
/// Called synchronously after the write is visible, with no store lock held.
/// Implementations must not block.
pub trait RegistryListener: Send + Sync {
    fn on_change(&self, event: &RegistryEvent);
}

/// Client supplied registration payload
#[derive(Clone, Debug)]
pub struct Registration {
    pub service_name: String,
    pub instance_id: String,
    pub endpoint: String,
    pub metadata: BTreeMap<String, String>,
    pub status: LeaseStatus,
    /// Falls back to the store default when absent
    pub lease_duration_secs: Option<u64>,
}

impl Registration {
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            endpoint: endpoint.into(),
            metadata: BTreeMap::new(),
            status: LeaseStatus::Up,
            lease_duration_secs: None,
        }
    }

    pub fn from_request(service_name: &str, instance_id: &str, request: RegisterRequest) -> Self {
        Self {
            service_name: service_name.to_string(),
            instance_id: instance_id.to_string(),
            endpoint: request.endpoint,
            metadata: request.metadata,
            status: request.status.unwrap_or_default(),
            lease_duration_secs: request.lease_duration_secs,
        }
    }

    pub fn with_status(mut self, status: LeaseStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_lease_duration(mut self, secs: u64) -> Self {
        self.lease_duration_secs = Some(secs);
        self
    }
}

fn check_key(service_name: &str, instance_id: &str) -> RegistrarResult<()> {
    if service_name.is_empty() || instance_id.is_empty() {
        return Err(RegistrarError::IllegalArgument(
            "service name and instance id must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn check_lease(lease: &Lease) -> RegistrarResult<()> {
    if lease.service_name.is_empty() || lease.instance_id.is_empty() {
        return Err(RegistrarError::InvariantViolation(
            "lease without service name or instance id".to_string(),
        ));
    }
    if lease.last_renewed_at < lease.registered_at {
        return Err(RegistrarError::InvariantViolation(format!(
            "lease {}/{} renewed at {} before registration at {}",
            lease.service_name, lease.instance_id, lease.last_renewed_at, lease.registered_at
        )));
    }
    if lease.lease_duration_secs == 0 {
        return Err(RegistrarError::InvariantViolation(format!(
            "lease {}/{} has a zero duration",
            lease.service_name, lease.instance_id
        )));
    }
    Ok(())
}

/// Replicated in-memory lease table
pub struct RegistryStore {
    node_id: String,
    config: StoreConfig,
    /// Key: service name, Value: slots keyed by instance id
    services: DashMap<String, DashMap<String, Slot>>,
    listeners: RwLock<Vec<Arc<dyn RegistryListener>>>,
}

impl RegistryStore {
    pub fn new(node_id: impl Into<String>, config: StoreConfig) -> Self {
        Self {
            node_id: node_id.into(),
            config,
            services: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistryListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, record: ReplicationRecord, origin: ChangeOrigin) {
        let event = RegistryEvent { record, origin };
        for listener in self.listeners.read().iter() {
            listener.on_change(&event);
        }
    }

    /// Run `f` against the instances of a service, creating the service if absent
    fn with_service<R>(&self, service_name: &str, f: impl FnOnce(&DashMap<String, Slot>) -> R) -> R {
        if let Some(instances) = self.services.get(service_name) {
            return f(instances.value());
        }
        let instances = self.services.entry(service_name.to_string()).or_default();
        f(instances.value())
    }

    fn with_existing<R>(
        &self,
        service_name: &str,
        f: impl FnOnce(&DashMap<String, Slot>) -> Option<R>,
    ) -> Option<R> {
        let instances = self.services.get(service_name)?;
        f(instances.value())
    }

    /// Create or replace a lease
    ///
    /// Re-registering identical data only refreshes the renewal time. Changed
    /// data bumps the version and keeps the original registration time.
    pub fn register(&self, registration: Registration) -> RegistrarResult<Lease> {
        check_key(&registration.service_name, &registration.instance_id)?;

        let now = current_time_ms();
        let candidate = Lease {
            service_name: registration.service_name.clone(),
            instance_id: registration.instance_id.clone(),
            endpoint: registration.endpoint,
            metadata: registration.metadata,
            status: registration.status,
            registered_at: now,
            last_renewed_at: now,
            lease_duration_secs: registration
                .lease_duration_secs
                .unwrap_or(self.config.default_lease_duration_secs),
            version: 1,
            origin: self.node_id.clone(),
        };

        let (op, lease) = self.with_service(
            &registration.service_name,
            |instances| -> RegistrarResult<(ReplicationOp, Lease)> {
                match instances.entry(registration.instance_id.clone()) {
                Entry::Occupied(mut slot) => {
                    let (op, next) = match slot.get() {
                        Slot::Live(existing) if existing.same_registration(&candidate) => (
                            ReplicationOp::Renew,
                            Lease {
                                last_renewed_at: now.max(existing.last_renewed_at),
                                origin: self.node_id.clone(),
                                ..existing.clone()
                            },
                        ),
                        Slot::Live(existing) => (
                            ReplicationOp::Register,
                            Lease {
                                registered_at: existing.registered_at,
                                last_renewed_at: now.max(existing.last_renewed_at),
                                version: existing.version + 1,
                                ..candidate
                            },
                        ),
                        Slot::Removed { tombstone, .. } => (
                            ReplicationOp::Register,
                            Lease {
                                last_renewed_at: now.max(tombstone.timestamp),
                                version: tombstone.version + 1,
                                ..candidate
                            },
                        ),
                    };
                    check_lease(&next)?;
                    slot.insert(Slot::Live(next.clone()));
                    Ok((op, next))
                }
                Entry::Vacant(slot) => {
                    check_lease(&candidate)?;
                    slot.insert(Slot::Live(candidate.clone()));
                    Ok((ReplicationOp::Register, candidate))
                }
            }
        })?;

        debug!(
            service = %lease.service_name,
            instance = %lease.instance_id,
            version = lease.version,
            "{} committed",
            op
        );
        self.notify(
            ReplicationRecord::new(op, lease.clone(), &self.node_id),
            ChangeOrigin::Local,
        );
        Ok(lease)
    }

    /// Extend an existing lease; the version is unchanged
    pub fn renew(&self, service_name: &str, instance_id: &str) -> RegistrarResult<Lease> {
        let now = current_time_ms();
        let lease = self
            .with_existing(service_name, |instances| {
                let mut slot = instances.get_mut(instance_id)?;
                match slot.value_mut() {
                    Slot::Live(lease) => {
                        lease.last_renewed_at = now.max(lease.last_renewed_at);
                        lease.origin = self.node_id.clone();
                        Some(lease.clone())
                    }
                    Slot::Removed { .. } => None,
                }
            })
            .ok_or_else(|| RegistrarError::not_found(service_name, instance_id))?;

        self.notify(
            ReplicationRecord::new(ReplicationOp::Renew, lease.clone(), &self.node_id),
            ChangeOrigin::Local,
        );
        Ok(lease)
    }

    /// Remove a lease, leaving a tombstone
    ///
    /// Returns `None` when there was nothing to remove; cancelling twice is
    /// not an error.
    pub fn cancel(&self, service_name: &str, instance_id: &str) -> Option<Tombstone> {
        let now = current_time_ms();
        let (lease, tombstone) = self.with_existing(service_name, |instances| {
            let mut slot = instances.get_mut(instance_id)?;
            let lease = slot.live()?.clone();
            let tombstone = Tombstone {
                service_name: lease.service_name.clone(),
                instance_id: lease.instance_id.clone(),
                version: lease.version + 1,
                timestamp: now.max(lease.last_renewed_at),
                origin: self.node_id.clone(),
            };
            *slot.value_mut() = Slot::Removed {
                tombstone: tombstone.clone(),
                recorded_at: now,
            };
            Some((lease, tombstone))
        })?;

        debug!(
            service = %service_name,
            instance = %instance_id,
            version = tombstone.version,
            "CANCEL committed"
        );
        self.notify(
            ReplicationRecord::cancel(&tombstone, Some(&lease), &self.node_id),
            ChangeOrigin::Local,
        );
        Some(tombstone)
    }

    /// Change the status of an existing lease
    ///
    /// Setting the status a lease already has is a no-op and emits nothing.
    pub fn set_status(
        &self,
        service_name: &str,
        instance_id: &str,
        status: LeaseStatus,
    ) -> RegistrarResult<Lease> {
        let (lease, changed) = self
            .with_existing(service_name, |instances| {
                let mut slot = instances.get_mut(instance_id)?;
                match slot.value_mut() {
                    Slot::Live(lease) if lease.status == status => Some((lease.clone(), false)),
                    Slot::Live(lease) => {
                        lease.status = status;
                        lease.version += 1;
                        lease.origin = self.node_id.clone();
                        Some((lease.clone(), true))
                    }
                    Slot::Removed { .. } => None,
                }
            })
            .ok_or_else(|| RegistrarError::not_found(service_name, instance_id))?;

        if changed {
            info!(
                service = %service_name,
                instance = %instance_id,
                status = %status,
                version = lease.version,
                "instance status changed"
            );
            self.notify(
                ReplicationRecord::new(ReplicationOp::StatusChange, lease.clone(), &self.node_id),
                ChangeOrigin::Local,
            );
        }
        Ok(lease)
    }

    /// Merge a record received from a peer
    ///
    /// Applied only when its stamp is greater than the stored one, otherwise
    /// `ConflictIgnored`. Applied records are announced with
    /// [`ChangeOrigin::Replicated`].
    pub fn apply(&self, record: &ReplicationRecord) -> RegistrarResult<()> {
        let lease = &record.lease;
        if lease.service_name.is_empty() || lease.instance_id.is_empty() {
            return Err(RegistrarError::InvariantViolation(
                "replicated record without instance key".to_string(),
            ));
        }
        if !record.is_removal() {
            check_lease(lease)?;
        }

        let incoming = record.stamp();
        let now = current_time_ms();
        self.with_service(&lease.service_name, |instances| -> RegistrarResult<()> {
            match instances.entry(lease.instance_id.clone()) {
                Entry::Occupied(mut slot) => {
                    if slot.get().stamp() >= incoming {
                        return Err(RegistrarError::ConflictIgnored {
                            service_name: lease.service_name.clone(),
                            instance_id: lease.instance_id.clone(),
                            version: incoming.version,
                        });
                    }
                    slot.insert(Slot::from_record(record, now));
                }
                Entry::Vacant(slot) => {
                    slot.insert(Slot::from_record(record, now));
                }
            }
            Ok(())
        })?;

        self.notify(record.clone(), ChangeOrigin::Replicated);
        Ok(())
    }

    /// Leases whose renewal window, scaled by `grace_factor`, ended before `now_ms`
    pub fn expired_leases(&self, now_ms: i64, grace_factor: f64) -> Vec<Lease> {
        self.services
            .iter()
            .flat_map(|service| {
                service
                    .value()
                    .iter()
                    .filter_map(|slot| slot.value().live().cloned())
                    .filter(|lease| now_ms > lease.expires_at(grace_factor))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Remove one lease if it is still expired at `now_ms`
    ///
    /// The tombstone reuses the lease version and renewal time so that a peer
    /// holding a fresher renewal of the same lease keeps it.
    pub fn evict(
        &self,
        service_name: &str,
        instance_id: &str,
        now_ms: i64,
        grace_factor: f64,
    ) -> Option<Tombstone> {
        let (lease, tombstone) = self.with_existing(service_name, |instances| {
            let mut slot = instances.get_mut(instance_id)?;
            let lease = slot.live()?.clone();
            if now_ms <= lease.expires_at(grace_factor) {
                return None;
            }
            let tombstone = Tombstone {
                service_name: lease.service_name.clone(),
                instance_id: lease.instance_id.clone(),
                version: lease.version,
                timestamp: lease.last_renewed_at,
                origin: self.node_id.clone(),
            };
            *slot.value_mut() = Slot::Removed {
                tombstone: tombstone.clone(),
                recorded_at: now_ms,
            };
            Some((lease, tombstone))
        })?;

        self.notify(
            ReplicationRecord::cancel(&tombstone, Some(&lease), &self.node_id),
            ChangeOrigin::Local,
        );
        Some(tombstone)
    }

    /// Drop tombstones older than the retention period, then empty services
    pub fn purge_tombstones(&self, now_ms: i64) -> usize {
        let retention_ms = self.config.tombstone_retention.as_millis() as i64;
        let mut purged = 0;
        for service in self.services.iter() {
            service.value().retain(|_, slot| match slot {
                Slot::Removed { recorded_at, .. } if *recorded_at + retention_ms <= now_ms => {
                    purged += 1;
                    false
                }
                _ => true,
            });
        }
        self.services.retain(|_, instances| !instances.is_empty());
        if purged > 0 {
            debug!("purged {} tombstones", purged);
        }
        purged
    }

    /// Lease of one instance, in any status
    pub fn get(&self, service_name: &str, instance_id: &str) -> Option<Lease> {
        let instances = self.services.get(service_name)?;
        let slot = instances.get(instance_id)?;
        slot.live().cloned()
    }

    /// Live leases of a service in any status, ordered by instance id
    pub fn snapshot_for(&self, service_name: &str) -> Vec<Lease> {
        let Some(instances) = self.services.get(service_name) else {
            return Vec::new();
        };
        let mut leases: Vec<Lease> = instances
            .iter()
            .filter_map(|slot| slot.value().live().cloned())
            .collect();
        leases.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        leases
    }

    /// Full state, tombstones included, for peers and for the catalog query
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut services = BTreeMap::new();
        let mut tombstones = Vec::new();
        for service in self.services.iter() {
            let mut leases = Vec::new();
            for slot in service.value().iter() {
                match slot.value() {
                    Slot::Live(lease) => leases.push(lease.clone()),
                    Slot::Removed { tombstone, .. } => tombstones.push(tombstone.clone()),
                }
            }
            if !leases.is_empty() {
                leases.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
                services.insert(service.key().clone(), leases);
            }
        }
        tombstones.sort_by(|a, b| {
            (&a.service_name, &a.instance_id).cmp(&(&b.service_name, &b.instance_id))
        });
        RegistrySnapshot {
            node_id: self.node_id.clone(),
            taken_at: current_time_ms(),
            services,
            tombstones,
        }
    }

    /// Stored stamp of an instance, live or removed
    pub fn stamp_of(&self, service_name: &str, instance_id: &str) -> Option<Stamp> {
        let instances = self.services.get(service_name)?;
        let slot = instances.get(instance_id)?;
        Some(slot.stamp())
    }

    pub fn lease_count(&self) -> usize {
        self.services
            .iter()
            .map(|service| {
                service
                    .value()
                    .iter()
                    .filter(|slot| slot.value().live().is_some())
                    .count()
            })
            .sum()
    }

    pub fn tombstone_count(&self) -> usize {
        self.services
            .iter()
            .map(|service| {
                service
                    .value()
                    .iter()
                    .filter(|slot| slot.value().live().is_none())
                    .count()
            })
            .sum()
    }

    /// Services with at least one live lease
    pub fn service_count(&self) -> usize {
        self.services
            .iter()
            .filter(|service| service.value().iter().any(|slot| slot.value().live().is_some()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    fn store() -> RegistryStore {
        RegistryStore::new("node-a", StoreConfig::default())
    }

    fn billing(instance_id: &str) -> Registration {
        Registration::new("billing", instance_id, "10.0.0.5:8080")
    }

    fn remote_lease(instance_id: &str, version: u64, renewed: i64, origin: &str) -> Lease {
        Lease {
            service_name: "billing".to_string(),
            instance_id: instance_id.to_string(),
            endpoint: "10.0.0.9:8080".to_string(),
            metadata: BTreeMap::new(),
            status: LeaseStatus::Up,
            registered_at: 0,
            last_renewed_at: renewed,
            lease_duration_secs: 90,
            version,
            origin: origin.to_string(),
        }
    }

    #[derive(Default)]
    struct Recorder {
        local: AtomicUsize,
        replicated: AtomicUsize,
        ops: parking_lot::Mutex<Vec<ReplicationOp>>,
    }

    impl RegistryListener for Recorder {
        fn on_change(&self, event: &RegistryEvent) {
            match event.origin {
                ChangeOrigin::Local => self.local.fetch_add(1, Ordering::SeqCst),
                ChangeOrigin::Replicated => self.replicated.fetch_add(1, Ordering::SeqCst),
            };
            self.ops.lock().push(event.record.op);
        }
    }

    #[test]
    fn test_register_new_lease() {
        let store = store();
        let lease = store.register(billing("i-1")).unwrap();

        assert_eq!(lease.version, 1);
        assert_eq!(lease.lease_duration_secs, 90);
        assert_eq!(lease.status, LeaseStatus::Up);
        assert_eq!(lease.origin, "node-a");
        assert_eq!(store.lease_count(), 1);
        assert_eq!(store.service_count(), 1);
    }

    #[test]
    fn test_register_rejects_empty_key() {
        let store = store();
        let result = store.register(Registration::new("", "i-1", "10.0.0.5:8080"));
        assert!(matches!(result, Err(RegistrarError::IllegalArgument(_))));
    }

    #[test]
    fn test_reregister_identical_keeps_version() {
        let store = store();
        let first = store.register(billing("i-1")).unwrap();
        let second = store.register(billing("i-1")).unwrap();

        assert_eq!(second.version, first.version);
        assert!(second.last_renewed_at >= first.last_renewed_at);
        assert_eq!(store.lease_count(), 1);
    }

    #[test]
    fn test_reregister_changed_bumps_version() {
        let store = store();
        let first = store.register(billing("i-1")).unwrap();
        let second = store
            .register(billing("i-1").with_metadata("zone", "eu-1"))
            .unwrap();

        assert_eq!(second.version, first.version + 1);
        assert_eq!(second.registered_at, first.registered_at);
        assert_eq!(second.metadata.get("zone").map(String::as_str), Some("eu-1"));
    }

    #[test]
    fn test_renew_unknown_is_not_found() {
        let store = store();
        assert!(matches!(
            store.renew("billing", "i-1"),
            Err(RegistrarError::NotFound { .. })
        ));
        // A failed renewal must not leave an empty service behind
        assert_eq!(store.services.len(), 0);
    }

    #[test]
    fn test_renew_keeps_version() {
        let store = store();
        let lease = store.register(billing("i-1")).unwrap();
        let renewed = store.renew("billing", "i-1").unwrap();

        assert_eq!(renewed.version, lease.version);
        assert!(renewed.last_renewed_at >= lease.last_renewed_at);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let store = store();
        let lease = store.register(billing("i-1")).unwrap();

        let tombstone = store.cancel("billing", "i-1").unwrap();
        assert_eq!(tombstone.version, lease.version + 1);
        assert!(store.get("billing", "i-1").is_none());
        assert!(store.renew("billing", "i-1").is_err());

        assert!(store.cancel("billing", "i-1").is_none());
        assert!(store.cancel("billing", "never-registered").is_none());
        assert_eq!(store.tombstone_count(), 1);
        assert_eq!(store.service_count(), 0);
    }

    #[test]
    fn test_register_after_cancel_outranks_tombstone() {
        let store = store();
        store.register(billing("i-1")).unwrap();
        let tombstone = store.cancel("billing", "i-1").unwrap();

        let lease = store.register(billing("i-1")).unwrap();
        assert_eq!(lease.version, tombstone.version + 1);
        assert!(lease.stamp() > tombstone.stamp());
    }

    #[test]
    fn test_set_status() {
        let store = store();
        let lease = store.register(billing("i-1")).unwrap();

        let down = store
            .set_status("billing", "i-1", LeaseStatus::OutOfService)
            .unwrap();
        assert_eq!(down.status, LeaseStatus::OutOfService);
        assert_eq!(down.version, lease.version + 1);

        let unchanged = store
            .set_status("billing", "i-1", LeaseStatus::OutOfService)
            .unwrap();
        assert_eq!(unchanged.version, down.version);

        assert!(matches!(
            store.set_status("billing", "i-2", LeaseStatus::Up),
            Err(RegistrarError::NotFound { .. })
        ));
    }

    #[test]
    fn test_apply_newer_and_stale_records() {
        let store = store();
        let v2 = ReplicationRecord::new(
            ReplicationOp::Register,
            remote_lease("i-1", 2, 2_000, "node-b"),
            "node-b",
        );
        let v1 = ReplicationRecord::new(
            ReplicationOp::Register,
            remote_lease("i-1", 1, 9_000, "node-b"),
            "node-b",
        );

        store.apply(&v2).unwrap();
        assert!(matches!(
            store.apply(&v1),
            Err(RegistrarError::ConflictIgnored { version: 1, .. })
        ));
        // Re-delivery of the same record is ignored as well
        assert!(store.apply(&v2).is_err());
        assert_eq!(store.get("billing", "i-1").unwrap().version, 2);
    }

    #[test]
    fn test_apply_cancel_beats_live_with_equal_version_and_time() {
        let store = store();
        let lease = remote_lease("i-1", 3, 5_000, "node-b");
        store
            .apply(&ReplicationRecord::new(ReplicationOp::Register, lease.clone(), "node-b"))
            .unwrap();

        let tombstone = Tombstone {
            service_name: "billing".to_string(),
            instance_id: "i-1".to_string(),
            version: 3,
            timestamp: 5_000,
            origin: "node-a".to_string(),
        };
        store
            .apply(&ReplicationRecord::cancel(&tombstone, Some(&lease), "node-a"))
            .unwrap();
        assert!(store.get("billing", "i-1").is_none());

        // Late copy of the removed lease does not resurrect it
        let late = ReplicationRecord::new(ReplicationOp::Renew, lease, "node-b");
        assert!(store.apply(&late).is_err());
        assert!(store.get("billing", "i-1").is_none());
    }

    #[test]
    fn test_apply_rejects_inconsistent_lease() {
        let store = store();
        let mut lease = remote_lease("i-1", 1, 1_000, "node-b");
        lease.registered_at = 2_000;
        let result = store.apply(&ReplicationRecord::new(ReplicationOp::Register, lease, "node-b"));
        assert!(matches!(result, Err(RegistrarError::InvariantViolation(_))));
        assert_eq!(store.lease_count(), 0);
    }

    #[test]
    fn test_expired_leases_and_evict() {
        let store = store();
        let lease = store.register(billing("i-1")).unwrap();
        store
            .register(billing("i-2").with_lease_duration(3_600))
            .unwrap();

        // 90s lease, grace factor 2: expires 180s after the last renewal
        let at_270s = lease.last_renewed_at + 270_000;
        let expired = store.expired_leases(at_270s, 2.0);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].instance_id, "i-1");

        assert!(
            store
                .evict("billing", "i-1", lease.last_renewed_at + 100_000, 2.0)
                .is_none()
        );
        let tombstone = store.evict("billing", "i-1", at_270s, 2.0).unwrap();
        assert_eq!(tombstone.version, lease.version);
        assert_eq!(tombstone.timestamp, lease.last_renewed_at);
        assert!(store.get("billing", "i-1").is_none());
        assert!(store.get("billing", "i-2").is_some());
    }

    #[test]
    fn test_purge_tombstones_after_retention() {
        let store = RegistryStore::new(
            "node-a",
            StoreConfig {
                tombstone_retention: Duration::from_secs(60),
                ..Default::default()
            },
        );
        store.register(billing("i-1")).unwrap();
        store.cancel("billing", "i-1").unwrap();
        let now = current_time_ms();

        assert_eq!(store.purge_tombstones(now), 0);
        assert_eq!(store.tombstone_count(), 1);

        assert_eq!(store.purge_tombstones(now + 61_000), 1);
        assert_eq!(store.tombstone_count(), 0);
        assert_eq!(store.services.len(), 0);
    }

    #[test]
    fn test_snapshot_contents() {
        let store = store();
        store.register(billing("i-2")).unwrap();
        store.register(billing("i-1")).unwrap();
        store.register(Registration::new("audit", "a-1", "10.0.1.1:9000")).unwrap();
        store.cancel("audit", "a-1").unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.node_id, "node-a");
        assert_eq!(snapshot.lease_count(), 2);
        assert!(!snapshot.services.contains_key("audit"));
        assert_eq!(snapshot.tombstones.len(), 1);

        let ids: Vec<_> = store
            .snapshot_for("billing")
            .into_iter()
            .map(|l| l.instance_id)
            .collect();
        assert_eq!(ids, vec!["i-1", "i-2"]);
        assert!(store.snapshot_for("unknown").is_empty());
    }

    #[test]
    fn test_listeners_see_origin() {
        let store = store();
        let recorder = Arc::new(Recorder::default());
        store.add_listener(recorder.clone());

        store.register(billing("i-1")).unwrap();
        store.renew("billing", "i-1").unwrap();
        store.cancel("billing", "i-1");
        store
            .apply(&ReplicationRecord::new(
                ReplicationOp::Register,
                remote_lease("i-9", 1, 1_000, "node-b"),
                "node-b",
            ))
            .unwrap();

        assert_eq!(recorder.local.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.replicated.load(Ordering::SeqCst), 1);
        assert_eq!(
            *recorder.ops.lock(),
            vec![
                ReplicationOp::Register,
                ReplicationOp::Renew,
                ReplicationOp::Cancel,
                ReplicationOp::Register
            ]
        );
    }

    fn record_strategy() -> impl Strategy<Value = ReplicationRecord> {
        (1u64..4, 0i64..4, any::<bool>(), 0usize..3).prop_map(|(version, ts, removed, origin)| {
            let origin = ["node-a", "node-b", "node-c"][origin];
            let lease = remote_lease("i-1", version, ts, origin);
            if removed {
                let tombstone = Tombstone {
                    service_name: lease.service_name.clone(),
                    instance_id: lease.instance_id.clone(),
                    version,
                    timestamp: ts,
                    origin: origin.to_string(),
                };
                ReplicationRecord::cancel(&tombstone, Some(&lease), origin)
            } else {
                ReplicationRecord::new(ReplicationOp::Register, lease, origin)
            }
        })
    }

    proptest! {
        #[test]
        fn prop_merge_is_order_independent(records in prop::collection::vec(record_strategy(), 1..12)) {
            let forward = RegistryStore::new("x", StoreConfig::default());
            let backward = RegistryStore::new("y", StoreConfig::default());
            for record in &records {
                let _ = forward.apply(record);
            }
            for record in records.iter().rev() {
                let _ = backward.apply(record);
            }
            // Applying everything again changes nothing
            for record in &records {
                let _ = forward.apply(record);
            }

            let expected = records.iter().map(ReplicationRecord::stamp).max();
            prop_assert_eq!(forward.stamp_of("billing", "i-1"), expected.clone());
            prop_assert_eq!(backward.stamp_of("billing", "i-1"), expected);
        }
    }
}
