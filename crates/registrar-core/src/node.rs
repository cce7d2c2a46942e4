//! Registry node
//!
//! Owns one lease store and every component built around it, and exposes the
//! client and peer operations gated by the node lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use registrar_api::{
    Lease, LeaseStatus, NodeHealth, NodeStatus, PushEventsRequest, PushEventsResponse,
    RegistrySnapshot, Tombstone,
};
use registrar_common::{RegistrarError, RegistrarResult};
use registrar_naming::{
    EvictionConfig, EvictionScheduler, ProtectionConfig, QueryConfig, QueryEngine, Registration,
    RegistryStore, SelfPreservationGuard, StoreConfig,
};

use crate::lifecycle::{NodeLifecycle, NodeState};
use crate::peer::PeerClient;
use crate::replication::{ReplicationConfig, ReplicationProtocol, apply_records};

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub node_id: String,
    /// Addresses of the other nodes, `host:port`
    pub peers: Vec<String>,
    pub store: StoreConfig,
    pub eviction: EvictionConfig,
    pub protection: ProtectionConfig,
    pub query: QueryConfig,
    pub replication: ReplicationConfig,
    /// Longest time spent pulling peer state before serving anyway
    pub warmup_timeout: Duration,
    /// Pause between warm-up pull rounds
    pub warmup_retry_interval: Duration,
    /// Longest time spent flushing replication while draining
    pub drain_timeout: Duration,
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>, peers: Vec<String>) -> Self {
        Self {
            node_id: node_id.into(),
            peers,
            store: StoreConfig::default(),
            eviction: EvictionConfig::default(),
            protection: ProtectionConfig::default(),
            query: QueryConfig::default(),
            replication: ReplicationConfig::default(),
            warmup_timeout: Duration::from_secs(30),
            warmup_retry_interval: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(10),
        }
    }

    pub fn validate(&self) -> RegistrarResult<()> {
        if self.node_id.is_empty() {
            return Err(RegistrarError::Config("node id must not be empty".to_string()));
        }
        if self.peers.iter().any(|peer| peer.trim().is_empty()) {
            return Err(RegistrarError::Config(
                "peer addresses must not be empty".to_string(),
            ));
        }
        self.store.validate()?;
        self.eviction.validate()?;
        self.protection.validate()?;
        self.query.validate()?;
        self.replication.validate()
    }
}

pub struct RegistryNode {
    config: NodeConfig,
    lifecycle: NodeLifecycle,
    store: Arc<RegistryStore>,
    guard: Arc<SelfPreservationGuard>,
    eviction: Arc<EvictionScheduler>,
    query: QueryEngine,
    replication: Arc<ReplicationProtocol>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RegistryNode {
    pub fn new(config: NodeConfig, client: Arc<dyn PeerClient>) -> RegistrarResult<Self> {
        config.validate()?;

        let store = Arc::new(RegistryStore::new(
            config.node_id.clone(),
            config.store.clone(),
        ));
        let guard = Arc::new(SelfPreservationGuard::new(config.protection.clone()));
        store.add_listener(guard.clone());

        let query = QueryEngine::new(store.clone(), &config.query);

        let replication = Arc::new(ReplicationProtocol::new(
            config.node_id.clone(),
            &config.peers,
            config.replication.clone(),
            client,
        ));
        store.add_listener(replication.clone());

        let eviction = Arc::new(EvictionScheduler::new(
            store.clone(),
            guard.clone(),
            config.eviction.clone(),
        ));

        Ok(Self {
            config,
            lifecycle: NodeLifecycle::new(),
            store,
            guard,
            eviction,
            query,
            replication,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn state(&self) -> NodeState {
        self.lifecycle.state()
    }

    pub fn store(&self) -> &Arc<RegistryStore> {
        &self.store
    }

    pub fn replication(&self) -> &Arc<ReplicationProtocol> {
        &self.replication
    }

    pub fn eviction(&self) -> &Arc<EvictionScheduler> {
        &self.eviction
    }

    pub fn guard(&self) -> &Arc<SelfPreservationGuard> {
        &self.guard
    }

    /// Warm up from peers, then serve and start the background tasks
    pub async fn start(&self) -> RegistrarResult<()> {
        self.lifecycle.transition(NodeState::Warming)?;
        self.replication.start(self.store.clone());

        self.warm_up().await;
        self.lifecycle.transition(NodeState::Serving)?;

        let mut tasks = self.tasks.lock();
        let eviction = self.eviction.clone();
        tasks.push(tokio::spawn(async move { eviction.start().await }));
        let guard = self.guard.clone();
        let store = self.store.clone();
        tasks.push(tokio::spawn(async move { guard.start(store).await }));

        info!(
            node = %self.config.node_id,
            leases = self.store.lease_count(),
            "Registry node serving"
        );
        Ok(())
    }

    /// Pull peer state until one serving peer answered or the warm-up
    /// timeout passed
    ///
    /// Returns the number of peers pulled in the successful round.
    async fn warm_up(&self) -> usize {
        if !self.replication.has_peers() {
            info!("No peers configured, serving local state");
            return 0;
        }

        let deadline = Instant::now() + self.config.warmup_timeout;
        let mut round = 0u32;
        loop {
            round += 1;
            let pulled = self.replication.pull_from_all(&self.store).await;
            if pulled > 0 {
                info!(
                    round,
                    peers = pulled,
                    leases = self.store.lease_count(),
                    "Warm-up complete"
                );
                return pulled;
            }
            if Instant::now() + self.config.warmup_retry_interval >= deadline {
                warn!(
                    rounds = round,
                    "No peer reachable during warm-up, serving local state"
                );
                return 0;
            }
            tokio::time::sleep(self.config.warmup_retry_interval).await;
        }
    }

    /// Refuse new registrations, stop local background work and flush
    /// replication
    pub async fn drain(&self) -> RegistrarResult<()> {
        self.lifecycle.transition(NodeState::Draining)?;

        self.eviction.stop();
        self.guard.stop();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        if !self.replication.flush(self.config.drain_timeout).await {
            warn!(
                backlog = self.replication.backlog(),
                "Drain timeout reached before replication was flushed"
            );
        }
        self.replication.stop();
        Ok(())
    }

    pub fn stop(&self) -> RegistrarResult<()> {
        self.lifecycle.transition(NodeState::Stopped)?;
        self.replication.stop();
        info!(node = %self.config.node_id, "Registry node stopped");
        Ok(())
    }

    pub fn register(&self, registration: Registration) -> RegistrarResult<Lease> {
        self.lifecycle.check_register()?;
        let lease = self.store.register(registration)?;
        metrics::counter!("registrar_registrations_total").increment(1);
        Ok(lease)
    }

    pub fn renew(&self, service_name: &str, instance_id: &str) -> RegistrarResult<Lease> {
        self.lifecycle.check_write()?;
        let lease = self.store.renew(service_name, instance_id)?;
        metrics::counter!("registrar_renewals_total").increment(1);
        Ok(lease)
    }

    pub fn cancel(&self, service_name: &str, instance_id: &str) -> RegistrarResult<Option<Tombstone>> {
        self.lifecycle.check_write()?;
        let tombstone = self.store.cancel(service_name, instance_id);
        if tombstone.is_some() {
            metrics::counter!("registrar_cancellations_total").increment(1);
        }
        Ok(tombstone)
    }

    pub fn set_status(
        &self,
        service_name: &str,
        instance_id: &str,
        status: LeaseStatus,
    ) -> RegistrarResult<Lease> {
        self.lifecycle.check_register()?;
        self.store.set_status(service_name, instance_id, status)
    }

    pub fn lookup(&self, service_name: &str) -> RegistrarResult<Arc<Vec<Lease>>> {
        self.lifecycle.check_query()?;
        Ok(self.query.lookup(service_name))
    }

    pub fn lookup_all(&self) -> RegistrarResult<Arc<BTreeMap<String, Vec<Lease>>>> {
        self.lifecycle.check_query()?;
        Ok(self.query.lookup_all())
    }

    pub fn lookup_instance(
        &self,
        service_name: &str,
        instance_id: &str,
    ) -> RegistrarResult<Option<Lease>> {
        self.lifecycle.check_query()?;
        Ok(self.query.lookup_instance(service_name, instance_id))
    }

    /// Merge a batch pushed by a peer
    pub fn apply_events(&self, request: &PushEventsRequest) -> RegistrarResult<PushEventsResponse> {
        self.lifecycle.check_write()?;
        let stats = apply_records(&self.store, &request.records);
        Ok(stats.into())
    }

    /// Full state for a pulling peer
    ///
    /// A warming node refuses: its store may still be empty, and a peer that
    /// merged it would count itself as warm.
    pub fn snapshot(&self) -> RegistrarResult<RegistrySnapshot> {
        self.lifecycle.check_query()?;
        Ok(self.store.snapshot())
    }

    pub fn health(&self) -> NodeHealth {
        NodeHealth {
            node_id: self.config.node_id.clone(),
            state: self.lifecycle.state().to_string(),
            ready: self.lifecycle.is_ready(),
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.config.node_id.clone(),
            state: self.lifecycle.state().to_string(),
            lease_count: self.store.lease_count(),
            service_count: self.store.service_count(),
            tombstone_count: self.store.tombstone_count(),
            self_preservation: self.guard.status(),
            peers: self.replication.peer_statuses(),
        }
    }
}
