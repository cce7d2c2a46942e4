//! Peer replication
//!
//! Local mutations are pushed to every peer asynchronously; the client call
//! that produced them has already returned. Per peer, pending records are
//! coalesced by instance so only the newest state of each instance is sent.
//! A worker per peer drains its queue in batches with bounded retries. Peers
//! that keep failing are marked degraded by their circuit breaker and their
//! queue is dropped; a periodic anti-entropy pull repairs whatever was lost.
//!
//! Records received from peers are applied through the store merge rules and
//! never forwarded again: every node pushes only what it authored.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use registrar_api::{PeerStatus, PushEventsResponse, RegistrySnapshot, ReplicationRecord};
use registrar_common::{RegistrarError, RegistrarResult};
use registrar_naming::{ChangeOrigin, RegistryEvent, RegistryListener, RegistryStore};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::peer::PeerClient;

/// Exponential backoff with jitter between push attempts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Retries after the first attempt
    pub max_attempts: u32,
    /// Delay is randomized by +/- this fraction
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: 3,
            jitter_factor: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Delay before attempt `attempt`; the first attempt (0) is immediate
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, rand::random::<f64>())
    }

    /// `jitter` in [0, 1), 0.5 meaning no deviation
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        let base_ms = base_ms.min(self.max_delay.as_millis() as f64);
        let offset = (jitter * 2.0 - 1.0) * base_ms * self.jitter_factor;
        Duration::from_millis((base_ms + offset).max(1.0) as u64)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Maximum records per push
    pub batch_size: usize,
    /// Time a worker lingers after a wake-up so bursts coalesce
    pub batch_delay: Duration,
    /// Period at which workers retry a queue left by a failed push
    pub retry_interval: Duration,
    /// Timeout of a single push attempt
    pub push_timeout: Duration,
    /// Timeout of a snapshot pull
    pub pull_timeout: Duration,
    /// Period of the anti-entropy pull (default: 60s)
    pub anti_entropy_interval: Duration,
    pub backoff: BackoffConfig,
    pub breaker: CircuitBreakerConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            batch_size: 250,
            batch_delay: Duration::from_millis(50),
            retry_interval: Duration::from_secs(1),
            push_timeout: Duration::from_secs(3),
            pull_timeout: Duration::from_secs(10),
            anti_entropy_interval: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ReplicationConfig {
    pub fn validate(&self) -> RegistrarResult<()> {
        if self.batch_size == 0 {
            return Err(RegistrarError::Config(
                "replication batch size must be positive".to_string(),
            ));
        }
        if self.push_timeout.is_zero() || self.pull_timeout.is_zero() {
            return Err(RegistrarError::Config(
                "replication timeouts must be positive".to_string(),
            ));
        }
        if self.anti_entropy_interval.is_zero() || self.retry_interval.is_zero() {
            return Err(RegistrarError::Config(
                "replication intervals must be positive".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(RegistrarError::Config(
                "circuit breaker thresholds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of merging a batch or a snapshot into the local store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub applied: usize,
    pub ignored: usize,
    pub rejected: usize,
}

impl From<MergeStats> for PushEventsResponse {
    fn from(stats: MergeStats) -> Self {
        PushEventsResponse {
            applied: stats.applied,
            ignored: stats.ignored,
            rejected: stats.rejected,
        }
    }
}

/// Apply received records; stale ones are counted, not failed
pub fn apply_records(store: &RegistryStore, records: &[ReplicationRecord]) -> MergeStats {
    let mut stats = MergeStats::default();
    for record in records {
        match store.apply(record) {
            Ok(()) => stats.applied += 1,
            Err(RegistrarError::ConflictIgnored { .. }) => stats.ignored += 1,
            Err(e) => {
                warn!(
                    origin = %record.origin,
                    op = %record.op,
                    key = %record.key(),
                    "Rejected replicated record: {}",
                    e
                );
                stats.rejected += 1;
            }
        }
    }
    metrics::counter!("registrar_replication_applied_total").increment(stats.applied as u64);
    metrics::counter!("registrar_replication_ignored_total").increment(stats.ignored as u64);
    stats
}

/// Merge a peer snapshot, tombstones included
pub fn merge_snapshot(store: &RegistryStore, snapshot: &RegistrySnapshot) -> MergeStats {
    let records: Vec<ReplicationRecord> = snapshot
        .services
        .values()
        .flatten()
        .map(|lease| {
            ReplicationRecord::new(
                registrar_api::ReplicationOp::Register,
                lease.clone(),
                &snapshot.node_id,
            )
        })
        .chain(
            snapshot
                .tombstones
                .iter()
                .map(|tombstone| ReplicationRecord::cancel(tombstone, None, &snapshot.node_id)),
        )
        .collect();
    apply_records(store, &records)
}

/// Replication state of one peer
struct PeerLink {
    address: String,
    /// Key: instance key, Value: newest record not yet sent
    pending: DashMap<String, ReplicationRecord>,
    /// Records taken from `pending` and currently being pushed
    in_flight: AtomicUsize,
    breaker: CircuitBreaker,
    wake: Notify,
}

impl PeerLink {
    fn new(address: String, breaker: CircuitBreakerConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(address.clone(), breaker),
            address,
            pending: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            wake: Notify::new(),
        }
    }

    /// Keep the record only if it is newer than what is already queued
    fn offer(&self, record: ReplicationRecord) {
        self.pending
            .entry(record.key())
            .and_modify(|queued| {
                if record.stamp() > queued.stamp() {
                    *queued = record.clone();
                }
            })
            .or_insert(record);
    }

    fn take_batch(&self, batch_size: usize) -> Vec<ReplicationRecord> {
        let keys: Vec<String> = self
            .pending
            .iter()
            .take(batch_size)
            .map(|entry| entry.key().clone())
            .collect();
        // Counted in flight before leaving `pending` so the backlog never reads empty early
        self.in_flight.fetch_add(keys.len(), Ordering::SeqCst);
        let batch: Vec<ReplicationRecord> = keys
            .iter()
            .filter_map(|key| self.pending.remove(key).map(|(_, record)| record))
            .collect();
        self.in_flight
            .fetch_sub(keys.len() - batch.len(), Ordering::SeqCst);
        batch
    }

    fn finish_batch(&self, len: usize) {
        self.in_flight.fetch_sub(len, Ordering::SeqCst);
    }

    fn backlog(&self) -> usize {
        self.pending.len() + self.in_flight.load(Ordering::SeqCst)
    }

    fn drop_pending(&self, reason: &str) {
        let dropped = self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            warn!(
                peer = %self.address,
                dropped,
                "Dropped pending replication records: {}",
                reason
            );
            metrics::counter!("registrar_replication_dropped_total", "peer" => self.address.clone())
                .increment(dropped as u64);
        }
    }

    fn status(&self) -> PeerStatus {
        let state = self.breaker.state();
        PeerStatus {
            address: self.address.clone(),
            circuit: state.as_str().to_string(),
            degraded: self.breaker.is_degraded(),
            pending: self.backlog(),
        }
    }
}

/// Replication manager
pub struct ReplicationProtocol {
    node_id: String,
    config: ReplicationConfig,
    client: Arc<dyn PeerClient>,
    peers: Vec<Arc<PeerLink>>,
    running: AtomicBool,
    shutdown: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReplicationProtocol {
    pub fn new(
        node_id: impl Into<String>,
        peers: &[String],
        config: ReplicationConfig,
        client: Arc<dyn PeerClient>,
    ) -> Self {
        let node_id = node_id.into();
        let peers = peers
            .iter()
            .filter(|address| **address != node_id)
            .map(|address| Arc::new(PeerLink::new(address.clone(), config.breaker.clone())))
            .collect();
        Self {
            node_id,
            config,
            client,
            peers,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn peer_addresses(&self) -> Vec<String> {
        self.peers.iter().map(|peer| peer.address.clone()).collect()
    }

    pub fn has_peers(&self) -> bool {
        !self.peers.is_empty()
    }

    /// Queue a locally authored record for every peer
    pub fn enqueue(&self, record: &ReplicationRecord) {
        for peer in &self.peers {
            if peer.breaker.state() == CircuitState::Open {
                debug!(
                    peer = %peer.address,
                    key = %record.key(),
                    "Peer degraded, record left to anti-entropy"
                );
                continue;
            }
            peer.offer(record.clone());
            peer.wake.notify_one();
        }
    }

    /// Start the per-peer workers and the anti-entropy loop
    pub fn start(self: &Arc<Self>, store: Arc<RegistryStore>) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Replication already running");
            return;
        }
        info!(
            node = %self.node_id,
            peers = ?self.peer_addresses(),
            "Starting replication"
        );

        let mut tasks = self.tasks.lock();
        for peer in &self.peers {
            let protocol = self.clone();
            let peer = peer.clone();
            tasks.push(tokio::spawn(async move {
                protocol.run_peer_worker(peer).await;
            }));
        }

        if self.has_peers() {
            let protocol = self.clone();
            tasks.push(tokio::spawn(async move {
                protocol.run_anti_entropy(store).await;
            }));
        }
    }

    /// Stop all replication tasks; pending records are abandoned
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        for peer in &self.peers {
            peer.wake.notify_one();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("Replication stopped");
    }

    async fn run_peer_worker(&self, peer: Arc<PeerLink>) {
        debug!(peer = %peer.address, "Replication worker started");
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = peer.wake.notified() => {}
                _ = tokio::time::sleep(self.config.retry_interval) => {}
                _ = self.shutdown.notified() => break,
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if peer.pending.is_empty() {
                continue;
            }
            tokio::time::sleep(self.config.batch_delay).await;
            self.drain_peer(&peer).await;
        }
        debug!(peer = %peer.address, "Replication worker stopped");
    }

    /// Push everything queued for `peer`
    async fn drain_peer(&self, peer: &PeerLink) {
        loop {
            if !peer.breaker.allow_request() {
                peer.drop_pending("peer degraded");
                return;
            }
            let batch = peer.take_batch(self.config.batch_size);
            if batch.is_empty() {
                return;
            }

            let result = self.push_with_retry(peer, &batch).await;
            match result {
                Ok(response) => {
                    peer.breaker.record_success();
                    peer.finish_batch(batch.len());
                    debug!(
                        peer = %peer.address,
                        sent = batch.len(),
                        applied = response.applied,
                        ignored = response.ignored,
                        rejected = response.rejected,
                        "Replication batch delivered"
                    );
                    metrics::counter!("registrar_replication_pushed_total", "peer" => peer.address.clone())
                        .increment(batch.len() as u64);
                }
                Err(e) => {
                    peer.breaker.record_failure();
                    let len = batch.len();
                    if peer.breaker.state() == CircuitState::Open {
                        peer.finish_batch(len);
                        peer.drop_pending("peer degraded");
                        warn!(peer = %peer.address, dropped = len, "Replication batch lost: {}", e);
                    } else {
                        for record in batch {
                            peer.offer(record);
                        }
                        peer.finish_batch(len);
                        warn!(peer = %peer.address, requeued = len, "Replication push failed: {}", e);
                    }
                    metrics::counter!("registrar_replication_failures_total", "peer" => peer.address.clone())
                        .increment(1);
                    return;
                }
            }
        }
    }

    async fn push_with_retry(
        &self,
        peer: &PeerLink,
        batch: &[ReplicationRecord],
    ) -> RegistrarResult<PushEventsResponse> {
        let mut last_error = RegistrarError::peer_unreachable(&peer.address, "not attempted");
        for attempt in 0..=self.config.backoff.max_attempts {
            let delay = self.config.backoff.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match tokio::time::timeout(
                self.config.push_timeout,
                self.client.push_events(&peer.address, &self.node_id, batch),
            )
            .await
            {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = RegistrarError::peer_unreachable(
                        &peer.address,
                        format!("push timed out after {:?}", self.config.push_timeout),
                    )
                }
            }
            debug!(peer = %peer.address, attempt, "Push attempt failed: {}", last_error);
        }
        Err(last_error)
    }

    async fn run_anti_entropy(&self, store: Arc<RegistryStore>) {
        let period = self.config.anti_entropy_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = interval.tick() => {
                    let synced = self.anti_entropy_round(&store).await;
                    debug!(synced, "Anti-entropy round finished");
                }
                _ = self.shutdown.notified() => break,
            }
        }
    }

    /// Pull and merge snapshots from all peers not currently degraded
    ///
    /// Returns the number of peers pulled successfully. A pull also serves as
    /// the probe that lets a degraded peer recover.
    pub async fn anti_entropy_round(&self, store: &RegistryStore) -> usize {
        let pulls = self
            .peers
            .iter()
            .filter(|peer| peer.breaker.allow_request())
            .map(|peer| async move {
                let result = self.pull_from(&peer.address).await;
                match &result {
                    Ok(_) => peer.breaker.record_success(),
                    // Answered, just not serving yet
                    Err(RegistrarError::NotReady(_)) => {}
                    Err(_) => peer.breaker.record_failure(),
                }
                (peer.address.clone(), result)
            });
        let results = futures::future::join_all(pulls).await;
        self.merge_pulled(store, results)
    }

    /// Pull from every peer regardless of breaker state, used while warming up
    ///
    /// Peers that are warming themselves refuse the pull and are not counted.
    pub async fn pull_from_all(&self, store: &RegistryStore) -> usize {
        let pulls = self.peers.iter().map(|peer| async move {
            (peer.address.clone(), self.pull_from(&peer.address).await)
        });
        let results = futures::future::join_all(pulls).await;
        self.merge_pulled(store, results)
    }

    async fn pull_from(&self, address: &str) -> RegistrarResult<RegistrySnapshot> {
        match tokio::time::timeout(self.config.pull_timeout, self.client.pull_snapshot(address))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RegistrarError::peer_unreachable(
                address,
                format!("snapshot pull timed out after {:?}", self.config.pull_timeout),
            )),
        }
    }

    fn merge_pulled(
        &self,
        store: &RegistryStore,
        results: Vec<(String, RegistrarResult<RegistrySnapshot>)>,
    ) -> usize {
        let mut synced = 0;
        for (address, result) in results {
            match result {
                Ok(snapshot) => {
                    let stats = merge_snapshot(store, &snapshot);
                    synced += 1;
                    if stats.applied > 0 || stats.rejected > 0 {
                        info!(
                            peer = %address,
                            leases = snapshot.lease_count(),
                            applied = stats.applied,
                            rejected = stats.rejected,
                            "Merged peer snapshot"
                        );
                    }
                }
                Err(RegistrarError::NotReady(state)) => {
                    debug!(peer = %address, state = %state, "Peer not serving yet, snapshot skipped")
                }
                Err(e) => warn!(peer = %address, "Snapshot pull failed: {}", e),
            }
        }
        synced
    }

    /// Wait until every peer queue is empty or `timeout` elapses
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            for peer in &self.peers {
                if !peer.pending.is_empty() {
                    peer.wake.notify_one();
                }
            }
            if self.backlog() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    backlog = self.backlog(),
                    "Replication flush timed out with records still pending"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Records queued or in flight across all peers
    pub fn backlog(&self) -> usize {
        self.peers.iter().map(|peer| peer.backlog()).sum()
    }

    pub fn peer_statuses(&self) -> Vec<PeerStatus> {
        self.peers.iter().map(|peer| peer.status()).collect()
    }
}

impl RegistryListener for ReplicationProtocol {
    fn on_change(&self, event: &RegistryEvent) {
        if event.origin == ChangeOrigin::Local {
            self.enqueue(&event.record);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use registrar_api::{Lease, LeaseStatus, ReplicationOp, Tombstone};
    use registrar_naming::StoreConfig;

    use super::*;

    struct NoopClient;

    #[async_trait]
    impl PeerClient for NoopClient {
        async fn push_events(
            &self,
            _peer: &str,
            _origin: &str,
            records: &[ReplicationRecord],
        ) -> RegistrarResult<PushEventsResponse> {
            Ok(PushEventsResponse {
                applied: records.len(),
                ..Default::default()
            })
        }

        async fn pull_snapshot(&self, peer: &str) -> RegistrarResult<RegistrySnapshot> {
            Err(RegistrarError::peer_unreachable(peer, "noop"))
        }
    }

    struct WarmingClient;

    #[async_trait]
    impl PeerClient for WarmingClient {
        async fn push_events(
            &self,
            _peer: &str,
            _origin: &str,
            records: &[ReplicationRecord],
        ) -> RegistrarResult<PushEventsResponse> {
            Ok(PushEventsResponse {
                applied: records.len(),
                ..Default::default()
            })
        }

        async fn pull_snapshot(&self, _peer: &str) -> RegistrarResult<RegistrySnapshot> {
            Err(RegistrarError::NotReady("WARMING".to_string()))
        }
    }

    fn lease(instance_id: &str, version: u64, renewed: i64) -> Lease {
        Lease {
            service_name: "billing".to_string(),
            instance_id: instance_id.to_string(),
            endpoint: "10.0.0.5:8080".to_string(),
            metadata: BTreeMap::new(),
            status: LeaseStatus::Up,
            registered_at: 0,
            last_renewed_at: renewed,
            lease_duration_secs: 90,
            version,
            origin: "node-a".to_string(),
        }
    }

    fn protocol(peers: &[&str]) -> ReplicationProtocol {
        let peers: Vec<String> = peers.iter().map(|p| p.to_string()).collect();
        ReplicationProtocol::new(
            "node-a",
            &peers,
            ReplicationConfig::default(),
            Arc::new(NoopClient),
        )
    }

    #[test]
    fn test_backoff_delays() {
        let backoff = BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
            max_attempts: 5,
            jitter_factor: 0.25,
        };
        assert_eq!(backoff.delay_with_jitter(0, 0.5), Duration::ZERO);
        assert_eq!(backoff.delay_with_jitter(1, 0.5), Duration::from_millis(100));
        assert_eq!(backoff.delay_with_jitter(2, 0.5), Duration::from_millis(200));
        assert_eq!(backoff.delay_with_jitter(3, 0.5), Duration::from_millis(300));
        assert_eq!(backoff.delay_with_jitter(1, 0.0), Duration::from_millis(75));

        let jittered = backoff.delay_for_attempt(1);
        assert!(jittered >= Duration::from_millis(75) && jittered <= Duration::from_millis(125));
    }

    #[test]
    fn test_self_is_not_a_peer() {
        let protocol = protocol(&["node-a", "node-b"]);
        assert_eq!(protocol.peer_addresses(), vec!["node-b"]);
    }

    #[test]
    fn test_enqueue_coalesces_per_instance() {
        let protocol = protocol(&["node-b", "node-c"]);
        let v1 = ReplicationRecord::new(ReplicationOp::Register, lease("i-1", 1, 1_000), "node-a");
        let v1_renewed =
            ReplicationRecord::new(ReplicationOp::Renew, lease("i-1", 1, 5_000), "node-a");
        let other = ReplicationRecord::new(ReplicationOp::Register, lease("i-2", 1, 1_000), "node-a");

        protocol.enqueue(&v1);
        protocol.enqueue(&v1_renewed);
        // An older record arriving late does not replace the newer one
        protocol.enqueue(&v1);
        protocol.enqueue(&other);

        assert_eq!(protocol.backlog(), 4);
        let peer = &protocol.peers[0];
        let queued = peer.pending.get("billing@@i-1").unwrap();
        assert_eq!(queued.op, ReplicationOp::Renew);
        assert_eq!(queued.lease.last_renewed_at, 5_000);
    }

    #[test]
    fn test_only_local_events_are_queued() {
        let protocol = protocol(&["node-b"]);
        let record = ReplicationRecord::new(ReplicationOp::Register, lease("i-1", 1, 1_000), "node-c");

        protocol.on_change(&RegistryEvent {
            record: record.clone(),
            origin: ChangeOrigin::Replicated,
        });
        assert_eq!(protocol.backlog(), 0);

        protocol.on_change(&RegistryEvent {
            record,
            origin: ChangeOrigin::Local,
        });
        assert_eq!(protocol.backlog(), 1);
    }

    #[test]
    fn test_apply_records_counts_outcomes() {
        let store = RegistryStore::new("node-b", StoreConfig::default());
        let fresh = ReplicationRecord::new(ReplicationOp::Register, lease("i-1", 2, 2_000), "node-a");
        let stale = ReplicationRecord::new(ReplicationOp::Register, lease("i-1", 1, 1_000), "node-a");
        let mut broken = lease("i-2", 1, 1_000);
        broken.registered_at = 5_000;
        let broken = ReplicationRecord::new(ReplicationOp::Register, broken, "node-a");

        let stats = apply_records(&store, &[fresh, stale, broken]);
        assert_eq!(
            stats,
            MergeStats {
                applied: 1,
                ignored: 1,
                rejected: 1
            }
        );
    }

    #[test]
    fn test_merge_snapshot_applies_tombstones() {
        let store = RegistryStore::new("node-b", StoreConfig::default());
        store
            .apply(&ReplicationRecord::new(
                ReplicationOp::Register,
                lease("i-1", 1, 1_000),
                "node-a",
            ))
            .unwrap();

        let mut services = BTreeMap::new();
        services.insert("billing".to_string(), vec![lease("i-2", 1, 1_000)]);
        let snapshot = RegistrySnapshot {
            node_id: "node-a".to_string(),
            taken_at: 2_000,
            services,
            tombstones: vec![Tombstone {
                service_name: "billing".to_string(),
                instance_id: "i-1".to_string(),
                version: 2,
                timestamp: 1_500,
                origin: "node-a".to_string(),
            }],
        };

        let stats = merge_snapshot(&store, &snapshot);
        assert_eq!(stats.applied, 2);
        assert!(store.get("billing", "i-1").is_none());
        assert!(store.get("billing", "i-2").is_some());
    }

    #[tokio::test]
    async fn test_warming_peer_is_not_counted_or_degraded() {
        let config = ReplicationConfig {
            breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let protocol = ReplicationProtocol::new(
            "node-a",
            &["node-b".to_string()],
            config,
            Arc::new(WarmingClient),
        );
        let store = RegistryStore::new("node-a", StoreConfig::default());

        assert_eq!(protocol.pull_from_all(&store).await, 0);
        for _ in 0..3 {
            assert_eq!(protocol.anti_entropy_round(&store).await, 0);
        }
        assert!(!protocol.peer_statuses()[0].degraded);
    }

    #[test]
    fn test_config_validation() {
        assert!(ReplicationConfig::default().validate().is_ok());
        let config = ReplicationConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
