//! Expired lease eviction
//!
//! A background sweep removes leases whose renewal window, scaled by the
//! grace factor, has passed. Each removal leaves a tombstone and is announced
//! to store listeners like any other cancellation, so it replicates. While the
//! self-preservation guard is tripped the sweep evicts nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use registrar_api::Tombstone;
use registrar_common::current_time_ms;

use crate::config::EvictionConfig;
use crate::protection::SelfPreservationGuard;
use crate::store::RegistryStore;

/// Result of one sweep
#[derive(Clone, Debug, Default)]
pub struct SweepOutcome {
    pub evicted: Vec<Tombstone>,
    /// Expired leases kept because self-preservation is engaged
    pub deferred: usize,
    pub purged_tombstones: usize,
}

pub struct EvictionScheduler {
    store: Arc<RegistryStore>,
    guard: Arc<SelfPreservationGuard>,
    config: EvictionConfig,
    running: AtomicBool,
    shutdown: Notify,
}

impl EvictionScheduler {
    pub fn new(
        store: Arc<RegistryStore>,
        guard: Arc<SelfPreservationGuard>,
        config: EvictionConfig,
    ) -> Self {
        Self {
            store,
            guard,
            config,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Run one sweep as of `now_ms`
    pub fn sweep(&self, now_ms: i64) -> SweepOutcome {
        let mut outcome = SweepOutcome {
            purged_tombstones: self.store.purge_tombstones(now_ms),
            ..Default::default()
        };

        let expired = self.store.expired_leases(now_ms, self.config.grace_factor);
        if expired.is_empty() {
            return outcome;
        }

        if self.guard.is_tripped() {
            warn!(
                "Self-preservation engaged, deferring eviction of {} expired leases",
                expired.len()
            );
            metrics::counter!("registrar_evictions_deferred_total").increment(expired.len() as u64);
            outcome.deferred = expired.len();
            return outcome;
        }

        for lease in expired {
            // Re-checked under the slot lock: a renewal may have landed since the scan
            if let Some(tombstone) = self.store.evict(
                &lease.service_name,
                &lease.instance_id,
                now_ms,
                self.config.grace_factor,
            ) {
                info!(
                    service = %lease.service_name,
                    instance = %lease.instance_id,
                    last_renewed_at = lease.last_renewed_at,
                    "Evicted expired lease"
                );
                outcome.evicted.push(tombstone);
            }
        }

        metrics::counter!("registrar_evictions_total").increment(outcome.evicted.len() as u64);
        outcome
    }

    /// Sweep once per interval until stopped
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Eviction scheduler already running");
            return;
        }

        info!(
            interval_secs = self.config.interval.as_secs(),
            grace_factor = self.config.grace_factor,
            "Starting eviction scheduler"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = self.sweep(current_time_ms());
                    debug!(
                        evicted = outcome.evicted.len(),
                        deferred = outcome.deferred,
                        purged = outcome.purged_tombstones,
                        "Eviction sweep finished"
                    );
                }
                _ = self.shutdown.notified() => break,
            }
        }

        info!("Eviction scheduler stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{ProtectionConfig, StoreConfig};
    use crate::store::Registration;

    fn setup() -> (Arc<RegistryStore>, Arc<SelfPreservationGuard>, EvictionScheduler) {
        let store = Arc::new(RegistryStore::new("node-a", StoreConfig::default()));
        let guard = Arc::new(SelfPreservationGuard::new(ProtectionConfig::default()));
        let scheduler =
            EvictionScheduler::new(store.clone(), guard.clone(), EvictionConfig::default());
        (store, guard, scheduler)
    }

    #[test]
    fn test_sweep_evicts_only_expired() {
        let (store, _guard, scheduler) = setup();
        let stale = store
            .register(Registration::new("billing", "i-1", "10.0.0.5:8080"))
            .unwrap();
        store
            .register(Registration::new("billing", "i-2", "10.0.0.6:8080").with_lease_duration(600))
            .unwrap();

        // Within the grace window nothing goes
        let outcome = scheduler.sweep(stale.last_renewed_at + 150_000);
        assert!(outcome.evicted.is_empty());

        // 270s without renewal on a 90s lease
        let outcome = scheduler.sweep(stale.last_renewed_at + 270_000);
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].instance_id, "i-1");
        assert!(store.get("billing", "i-1").is_none());
        assert!(store.get("billing", "i-2").is_some());
        assert_eq!(store.tombstone_count(), 1);
    }

    #[test]
    fn test_sweep_defers_while_protected() {
        let (store, guard, scheduler) = setup();
        let lease = store
            .register(Registration::new("billing", "i-1", "10.0.0.5:8080"))
            .unwrap();
        assert!(guard.evaluate(10));

        let outcome = scheduler.sweep(lease.last_renewed_at + 270_000);
        assert_eq!(outcome.deferred, 1);
        assert!(outcome.evicted.is_empty());
        assert!(store.get("billing", "i-1").is_some());
    }

    #[test]
    fn test_sweep_purges_old_tombstones() {
        let (store, _guard, scheduler) = setup();
        store
            .register(Registration::new("billing", "i-1", "10.0.0.5:8080"))
            .unwrap();
        store.cancel("billing", "i-1").unwrap();

        let retention = store.config().tombstone_retention.as_millis() as i64;
        let outcome = scheduler.sweep(current_time_ms() + retention + 1_000);
        assert_eq!(outcome.purged_tombstones, 1);
        assert_eq!(store.tombstone_count(), 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let store = Arc::new(RegistryStore::new("node-a", StoreConfig::default()));
        let guard = Arc::new(SelfPreservationGuard::new(ProtectionConfig::default()));
        let scheduler = Arc::new(EvictionScheduler::new(
            store,
            guard,
            EvictionConfig {
                interval: Duration::from_millis(10),
                ..Default::default()
            },
        ));

        let task = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.stop();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
