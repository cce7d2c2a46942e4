//! Self-preservation guard
//!
//! Counts renewals per observation window and compares them with what the
//! current lease population should produce. When renewals fall below the
//! threshold the guard trips and eviction is suspended: a sudden drop across
//! many clients is more likely a network partition on our side than a mass
//! failure of clients. Protection lifts after a configured number of
//! consecutive healthy windows.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use registrar_api::ProtectionStatus;

use crate::config::ProtectionConfig;
use crate::store::{RegistryEvent, RegistryListener, RegistryStore};

pub struct SelfPreservationGuard {
    config: ProtectionConfig,
    tripped: AtomicBool,
    /// Renewals seen in the open window
    renewals: AtomicU64,
    last_observed: AtomicU64,
    last_expected: AtomicU64,
    healthy_windows: AtomicU32,
    running: AtomicBool,
    shutdown: Notify,
}

impl SelfPreservationGuard {
    pub fn new(config: ProtectionConfig) -> Self {
        Self {
            config,
            tripped: AtomicBool::new(false),
            renewals: AtomicU64::new(0),
            last_observed: AtomicU64::new(0),
            last_expected: AtomicU64::new(0),
            healthy_windows: AtomicU32::new(0),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    pub fn record_renewal(&self) {
        self.renewals.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether eviction is currently suspended
    pub fn is_tripped(&self) -> bool {
        self.config.enabled && self.tripped.load(Ordering::SeqCst)
    }

    /// Close the open window and re-evaluate against `lease_count` leases
    ///
    /// Returns whether protection is engaged afterwards.
    pub fn evaluate(&self, lease_count: usize) -> bool {
        let observed = self.renewals.swap(0, Ordering::SeqCst);
        let expected = lease_count as f64 * self.config.renewals_per_lease();
        self.last_observed.store(observed, Ordering::SeqCst);
        self.last_expected
            .store(expected.ceil() as u64, Ordering::SeqCst);

        if !self.config.enabled {
            return false;
        }

        let healthy = lease_count == 0 || observed as f64 >= expected * self.config.renewal_threshold;
        if healthy {
            if self.tripped.load(Ordering::SeqCst) {
                let windows = self.healthy_windows.fetch_add(1, Ordering::SeqCst) + 1;
                if windows >= self.config.recovery_windows {
                    self.tripped.store(false, Ordering::SeqCst);
                    self.healthy_windows.store(0, Ordering::SeqCst);
                    info!(
                        observed,
                        expected, "Renewals recovered, self-preservation lifted"
                    );
                }
            }
        } else {
            self.healthy_windows.store(0, Ordering::SeqCst);
            if !self.tripped.swap(true, Ordering::SeqCst) {
                warn!(
                    observed,
                    expected,
                    threshold = self.config.renewal_threshold,
                    "Renewals below threshold, self-preservation engaged and eviction suspended"
                );
            }
        }

        let tripped = self.is_tripped();
        metrics::gauge!("registrar_self_preservation_active").set(if tripped { 1.0 } else { 0.0 });
        debug!(observed, expected, tripped, "Renewal window closed");
        tripped
    }

    pub fn status(&self) -> ProtectionStatus {
        ProtectionStatus {
            enabled: self.config.enabled,
            tripped: self.is_tripped(),
            expected_renewals: self.last_expected.load(Ordering::SeqCst),
            observed_renewals: self.last_observed.load(Ordering::SeqCst),
            threshold: self.config.renewal_threshold,
        }
    }

    /// Evaluate once per window until stopped
    pub async fn start(&self, store: Arc<RegistryStore>) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Self-preservation guard already running");
            return;
        }
        info!(
            window_secs = self.config.window.as_secs(),
            enabled = self.config.enabled,
            "Starting self-preservation guard"
        );

        let window = self.config.window;
        let mut interval = tokio::time::interval_at(Instant::now() + window, window);
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = interval.tick() => {
                    self.evaluate(store.lease_count());
                }
                _ = self.shutdown.notified() => break,
            }
        }

        info!("Self-preservation guard stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }
}

impl RegistryListener for SelfPreservationGuard {
    fn on_change(&self, event: &RegistryEvent) {
        if event.is_renewal() {
            self.record_renewal();
        }
    }
}
