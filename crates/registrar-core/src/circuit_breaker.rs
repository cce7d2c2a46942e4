// Per-peer circuit breaker
// A peer whose pushes keep failing is marked degraded until a probe succeeds

use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use registrar_common::current_time_ms;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Peer healthy, replication flows normally
    Closed,
    /// Peer degraded, replication to it is suspended
    Open,
    /// Reset timeout elapsed, the next call is a probe
    HalfOpen,
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed calls before the peer is marked degraded
    pub failure_threshold: u32,
    /// Time a degraded peer is left alone before probing it
    pub reset_timeout: Duration,
    /// Successful probes needed to close again
    pub success_threshold: u32,
    /// Failures older than this no longer count toward the threshold
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 1,
            failure_window: Duration::from_secs(60),
        }
    }
}

/// Lock-free breaker guarding calls to one peer
pub struct CircuitBreaker {
    peer: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure_ms: AtomicI64,
    /// 0 while closed
    opened_at_ms: AtomicI64,
}

impl CircuitBreaker {
    pub fn new(peer: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            peer: peer.into(),
            config,
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_ms: AtomicI64::new(0),
            opened_at_ms: AtomicI64::new(0),
        }
    }

    /// Whether a call may go out now
    ///
    /// An open breaker whose reset timeout elapsed moves to half-open; calls
    /// made while half-open decide whether the peer closes or reopens.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = self.opened_at_ms.load(Ordering::SeqCst);
                let elapsed = current_time_ms().saturating_sub(opened_at);
                if elapsed < self.config.reset_timeout.as_millis() as i64 {
                    return false;
                }
                let probing = self
                    .state
                    .compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok();
                if probing {
                    self.success_count.store(0, Ordering::SeqCst);
                    info!(peer = %self.peer, "Probing degraded peer");
                }
                probing
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let count = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.success_threshold {
                    self.close();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let now = current_time_ms();
                let last = self.last_failure_ms.swap(now, Ordering::SeqCst);
                if last > 0 && now - last > self.config.failure_window.as_millis() as i64 {
                    self.failure_count.store(0, Ordering::SeqCst);
                }
                let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.failure_threshold {
                    self.open();
                }
            }
            // A failed probe sends the peer straight back to degraded
            CircuitState::HalfOpen => self.open(),
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Open or half-open: the peer has not proven healthy since it failed
    pub fn is_degraded(&self) -> bool {
        self.state() != CircuitState::Closed
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    fn open(&self) {
        self.opened_at_ms.store(current_time_ms(), Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        if self.state.swap(STATE_OPEN, Ordering::SeqCst) != STATE_OPEN {
            warn!(
                peer = %self.peer,
                failures = self.failure_count(),
                "Peer marked degraded, replication suspended"
            );
            metrics::counter!("registrar_peer_degraded_total", "peer" => self.peer.clone())
                .increment(1);
        }
    }

    fn close(&self) {
        self.opened_at_ms.store(0, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        if self.state.swap(STATE_CLOSED, Ordering::SeqCst) != STATE_CLOSED {
            info!(peer = %self.peer, "Peer healthy again, replication resumed");
        }
    }
}
