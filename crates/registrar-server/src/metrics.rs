//! Prometheus metrics
//!
//! Counters are emitted where the events happen (store, eviction, guard,
//! replication); this module describes them, installs the exporter and
//! refreshes the point-in-time gauges on each scrape.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use registrar_core::RegistryNode;

/// Install the global recorder and describe every metric
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    tracing::info!("Metrics initialized");
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!("http_requests_total", "Total number of HTTP requests received");
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "http_requests_errors_total",
        "Total number of HTTP requests answered with an error status"
    );

    describe_counter!("registrar_registrations_total", "Accepted registrations");
    describe_counter!("registrar_renewals_total", "Accepted renewals");
    describe_counter!("registrar_cancellations_total", "Cancelled leases");
    describe_counter!("registrar_evictions_total", "Leases evicted after expiry");
    describe_counter!(
        "registrar_evictions_deferred_total",
        "Expired leases kept because self-preservation was active"
    );
    describe_gauge!(
        "registrar_self_preservation_active",
        "1 while eviction is suspended by self-preservation"
    );
    describe_gauge!("registrar_node_state", "Lifecycle state of this node (0 starting .. 4 stopped)");

    describe_counter!("registrar_query_cache_hits_total", "Lookup cache hits");
    describe_counter!("registrar_query_cache_misses_total", "Lookup cache misses");

    describe_counter!(
        "registrar_replication_pushed_total",
        "Records delivered to peers"
    );
    describe_counter!(
        "registrar_replication_failures_total",
        "Push attempts to peers that failed"
    );
    describe_counter!(
        "registrar_replication_dropped_total",
        "Queued records dropped because their peer was degraded"
    );
    describe_counter!(
        "registrar_replication_applied_total",
        "Records received from peers and applied"
    );
    describe_counter!(
        "registrar_replication_ignored_total",
        "Records received from peers that were stale"
    );
    describe_counter!(
        "registrar_peer_degraded_total",
        "Times a peer was marked degraded"
    );

    describe_gauge!("registrar_leases", "Live leases in the store");
    describe_gauge!("registrar_services", "Services with at least one live lease");
    describe_gauge!("registrar_tombstones", "Retained removal tombstones");
    describe_gauge!(
        "registrar_replication_backlog",
        "Records queued or in flight to peers"
    );
    describe_gauge!("registrar_peers_degraded", "Peers currently marked degraded");
}

/// Refresh gauges that are sampled rather than counted
pub fn update_node_gauges(node: &RegistryNode) {
    let store = node.store();
    gauge!("registrar_leases").set(store.lease_count() as f64);
    gauge!("registrar_services").set(store.service_count() as f64);
    gauge!("registrar_tombstones").set(store.tombstone_count() as f64);
    gauge!("registrar_replication_backlog").set(node.replication().backlog() as f64);
    let degraded = node
        .replication()
        .peer_statuses()
        .iter()
        .filter(|peer| peer.degraded)
        .count();
    gauge!("registrar_peers_degraded").set(degraded as f64);
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
    histogram!("http_request_duration_seconds", "method" => method.to_string(), "path" => path.to_string()).record(duration_secs);

    if status >= 400 {
        counter!("http_requests_errors_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
    }
}

pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = timer.elapsed_secs();
        assert!(elapsed >= 0.01);
        assert!(elapsed < 1.0);
    }

    #[test]
    fn test_local_recorder_renders_http_metrics() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_http_request("GET", "/apps/{service}", 200, 0.002);
            record_http_request("PUT", "/apps/{service}/{instance_id}", 404, 0.001);
        });

        let rendered = handle.render();
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("http_requests_errors_total"));
        assert!(rendered.contains("status=\"404\""));
    }
}
