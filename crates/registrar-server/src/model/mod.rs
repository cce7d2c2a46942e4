//! Server-side models: configuration, response envelope and shared state

pub mod config;
pub mod response;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use registrar_core::RegistryNode;

pub use config::{Cli, Configuration};

/// State shared by every HTTP handler
pub struct AppState {
    pub node: Arc<RegistryNode>,
    pub prometheus: PrometheusHandle,
}

impl AppState {
    pub fn new(node: Arc<RegistryNode>, prometheus: PrometheusHandle) -> Self {
        Self { node, prometheus }
    }
}
