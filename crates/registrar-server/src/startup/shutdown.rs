//! Graceful shutdown
//!
//! Ctrl+C or SIGTERM triggers one broadcast signal. The node is then drained
//! (new registrations refused, background tasks stopped, replication flushed)
//! before the HTTP server stops, and is finally marked stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use actix_web::dev::ServerHandle;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use registrar_core::{NodeState, RegistryNode};

#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub fn shutdown(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown was triggered, also when that happened earlier
    pub async fn wait(&self) {
        let mut receiver = self.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = receiver.recv().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the OS signal listener
pub fn wait_for_shutdown_signal() -> ShutdownSignal {
    let shutdown = ShutdownSignal::new();
    let trigger = shutdown.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
            _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
        }

        trigger.shutdown();
    });

    shutdown
}

/// Drain the node, stop the HTTP server, then mark the node stopped
pub async fn shutdown_node(node: &RegistryNode, server: &ServerHandle) {
    match node.state() {
        NodeState::Warming | NodeState::Serving => {
            if let Err(e) = node.drain().await {
                warn!("Drain failed: {}", e);
            }
        }
        state => info!(%state, "Node not serving, skipping drain"),
    }

    server.stop(true).await;
    info!("HTTP server stopped");

    if node.state() != NodeState::Stopped
        && let Err(e) = node.stop()
    {
        warn!("Stop failed: {}", e);
    }
}
