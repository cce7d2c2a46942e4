//! Registrar server entry point

use std::sync::Arc;

use tracing::{error, info};

use registrar_core::{HttpPeerClient, RegistryNode};
use registrar_server::{
    metrics,
    model::{AppState, Configuration},
    startup,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;
    let _logging_guard = startup::init_logging(&configuration.logging_config()?)?;
    let prometheus = metrics::init_metrics()?;

    let node_config = configuration.node_config()?;
    let request_timeout = node_config
        .replication
        .push_timeout
        .max(node_config.replication.pull_timeout);
    let client = Arc::new(HttpPeerClient::new(
        configuration.peer_connect_timeout()?,
        request_timeout,
    )?);
    info!(
        node = %node_config.node_id,
        peers = ?node_config.peers,
        "Starting registry node"
    );
    let node = Arc::new(RegistryNode::new(node_config, client)?);

    let shutdown = startup::wait_for_shutdown_signal();

    // Bound before warm-up so peers can pull from this node while it warms
    let address = configuration.server_address()?;
    let port = configuration.server_port()?;
    let server = startup::http_server(
        Arc::new(AppState::new(node.clone(), prometheus)),
        &address,
        port,
        configuration.server_shutdown_timeout()?,
    )?;
    let server_handle = server.handle();
    let server_task = actix_rt::spawn(server);
    info!("HTTP server listening on {}:{}", address, port);

    tokio::select! {
        result = node.start() => {
            if let Err(e) = result {
                error!("Node failed to start: {}", e);
                shutdown.shutdown();
            }
        }
        _ = shutdown.wait() => info!("Shutdown requested during warm-up"),
    }

    shutdown.wait().await;
    startup::shutdown_node(&node, &server_handle).await;

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP server error: {}", e),
        Err(e) => error!("HTTP server task failed: {}", e),
    }
    info!("Registrar stopped");
    Ok(())
}
