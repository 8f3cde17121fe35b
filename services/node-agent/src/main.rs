//! nodelink Node Agent
//!
//! Startup sequence:
//!
//! - **Handshake**: registers the node's capabilities with the orchestrator
//! - **Gateway**: connects to the broker and subscribes to control topics
//! - **Coordinator**: applies deploy/delete commands through the runtimes
//! - **Heartbeat Loop**: publishes node information periodically

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nodelink_node_agent::broker::{MqttConnector, MqttSettings};
use nodelink_node_agent::config::Config;
use nodelink_node_agent::resources::SystemResources;
use nodelink_node_agent::{
    heartbeat, BrokerGateway, DeploymentCoordinator, HandshakeClient, MockRuntime,
    RuntimeRegistry, StatusReporter,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        cluster_address = %config.cluster_address,
        cluster_port = config.cluster_port,
        runtimes = ?config.runtimes,
        "Starting nodelink node agent"
    );

    // The mock runtime stands in for every configured engine.
    let mut runtimes = RuntimeRegistry::new();
    for kind in &config.runtimes {
        runtimes.register_shared(kind.as_str(), Arc::new(MockRuntime::new()));
    }

    let capabilities = SystemResources::measure().capabilities(runtimes.kinds());

    let handshake = HandshakeClient::new()?
        .perform_handshake(&config.cluster_address, config.cluster_port, capabilities)
        .await
        .context("handshake with cluster orchestrator failed")?;

    let gateway = Arc::new(BrokerGateway::new(Arc::new(MqttConnector::new(
        MqttSettings {
            keep_alive: config.mqtt_keep_alive(),
        },
    ))));

    let reporter = StatusReporter::new(gateway.clone());
    let coordinator = Arc::new(DeploymentCoordinator::new(runtimes.clone(), reporter));
    gateway.init(
        &handshake.identity,
        &handshake.broker,
        coordinator.control_handlers(),
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat_handle = tokio::spawn(heartbeat::run_heartbeat_loop(
        gateway.clone(),
        config.heartbeat_interval(),
        runtimes.kinds(),
        shutdown_rx,
    ));

    wait_for_shutdown_signal().await;

    // Signal shutdown to all workers
    shutdown_tx.send_replace(true);
    if let Err(e) = heartbeat_handle.await {
        error!(error = %e, "Heartbeat task panicked");
    }
    gateway.shutdown().await;

    info!("Node agent shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received interrupt signal"),
                    _ = terminate.recv() => info!("Received terminate signal"),
                }
                return;
            }
            Err(e) => error!(error = %e, "Unable to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Unable to listen for shutdown signal");
    }
    info!("Received shutdown signal");
}
