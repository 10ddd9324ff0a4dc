//! Undebate Server - socket-api server for election documents.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use undebate_server::{create_transport, ApiRegistry, Args, ChannelManager, ElectionStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "undebate_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        protocol_version = undebate_proto::PROTOCOL_VERSION,
        "starting undebate server"
    );

    let args = Args::parse();
    let config = args.into_config();

    tracing::info!(
        listen_address = %config.listen_address,
        server_id = %config.server_id,
        max_message_size = config.max_message_size,
        "configuration loaded"
    );

    let store = Arc::new(ElectionStore::new());
    let apis = Arc::new(ApiRegistry::with_default_apis(store));
    tracing::info!(handles = ?apis.handles(), "socket apis registered");

    let transport = create_transport(&config, apis, Arc::new(ChannelManager::new())).await?;

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(());
    });

    tracing::info!(address = %transport.local_addr(), "server ready, accepting connections");
    match transport.run_until_shutdown(shutdown_rx).await {
        Ok(()) => {
            tracing::info!("server shutdown complete");
        }
        Err(e) => {
            tracing::error!(error = %e, "server error");
            return Err(e.into());
        }
    }

    Ok(())
}
