use tokio::sync::watch;
use tracing::{error, info, Level};

use goat_escape::config::ServerConfig;
use goat_escape::net::server::GameServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Goat Escape Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: {} tcp={} udp={}, max_lobbies={}",
        config.bind_address, config.tcp_port, config.udp_port, config.max_lobbies
    );

    let server = GameServer::bind(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut run = tokio::spawn(server.run(shutdown_rx));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = &mut run => {
            if let Ok(Err(e)) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
            let _ = shutdown_tx.send(true);
            // The run task stops accepting and joins the UDP router before
            // it resolves.
            if let Ok(Err(e)) = run.await {
                error!("Server error: {}", e);
            }
        }
    }

    info!("Server stopped");
    Ok(())
}
