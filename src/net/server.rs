//! Server assembly: shared state, listener setup, and the accept loop.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::lobby::manager::LobbyManager;
use crate::net::registry::SessionRegistry;
use crate::net::{handler, udp};
use crate::persist::Persistence;

/// State shared by every connection task and the UDP router
pub struct Shared {
    pub config: ServerConfig,
    pub registry: Mutex<SessionRegistry>,
    pub lobbies: Mutex<LobbyManager>,
    pub persist: Persistence,
}

impl Shared {
    pub fn new(config: ServerConfig) -> Self {
        let persist = Persistence::new(config.result_log_path.clone());
        let lobbies = Mutex::new(LobbyManager::new(config.max_lobbies));
        Self {
            config,
            registry: Mutex::new(SessionRegistry::new()),
            lobbies,
            persist,
        }
    }
}

/// Both listeners, bound and ready to run
pub struct GameServer {
    shared: Arc<Shared>,
    tcp: TcpListener,
    udp: UdpSocket,
}

impl GameServer {
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Self> {
        let tcp = TcpListener::bind((config.bind_address, config.tcp_port)).await?;
        let udp = UdpSocket::bind((config.bind_address, config.udp_port)).await?;
        info!(
            "listening on tcp {}:{} / udp {}:{}",
            config.bind_address, config.tcp_port, config.bind_address, config.udp_port
        );
        Ok(Self {
            shared: Arc::new(Shared::new(config)),
            tcp,
            udp,
        })
    }

    pub fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    /// Accept connections until the shutdown signal flips. The UDP router
    /// runs alongside and is joined before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = tokio::spawn(udp::run(self.shared.clone(), self.udp, shutdown.clone()));

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.tcp.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "connection accepted");
                        let shared = self.shared.clone();
                        tokio::spawn(handler::serve(shared, stream));
                    }
                    Err(e) => {
                        error!("accept error: {}", e);
                    }
                }
            }
        }

        let _ = router.await;
        Ok(())
    }
}
