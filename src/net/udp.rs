//! Position-channel router.
//!
//! One task owns the UDP socket. Clients introduce themselves with a
//! `register_udp` handshake naming their listening port; after that,
//! position datagrams are validated by the named lobby and either corrected
//! back to the sender or fanned out to the rest of the lobby. Stale or
//! malformed datagrams are dropped without reply.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::net::server::Shared;
use crate::util::vec2::Vec2;

/// Parsed inbound datagram
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    /// `register_udp:<name>:<port>` — bind the client's listening endpoint
    Register { name: String, port: u16 },
    /// `position:<name>:<code>:<x>:<y>` — client-reported position claim
    Position {
        name: String,
        code: u32,
        position: Vec2,
    },
}

/// Parse one datagram payload; `None` drops it
pub fn parse_datagram(payload: &str) -> Option<Datagram> {
    let payload = payload.trim_end_matches(['\r', '\n']);
    let (command, rest) = payload.split_once(':')?;
    match command {
        "register_udp" => {
            let (name, port) = rest.split_once(':')?;
            let port: u16 = port.parse().ok()?;
            Some(Datagram::Register {
                name: name.to_string(),
                port,
            })
        }
        "position" => {
            let mut parts = rest.splitn(4, ':');
            let name = parts.next()?;
            let code: u32 = parts.next()?.parse().ok()?;
            let x: f32 = parts.next()?.parse().ok()?;
            let y: f32 = parts.next()?.parse().ok()?;
            Some(Datagram::Position {
                name: name.to_string(),
                code,
                position: Vec2::new(x, y),
            })
        }
        _ => None,
    }
}

/// Run the router until the shutdown signal flips
pub async fn run(shared: Arc<Shared>, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
    let mut buf = [0u8; 512];
    info!("position channel listening");
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("position channel stopped");
                return;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, src)) => {
                    let payload = String::from_utf8_lossy(&buf[..len]);
                    handle_datagram(&shared, &socket, &payload, src).await;
                }
                Err(e) => {
                    warn!("udp recv error: {}", e);
                }
            }
        }
    }
}

async fn handle_datagram(shared: &Shared, socket: &UdpSocket, payload: &str, src: SocketAddr) {
    let Some(datagram) = parse_datagram(payload) else {
        debug!(%src, payload, "dropped malformed datagram");
        return;
    };

    match datagram {
        Datagram::Register { name, port } => {
            // The client listens on its own port; the source port of the
            // handshake datagram is not it.
            let endpoint = SocketAddr::new(src.ip(), port);
            let registered = shared.registry.lock().set_udp_endpoint(&name, endpoint);
            if registered {
                debug!(%endpoint, name, "udp endpoint registered");
                let _ = socket.send_to(b"udp_ack:", endpoint).await;
            } else {
                debug!(%src, name, "udp registration for unknown session");
            }
        }
        Datagram::Position {
            name,
            code,
            position,
        } => {
            // Claims are routed by the embedded identity; only a session
            // that completed the handshake is heard.
            let sender = shared.registry.lock().udp_endpoint(&name);
            let Some(sender) = sender else {
                debug!(name, "position before udp handshake");
                return;
            };
            let Some(lobby) = shared.lobbies.lock().get(code) else {
                return;
            };
            let outcome = match lobby.handle_position(&name, position, &shared.persist) {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!(name, "position rejected: {}", e);
                    return;
                }
            };

            if let Some(line) = outcome.reply_to_sender {
                let _ = socket.send_to(line.as_bytes(), sender).await;
            }
            if let Some((line, recipients)) = outcome.broadcast {
                let endpoints: Vec<SocketAddr> = {
                    let registry = shared.registry.lock();
                    recipients
                        .iter()
                        .filter_map(|r| registry.udp_endpoint(r))
                        .collect()
                };
                for endpoint in endpoints {
                    let _ = socket.send_to(line.as_bytes(), endpoint).await;
                }
            }
        }
    }
}
