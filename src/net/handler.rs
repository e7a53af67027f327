//! Per-connection reliable-channel handler.
//!
//! Each accepted TCP connection gets one task running a single select loop:
//! inbound lines, the outbound ping ticker, and the liveness deadline all
//! live here, so the liveness timestamp has exactly one writer. Replies go
//! through the connection's outbound channel; a separate writer task drains
//! it into the socket, keeping slow clients from blocking dispatch.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use crate::game::constants::heartbeat;
use crate::lobby::lobby::Lobby;
use crate::net::protocol::{self, Command};
use crate::net::registry::{sanitize_name, Outbound};
use crate::net::server::Shared;

/// Session state owned by one connection's task
pub(crate) struct Connection {
    shared: Arc<Shared>,
    outbound: Outbound,
    /// Assigned (possibly suffixed) nickname, once `connect` succeeded
    name: Option<String>,
    lobby: Option<Arc<Lobby>>,
    /// Lobby codes this connection spectates, keyed by spectator name
    spectating: Vec<(String, u32)>,
}

/// Drive one reliable connection to completion
pub async fn serve(shared: Arc<Shared>, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(write_half, rx));

    let mut connection = Connection::new(shared, tx.clone());
    let mut lines = BufReader::new(read_half).lines();
    let mut ping_tick = tokio::time::interval(heartbeat::PING_INTERVAL);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    last_seen = Instant::now();
                    connection.dispatch(&line);
                }
                Ok(None) => {
                    debug!(?peer, "connection closed by client");
                    break;
                }
                Err(e) => {
                    debug!(?peer, "read error: {}", e);
                    break;
                }
            },
            _ = ping_tick.tick() => {
                if last_seen.elapsed() >= heartbeat::TIMEOUT {
                    info!(?peer, name = ?connection.name, "liveness timeout");
                    break;
                }
                let _ = tx.send("ping".to_string());
            }
        }
    }

    connection.cleanup();
    // The writer ends once every sender clone is gone
    drop(connection);
    drop(tx);
    let _ = writer.await;
}

async fn write_loop(mut half: OwnedWriteHalf, mut rx: UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        if half.write_all(line.as_bytes()).await.is_err()
            || half.write_all(b"\n").await.is_err()
        {
            break;
        }
    }
}

impl Connection {
    pub(crate) fn new(shared: Arc<Shared>, outbound: Outbound) -> Self {
        Self {
            shared,
            outbound,
            name: None,
            lobby: None,
            spectating: Vec::new(),
        }
    }

    fn reply(&self, line: String) {
        let _ = self.outbound.send(line);
    }

    fn error(&self, message: impl std::fmt::Display) {
        self.reply(format!("error:{}", message));
    }

    /// Parse and execute one inbound line. Every failure path is an advisory
    /// reply; nothing here tears the connection down.
    pub(crate) fn dispatch(&mut self, line: &str) {
        let command = match protocol::parse(line) {
            Ok(command) => command,
            Err(e) => {
                debug!(line, "rejected line: {}", e);
                self.error(e);
                return;
            }
        };

        match command {
            Command::Connect { name } => self.on_connect(&name),
            Command::Username { name } => self.on_username(&name),
            Command::NewLobby => self.on_new_lobby(),
            Command::Lobby { code } => self.on_lobby(code),
            Command::GetLobbies => self.on_get_lobbies(),
            Command::GetPlayers => {
                let names = self.shared.registry.lock().names();
                self.reply(format!("getplayers:{}", names.join(",")));
            }
            Command::GetLobbyPlayers => match &self.lobby {
                Some(lobby) => {
                    self.reply(format!("getlobbyplayers:{}", lobby.member_names().join(",")))
                }
                None => self.error("not_in_lobby"),
            },
            Command::Ready => self.on_ready(true),
            Command::Unready => self.on_ready(false),
            Command::StartGame => self.with_lobby(|conn, lobby| {
                if let Err(e) = lobby.start_game() {
                    conn.error(e);
                }
            }),
            Command::Chat { text } => {
                let Some(name) = self.name.clone() else {
                    return self.error("not_connected");
                };
                self.shared
                    .registry
                    .lock()
                    .broadcast_all(&format!("chat:{}:{}", name, text));
            }
            Command::LobbyChat { text } => self.with_lobby(|conn, lobby| {
                let name = conn.name.clone().unwrap_or_default();
                lobby.broadcast(&format!("lobbychat:{}:{}", name, text));
            }),
            Command::Whisper { target, text } => {
                let Some(name) = self.name.clone() else {
                    return self.error("not_connected");
                };
                let delivered = self
                    .shared
                    .registry
                    .lock()
                    .send_to(&target, &format!("whisper:{},{}", name, text));
                if !delivered {
                    self.error("player_not_found");
                }
            }
            Command::Role { role } => self.with_lobby(|conn, lobby| {
                let name = conn.name.clone().unwrap_or_default();
                if let Err(e) = lobby.confirm_role(&name, role) {
                    conn.error(e);
                }
            }),
            Command::Catch { target } => self.with_lobby(|conn, lobby| {
                let name = conn.name.clone().unwrap_or_default();
                if let Err(e) = lobby.catch(&name, &target, &conn.shared.persist) {
                    conn.error(e);
                }
            }),
            Command::Revive { target } => self.with_lobby(|conn, lobby| {
                let name = conn.name.clone().unwrap_or_default();
                if let Err(e) = lobby.revive(&name, &target) {
                    conn.error(e);
                }
            }),
            Command::Station { id } => self.with_lobby(|conn, lobby| {
                let name = conn.name.clone().unwrap_or_default();
                if let Err(e) = lobby.activate_station(&name, id) {
                    conn.error(e);
                }
            }),
            Command::Terminal { id } => self.with_lobby(|conn, lobby| {
                let name = conn.name.clone().unwrap_or_default();
                if let Err(e) = lobby.activate_terminal(&name, id) {
                    conn.error(e);
                }
            }),
            Command::GetRoles => self.with_lobby(|conn, lobby| {
                conn.reply(lobby.roles_line());
            }),
            Command::GetResults => {
                for line in self.shared.persist.result_lines() {
                    self.reply(format!("result:{}", line));
                }
            }
            Command::GetHighscores => {
                self.reply(format!(
                    "gethighscores:{}",
                    self.shared.persist.highscores_compact()
                ));
            }
            Command::Spectate { name, code } => self.on_spectate(&name, code),
            Command::LeaveSpectate { name, code } => self.on_leave_spectate(&name, code),
            Command::Ping => self.reply("pong".to_string()),
            // Already refreshed liveness in the read loop
            Command::Pong => {}
        }
    }

    fn on_connect(&mut self, desired: &str) {
        if self.name.is_some() {
            return self.error("already_connected");
        }
        let wanted = sanitize_name(desired);

        // A disconnected member of a running game reconnects under its exact
        // old name and is rebound to its session.
        let reconnect = self.shared.lobbies.lock().find_reconnectable(&wanted);
        if let Some(lobby) = reconnect {
            if self
                .shared
                .registry
                .lock()
                .register_exact(&wanted, self.outbound.clone())
            {
                if let Some(replay) = lobby.rebind(&wanted, self.outbound.clone()) {
                    self.name = Some(wanted.clone());
                    self.lobby = Some(lobby);
                    self.reply(format!("confirm:{}", wanted));
                    for event in replay.events {
                        self.reply(event);
                    }
                    self.reply(replay.caught_line);
                    self.reply(replay.station_line);
                    return;
                }
                // Rebind raced away; fall through to a fresh session
                self.shared.registry.lock().remove(&wanted);
            }
        }

        let assigned = self
            .shared
            .registry
            .lock()
            .register(desired, self.outbound.clone());
        info!(name = %assigned, "client connected");
        self.name = Some(assigned.clone());
        self.reply(format!("confirm:{}", assigned));
    }

    fn on_username(&mut self, desired: &str) {
        let Some(current) = self.name.clone() else {
            return self.error("not_connected");
        };
        if self.lobby.is_some() {
            return self.error("in_lobby");
        }
        match self.shared.registry.lock().rename(&current, desired) {
            Some(assigned) => {
                self.name = Some(assigned.clone());
                self.reply(format!("confirm:{}", assigned));
            }
            None => self.error("not_connected"),
        }
    }

    fn on_new_lobby(&mut self) {
        let Some(name) = self.name.clone() else {
            return self.error("not_connected");
        };
        if self.lobby.is_some() {
            return self.error("already_in_lobby");
        }
        let Some(lobby) = self.shared.lobbies.lock().create() else {
            return self.error("server_full");
        };
        match lobby.join(&name, self.outbound.clone()) {
            Ok(()) => {
                self.reply(format!("lobby:{}", lobby.code));
                self.lobby = Some(lobby);
            }
            Err(e) => {
                let code = lobby.code;
                self.shared.lobbies.lock().remove_if_empty(code);
                self.error(e);
            }
        }
    }

    fn on_lobby(&mut self, code: u32) {
        // Code 0 leaves the current lobby
        if code == 0 {
            let Some(lobby) = self.lobby.take() else {
                return self.error("not_in_lobby");
            };
            let name = self.name.clone().unwrap_or_default();
            lobby.leave(&name);
            self.shared.lobbies.lock().remove_if_empty(lobby.code);
            self.reply("lobby:0".to_string());
            return;
        }

        let Some(name) = self.name.clone() else {
            return self.error("not_connected");
        };
        if self.lobby.is_some() {
            return self.error("already_in_lobby");
        }
        let Some(lobby) = self.shared.lobbies.lock().get(code) else {
            return self.error("lobby_not_found");
        };
        match lobby.join(&name, self.outbound.clone()) {
            Ok(()) => {
                self.reply(format!("lobby:{}", code));
                self.lobby = Some(lobby);
            }
            Err(e) => self.error(e),
        }
    }

    fn on_get_lobbies(&self) {
        let infos = self.shared.lobbies.lock().list();
        let entries: Vec<String> = infos
            .iter()
            .map(|info| {
                format!(
                    "{}={}/{} [{}]",
                    info.code,
                    info.member_count,
                    info.capacity,
                    info.phase.as_str()
                )
            })
            .collect();
        self.reply(format!("getlobbies:{}", entries.join(",")));
    }

    fn on_ready(&mut self, ready: bool) {
        self.with_lobby(|conn, lobby| {
            let name = conn.name.clone().unwrap_or_default();
            if let Err(e) = lobby.set_ready(&name, ready) {
                conn.error(e);
            }
        });
    }

    fn on_spectate(&mut self, name: &str, code: u32) {
        let spectator = sanitize_name(name);
        if self
            .spectating
            .iter()
            .any(|(n, c)| *n == spectator && *c == code)
        {
            return self.error("already_spectating");
        }
        let Some(lobby) = self.shared.lobbies.lock().get(code) else {
            return self.error("lobby_not_found");
        };
        lobby.add_spectator(&spectator, self.outbound.clone());
        self.spectating.push((spectator, code));
    }

    fn on_leave_spectate(&mut self, name: &str, code: u32) {
        let spectator = sanitize_name(name);
        let Some(idx) = self
            .spectating
            .iter()
            .position(|(n, c)| *n == spectator && *c == code)
        else {
            return self.error("not_spectating");
        };
        self.spectating.remove(idx);
        if let Some(lobby) = self.shared.lobbies.lock().get(code) {
            lobby.remove_spectator(&spectator);
        }
    }

    fn with_lobby(&mut self, f: impl FnOnce(&mut Self, Arc<Lobby>)) {
        match self.lobby.clone() {
            Some(lobby) => f(self, lobby),
            None => self.error("not_in_lobby"),
        }
    }

    /// Tear down this connection's presence. A member of a running game keeps
    /// a suspended membership for reconnect; everything else is removed.
    pub(crate) fn cleanup(&mut self) {
        for (spectator, code) in self.spectating.drain(..) {
            if let Some(lobby) = self.shared.lobbies.lock().get(code) {
                lobby.remove_spectator(&spectator);
            }
        }
        if let Some(lobby) = self.lobby.take() {
            let name = self.name.clone().unwrap_or_default();
            let empty = lobby.disconnect(&name);
            if empty {
                self.shared.lobbies.lock().remove_if_empty(lobby.code);
            }
        }
        if let Some(name) = self.name.take() {
            if self.shared.registry.lock().remove(&name).is_none() {
                warn!(name = %name, "registry entry already gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn shared() -> Arc<Shared> {
        Arc::new(Shared::new(ServerConfig::default()))
    }

    fn client(shared: &Arc<Shared>) -> (Connection, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(shared.clone(), tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_connect_confirms_assigned_name() {
        let shared = shared();
        let (mut conn, mut rx) = client(&shared);

        conn.dispatch("connect:Alice");
        assert_eq!(drain(&mut rx), vec!["confirm:Alice"]);

        let (mut conn2, mut rx2) = client(&shared);
        conn2.dispatch("connect:Alice");
        assert_eq!(drain(&mut rx2), vec!["confirm:Alice_1"]);
    }

    #[test]
    fn test_double_connect_rejected() {
        let shared = shared();
        let (mut conn, mut rx) = client(&shared);
        conn.dispatch("connect:Alice");
        drain(&mut rx);

        conn.dispatch("connect:Alice");
        assert_eq!(drain(&mut rx), vec!["error:already_connected"]);
    }

    #[test]
    fn test_commands_before_connect_rejected() {
        let shared = shared();
        let (mut conn, mut rx) = client(&shared);

        conn.dispatch("newlobby:");
        conn.dispatch("chat:hi");
        let lines = drain(&mut rx);
        assert_eq!(lines, vec!["error:not_connected", "error:not_connected"]);
    }

    #[test]
    fn test_malformed_and_unknown_lines() {
        let shared = shared();
        let (mut conn, mut rx) = client(&shared);

        conn.dispatch("startgame");
        conn.dispatch("frobnicate:1");
        let lines = drain(&mut rx);
        assert_eq!(lines[0], "error:malformed_command");
        assert_eq!(lines[1], "error:unknown_command frobnicate");
    }

    #[test]
    fn test_lobby_create_join_and_directory() {
        let shared = shared();
        let (mut alice, mut alice_rx) = client(&shared);
        let (mut bob, mut bob_rx) = client(&shared);
        alice.dispatch("connect:Alice");
        bob.dispatch("connect:Bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        alice.dispatch("newlobby:");
        assert_eq!(drain(&mut alice_rx), vec!["lobby:1000"]);

        bob.dispatch("lobby:1000");
        assert_eq!(drain(&mut bob_rx), vec!["lobby:1000"]);
        // Alice sees Bob arrive
        assert_eq!(drain(&mut alice_rx), vec!["joined:Bob"]);

        bob.dispatch("getlobbies:");
        assert_eq!(drain(&mut bob_rx), vec!["getlobbies:1000=2/4 [OPEN]"]);

        bob.dispatch("getlobbyplayers:");
        assert_eq!(drain(&mut bob_rx), vec!["getlobbyplayers:Alice,Bob"]);
    }

    #[test]
    fn test_join_unknown_lobby() {
        let shared = shared();
        let (mut conn, mut rx) = client(&shared);
        conn.dispatch("connect:Alice");
        drain(&mut rx);

        conn.dispatch("lobby:9999");
        assert_eq!(drain(&mut rx), vec!["error:lobby_not_found"]);
    }

    #[test]
    fn test_leave_with_code_zero_destroys_empty_lobby() {
        let shared = shared();
        let (mut conn, mut rx) = client(&shared);
        conn.dispatch("connect:Alice");
        conn.dispatch("newlobby:");
        drain(&mut rx);

        conn.dispatch("lobby:0");
        assert_eq!(drain(&mut rx), vec!["lobby:0"]);
        assert!(shared.lobbies.lock().is_empty());
    }

    #[test]
    fn test_chat_reaches_all_whisper_one() {
        let shared = shared();
        let (mut alice, mut alice_rx) = client(&shared);
        let (mut bob, mut bob_rx) = client(&shared);
        alice.dispatch("connect:Alice");
        bob.dispatch("connect:Bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        alice.dispatch("chat:hello");
        assert_eq!(drain(&mut bob_rx), vec!["chat:Alice:hello"]);
        assert_eq!(drain(&mut alice_rx), vec!["chat:Alice:hello"]);

        alice.dispatch("whisper:Bob,psst");
        assert_eq!(drain(&mut bob_rx), vec!["whisper:Alice,psst"]);
        assert!(drain(&mut alice_rx).is_empty());

        alice.dispatch("whisper:Nobody,psst");
        assert_eq!(drain(&mut alice_rx), vec!["error:player_not_found"]);
    }

    #[test]
    fn test_ping_gets_pong() {
        let shared = shared();
        let (mut conn, mut rx) = client(&shared);
        conn.dispatch("ping");
        assert_eq!(drain(&mut rx), vec!["pong"]);
        conn.dispatch("pong");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_full_game_flow_over_dispatch() {
        let shared = shared();
        let (mut alice, mut alice_rx) = client(&shared);
        let (mut bob, mut bob_rx) = client(&shared);
        alice.dispatch("connect:Alice");
        bob.dispatch("connect:Bob");
        alice.dispatch("newlobby:");
        bob.dispatch("lobby:1000");
        alice.dispatch("ready:");
        bob.dispatch("ready:");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        alice.dispatch("startgame:");
        let lines = drain(&mut bob_rx);
        assert!(lines.iter().any(|l| l == "game_started:"));
        assert!(lines.iter().any(|l| l.starts_with("roles:")));

        bob.dispatch("getroles:");
        let lines = drain(&mut bob_rx);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("roles:"));
    }

    #[test]
    fn test_startgame_not_ready_is_advisory() {
        let shared = shared();
        let (mut alice, mut alice_rx) = client(&shared);
        alice.dispatch("connect:Alice");
        alice.dispatch("newlobby:");
        drain(&mut alice_rx);

        alice.dispatch("startgame:");
        assert_eq!(drain(&mut alice_rx), vec!["error:not_all_ready"]);
    }

    #[test]
    fn test_disconnect_in_game_allows_reconnect_with_replay() {
        let shared = shared();
        let (mut alice, mut alice_rx) = client(&shared);
        let (mut bob, mut bob_rx) = client(&shared);
        alice.dispatch("connect:Alice");
        bob.dispatch("connect:Bob");
        alice.dispatch("newlobby:");
        bob.dispatch("lobby:1000");
        alice.dispatch("ready:");
        bob.dispatch("ready:");
        alice.dispatch("startgame:");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        alice.cleanup();
        assert_eq!(drain(&mut bob_rx), vec!["left:Alice"]);

        // New connection, same name: rebinds instead of suffixing
        let (mut alice2, mut alice2_rx) = client(&shared);
        alice2.dispatch("connect:Alice");
        let lines = drain(&mut alice2_rx);
        assert_eq!(lines[0], "confirm:Alice");
        assert!(lines.iter().any(|l| l.starts_with("roles:")));
        assert!(lines.iter().any(|l| l.starts_with("caught_status:")));
        assert!(lines.iter().any(|l| l.starts_with("station_status:")));
    }

    #[test]
    fn test_disconnect_pregame_frees_name_and_lobby() {
        let shared = shared();
        let (mut alice, mut alice_rx) = client(&shared);
        alice.dispatch("connect:Alice");
        alice.dispatch("newlobby:");
        drain(&mut alice_rx);

        alice.cleanup();
        assert!(shared.lobbies.lock().is_empty());
        assert!(!shared.registry.lock().contains("Alice"));
    }

    #[test]
    fn test_username_rename_outside_lobby_only() {
        let shared = shared();
        let (mut conn, mut rx) = client(&shared);
        conn.dispatch("connect:Alice");
        drain(&mut rx);

        conn.dispatch("username:Alicia");
        assert_eq!(drain(&mut rx), vec!["confirm:Alicia"]);

        conn.dispatch("newlobby:");
        drain(&mut rx);
        conn.dispatch("username:Someone");
        assert_eq!(drain(&mut rx), vec!["error:in_lobby"]);
    }

    #[test]
    fn test_spectate_receives_lobby_traffic() {
        let shared = shared();
        let (mut alice, mut alice_rx) = client(&shared);
        alice.dispatch("connect:Alice");
        alice.dispatch("newlobby:");
        drain(&mut alice_rx);

        let (mut eve, mut eve_rx) = client(&shared);
        eve.dispatch("spectate:Eve:1000");
        alice.dispatch("lobbychat:hello");
        assert!(drain(&mut eve_rx).iter().any(|l| l == "lobbychat:Alice:hello"));

        eve.dispatch("leaveSpectate:Eve:1000");
        alice.dispatch("lobbychat:again");
        assert!(drain(&mut eve_rx).is_empty());
    }

    #[test]
    fn test_repeated_spectate_is_deduped() {
        let shared = shared();
        let (mut alice, mut alice_rx) = client(&shared);
        alice.dispatch("connect:Alice");
        alice.dispatch("newlobby:");
        drain(&mut alice_rx);

        let (mut eve, mut eve_rx) = client(&shared);
        eve.dispatch("spectate:Eve:1000");
        eve.dispatch("spectate:Eve:1000");
        assert_eq!(drain(&mut eve_rx), vec!["error:already_spectating"]);

        // One spectator entry means one copy of each broadcast
        alice.dispatch("lobbychat:hello");
        let lines = drain(&mut eve_rx);
        assert_eq!(
            lines.iter().filter(|l| *l == "lobbychat:Alice:hello").count(),
            1
        );

        // ... and a single leave fully detaches
        eve.dispatch("leaveSpectate:Eve:1000");
        drain(&mut eve_rx);
        alice.dispatch("lobbychat:again");
        assert!(drain(&mut eve_rx).is_empty());
    }

    #[test]
    fn test_gethighscores_empty() {
        let shared = shared();
        let (mut conn, mut rx) = client(&shared);
        conn.dispatch("gethighscores:");
        assert_eq!(drain(&mut rx), vec!["gethighscores:|"]);
    }
}
