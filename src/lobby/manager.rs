//! Lobby directory: code allocation, lookup, and lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::game::constants::lobby as lobby_consts;
use crate::lobby::lobby::{Lobby, LobbyInfo};

/// Owns every live lobby; codes are sequential from a fixed base and never
/// reused within a process lifetime.
pub struct LobbyManager {
    lobbies: HashMap<u32, Arc<Lobby>>,
    next_code: u32,
    max_lobbies: usize,
}

impl LobbyManager {
    pub fn new(max_lobbies: usize) -> Self {
        Self {
            lobbies: HashMap::new(),
            next_code: lobby_consts::FIRST_CODE,
            max_lobbies,
        }
    }

    /// Create a fresh lobby; `None` when the lobby cap is reached
    pub fn create(&mut self) -> Option<Arc<Lobby>> {
        if self.lobbies.len() >= self.max_lobbies {
            return None;
        }
        let code = self.next_code;
        self.next_code += 1;
        let lobby = Arc::new(Lobby::new(code));
        self.lobbies.insert(code, lobby.clone());
        info!(code, "lobby created");
        Some(lobby)
    }

    pub fn get(&self, code: u32) -> Option<Arc<Lobby>> {
        self.lobbies.get(&code).cloned()
    }

    /// Drop a lobby once its last member is gone
    pub fn remove_if_empty(&mut self, code: u32) {
        let empty = self.lobbies.get(&code).is_some_and(|l| l.is_empty());
        if empty {
            self.lobbies.remove(&code);
            info!(code, "lobby destroyed");
        }
    }

    /// Directory listing, ordered by code
    pub fn list(&self) -> Vec<LobbyInfo> {
        let mut infos: Vec<LobbyInfo> = self.lobbies.values().map(|l| l.info()).collect();
        infos.sort_by_key(|info| info.code);
        infos
    }

    /// Find the lobby `name` is currently a member of
    pub fn find_by_member(&self, name: &str) -> Option<Arc<Lobby>> {
        self.lobbies.values().find(|l| l.has_member(name)).cloned()
    }

    /// Find the running game that holds a suspended membership for `name`
    pub fn find_reconnectable(&self, name: &str) -> Option<Arc<Lobby>> {
        self.lobbies.values().find(|l| l.can_rebind(name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::lobby::LobbyPhase;
    use tokio::sync::mpsc;

    #[test]
    fn test_codes_are_sequential_from_base() {
        let mut manager = LobbyManager::new(16);
        let a = manager.create().unwrap();
        let b = manager.create().unwrap();
        assert_eq!(a.code, lobby_consts::FIRST_CODE);
        assert_eq!(b.code, lobby_consts::FIRST_CODE + 1);
    }

    #[test]
    fn test_cap_enforced() {
        let mut manager = LobbyManager::new(1);
        assert!(manager.create().is_some());
        assert!(manager.create().is_none());
    }

    #[test]
    fn test_remove_if_empty_keeps_occupied_lobbies() {
        let mut manager = LobbyManager::new(16);
        let lobby = manager.create().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        lobby.join("Alice", tx).unwrap();

        manager.remove_if_empty(lobby.code);
        assert_eq!(manager.len(), 1);

        lobby.leave("Alice");
        manager.remove_if_empty(lobby.code);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_list_ordered_by_code() {
        let mut manager = LobbyManager::new(16);
        for _ in 0..3 {
            manager.create();
        }
        let infos = manager.list();
        let codes: Vec<u32> = infos.iter().map(|i| i.code).collect();
        assert_eq!(
            codes,
            vec![
                lobby_consts::FIRST_CODE,
                lobby_consts::FIRST_CODE + 1,
                lobby_consts::FIRST_CODE + 2
            ]
        );
        assert!(infos.iter().all(|i| i.phase == LobbyPhase::Open));
    }

    #[test]
    fn test_find_reconnectable() {
        let mut manager = LobbyManager::new(16);
        let lobby = manager.create().unwrap();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        lobby.join("Alice", tx_a).unwrap();
        lobby.join("Bob", tx_b).unwrap();
        lobby.set_ready("Alice", true).unwrap();
        lobby.set_ready("Bob", true).unwrap();
        lobby.start_game().unwrap();

        assert!(manager.find_reconnectable("Alice").is_none());
        lobby.disconnect("Alice");
        let found = manager.find_reconnectable("Alice").unwrap();
        assert_eq!(found.code, lobby.code);
    }
}
