//! Process-wide session registry.
//!
//! Maps assigned nicknames to client handles (reliable outbound sink plus the
//! registered UDP endpoint). Owns nickname sanitization and the deterministic
//! `_1`, `_2`, ... collision suffixing; the server always informs the client
//! of the name actually assigned.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::game::constants::identity;

/// Outbound message sink for one reliable connection. A plain channel sender
/// so tests can substitute a capture channel for the socket writer.
pub type Outbound = mpsc::UnboundedSender<String>;

/// Registry entry for one live connection
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub outbound: Outbound,
    /// Set by the `register_udp` handshake
    pub udp_endpoint: Option<SocketAddr>,
}

/// Nickname → handle map; all mutation goes through the owning mutex
#[derive(Debug, Default)]
pub struct SessionRegistry {
    clients: HashMap<String, ClientHandle>,
}

/// Strip control and separator characters and cap the length. An empty
/// result falls back to a generic name.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() && !c.is_whitespace() && *c != ':' && *c != ',')
        .take(identity::MAX_NAME_LEN)
        .collect();
    if cleaned.is_empty() {
        "Player".to_string()
    } else {
        cleaned
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the requested name, suffixing until unique. Returns the
    /// name actually assigned.
    pub fn register(&mut self, desired: &str, outbound: Outbound) -> String {
        let base = sanitize_name(desired);
        let mut assigned = base.clone();
        let mut suffix = 0u32;
        while self.clients.contains_key(&assigned) {
            suffix += 1;
            assigned = format!("{}_{}", base, suffix);
        }
        self.clients.insert(
            assigned.clone(),
            ClientHandle {
                outbound,
                udp_endpoint: None,
            },
        );
        assigned
    }

    /// Register under an exact name (reconnect rebinding). Fails if taken.
    pub fn register_exact(&mut self, name: &str, outbound: Outbound) -> bool {
        if self.clients.contains_key(name) {
            return false;
        }
        self.clients.insert(
            name.to_string(),
            ClientHandle {
                outbound,
                udp_endpoint: None,
            },
        );
        true
    }

    /// Re-register under a new name, keeping the handle. Returns the assigned
    /// name, or `None` if the old name was not registered.
    pub fn rename(&mut self, old: &str, desired: &str) -> Option<String> {
        let handle = self.clients.remove(old)?;
        let base = sanitize_name(desired);
        let mut assigned = base.clone();
        let mut suffix = 0u32;
        while self.clients.contains_key(&assigned) {
            suffix += 1;
            assigned = format!("{}_{}", base, suffix);
        }
        self.clients.insert(assigned.clone(), handle);
        Some(assigned)
    }

    pub fn remove(&mut self, name: &str) -> Option<ClientHandle> {
        self.clients.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Send a line to one client; `false` if unknown or gone
    pub fn send_to(&self, name: &str, line: &str) -> bool {
        match self.clients.get(name) {
            Some(handle) => handle.outbound.send(line.to_string()).is_ok(),
            None => false,
        }
    }

    /// Send a line to every connected client
    pub fn broadcast_all(&self, line: &str) {
        for handle in self.clients.values() {
            let _ = handle.outbound.send(line.to_string());
        }
    }

    pub fn set_udp_endpoint(&mut self, name: &str, endpoint: SocketAddr) -> bool {
        match self.clients.get_mut(name) {
            Some(handle) => {
                handle.udp_endpoint = Some(endpoint);
                true
            }
            None => false,
        }
    }

    pub fn udp_endpoint(&self, name: &str) -> Option<SocketAddr> {
        self.clients.get(name).and_then(|h| h.udp_endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (Outbound, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_sanitize_strips_separators() {
        assert_eq!(sanitize_name("Al:ice,\n"), "Alice");
        assert_eq!(sanitize_name("  Bob  "), "Bob");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "x".repeat(identity::MAX_NAME_LEN * 2);
        assert_eq!(sanitize_name(&long).len(), identity::MAX_NAME_LEN);
    }

    #[test]
    fn test_sanitize_empty_falls_back() {
        assert_eq!(sanitize_name(""), "Player");
        assert_eq!(sanitize_name(":::"), "Player");
    }

    #[test]
    fn test_register_suffixes_collisions() {
        let mut registry = SessionRegistry::new();
        assert_eq!(registry.register("Alice", sink().0), "Alice");
        assert_eq!(registry.register("Alice", sink().0), "Alice_1");
        assert_eq!(registry.register("Alice", sink().0), "Alice_2");
    }

    #[test]
    fn test_assigned_names_are_pairwise_distinct() {
        let mut registry = SessionRegistry::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let assigned = registry.register("Goat", sink().0);
            assert!(seen.insert(assigned));
        }
        assert_eq!(registry.len(), 50);
    }

    #[test]
    fn test_register_exact() {
        let mut registry = SessionRegistry::new();
        registry.register("Alice", sink().0);
        assert!(!registry.register_exact("Alice", sink().0));
        assert!(registry.register_exact("Bob", sink().0));
    }

    #[test]
    fn test_rename() {
        let mut registry = SessionRegistry::new();
        registry.register("Alice", sink().0);
        registry.register("Bob", sink().0);

        let assigned = registry.rename("Alice", "Bob").unwrap();
        assert_eq!(assigned, "Bob_1");
        assert!(!registry.contains("Alice"));
    }

    #[test]
    fn test_send_to() {
        let mut registry = SessionRegistry::new();
        let (tx, mut rx) = sink();
        registry.register("Alice", tx);

        assert!(registry.send_to("Alice", "confirm:Alice"));
        assert_eq!(rx.try_recv().unwrap(), "confirm:Alice");
        assert!(!registry.send_to("Nobody", "hello:"));
    }

    #[test]
    fn test_udp_endpoint() {
        let mut registry = SessionRegistry::new();
        registry.register("Alice", sink().0);
        let endpoint: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        assert!(registry.set_udp_endpoint("Alice", endpoint));
        assert_eq!(registry.udp_endpoint("Alice"), Some(endpoint));
        assert!(!registry.set_udp_endpoint("Nobody", endpoint));
    }
}
