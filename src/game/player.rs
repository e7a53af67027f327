use std::time::Instant;

use crate::game::constants::catch;
use crate::util::vec2::Vec2;

/// Role assigned at game start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Guard,
    Goat,
    Igoat,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guard => "GUARD",
            Role::Goat => "GOAT",
            Role::Igoat => "IGOAT",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "GUARD" => Some(Role::Guard),
            "GOAT" => Some(Role::Goat),
            "IGOAT" => Some(Role::Igoat),
            _ => None,
        }
    }

    /// Catchable roles (everything the guard hunts)
    pub fn is_goat_side(&self) -> bool {
        matches!(self, Role::Goat | Role::Igoat)
    }
}

/// Per-membership mutable state, owned by the lobby that created it
#[derive(Debug, Clone)]
pub struct PlayerSession {
    /// Last authoritative position
    pub position: Vec2,
    /// Assigned at game start, `None` in the pre-game phases
    pub role: Option<Role>,
    pub caught: bool,
    /// False until the client has echoed the authoritative position once;
    /// forces spawn correction after (re)connects
    pub position_confirmed: bool,
    /// Set on every catch/teleport; players inside the window cannot be caught
    protected_at: Option<Instant>,
}

impl PlayerSession {
    pub fn new(spawn: Vec2) -> Self {
        Self {
            position: spawn,
            role: None,
            caught: false,
            position_confirmed: false,
            protected_at: None,
        }
    }

    /// Move the player server-side and start a protection window
    pub fn teleport(&mut self, to: Vec2) {
        self.position = to;
        self.protected_at = Some(Instant::now());
    }

    pub fn spawn_protected(&self) -> bool {
        self.protected_at
            .is_some_and(|t| t.elapsed() < catch::SPAWN_PROTECTION)
    }

    pub fn mark_caught(&mut self, jail: Vec2) {
        self.caught = true;
        self.teleport(jail);
    }

    pub fn revive(&mut self) {
        self.caught = false;
    }

    /// Reset for a fresh game
    pub fn reset(&mut self, spawn: Vec2) {
        self.position = spawn;
        self.role = None;
        self.caught = false;
        self.position_confirmed = false;
        self.protected_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::Guard, Role::Goat, Role::Igoat] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("WOLF"), None);
    }

    #[test]
    fn test_goat_side() {
        assert!(Role::Goat.is_goat_side());
        assert!(Role::Igoat.is_goat_side());
        assert!(!Role::Guard.is_goat_side());
    }

    #[test]
    fn test_new_session() {
        let session = PlayerSession::new(Vec2::new(10.0, 20.0));
        assert_eq!(session.position, Vec2::new(10.0, 20.0));
        assert!(session.role.is_none());
        assert!(!session.caught);
        assert!(!session.position_confirmed);
        assert!(!session.spawn_protected());
    }

    #[test]
    fn test_teleport_grants_protection() {
        let mut session = PlayerSession::new(Vec2::ZERO);
        session.teleport(Vec2::new(5.0, 5.0));
        assert_eq!(session.position, Vec2::new(5.0, 5.0));
        assert!(session.spawn_protected());
    }

    #[test]
    fn test_catch_and_revive() {
        let mut session = PlayerSession::new(Vec2::ZERO);
        let jail = Vec2::new(700.0, 60.0);

        session.mark_caught(jail);
        assert!(session.caught);
        assert_eq!(session.position, jail);

        session.revive();
        assert!(!session.caught);
    }

    #[test]
    fn test_reset() {
        let mut session = PlayerSession::new(Vec2::ZERO);
        session.role = Some(Role::Guard);
        session.caught = true;
        session.position_confirmed = true;

        session.reset(Vec2::new(1.0, 1.0));

        assert!(session.role.is_none());
        assert!(!session.caught);
        assert!(!session.position_confirmed);
        assert_eq!(session.position, Vec2::new(1.0, 1.0));
    }
}
