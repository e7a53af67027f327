//! Authoritative per-lobby simulation state.
//!
//! Holds the flags that may each flip at most once per game (terminals, door,
//! stations, outcome) and the append-only event log that reconnecting clients
//! are replayed from. Once `game_over` is set, no further mutation applies.

use std::time::{Duration, Instant};

use crate::game::constants::{station, terminal};

/// Outcome and progress flags for one running game
#[derive(Debug, Clone)]
pub struct GameState {
    /// Players currently caught
    caught_count: usize,
    /// One flag per terminal id; each activates at most once
    terminals: Vec<bool>,
    /// Set exactly once when enough terminals are active
    door_open: bool,
    /// One flag per station id; each activates at most once
    stations: [bool; station::COUNT],
    guard_win: bool,
    game_over: bool,
    /// Every state-changing broadcast line, in emission order; never pruned
    event_log: Vec<String>,
    started_at: Instant,
}

impl GameState {
    pub fn new() -> Self {
        Self {
            caught_count: 0,
            terminals: vec![false; terminal::COUNT as usize],
            door_open: false,
            stations: [false; station::COUNT],
            guard_win: false,
            game_over: false,
            event_log: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// Try to activate a terminal. Returns whether this activation was newly
    /// effective; `false` for invalid ids, repeats, or a finished game.
    pub fn activate_terminal(&mut self, id: i32) -> bool {
        if self.game_over {
            return false;
        }
        let Ok(idx) = usize::try_from(id) else {
            return false;
        };
        match self.terminals.get_mut(idx) {
            Some(active) if !*active => {
                *active = true;
                true
            }
            _ => false,
        }
    }

    pub fn terminals_active(&self) -> u32 {
        self.terminals.iter().filter(|a| **a).count() as u32
    }

    /// Open the door if the terminal threshold is reached. Returns `true`
    /// exactly once per game.
    pub fn open_door_if_ready(&mut self) -> bool {
        if self.door_open || self.game_over {
            return false;
        }
        if self.terminals_active() >= terminal::DOOR_THRESHOLD {
            self.door_open = true;
            return true;
        }
        false
    }

    pub fn door_open(&self) -> bool {
        self.door_open
    }

    /// Try to activate a station. Same newly-effective contract as terminals.
    pub fn activate_station(&mut self, id: usize) -> bool {
        if self.game_over {
            return false;
        }
        match self.stations.get_mut(id) {
            Some(active) if !*active => {
                *active = true;
                true
            }
            _ => false,
        }
    }

    /// Station flags indexed by id, for reconnect snapshots
    pub fn station_flags(&self) -> &[bool] {
        &self.stations
    }

    pub fn record_catch(&mut self) -> usize {
        if !self.game_over {
            self.caught_count += 1;
        }
        self.caught_count
    }

    pub fn record_revive(&mut self) {
        self.caught_count = self.caught_count.saturating_sub(1);
    }

    pub fn caught_count(&self) -> usize {
        self.caught_count
    }

    /// Mark the game finished. Idempotent: only the first call returns `true`.
    pub fn end(&mut self, guard_win: bool) -> bool {
        if self.game_over {
            return false;
        }
        self.game_over = true;
        self.guard_win = guard_win;
        true
    }

    pub fn game_over(&self) -> bool {
        self.game_over
    }

    pub fn guard_win(&self) -> bool {
        self.guard_win
    }

    pub fn push_event(&mut self, line: String) {
        self.event_log.push(line);
    }

    pub fn events(&self) -> &[String] {
        &self.event_log
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_activates_once() {
        let mut state = GameState::new();
        assert!(state.activate_terminal(0));
        assert!(!state.activate_terminal(0));
        assert_eq!(state.terminals_active(), 1);
    }

    #[test]
    fn test_terminal_invalid_id() {
        let mut state = GameState::new();
        assert!(!state.activate_terminal(-1));
        assert!(!state.activate_terminal(terminal::COUNT as i32));
    }

    #[test]
    fn test_door_opens_exactly_once() {
        let mut state = GameState::new();
        for id in 0..terminal::DOOR_THRESHOLD as i32 {
            assert!(state.activate_terminal(id));
        }
        assert!(state.open_door_if_ready());
        assert!(state.door_open());

        // A further activation must not re-open the door
        assert!(state.activate_terminal(terminal::DOOR_THRESHOLD as i32));
        assert!(!state.open_door_if_ready());
    }

    #[test]
    fn test_door_stays_closed_below_threshold() {
        let mut state = GameState::new();
        state.activate_terminal(0);
        assert!(!state.open_door_if_ready());
        assert!(!state.door_open());
    }

    #[test]
    fn test_station_activates_once() {
        let mut state = GameState::new();
        assert!(state.activate_station(0));
        assert!(!state.activate_station(0));
        assert!(state.activate_station(1));
        assert!(!state.activate_station(station::COUNT));
    }

    #[test]
    fn test_end_is_idempotent() {
        let mut state = GameState::new();
        assert!(state.end(true));
        assert!(!state.end(false));
        assert!(state.game_over());
        // The first outcome sticks
        assert!(state.guard_win());
    }

    #[test]
    fn test_no_mutation_after_game_over() {
        let mut state = GameState::new();
        state.end(false);

        assert!(!state.activate_terminal(0));
        assert!(!state.activate_station(0));
        assert_eq!(state.record_catch(), 0);
        assert!(!state.open_door_if_ready());
    }

    #[test]
    fn test_catch_counting() {
        let mut state = GameState::new();
        assert_eq!(state.record_catch(), 1);
        assert_eq!(state.record_catch(), 2);
        state.record_revive();
        assert_eq!(state.caught_count(), 1);
    }

    #[test]
    fn test_event_log_order() {
        let mut state = GameState::new();
        state.push_event("catch:Alice".to_string());
        state.push_event("revive:Alice".to_string());
        assert_eq!(state.events(), ["catch:Alice", "revive:Alice"]);
    }
}
