//! Lobby: membership registry, phase state machine, and the authoritative
//! gameplay operations.
//!
//! All mutation of a lobby (membership, game state, player sessions, the
//! event log) happens under one mutex, so the append-only event log stays
//! consistent with the live player sessions no matter which connection's
//! task performs the mutation.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::game::constants::{catch, lobby as lobby_consts, terminal};
use crate::game::cooldown::Cooldown;
use crate::game::map::{collides, MapGeometry};
use crate::game::player::{PlayerSession, Role};
use crate::game::state::GameState;
use crate::net::registry::Outbound;
use crate::persist::Persistence;
use crate::util::vec2::Vec2;

/// Lobby phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyPhase {
    /// Accepting members
    Open,
    /// Capacity reached, still pre-game
    Full,
    /// Match running
    InGame,
    /// Match decided; a ready toggle resets to Open
    Finished,
}

impl LobbyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LobbyPhase::Open => "OPEN",
            LobbyPhase::Full => "FULL",
            LobbyPhase::InGame => "IN_GAME",
            LobbyPhase::Finished => "FINISHED",
        }
    }
}

/// Why a lobby operation was refused. Every variant maps onto an advisory
/// `error:` reply; none of them mutate state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("lobby_full")]
    Full,
    #[error("game_in_progress")]
    InProgress,
    #[error("not_in_game")]
    NotInGame,
    #[error("player_not_found")]
    PlayerNotFound,
    #[error("wrong_role")]
    WrongRole,
    #[error("already_caught")]
    AlreadyCaught,
    #[error("not_caught")]
    NotCaught,
    #[error("spawn_protected")]
    SpawnProtected,
    #[error("not_all_ready")]
    NotAllReady,
    #[error("empty_lobby")]
    Empty,
    #[error("station_unavailable")]
    StationUnavailable,
    #[error("station_cooldown")]
    CooldownActive,
    #[error("out_of_range")]
    OutOfRange,
    #[error("no_caught_igoat")]
    NoCaughtIgoat,
}

/// One lobby member. `outbound` is `None` while the member is disconnected
/// mid-game and may still rebind.
#[derive(Debug)]
pub struct Member {
    pub name: String,
    pub outbound: Option<Outbound>,
    pub ready: bool,
    pub session: PlayerSession,
}

#[derive(Debug)]
struct Spectator {
    name: String,
    outbound: Outbound,
}

/// Directory entry for the `getlobbies` reply
#[derive(Debug, Clone)]
pub struct LobbyInfo {
    pub code: u32,
    pub member_count: usize,
    pub capacity: usize,
    pub phase: LobbyPhase,
}

/// Everything a reconnecting client needs to catch up
#[derive(Debug, Clone)]
pub struct ReconnectReplay {
    pub events: Vec<String>,
    pub caught_line: String,
    pub station_line: String,
}

/// Result of a validated position update. The UDP router resolves recipient
/// names to endpoints and performs the actual sends.
#[derive(Debug, Clone, Default)]
pub struct PositionOutcome {
    /// Corrective line for the sender (authoritative position re-broadcast)
    pub reply_to_sender: Option<String>,
    /// Committed update for the rest of the lobby, sender excluded
    pub broadcast: Option<(String, Vec<String>)>,
}

struct LobbyInner {
    phase: LobbyPhase,
    members: Vec<Member>,
    spectators: Vec<Spectator>,
    game: GameState,
    map: MapGeometry,
    station_cooldown: Cooldown,
}

/// One game session, shared behind `Arc` between the connection handlers of
/// its members and the UDP router
pub struct Lobby {
    pub code: u32,
    inner: Mutex<LobbyInner>,
}

impl Lobby {
    pub fn new(code: u32) -> Self {
        Self {
            code,
            inner: Mutex::new(LobbyInner {
                phase: LobbyPhase::Open,
                members: Vec::new(),
                spectators: Vec::new(),
                game: GameState::new(),
                map: MapGeometry::default(),
                station_cooldown: Cooldown::new(crate::game::constants::station::COOLDOWN),
            }),
        }
    }

    pub fn phase(&self) -> LobbyPhase {
        self.inner.lock().phase
    }

    pub fn info(&self) -> LobbyInfo {
        let inner = self.inner.lock();
        LobbyInfo {
            code: self.code,
            member_count: inner.members.len(),
            capacity: lobby_consts::CAPACITY,
            phase: inner.phase,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().members.is_empty()
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.inner.lock().member_index(name).is_some()
    }

    pub fn member_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .members
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    /// `roles:<name>=<ROLE>,...` over all members with an assigned role
    pub fn roles_line(&self) -> String {
        let inner = self.inner.lock();
        let parts: Vec<String> = inner
            .members
            .iter()
            .filter_map(|m| m.session.role.map(|r| format!("{}={}", m.name, r.as_str())))
            .collect();
        format!("roles:{}", parts.join(","))
    }

    /// Join a new member. Only `OPEN` lobbies accept members.
    pub fn join(&self, name: &str, outbound: Outbound) -> Result<(), LobbyError> {
        let mut inner = self.inner.lock();
        match inner.phase {
            LobbyPhase::Open => {}
            LobbyPhase::Full => return Err(LobbyError::Full),
            LobbyPhase::InGame | LobbyPhase::Finished => return Err(LobbyError::InProgress),
        }
        let spawn = inner.map.spawn_points[inner.members.len() % lobby_consts::CAPACITY];
        inner.broadcast(&format!("joined:{}", name));
        inner.members.push(Member {
            name: name.to_string(),
            outbound: Some(outbound),
            ready: false,
            session: PlayerSession::new(spawn),
        });
        inner.update_pregame_phase();
        debug!(code = self.code, member = name, "joined lobby");
        Ok(())
    }

    /// Remove a member entirely (explicit leave). Returns whether the lobby
    /// is now empty and should be destroyed.
    pub fn leave(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.member_index(name) {
            let member = inner.members.remove(idx);
            // The caught count tracks live members only; a caught player
            // taking its membership away must not keep counting toward the
            // guard win.
            if inner.phase == LobbyPhase::InGame && member.session.caught {
                inner.game.record_revive();
            }
            inner.broadcast(&format!("left:{}", name));
            inner.update_pregame_phase();
            debug!(code = self.code, member = name, "left lobby");
        }
        inner.members.is_empty()
    }

    /// Transport-level disconnect. While a game is running the membership is
    /// suspended (session kept for reconnect); otherwise it is a normal
    /// leave. Returns whether the lobby is now empty.
    pub fn disconnect(&self, name: &str) -> bool {
        let suspend = {
            let inner = self.inner.lock();
            inner.phase == LobbyPhase::InGame && inner.member_index(name).is_some()
        };
        if !suspend {
            return self.leave(name);
        }
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.member_index(name) {
            inner.members[idx].outbound = None;
            inner.broadcast(&format!("left:{}", name));
            info!(code = self.code, member = name, "suspended for reconnect");
        }
        false
    }

    /// Whether `name` is a disconnected member of a running game
    pub fn can_rebind(&self, name: &str) -> bool {
        let inner = self.inner.lock();
        inner.phase == LobbyPhase::InGame
            && inner
                .members
                .iter()
                .any(|m| m.name == name && m.outbound.is_none())
    }

    /// Rebind a reconnecting client to its existing player session. The
    /// caught/role state is preserved; the position-confirmed flag is cleared
    /// so the next position update goes through spawn correction.
    pub fn rebind(&self, name: &str, outbound: Outbound) -> Option<ReconnectReplay> {
        let mut inner = self.inner.lock();
        if inner.phase != LobbyPhase::InGame {
            return None;
        }
        let idx = inner
            .members
            .iter()
            .position(|m| m.name == name && m.outbound.is_none())?;
        inner.members[idx].outbound = Some(outbound);
        inner.members[idx].session.position_confirmed = false;

        let caught_line = format!(
            "caught_status:{}",
            inner
                .members
                .iter()
                .map(|m| format!("{}={}", m.name, m.session.caught))
                .collect::<Vec<_>>()
                .join(",")
        );
        let station_line = format!(
            "station_status:{}",
            inner
                .game
                .station_flags()
                .iter()
                .enumerate()
                .map(|(id, active)| format!("{}={}", id, active))
                .collect::<Vec<_>>()
                .join(",")
        );
        info!(code = self.code, member = name, "rebound to running game");
        Some(ReconnectReplay {
            events: inner.game.events().to_vec(),
            caught_line,
            station_line,
        })
    }

    /// Set the ready flag. A toggle while `FINISHED` first resets the lobby
    /// back to `OPEN` with fresh game state.
    pub fn set_ready(&self, name: &str, ready: bool) -> Result<(), LobbyError> {
        let mut inner = self.inner.lock();
        if inner.phase == LobbyPhase::Finished {
            inner.reset_to_open();
        }
        if inner.phase == LobbyPhase::InGame {
            return Err(LobbyError::InProgress);
        }
        let idx = inner.member_index(name).ok_or(LobbyError::PlayerNotFound)?;
        inner.members[idx].ready = ready;
        inner.broadcast(&format!("ready_status:{},{}", name, ready));
        Ok(())
    }

    /// Start the match: requires a non-empty, all-ready pre-game lobby.
    /// Assigns roles, resets ready flags, and enters `IN_GAME`.
    pub fn start_game(&self) -> Result<(), LobbyError> {
        let mut inner = self.inner.lock();
        match inner.phase {
            LobbyPhase::Open | LobbyPhase::Full => {}
            LobbyPhase::InGame => return Err(LobbyError::InProgress),
            LobbyPhase::Finished => return Err(LobbyError::NotInGame),
        }
        if inner.members.is_empty() {
            return Err(LobbyError::Empty);
        }
        if !inner.members.iter().all(|m| m.ready) {
            return Err(LobbyError::NotAllReady);
        }

        inner.assign_roles();
        for member in &mut inner.members {
            member.ready = false;
        }
        inner.phase = LobbyPhase::InGame;
        inner.game = GameState::new();
        inner.station_cooldown = Cooldown::new(crate::game::constants::station::COOLDOWN);

        inner.broadcast("game_started:");
        let roles = inner
            .members
            .iter()
            .filter_map(|m| m.session.role.map(|r| format!("{}={}", m.name, r.as_str())))
            .collect::<Vec<_>>()
            .join(",");
        inner.broadcast_event(format!("roles:{}", roles));
        info!(code = self.code, "game started");
        Ok(())
    }

    /// Client confirms the role it was assigned
    pub fn confirm_role(&self, name: &str, role: Role) -> Result<(), LobbyError> {
        let mut inner = self.inner.lock();
        if inner.phase != LobbyPhase::InGame {
            return Err(LobbyError::NotInGame);
        }
        let idx = inner.member_index(name).ok_or(LobbyError::PlayerNotFound)?;
        if inner.members[idx].session.role != Some(role) {
            return Err(LobbyError::WrongRole);
        }
        inner.broadcast_event(format!("role:{}:{}", name, role.as_str()));
        Ok(())
    }

    /// Guard catches a goat-side player
    pub fn catch(
        &self,
        actor: &str,
        target: &str,
        persist: &Persistence,
    ) -> Result<(), LobbyError> {
        let mut inner = self.inner.lock();
        if inner.phase != LobbyPhase::InGame || inner.game.game_over() {
            return Err(LobbyError::NotInGame);
        }
        let actor_idx = inner.member_index(actor).ok_or(LobbyError::PlayerNotFound)?;
        if inner.members[actor_idx].session.role != Some(Role::Guard) {
            return Err(LobbyError::WrongRole);
        }
        let target_idx = inner.member_index(target).ok_or(LobbyError::PlayerNotFound)?;
        let target_role = inner.members[target_idx]
            .session
            .role
            .ok_or(LobbyError::WrongRole)?;
        if !target_role.is_goat_side() {
            return Err(LobbyError::WrongRole);
        }
        if inner.members[target_idx].session.caught {
            return Err(LobbyError::AlreadyCaught);
        }
        if !inner.within_interaction_range(actor_idx, target_idx) {
            return Err(LobbyError::OutOfRange);
        }
        if target_role == Role::Goat && inner.members[target_idx].session.spawn_protected() {
            return Err(LobbyError::SpawnProtected);
        }

        let jail = inner.map.jail;
        inner.members[target_idx].session.mark_caught(jail);
        let caught = inner.game.record_catch();
        inner.broadcast_event(format!("catch:{}", target));
        info!(code = self.code, target, caught, "player caught");

        if caught >= catch::WIN_THRESHOLD {
            inner.end_game(true, persist);
        }
        Ok(())
    }

    /// Goat revives a caught IGOAT
    pub fn revive(&self, actor: &str, target: &str) -> Result<(), LobbyError> {
        let mut inner = self.inner.lock();
        if inner.phase != LobbyPhase::InGame || inner.game.game_over() {
            return Err(LobbyError::NotInGame);
        }
        let actor_idx = inner.member_index(actor).ok_or(LobbyError::PlayerNotFound)?;
        let actor_session = &inner.members[actor_idx].session;
        if actor_session.role != Some(Role::Goat) {
            return Err(LobbyError::WrongRole);
        }
        if actor_session.caught {
            return Err(LobbyError::AlreadyCaught);
        }
        let target_idx = inner.member_index(target).ok_or(LobbyError::PlayerNotFound)?;
        if inner.members[target_idx].session.role != Some(Role::Igoat) {
            return Err(LobbyError::WrongRole);
        }
        if !inner.members[target_idx].session.caught {
            return Err(LobbyError::NotCaught);
        }
        if !inner.within_interaction_range(actor_idx, target_idx) {
            return Err(LobbyError::OutOfRange);
        }

        inner.members[target_idx].session.revive();
        inner.game.record_revive();
        inner.broadcast_event(format!("revive:{}", target));
        Ok(())
    }

    /// Activate a terminal. Returns the id that should be echoed: the
    /// terminal id on a newly effective activation, `-1` otherwise.
    pub fn activate_terminal(&self, actor: &str, id: i32) -> Result<i32, LobbyError> {
        let mut inner = self.inner.lock();
        if inner.phase != LobbyPhase::InGame {
            return Err(LobbyError::NotInGame);
        }
        if inner.member_index(actor).is_none() {
            return Err(LobbyError::PlayerNotFound);
        }
        if !inner.game.activate_terminal(id) {
            inner.broadcast(&format!("terminal:{}", terminal::NOT_ACTIVATED));
            return Ok(terminal::NOT_ACTIVATED);
        }
        inner.broadcast_event(format!("terminal:{}", id));
        info!(
            code = self.code,
            id,
            active = inner.game.terminals_active(),
            "terminal activated"
        );

        if inner.game.open_door_if_ready() {
            inner.broadcast_event("door".to_string());
            info!(code = self.code, "door opened");
            // Caught GOATs (not IGOATs) are freed and rallied when the door
            // opens.
            let rally = inner.map.rally_point;
            let freed: Vec<usize> = inner
                .members
                .iter()
                .enumerate()
                .filter(|(_, m)| m.session.role == Some(Role::Goat) && m.session.caught)
                .map(|(i, _)| i)
                .collect();
            for idx in freed {
                inner.members[idx].session.revive();
                inner.members[idx].session.teleport(rally);
                inner.game.record_revive();
                let name = inner.members[idx].name.clone();
                inner.broadcast_event(format!("revive:{}", name));
            }
        }
        Ok(id)
    }

    /// Activate a revival station: goat actor, shared cooldown, proximity to
    /// the station, and a caught IGOAT to bring back.
    pub fn activate_station(&self, actor: &str, id: usize) -> Result<(), LobbyError> {
        let mut inner = self.inner.lock();
        if inner.phase != LobbyPhase::InGame || inner.game.game_over() {
            return Err(LobbyError::NotInGame);
        }
        let actor_idx = inner.member_index(actor).ok_or(LobbyError::PlayerNotFound)?;
        if inner.members[actor_idx].session.role != Some(Role::Goat) {
            return Err(LobbyError::WrongRole);
        }
        if inner.station_cooldown.active() {
            return Err(LobbyError::CooldownActive);
        }
        let Some(&station_pos) = inner.map.stations.get(id) else {
            return Err(LobbyError::StationUnavailable);
        };
        if inner.members[actor_idx]
            .session
            .position
            .distance_to(station_pos)
            > crate::game::constants::station::RADIUS
        {
            return Err(LobbyError::OutOfRange);
        }
        let target_idx = inner
            .members
            .iter()
            .position(|m| m.session.role == Some(Role::Igoat) && m.session.caught)
            .ok_or(LobbyError::NoCaughtIgoat)?;
        if !inner.game.activate_station(id) {
            return Err(LobbyError::StationUnavailable);
        }

        inner.members[target_idx].session.revive();
        inner.members[target_idx].session.teleport(station_pos);
        inner.game.record_revive();
        inner.station_cooldown.start();

        inner.broadcast_event(format!("activateStation:{}", id));
        let name = inner.members[target_idx].name.clone();
        inner.broadcast_event(format!("revive:{}", name));
        info!(code = self.code, id, revived = %name, "station activated");
        Ok(())
    }

    /// Validate and commit a client-reported position
    pub fn handle_position(
        &self,
        name: &str,
        claimed: Vec2,
        persist: &Persistence,
    ) -> Result<PositionOutcome, LobbyError> {
        let mut inner = self.inner.lock();
        if inner.phase != LobbyPhase::InGame {
            return Err(LobbyError::NotInGame);
        }
        let idx = inner.member_index(name).ok_or(LobbyError::PlayerNotFound)?;
        let authoritative = inner.members[idx].session.position;
        let role = inner.members[idx].session.role;

        // Spawn correction: an unconfirmed client must echo the authoritative
        // position exactly before its claims are accepted.
        if !inner.members[idx].session.position_confirmed {
            if claimed != authoritative {
                return Ok(PositionOutcome {
                    reply_to_sender: Some(position_line(name, authoritative)),
                    broadcast: None,
                });
            }
            inner.members[idx].session.position_confirmed = true;
        }

        let rect = MapGeometry::actor_rect(claimed);
        let blocked = collides(&rect, &inner.map.walls)
            || (role != Some(Role::Goat) && collides(&rect, &inner.map.window_walls));
        if blocked {
            return Ok(PositionOutcome {
                reply_to_sender: Some(position_line(name, authoritative)),
                broadcast: None,
            });
        }

        inner.members[idx].session.position = claimed;
        let recipients: Vec<String> = inner
            .members
            .iter()
            .filter(|m| m.name != name)
            .map(|m| m.name.clone())
            .collect();
        let outcome = PositionOutcome {
            reply_to_sender: None,
            broadcast: Some((position_line(name, claimed), recipients)),
        };

        // Escape: once the door is open, a goat crossing the playable bounds
        // wins the game for the goat team.
        if inner.game.door_open()
            && role == Some(Role::Goat)
            && inner.map.out_of_bounds(claimed.x)
        {
            inner.end_game(false, persist);
        }
        Ok(outcome)
    }

    /// Reliable fan-out to every member and spectator
    pub fn broadcast(&self, line: &str) {
        self.inner.lock().broadcast(line);
    }

    pub fn add_spectator(&self, name: &str, outbound: Outbound) {
        let mut inner = self.inner.lock();
        inner.broadcast(&format!("spectator_joined:{}", name));
        inner.spectators.push(Spectator {
            name: name.to_string(),
            outbound,
        });
    }

    pub fn remove_spectator(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.spectators.iter().position(|s| s.name == name) {
            inner.spectators.remove(idx);
            inner.broadcast(&format!("spectator_left:{}", name));
        }
    }
}

fn position_line(name: &str, position: Vec2) -> String {
    format!("player_position:{}:{}:{}", name, position.x, position.y)
}

impl LobbyInner {
    fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }

    /// OPEN/FULL is a pure function of member count; never touches the
    /// in-game phases.
    fn update_pregame_phase(&mut self) {
        if matches!(self.phase, LobbyPhase::Open | LobbyPhase::Full) {
            self.phase = if self.members.len() >= lobby_consts::CAPACITY {
                LobbyPhase::Full
            } else {
                LobbyPhase::Open
            };
        }
    }

    fn reset_to_open(&mut self) {
        self.game = GameState::new();
        self.station_cooldown = Cooldown::new(crate::game::constants::station::COOLDOWN);
        // Drop memberships that never reconnected
        self.members.retain(|m| m.outbound.is_some());
        let spawns = self.map.spawn_points;
        for (i, member) in self.members.iter_mut().enumerate() {
            member.ready = false;
            member.session.reset(spawns[i % lobby_consts::CAPACITY]);
        }
        self.phase = LobbyPhase::Open;
        self.update_pregame_phase();
    }

    /// Exactly one GUARD; the rest alternate GOAT/IGOAT over a shuffled order
    fn assign_roles(&mut self) {
        let mut order: Vec<usize> = (0..self.members.len()).collect();
        order.shuffle(&mut rand::thread_rng());
        let spawns = self.map.spawn_points;
        for (slot, &idx) in order.iter().enumerate() {
            let role = match slot {
                0 => Role::Guard,
                n if n % 2 == 1 => Role::Goat,
                _ => Role::Igoat,
            };
            let spawn = spawns[idx % lobby_consts::CAPACITY];
            self.members[idx].session.reset(spawn);
            self.members[idx].session.role = Some(role);
        }
    }

    // TODO: gate on actual actor/target distance once an interaction radius
    // is agreed with the client. Kept as a hook so the check can land without
    // protocol changes.
    fn within_interaction_range(&self, _actor_idx: usize, _target_idx: usize) -> bool {
        true
    }

    fn broadcast(&self, line: &str) {
        for member in &self.members {
            if let Some(outbound) = &member.outbound {
                let _ = outbound.send(line.to_string());
            }
        }
        for spectator in &self.spectators {
            let _ = spectator.outbound.send(line.to_string());
        }
    }

    /// Broadcast a state-changing line and append it to the event log
    fn broadcast_event(&mut self, line: String) {
        self.broadcast(&line);
        self.game.push_event(line);
    }

    /// Finish the game. Idempotent under the game-over guard; the first call
    /// freezes the lobby, broadcasts the outcome, and records the result.
    /// Persistence failure never blocks the broadcast.
    fn end_game(&mut self, guard_win: bool, persist: &Persistence) {
        if !self.game.end(guard_win) {
            return;
        }
        self.phase = LobbyPhase::Finished;
        self.broadcast_event(format!("gameover:{}", guard_win));

        let winners: Vec<String> = self
            .members
            .iter()
            .filter(|m| match m.session.role {
                Some(Role::Guard) => guard_win,
                Some(r) => !guard_win && r.is_goat_side(),
                None => false,
            })
            .map(|m| m.name.clone())
            .collect();
        info!(guard_win, winners = ?winners, "game over");
        persist.record_game(guard_win, winners, self.game.elapsed());
    }
}
