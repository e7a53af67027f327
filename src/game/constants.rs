//! Gameplay and protocol constants.

pub mod lobby {
    /// Maximum members per lobby
    pub const CAPACITY: usize = 4;
    /// First lobby code handed out (codes stay short enough to type)
    pub const FIRST_CODE: u32 = 1000;
}

pub mod actor {
    /// Side length of the square collision box around a player position
    pub const PLAYER_SIZE: f32 = 32.0;
}

pub mod catch {
    use std::time::Duration;

    /// Simultaneous catches that end the game as a guard win
    pub const WIN_THRESHOLD: usize = 3;
    /// Immunity window after a catch or teleport
    pub const SPAWN_PROTECTION: Duration = Duration::from_secs(3);
}

pub mod terminal {
    /// Terminals on the map; valid ids are 0..COUNT
    pub const COUNT: u32 = 5;
    /// Activated terminals required to open the exit door
    pub const DOOR_THRESHOLD: u32 = 3;
    /// Sentinel id broadcast when an activation was not effective
    pub const NOT_ACTIVATED: i32 = -1;
}

pub mod station {
    use std::time::Duration;

    /// Revival stations on the map; valid ids are 0..COUNT
    pub const COUNT: usize = 2;
    /// Shared per-lobby gate between station activations
    pub const COOLDOWN: Duration = Duration::from_secs(30);
    /// Maximum distance from a station at which it can be activated
    pub const RADIUS: f32 = 60.0;
}

pub mod heartbeat {
    use std::time::Duration;

    /// Interval between server pings on the reliable channel
    pub const PING_INTERVAL: Duration = Duration::from_secs(5);
    /// No pong within this window means the connection is dead
    pub const TIMEOUT: Duration = Duration::from_secs(20);
}

pub mod identity {
    /// Nicknames are truncated to this many characters after sanitizing
    pub const MAX_NAME_LEN: usize = 16;
}

pub mod highscore {
    /// Entries kept per ranked table
    pub const TOP_N: usize = 10;
}
