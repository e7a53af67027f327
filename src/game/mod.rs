pub mod constants;
pub mod cooldown;
pub mod map;
pub mod player;
pub mod state;
