//! Authoritative multiplayer session server for the goat-escape game.
//!
//! Clients speak a line-based text protocol over TCP for everything
//! reliable (lobbies, chat, gameplay actions, liveness) and a thin UDP
//! channel for position updates. The server owns all game state: lobbies
//! with join codes, role assignment, catch/revive/terminal/station rules,
//! position validation against the map, and an append-only event log that
//! lets a disconnected player rejoin a running game.

pub mod config;
pub mod game;
pub mod lobby;
pub mod net;
pub mod persist;
pub mod util;
