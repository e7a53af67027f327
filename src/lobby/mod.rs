pub mod lobby;
pub mod manager;
