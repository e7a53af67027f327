//! Reliable-channel command vocabulary.
//!
//! Every inbound line is `command:parameters`; the first colon splits the
//! command word from the rest. Parsing happens in one place so that malformed
//! and unknown lines are handled exhaustively, away from any I/O.

use crate::game::player::Role;

/// Parsed client command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect { name: String },
    Username { name: String },
    NewLobby,
    /// Join lobby `code`; code 0 means leave the current lobby
    Lobby { code: u32 },
    GetLobbies,
    GetPlayers,
    GetLobbyPlayers,
    Ready,
    Unready,
    StartGame,
    Chat { text: String },
    LobbyChat { text: String },
    Whisper { target: String, text: String },
    /// Client confirms its assigned role
    Role { role: Role },
    Catch { target: String },
    Revive { target: String },
    Station { id: usize },
    Terminal { id: i32 },
    GetRoles,
    GetResults,
    GetHighscores,
    Spectate { name: String, code: u32 },
    LeaveSpectate { name: String, code: u32 },
    Ping,
    Pong,
}

/// Why a line could not be parsed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed_command")]
    MissingSeparator,
    #[error("unknown_command {0}")]
    Unknown(String),
    #[error("invalid_argument {command}:{given}")]
    InvalidArgument { command: &'static str, given: String },
}

fn invalid(command: &'static str, given: &str) -> ProtocolError {
    ProtocolError::InvalidArgument {
        command,
        given: given.to_string(),
    }
}

/// Parse one inbound line into a [`Command`]
pub fn parse(line: &str) -> Result<Command, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);

    // The liveness words are the only colon-less lines that are not a
    // format error.
    match line {
        "ping" => return Ok(Command::Ping),
        "pong" => return Ok(Command::Pong),
        _ => {}
    }

    let (command, rest) = line.split_once(':').ok_or(ProtocolError::MissingSeparator)?;

    match command {
        "connect" => Ok(Command::Connect {
            name: rest.to_string(),
        }),
        "username" => Ok(Command::Username {
            name: rest.to_string(),
        }),
        "newlobby" => Ok(Command::NewLobby),
        "lobby" => {
            let code = rest.parse().map_err(|_| invalid("lobby", rest))?;
            Ok(Command::Lobby { code })
        }
        "getlobbies" => Ok(Command::GetLobbies),
        "getplayers" => Ok(Command::GetPlayers),
        "getlobbyplayers" => Ok(Command::GetLobbyPlayers),
        "ready" => Ok(Command::Ready),
        "unready" => Ok(Command::Unready),
        "startgame" => Ok(Command::StartGame),
        "chat" => Ok(Command::Chat {
            text: rest.to_string(),
        }),
        "lobbychat" => Ok(Command::LobbyChat {
            text: rest.to_string(),
        }),
        "whisper" => {
            let (target, text) = rest.split_once(',').ok_or_else(|| invalid("whisper", rest))?;
            Ok(Command::Whisper {
                target: target.to_string(),
                text: text.to_string(),
            })
        }
        "role" => {
            let role = Role::parse(rest).ok_or_else(|| invalid("role", rest))?;
            Ok(Command::Role { role })
        }
        "catch" => Ok(Command::Catch {
            target: rest.to_string(),
        }),
        "revive" => Ok(Command::Revive {
            target: rest.to_string(),
        }),
        "station" => {
            let id = rest.parse().map_err(|_| invalid("station", rest))?;
            Ok(Command::Station { id })
        }
        "terminal" => {
            let id = rest.parse().map_err(|_| invalid("terminal", rest))?;
            Ok(Command::Terminal { id })
        }
        "getroles" => Ok(Command::GetRoles),
        "getresults" => Ok(Command::GetResults),
        "gethighscores" => Ok(Command::GetHighscores),
        "spectate" => {
            let (name, code) = parse_name_code("spectate", rest)?;
            Ok(Command::Spectate { name, code })
        }
        "leaveSpectate" | "leavespectate" => {
            let (name, code) = parse_name_code("leaveSpectate", rest)?;
            Ok(Command::LeaveSpectate { name, code })
        }
        "ping" => Ok(Command::Ping),
        "pong" => Ok(Command::Pong),
        other => Err(ProtocolError::Unknown(other.to_string())),
    }
}

fn parse_name_code(command: &'static str, rest: &str) -> Result<(String, u32), ProtocolError> {
    let (name, code) = rest.split_once(':').ok_or_else(|| invalid(command, rest))?;
    let code = code.parse().map_err(|_| invalid(command, rest))?;
    Ok((name.to_string(), code))
}
