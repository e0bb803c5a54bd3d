//! Typed log events and the data carried by each kind of log line

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every kind of log line the pipeline understands.
///
/// `Any` is never produced by the parser. It only exists so that consumers
/// can subscribe to the whole stream instead of a single type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Any,
    LogStart,
    LogStop,
    MapLoad,
    Connected,
    Disconnected,
    JoinedTeam,
    ChangeClass,
    Say,
    SayTeam,
    Killed,
    KillAssist,
    Suicide,
    RoundStart,
    RoundWin,
    RoundLength,
    TeamScore,
    TeamFinalScore,
}

impl EventType {
    /// All concrete types, excluding `Any`.
    pub const ALL: [EventType; 17] = [
        EventType::LogStart,
        EventType::LogStop,
        EventType::MapLoad,
        EventType::Connected,
        EventType::Disconnected,
        EventType::JoinedTeam,
        EventType::ChangeClass,
        EventType::Say,
        EventType::SayTeam,
        EventType::Killed,
        EventType::KillAssist,
        EventType::Suicide,
        EventType::RoundStart,
        EventType::RoundWin,
        EventType::RoundLength,
        EventType::TeamScore,
        EventType::TeamFinalScore,
    ];
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Team {
    #[default]
    Unassigned,
    Spectator,
    Red,
    Blue,
}

impl Team {
    pub fn from_log(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "red" => Team::Red,
            "blue" => Team::Blue,
            "spectator" => Team::Spectator,
            _ => Team::Unassigned,
        }
    }

    /// The team on the other side, for the two playable teams.
    pub fn opponent(&self) -> Option<Team> {
        match self {
            Team::Red => Some(Team::Blue),
            Team::Blue => Some(Team::Red),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerClass {
    Scout,
    Soldier,
    Pyro,
    Demoman,
    Heavy,
    Engineer,
    Medic,
    Sniper,
    Spy,
}

impl PlayerClass {
    pub fn from_log(value: &str) -> Option<Self> {
        let class = match value.to_ascii_lowercase().as_str() {
            "scout" => PlayerClass::Scout,
            "soldier" => PlayerClass::Soldier,
            "pyro" => PlayerClass::Pyro,
            "demoman" => PlayerClass::Demoman,
            "heavyweapons" | "heavy" => PlayerClass::Heavy,
            "engineer" => PlayerClass::Engineer,
            "medic" => PlayerClass::Medic,
            "sniper" => PlayerClass::Sniper,
            "spy" => PlayerClass::Spy,
            _ => return None,
        };
        Some(class)
    }
}

/// A player as identified in a log line: `name<uid><steamid><team>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPlayer {
    pub name: String,
    pub user_id: i32,
    /// `None` for bots and for console messages
    pub steam_id: Option<String>,
    pub team: Team,
}

/// Parsed content of one log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Fields {
    LogStart {
        file: String,
    },
    LogStop,
    MapLoad {
        map: String,
    },
    Connected {
        player: LogPlayer,
        address: String,
    },
    Disconnected {
        player: LogPlayer,
        reason: String,
    },
    JoinedTeam {
        player: LogPlayer,
        team: Team,
    },
    ChangeClass {
        player: LogPlayer,
        class: PlayerClass,
    },
    Say {
        player: LogPlayer,
        message: String,
    },
    SayTeam {
        player: LogPlayer,
        message: String,
    },
    Killed {
        attacker: LogPlayer,
        victim: LogPlayer,
        weapon: String,
    },
    KillAssist {
        assister: LogPlayer,
        victim: LogPlayer,
    },
    Suicide {
        player: LogPlayer,
        weapon: String,
    },
    RoundStart,
    RoundWin {
        winner: Team,
    },
    RoundLength {
        seconds: f32,
    },
    TeamScore {
        team: Team,
        score: i32,
        players: i32,
    },
    TeamFinalScore {
        team: Team,
        score: i32,
        players: i32,
    },
}

impl Fields {
    pub fn event_type(&self) -> EventType {
        match self {
            Fields::LogStart { .. } => EventType::LogStart,
            Fields::LogStop => EventType::LogStop,
            Fields::MapLoad { .. } => EventType::MapLoad,
            Fields::Connected { .. } => EventType::Connected,
            Fields::Disconnected { .. } => EventType::Disconnected,
            Fields::JoinedTeam { .. } => EventType::JoinedTeam,
            Fields::ChangeClass { .. } => EventType::ChangeClass,
            Fields::Say { .. } => EventType::Say,
            Fields::SayTeam { .. } => EventType::SayTeam,
            Fields::Killed { .. } => EventType::Killed,
            Fields::KillAssist { .. } => EventType::KillAssist,
            Fields::Suicide { .. } => EventType::Suicide,
            Fields::RoundStart => EventType::RoundStart,
            Fields::RoundWin { .. } => EventType::RoundWin,
            Fields::RoundLength { .. } => EventType::RoundLength,
            Fields::TeamScore { .. } => EventType::TeamScore,
            Fields::TeamFinalScore { .. } => EventType::TeamFinalScore,
        }
    }
}

/// One parsed log line together with the server that sent it.
///
/// Events are immutable once built and are shared between consumers
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub server_id: i32,
    pub server_name: String,
    pub event_type: EventType,
    pub fields: Fields,
    /// Timestamp written by the game server at the start of the line
    pub created_on: NaiveDateTime,
}

impl Event {
    pub fn new(
        server_id: i32,
        server_name: impl Into<String>,
        fields: Fields,
        created_on: NaiveDateTime,
    ) -> Self {
        Self {
            server_id,
            server_name: server_name.into(),
            event_type: fields.event_type(),
            fields,
            created_on,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_map_to_event_type() {
        assert_eq!(Fields::LogStop.event_type(), EventType::LogStop);
        assert_eq!(
            Fields::TeamFinalScore {
                team: Team::Red,
                score: 3,
                players: 6
            }
            .event_type(),
            EventType::TeamFinalScore
        );
    }

    #[test]
    fn test_all_excludes_any() {
        assert!(!EventType::ALL.contains(&EventType::Any));
    }

    #[test]
    fn test_team_parsing() {
        assert_eq!(Team::from_log("Red"), Team::Red);
        assert_eq!(Team::from_log("BLUE"), Team::Blue);
        assert_eq!(Team::from_log("Unassigned"), Team::Unassigned);
        assert_eq!(Team::Red.opponent(), Some(Team::Blue));
        assert_eq!(Team::Spectator.opponent(), None);
    }

    #[test]
    fn test_class_parsing() {
        assert_eq!(PlayerClass::from_log("HeavyWeapons"), Some(PlayerClass::Heavy));
        assert_eq!(PlayerClass::from_log("medic"), Some(PlayerClass::Medic));
        assert_eq!(PlayerClass::from_log("civilian"), None);
    }
}
