//! Line grammar for Source engine server logs
//!
//! The pipeline only depends on the [`LineParser`] trait. [`SourceLogParser`]
//! covers the lines the match aggregation and chat logging care about and
//! reports everything else as [`ParseError::Unhandled`].

use crate::event::{EventType, Fields, LogPlayer, PlayerClass, Team};
use chrono::NaiveDateTime;
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%m/%d/%Y - %H:%M:%S";
const TIMESTAMP_LEN: usize = 21;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("line does not start with a log prefix")]
    MissingPrefix,
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("malformed {kind} line: {line}")]
    Malformed { kind: EventType, line: String },
    #[error("unhandled line: {0}")]
    Unhandled(String),
}

/// Result of parsing one line
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub created_on: NaiveDateTime,
    pub event_type: EventType,
    pub fields: Fields,
}

/// Turns one raw log line into a typed event.
pub trait LineParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<ParsedLine, ParseError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SourceLogParser;

impl SourceLogParser {
    pub fn new() -> Self {
        Self
    }
}

impl LineParser for SourceLogParser {
    fn parse(&self, raw: &str) -> Result<ParsedLine, ParseError> {
        let line = raw.trim_end_matches(['\r', '\n', '\0']);
        let rest = line.strip_prefix("L ").ok_or(ParseError::MissingPrefix)?;

        let stamp = rest
            .get(..TIMESTAMP_LEN)
            .ok_or_else(|| ParseError::InvalidTimestamp(rest.to_string()))?;
        let created_on = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .map_err(|_| ParseError::InvalidTimestamp(stamp.to_string()))?;

        let body = rest[TIMESTAMP_LEN..]
            .strip_prefix(": ")
            .ok_or_else(|| ParseError::Unhandled(line.to_string()))?;

        let fields = match parse_body(body) {
            Some(result) => result?,
            None => return Err(ParseError::Unhandled(line.to_string())),
        };

        Ok(ParsedLine {
            created_on,
            event_type: fields.event_type(),
            fields,
        })
    }
}

/// Returns `None` for lines outside the grammar and `Some(Err)` for lines
/// that match a known form but carry broken values.
fn parse_body(body: &str) -> Option<Result<Fields, ParseError>> {
    if body.starts_with('"') {
        return parse_player_action(body);
    }
    if let Some(rest) = body.strip_prefix("World triggered ") {
        return parse_world_trigger(rest);
    }
    if let Some(rest) = body.strip_prefix("Team ") {
        return parse_team_score(rest, body);
    }
    if let Some(rest) = body
        .strip_prefix("Started map ")
        .or_else(|| body.strip_prefix("Loading map "))
    {
        let (map, _) = quoted(rest)?;
        return Some(Ok(Fields::MapLoad {
            map: map.to_string(),
        }));
    }
    if let Some(rest) = body.strip_prefix("Log file started ") {
        let file = rest
            .strip_prefix("(file ")
            .and_then(quoted)
            .map(|(file, _)| file.to_string())
            .unwrap_or_default();
        return Some(Ok(Fields::LogStart { file }));
    }
    if body.starts_with("Log file closed") {
        return Some(Ok(Fields::LogStop));
    }
    None
}

fn parse_player_action(body: &str) -> Option<Result<Fields, ParseError>> {
    let (player, rest) = take_player(body)?;

    let fields = if let Some(rest) = rest.strip_prefix("say_team ") {
        Fields::SayTeam {
            player,
            message: chat_message(rest)?.to_string(),
        }
    } else if let Some(rest) = rest.strip_prefix("say ") {
        Fields::Say {
            player,
            message: chat_message(rest)?.to_string(),
        }
    } else if let Some(rest) = rest.strip_prefix("killed ") {
        let (victim, rest) = take_player(rest)?;
        let weapon = rest
            .strip_prefix("with ")
            .and_then(quoted)
            .map(|(weapon, _)| weapon.to_string())
            .unwrap_or_default();
        Fields::Killed {
            attacker: player,
            victim,
            weapon,
        }
    } else if let Some(rest) = rest.strip_prefix("triggered \"kill assist\" against ") {
        let (victim, _) = take_player(rest)?;
        Fields::KillAssist {
            assister: player,
            victim,
        }
    } else if let Some(rest) = rest.strip_prefix("committed suicide with ") {
        Fields::Suicide {
            player,
            weapon: quoted(rest)?.0.to_string(),
        }
    } else if let Some(rest) = rest.strip_prefix("changed role to ") {
        let (name, _) = quoted(rest)?;
        match PlayerClass::from_log(name) {
            Some(class) => Fields::ChangeClass { player, class },
            None => {
                return Some(Err(ParseError::Malformed {
                    kind: EventType::ChangeClass,
                    line: body.to_string(),
                }))
            }
        }
    } else if let Some(rest) = rest.strip_prefix("joined team ") {
        let (team, _) = quoted(rest)?;
        Fields::JoinedTeam {
            player,
            team: Team::from_log(team),
        }
    } else if let Some(rest) = rest.strip_prefix("connected, address ") {
        Fields::Connected {
            player,
            address: quoted(rest)?.0.to_string(),
        }
    } else if let Some(rest) = rest.strip_prefix("disconnected") {
        let reason = rest
            .trim_start()
            .strip_prefix("(reason ")
            .and_then(quoted)
            .map(|(reason, _)| reason.to_string())
            .unwrap_or_default();
        Fields::Disconnected { player, reason }
    } else {
        return None;
    };

    Some(Ok(fields))
}

fn parse_world_trigger(rest: &str) -> Option<Result<Fields, ParseError>> {
    let (trigger, rest) = quoted(rest)?;
    let fields = match trigger {
        "Round_Start" => Fields::RoundStart,
        "Round_Win" => {
            let (winner, _) = rest.trim_start().strip_prefix("(winner ").and_then(quoted)?;
            Fields::RoundWin {
                winner: Team::from_log(winner),
            }
        }
        "Round_Length" => {
            let (seconds, _) = rest
                .trim_start()
                .strip_prefix("(seconds ")
                .and_then(quoted)?;
            match seconds.parse::<f32>() {
                Ok(seconds) => Fields::RoundLength { seconds },
                Err(_) => {
                    return Some(Err(ParseError::Malformed {
                        kind: EventType::RoundLength,
                        line: rest.to_string(),
                    }))
                }
            }
        }
        _ => return None,
    };
    Some(Ok(fields))
}

fn parse_team_score(rest: &str, body: &str) -> Option<Result<Fields, ParseError>> {
    let (team, rest) = quoted(rest)?;
    let (kind, rest) = if let Some(rest) = rest.strip_prefix("current score ") {
        (EventType::TeamScore, rest)
    } else if let Some(rest) = rest.strip_prefix("final score ") {
        (EventType::TeamFinalScore, rest)
    } else {
        return None;
    };

    let (score, rest) = quoted(rest)?;
    let (players, _) = rest.strip_prefix("with ").and_then(quoted)?;

    let (Ok(score), Ok(players)) = (score.parse::<i32>(), players.parse::<i32>()) else {
        return Some(Err(ParseError::Malformed {
            kind,
            line: body.to_string(),
        }));
    };
    let team = Team::from_log(team);

    let fields = if kind == EventType::TeamScore {
        Fields::TeamScore {
            team,
            score,
            players,
        }
    } else {
        Fields::TeamFinalScore {
            team,
            score,
            players,
        }
    };
    Some(Ok(fields))
}

/// Splits `"value" rest` into `value` and `rest` with leading spaces removed.
fn quoted(s: &str) -> Option<(&str, &str)> {
    let inner = s.strip_prefix('"')?;
    let end = inner.find('"')?;
    Some((&inner[..end], inner[end + 1..].trim_start()))
}

/// Chat text is not escaped, so the message runs to the last quote on the line.
fn chat_message(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('"')?;
    let end = inner.rfind('"')?;
    Some(&inner[..end])
}

/// Reads a `"name<uid><steamid><team>"` token from the start of `s`.
fn take_player(s: &str) -> Option<(LogPlayer, &str)> {
    let inner = s.strip_prefix('"')?;
    let end = inner.find(">\"")?;
    let token = &inner[..end];
    let rest = inner[end + 2..].trim_start();

    let mut parts = token.rsplitn(4, '<');
    let team = parts.next()?;
    let steam_id = parts.next()?.strip_suffix('>')?;
    let user_id = parts.next()?.strip_suffix('>')?;
    let name = parts.next()?;

    let steam_id = match steam_id {
        "" | "BOT" | "Console" => None,
        id => Some(id.to_string()),
    };

    let player = LogPlayer {
        name: name.to_string(),
        user_id: user_id.parse().unwrap_or(-1),
        steam_id,
        team: Team::from_log(team),
    };
    Some((player, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<ParsedLine, ParseError> {
        SourceLogParser::new().parse(&format!("L 10/21/2023 - 14:22:11: {}", body))
    }

    #[test]
    fn test_parse_say() {
        let parsed = parse(r#""Jo<3><[U:1:1001]><Red>" say "gg all""#).unwrap();
        assert_eq!(parsed.event_type, EventType::Say);
        match parsed.fields {
            Fields::Say { player, message } => {
                assert_eq!(player.name, "Jo");
                assert_eq!(player.user_id, 3);
                assert_eq!(player.steam_id.as_deref(), Some("[U:1:1001]"));
                assert_eq!(player.team, Team::Red);
                assert_eq!(message, "gg all");
            }
            other => panic!("Unexpected fields: {:?}", other),
        }
        assert_eq!(
            parsed.created_on.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2023-10-21 14:22:11"
        );
    }

    #[test]
    fn test_parse_say_keeps_inner_quotes() {
        let parsed = parse(r#""Jo<3><[U:1:1001]><Red>" say "he said "hi" ok""#).unwrap();
        match parsed.fields {
            Fields::Say { message, .. } => assert_eq!(message, r#"he said "hi" ok"#),
            other => panic!("Unexpected fields: {:?}", other),
        }

        let dead = parse(r#""Jo<3><[U:1:1001]><Red>" say_team ""quoted"" (dead)"#).unwrap();
        match dead.fields {
            Fields::SayTeam { message, .. } => assert_eq!(message, r#""quoted""#),
            other => panic!("Unexpected fields: {:?}", other),
        }
    }

    #[test]
    fn test_parse_say_team() {
        let parsed = parse(r#""Jo<3><[U:1:1001]><Blue>" say_team "push""#).unwrap();
        assert_eq!(parsed.event_type, EventType::SayTeam);
    }

    #[test]
    fn test_parse_name_with_brackets() {
        let parsed = parse(r#""<<a>>b<7><[U:1:5]><Blue>" say "hi""#).unwrap();
        match parsed.fields {
            Fields::Say { player, .. } => {
                assert_eq!(player.name, "<<a>>b");
                assert_eq!(player.user_id, 7);
            }
            other => panic!("Unexpected fields: {:?}", other),
        }
    }

    #[test]
    fn test_parse_kill() {
        let parsed = parse(
            r#""A<2><[U:1:1]><Red>" killed "B<3><[U:1:2]><Blue>" with "scattergun" (attacker_position "1 2 3") (victim_position "4 5 6")"#,
        )
        .unwrap();
        match parsed.fields {
            Fields::Killed {
                attacker,
                victim,
                weapon,
            } => {
                assert_eq!(attacker.name, "A");
                assert_eq!(victim.name, "B");
                assert_eq!(victim.team, Team::Blue);
                assert_eq!(weapon, "scattergun");
            }
            other => panic!("Unexpected fields: {:?}", other),
        }
    }

    #[test]
    fn test_parse_assist_and_suicide() {
        let assist = parse(
            r#""A<2><[U:1:1]><Red>" triggered "kill assist" against "B<3><[U:1:2]><Blue>" (assister_position "0 0 0")"#,
        )
        .unwrap();
        assert_eq!(assist.event_type, EventType::KillAssist);

        let suicide = parse(r#""A<2><[U:1:1]><Red>" committed suicide with "world""#).unwrap();
        assert_eq!(suicide.event_type, EventType::Suicide);
    }

    #[test]
    fn test_parse_class_and_team() {
        let class = parse(r#""A<2><[U:1:1]><Red>" changed role to "medic""#).unwrap();
        assert_eq!(
            class.fields,
            Fields::ChangeClass {
                player: LogPlayer {
                    name: "A".to_string(),
                    user_id: 2,
                    steam_id: Some("[U:1:1]".to_string()),
                    team: Team::Red,
                },
                class: PlayerClass::Medic,
            }
        );

        let team = parse(r#""A<2><[U:1:1]><Unassigned>" joined team "Blue""#).unwrap();
        match team.fields {
            Fields::JoinedTeam { team, .. } => assert_eq!(team, Team::Blue),
            other => panic!("Unexpected fields: {:?}", other),
        }

        let bad = parse(r#""A<2><[U:1:1]><Red>" changed role to "civilian""#);
        assert!(matches!(bad, Err(ParseError::Malformed { .. })));
    }

    #[test]
    fn test_parse_connection_lines() {
        let connected =
            parse(r#""A<2><[U:1:1]><>" connected, address "10.0.0.1:27005""#).unwrap();
        assert_eq!(connected.event_type, EventType::Connected);

        let disconnected =
            parse(r#""A<2><[U:1:1]><Red>" disconnected (reason "Disconnect by user.")"#).unwrap();
        match disconnected.fields {
            Fields::Disconnected { reason, .. } => assert_eq!(reason, "Disconnect by user."),
            other => panic!("Unexpected fields: {:?}", other),
        }
    }

    #[test]
    fn test_parse_bot_has_no_steam_id() {
        let parsed = parse(r#""Bot<9><BOT><Blue>" say "beep""#).unwrap();
        match parsed.fields {
            Fields::Say { player, .. } => assert_eq!(player.steam_id, None),
            other => panic!("Unexpected fields: {:?}", other),
        }
    }

    #[test]
    fn test_parse_world_triggers() {
        assert_eq!(
            parse(r#"World triggered "Round_Start""#).unwrap().fields,
            Fields::RoundStart
        );
        assert_eq!(
            parse(r#"World triggered "Round_Win" (winner "Blue")"#)
                .unwrap()
                .fields,
            Fields::RoundWin { winner: Team::Blue }
        );
        assert_eq!(
            parse(r#"World triggered "Round_Length" (seconds "312.50")"#)
                .unwrap()
                .fields,
            Fields::RoundLength { seconds: 312.5 }
        );
        assert!(matches!(
            parse(r#"World triggered "Round_Setup_Begin""#),
            Err(ParseError::Unhandled(_))
        ));
    }

    #[test]
    fn test_parse_team_scores() {
        assert_eq!(
            parse(r#"Team "Red" current score "2" with "6" players"#)
                .unwrap()
                .fields,
            Fields::TeamScore {
                team: Team::Red,
                score: 2,
                players: 6
            }
        );
        assert_eq!(
            parse(r#"Team "Blue" final score "3" with "6" players"#)
                .unwrap()
                .event_type,
            EventType::TeamFinalScore
        );
        assert!(matches!(
            parse(r#"Team "Blue" final score "x" with "6" players"#),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn test_parse_log_lifecycle() {
        assert_eq!(
            parse(r#"Log file started (file "logs/L1021000.log") (game "/tf") (version "8835751")"#)
                .unwrap()
                .fields,
            Fields::LogStart {
                file: "logs/L1021000.log".to_string()
            }
        );
        assert_eq!(parse("Log file closed.").unwrap().fields, Fields::LogStop);
        assert_eq!(
            parse(r#"Started map "cp_badlands" (CRC "abc")"#)
                .unwrap()
                .fields,
            Fields::MapLoad {
                map: "cp_badlands".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_prefix() {
        let parser = SourceLogParser::new();
        assert_eq!(parser.parse("hello world"), Err(ParseError::MissingPrefix));
        assert!(matches!(
            parser.parse("L hello world"),
            Err(ParseError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            parser.parse("L 10/21/2023 - 14:22:11: rcon from \"1.2.3.4\""),
            Err(ParseError::Unhandled(_))
        ));
    }

    #[test]
    fn test_parse_strips_line_endings() {
        let parsed = SourceLogParser::new()
            .parse("L 10/21/2023 - 14:22:11: Log file closed.\r\n")
            .unwrap();
        assert_eq!(parsed.event_type, EventType::LogStop);
    }
}
