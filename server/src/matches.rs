//! In-progress match statistics and their finalized form
//!
//! A [`Match`] is owned by exactly one task and folds events one at a time
//! through [`Match::apply`]. [`Match::finish`] turns it into the read-only
//! [`MatchResult`] handed to persistence.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use shared::{Event, Fields, LogPlayer, PlayerClass, Team};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ApplyError {
    /// The event carries nothing to aggregate. Not a failure.
    #[error("event ignored")]
    Ignored,
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub steam_id: String,
    pub name: String,
    pub team: Team,
    pub classes: Vec<PlayerClass>,
    pub kills: u32,
    pub assists: u32,
    pub deaths: u32,
    pub messages: u32,
}

impl PlayerStats {
    pub fn kd_ratio(&self) -> f64 {
        if self.deaths == 0 {
            self.kills as f64
        } else {
            self.kills as f64 / self.deaths as f64
        }
    }

    pub fn kad_ratio(&self) -> f64 {
        (self.kills + self.assists) as f64 / self.deaths.max(1) as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    pub score: i32,
    pub kills: u32,
    pub rounds_won: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub started_on: NaiveDateTime,
    pub ended_on: Option<NaiveDateTime>,
    pub winner: Option<Team>,
    pub length_secs: Option<f32>,
}

/// Live aggregate for one match on one server
#[derive(Debug, Clone)]
pub struct Match {
    server_id: i32,
    server_name: String,
    title: String,
    map_name: String,
    started_on: Option<NaiveDateTime>,
    last_event_on: Option<NaiveDateTime>,
    players: HashMap<String, PlayerStats>,
    red: TeamStats,
    blue: TeamStats,
    rounds: Vec<Round>,
    events: u64,
}

impl Match {
    pub fn new(server_id: i32, server_name: impl Into<String>) -> Self {
        Self {
            server_id,
            server_name: server_name.into(),
            title: String::new(),
            map_name: String::new(),
            started_on: None,
            last_event_on: None,
            players: HashMap::new(),
            red: TeamStats::default(),
            blue: TeamStats::default(),
            rounds: Vec::new(),
            events: 0,
        }
    }

    pub fn server_id(&self) -> i32 {
        self.server_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn player(&self, steam_id: &str) -> Option<&PlayerStats> {
        self.players.get(steam_id)
    }

    pub fn team(&self, team: Team) -> Option<&TeamStats> {
        match team {
            Team::Red => Some(&self.red),
            Team::Blue => Some(&self.blue),
            _ => None,
        }
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    /// Number of events seen, including ignored ones
    pub fn event_count(&self) -> u64 {
        self.events
    }

    /// Folds one event into the aggregate.
    pub fn apply(&mut self, event: &Event) -> Result<(), ApplyError> {
        self.events += 1;
        self.started_on.get_or_insert(event.created_on);
        self.last_event_on = Some(event.created_on);

        match &event.fields {
            Fields::LogStart { .. }
            | Fields::LogStop
            | Fields::Connected { .. }
            | Fields::Disconnected { .. } => Err(ApplyError::Ignored),

            Fields::MapLoad { map } => {
                self.map_name = map.clone();
                Ok(())
            }

            Fields::JoinedTeam { player, team } => {
                let stats = self.player_mut(player)?;
                stats.team = *team;
                Ok(())
            }

            Fields::ChangeClass { player, class } => {
                let stats = self.player_mut(player)?;
                if !stats.classes.contains(class) {
                    stats.classes.push(*class);
                }
                Ok(())
            }

            Fields::Say { player, .. } | Fields::SayTeam { player, .. } => {
                self.player_mut(player)?.messages += 1;
                Ok(())
            }

            Fields::Killed {
                attacker, victim, ..
            } => {
                if attacker.steam_id.is_none() && victim.steam_id.is_none() {
                    return Err(ApplyError::Invalid(
                        "kill between untracked players".to_string(),
                    ));
                }
                if attacker.steam_id.is_some() {
                    self.player_mut(attacker)?.kills += 1;
                    if let Some(team) = self.team_mut(attacker.team) {
                        team.kills += 1;
                    }
                }
                if victim.steam_id.is_some() {
                    self.player_mut(victim)?.deaths += 1;
                }
                Ok(())
            }

            Fields::KillAssist { assister, .. } => {
                self.player_mut(assister)?.assists += 1;
                Ok(())
            }

            Fields::Suicide { player, .. } => {
                self.player_mut(player)?.deaths += 1;
                Ok(())
            }

            Fields::RoundStart => {
                self.rounds.push(Round {
                    started_on: event.created_on,
                    ended_on: None,
                    winner: None,
                    length_secs: None,
                });
                Ok(())
            }

            Fields::RoundWin { winner } => {
                let round = self
                    .rounds
                    .last_mut()
                    .filter(|round| round.ended_on.is_none())
                    .ok_or_else(|| ApplyError::Invalid("round won before it started".to_string()))?;
                round.ended_on = Some(event.created_on);
                round.winner = Some(*winner);
                if let Some(team) = self.team_mut(*winner) {
                    team.rounds_won += 1;
                }
                Ok(())
            }

            Fields::RoundLength { seconds } => {
                let round = self
                    .rounds
                    .last_mut()
                    .ok_or_else(|| ApplyError::Invalid("round length without a round".to_string()))?;
                round.length_secs = Some(*seconds);
                Ok(())
            }

            Fields::TeamScore { team, score, .. } | Fields::TeamFinalScore { team, score, .. } => {
                let stats = self
                    .team_mut(*team)
                    .ok_or_else(|| ApplyError::Invalid(format!("score for team {:?}", team)))?;
                stats.score = *score;
                Ok(())
            }
        }
    }

    fn player_mut(&mut self, player: &LogPlayer) -> Result<&mut PlayerStats, ApplyError> {
        let steam_id = player
            .steam_id
            .as_ref()
            .ok_or_else(|| ApplyError::Invalid(format!("{} has no steam id", player.name)))?;

        let stats = self
            .players
            .entry(steam_id.clone())
            .or_insert_with(|| PlayerStats {
                steam_id: steam_id.clone(),
                ..PlayerStats::default()
            });
        stats.name.clone_from(&player.name);
        if player.team != Team::Unassigned {
            stats.team = player.team;
        }
        Ok(stats)
    }

    fn team_mut(&mut self, team: Team) -> Option<&mut TeamStats> {
        match team {
            Team::Red => Some(&mut self.red),
            Team::Blue => Some(&mut self.blue),
            _ => None,
        }
    }

    /// Closes the match into its persisted form
    pub fn finish(self) -> MatchResult {
        let mut players: Vec<PlayerStats> = self.players.into_values().collect();
        players.sort_by(|a, b| b.kills.cmp(&a.kills).then_with(|| a.name.cmp(&b.name)));

        MatchResult {
            server_id: self.server_id,
            server_name: self.server_name,
            title: self.title,
            map_name: self.map_name,
            started_on: self.started_on,
            ended_on: self.last_event_on,
            players,
            red: self.red,
            blue: self.blue,
            rounds: self.rounds,
        }
    }
}

/// Finalized, read-only snapshot of a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub server_id: i32,
    pub server_name: String,
    pub title: String,
    pub map_name: String,
    pub started_on: Option<NaiveDateTime>,
    pub ended_on: Option<NaiveDateTime>,
    /// Sorted by kills, highest first
    pub players: Vec<PlayerStats>,
    pub red: TeamStats,
    pub blue: TeamStats,
    pub rounds: Vec<Round>,
}

impl MatchResult {
    /// No player activity and no rounds. A log stop that arrives after the
    /// final scores produces one of these.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.rounds.is_empty()
    }

    pub fn winner(&self) -> Option<Team> {
        match self.red.score.cmp(&self.blue.score) {
            std::cmp::Ordering::Greater => Some(Team::Red),
            std::cmp::Ordering::Less => Some(Team::Blue),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn duration_secs(&self) -> i64 {
        match (self.started_on, self.ended_on) {
            (Some(start), Some(end)) => (end - start).num_seconds(),
            _ => 0,
        }
    }

    pub fn summary(&self, match_id: i64) -> MatchSummary {
        MatchSummary {
            match_id,
            server_name: self.server_name.clone(),
            title: self.title.clone(),
            map_name: self.map_name.clone(),
            red_score: self.red.score,
            blue_score: self.blue.score,
            winner: self.winner(),
            top_fragger: self
                .players
                .first()
                .filter(|player| player.kills > 0)
                .map(|player| (player.name.clone(), player.kills)),
            players: self.players.len(),
            rounds: self.rounds.len(),
            duration_secs: self.duration_secs(),
        }
    }
}

/// Short description of a finished match for notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummary {
    pub match_id: i64,
    pub server_name: String,
    pub title: String,
    pub map_name: String,
    pub red_score: i32,
    pub blue_score: i32,
    pub winner: Option<Team>,
    pub top_fragger: Option<(String, u32)>,
    pub players: usize,
    pub rounds: usize,
    pub duration_secs: i64,
}
