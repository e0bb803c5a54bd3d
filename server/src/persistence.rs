//! Collaborators used when a match is finalized: storage for the result,
//! notification of a summary, and the live server state used to backfill
//! the match title.

use crate::matches::{MatchResult, MatchSummary};
use async_trait::async_trait;
use log::info;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write match: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode match: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("match rejected: {0}")]
    Rejected(String),
}

/// Stores finished matches. Called exactly once per match.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Returns the id assigned to the stored match
    async fn save_match(&self, result: &MatchResult) -> Result<i64, StoreError>;
}

/// Fire and forget delivery of match summaries
pub trait Notifier: Send + Sync {
    fn notify(&self, summary: MatchSummary);
}

/// What a server currently reports about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerState {
    pub name: String,
    pub map: String,
    pub players: u32,
}

#[async_trait]
pub trait ServerStateSource: Send + Sync {
    async fn current_state(&self, server_id: i32) -> Option<ServerState>;
}

/// Writes each match as a pretty printed JSON file named
/// `<match_id>-<server>.json` in a directory.
#[derive(Debug)]
pub struct JsonMatchStore {
    dir: PathBuf,
    next_id: AtomicI64,
}

impl JsonMatchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_id: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        }
    }

    fn file_name(match_id: i64, server_name: &str) -> String {
        let server: String = server_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{}-{}.json", match_id, server)
    }
}

#[async_trait]
impl MatchStore for JsonMatchStore {
    async fn save_match(&self, result: &MatchResult) -> Result<i64, StoreError> {
        let match_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let encoded = serde_json::to_vec_pretty(result)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name(match_id, &result.server_name));
        tokio::fs::write(&path, encoded).await?;

        Ok(match_id)
    }
}

/// Writes summaries to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, summary: MatchSummary) {
        let winner = summary
            .winner
            .map_or_else(|| "draw".to_string(), |team| format!("{:?} wins", team));
        let top = summary
            .top_fragger
            .map(|(name, kills)| format!(", top fragger {} ({} kills)", name, kills))
            .unwrap_or_default();
        info!(
            "Match #{} on {} ({}): RED {} - {} BLU, {}, {} players, {} rounds, {}s{}",
            summary.match_id,
            summary.server_name,
            summary.map_name,
            summary.red_score,
            summary.blue_score,
            winner,
            summary.players,
            summary.rounds,
            summary.duration_secs,
            top
        );
    }
}

/// State source for deployments without live server polling
#[derive(Debug, Default, Clone, Copy)]
pub struct NoServerState;

#[async_trait]
impl ServerStateSource for NoServerState {
    async fn current_state(&self, _server_id: i32) -> Option<ServerState> {
        None
    }
}
