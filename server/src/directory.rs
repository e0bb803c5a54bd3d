//! Server directory: the authoritative list of game servers and their log
//! secrets

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// A configured game server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub server_id: i32,
    /// Unique short name, also used as the server name on events
    pub short_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    /// Secret the server prefixes every log datagram with
    pub log_secret: i64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("server directory did not answer in time")]
    Timeout,
    #[error("failed to read server directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid server directory: {0}")]
    Format(#[from] serde_json::Error),
    #[error("server directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of server configuration
#[async_trait]
pub trait ServerDirectory: Send + Sync {
    /// All servers, optionally including disabled ones
    async fn servers(&self, include_disabled: bool) -> Result<Vec<ServerRecord>, DirectoryError>;

    /// Looks a server up by its short name
    async fn server_by_name(&self, name: &str) -> Result<Option<ServerRecord>, DirectoryError>;
}

/// Directory backed by a JSON array of [`ServerRecord`]s.
///
/// The file is read again on every call so edits, such as a rotated
/// secret, are picked up on the next refresh without a restart.
#[derive(Debug, Clone)]
pub struct FileServerDirectory {
    path: PathBuf,
}

impl FileServerDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Vec<ServerRecord>, DirectoryError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[async_trait]
impl ServerDirectory for FileServerDirectory {
    async fn servers(&self, include_disabled: bool) -> Result<Vec<ServerRecord>, DirectoryError> {
        let servers = self.load().await?;
        Ok(servers
            .into_iter()
            .filter(|server| include_disabled || server.enabled)
            .collect())
    }

    async fn server_by_name(&self, name: &str) -> Result<Option<ServerRecord>, DirectoryError> {
        let servers = self.load().await?;
        Ok(servers.into_iter().find(|server| server.short_name == name))
    }
}
