//! Maps the secret embedded in log datagrams to the server that sent them

use crate::directory::{DirectoryError, ServerDirectory};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Upper bound on a single directory fetch
pub const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity of a server as known to the secret map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdent {
    pub server_id: i32,
    pub server_name: String,
}

pub type SecretMap = HashMap<i64, ServerIdent>;

/// Secret lookups against a map that is rebuilt wholesale on refresh.
///
/// Readers clone the current `Arc` and never observe a partially built
/// map: a refresh builds the replacement first and swaps it in under a
/// short write lock.
pub struct SecretResolver {
    directory: Arc<dyn ServerDirectory>,
    secrets: RwLock<Arc<SecretMap>>,
    fetch_timeout: Duration,
}

impl SecretResolver {
    pub fn new(directory: Arc<dyn ServerDirectory>) -> Self {
        Self::with_timeout(directory, DIRECTORY_TIMEOUT)
    }

    pub fn with_timeout(directory: Arc<dyn ServerDirectory>, fetch_timeout: Duration) -> Self {
        Self {
            directory,
            secrets: RwLock::new(Arc::new(SecretMap::new())),
            fetch_timeout,
        }
    }

    /// Fetches enabled servers and replaces the secret map.
    ///
    /// On failure the previous map stays in place. Returns the number of
    /// secrets in the new map.
    pub async fn refresh(&self) -> Result<usize, DirectoryError> {
        let servers = tokio::time::timeout(self.fetch_timeout, self.directory.servers(false))
            .await
            .map_err(|_| DirectoryError::Timeout)??;

        let mut secrets = SecretMap::with_capacity(servers.len());
        for server in servers {
            let ident = ServerIdent {
                server_id: server.server_id,
                server_name: server.short_name,
            };
            if let Some(previous) = secrets.insert(server.log_secret, ident) {
                warn!(
                    "Servers {} and {} share a log secret, keeping {}",
                    previous.server_id, server.server_id, server.server_id
                );
            }
        }

        let count = secrets.len();
        *self.secrets.write().await = Arc::new(secrets);
        info!("Loaded {} server log secrets", count);

        Ok(count)
    }

    pub async fn resolve(&self, secret: i64) -> Option<ServerIdent> {
        self.secrets.read().await.get(&secret).cloned()
    }

    /// The current map. Later refreshes do not affect the returned value.
    pub async fn snapshot(&self) -> Arc<SecretMap> {
        Arc::clone(&*self.secrets.read().await)
    }
}
