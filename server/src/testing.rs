//! In-memory collaborators for tests and local experiments

use crate::directory::{DirectoryError, ServerDirectory, ServerRecord};
use crate::matches::{MatchResult, MatchSummary};
use crate::persistence::{MatchStore, Notifier, ServerState, ServerStateSource, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Server directory that can be edited, slowed down or broken at runtime
#[derive(Debug, Default)]
pub struct MemoryServerDirectory {
    servers: Mutex<Vec<ServerRecord>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    lookups: AtomicUsize,
}

impl MemoryServerDirectory {
    pub fn new(servers: Vec<ServerRecord>) -> Self {
        Self {
            servers: Mutex::new(servers),
            ..Self::default()
        }
    }

    pub fn set_servers(&self, servers: Vec<ServerRecord>) {
        *lock(&self.servers) = servers;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Number of `server_by_name` calls served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    async fn wait(&self) -> Result<(), DirectoryError> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("directory offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ServerDirectory for MemoryServerDirectory {
    async fn servers(&self, include_disabled: bool) -> Result<Vec<ServerRecord>, DirectoryError> {
        self.wait().await?;
        Ok(lock(&self.servers)
            .iter()
            .filter(|server| include_disabled || server.enabled)
            .cloned()
            .collect())
    }

    async fn server_by_name(&self, name: &str) -> Result<Option<ServerRecord>, DirectoryError> {
        self.wait().await?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.servers)
            .iter()
            .find(|server| server.short_name == name)
            .cloned())
    }
}

/// Keeps saved matches in memory
#[derive(Debug, Default)]
pub struct MemoryMatchStore {
    saved: Mutex<Vec<(i64, MatchResult)>>,
    next_id: AtomicI64,
    failing: AtomicBool,
    saved_notify: Notify,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Vec<(i64, MatchResult)> {
        lock(&self.saved).clone()
    }

    /// Waits until at least `count` matches are stored or `timeout` passes.
    /// Returns whether the count was reached.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let waiting = async {
            loop {
                let notified = self.saved_notify.notified();
                if lock(&self.saved).len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, waiting).await.is_ok()
    }
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn save_match(&self, result: &MatchResult) -> Result<i64, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("store offline".to_string()));
        }
        let match_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.saved).push((match_id, result.clone()));
        self.saved_notify.notify_waiters();
        Ok(match_id)
    }
}

/// Remembers every summary it is handed
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    summaries: Mutex<Vec<MatchSummary>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> Vec<MatchSummary> {
        lock(&self.summaries).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, summary: MatchSummary) {
        lock(&self.summaries).push(summary);
    }
}

/// Fixed server states keyed by server id
#[derive(Debug, Default)]
pub struct StaticServerState {
    states: HashMap<i32, ServerState>,
}

impl StaticServerState {
    pub fn new(states: HashMap<i32, ServerState>) -> Self {
        Self { states }
    }
}

#[async_trait]
impl ServerStateSource for StaticServerState {
    async fn current_state(&self, server_id: i32) -> Option<ServerState> {
        self.states.get(&server_id).cloned()
    }
}
