//! Writes in-game chat to the log.

use crate::broadcaster::{BroadcastError, Broadcaster};
use log::info;
use shared::{EventType, Fields};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct ChatLogger {
    broadcaster: Arc<Broadcaster>,
}

impl ChatLogger {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }

    /// Logs chat messages until cancelled. Returns how many were written.
    pub async fn run(self, cancel: CancellationToken) -> Result<u64, BroadcastError> {
        let (queue, mut events) = self.broadcaster.queue();
        self.broadcaster
            .consume(&queue, &[EventType::Say, EventType::SayTeam])
            .await?;

        let mut written = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let (player, message, scope) = match &event.fields {
                        Fields::Say { player, message } => (player, message, "all"),
                        Fields::SayTeam { player, message } => (player, message, "team"),
                        _ => continue,
                    };
                    info!(
                        "[{}] ({}) {}: {}",
                        event.server_name, scope, player.name, message
                    );
                    written += 1;
                }
            }
        }

        self.broadcaster.unregister_consumer(&queue).await;
        Ok(written)
    }
}
