//! Live match tracking per game server
//!
//! The manager consumes the whole event stream and keeps at most one active
//! match per server id. Each active match is owned by its own task, which
//! folds events from a private queue into a [`Match`] aggregate. The
//! manager itself only routes events and decides when a match is over:
//!
//! - after the configured number of team final score lines (two teams by
//!   default), or
//! - immediately on a log stop line.
//!
//! Finishing closes the private queue, so the owning task applies everything
//! already routed to it and hands the aggregate back. Storage and
//! notification then run on a separate task while the manager keeps
//! routing. Any later event for the same server starts a new match.

use crate::broadcaster::{BroadcastError, Broadcaster, EventQueue, EventReceiver};
use crate::matches::{ApplyError, Match};
use crate::persistence::{MatchStore, Notifier, ServerStateSource};
use log::{debug, error, info, warn};
use shared::{Event, EventType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Team final score lines needed to end a match
pub const FINAL_SCORE_THRESHOLD: u32 = 2;

#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub final_score_threshold: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            final_score_threshold: FINAL_SCORE_THRESHOLD,
        }
    }
}

/// Handle to a running match task
struct ActiveMatch {
    events: mpsc::UnboundedSender<Arc<Event>>,
    handle: JoinHandle<Match>,
    final_scores: u32,
}

/// Collaborators used when a match finishes
#[derive(Clone)]
pub struct Finalizers {
    pub store: Arc<dyn MatchStore>,
    pub notifier: Arc<dyn Notifier>,
    pub states: Arc<dyn ServerStateSource>,
}

pub struct MatchManager {
    broadcaster: Arc<Broadcaster>,
    finalizers: Finalizers,
    config: MatchConfig,
    matches: Mutex<HashMap<i32, ActiveMatch>>,
}

impl MatchManager {
    pub fn new(broadcaster: Arc<Broadcaster>, finalizers: Finalizers, config: MatchConfig) -> Self {
        Self {
            broadcaster,
            finalizers,
            config,
            matches: Mutex::new(HashMap::new()),
        }
    }

    /// Server ids with an active match, sorted
    pub async fn active_matches(&self) -> Vec<i32> {
        let matches = self.matches.lock().await;
        let mut ids: Vec<i32> = matches.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn is_active(&self, server_id: i32) -> bool {
        self.matches.lock().await.contains_key(&server_id)
    }

    /// Registers for every event type. Returns the queue receiver to pass
    /// to [`MatchManager::run`].
    pub async fn subscribe(&self) -> Result<(EventQueue, EventReceiver), BroadcastError> {
        let (queue, receiver) = self.broadcaster.queue();
        self.broadcaster.consume(&queue, &[EventType::Any]).await?;
        Ok((queue, receiver))
    }

    /// Routes events until `cancel` fires or the queue closes.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), BroadcastError> {
        let (queue, mut events) = self.subscribe().await?;
        info!("Match manager started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.route(event, &cancel).await,
                    None => break,
                },
            }
        }

        self.broadcaster.unregister_consumer(&queue).await;
        let abandoned = self.matches.lock().await.len();
        info!("Match manager stopped with {} matches in progress", abandoned);
        Ok(())
    }

    /// Forwards `event` to its server's match, starting one if needed, and
    /// finishes the match if the event ends it.
    pub async fn route(&self, event: Arc<Event>, cancel: &CancellationToken) {
        let server_id = event.server_id;
        let mut matches = self.matches.lock().await;

        let active = matches
            .entry(server_id)
            .or_insert_with(|| start_match(&event, cancel.child_token()));

        if active.events.send(Arc::clone(&event)).is_err() {
            warn!("Match task for server {} is gone", server_id);
        }

        let finished = match event.event_type {
            EventType::TeamFinalScore => {
                active.final_scores += 1;
                active.final_scores >= self.config.final_score_threshold
            }
            EventType::LogStop => true,
            _ => false,
        };

        if finished {
            if let Some(active) = matches.remove(&server_id) {
                drop(matches);
                // Closing the queue lets the task drain and return its match
                drop(active.events);
                tokio::spawn(finalize(server_id, active.handle, self.finalizers.clone()));
            }
        }
    }
}

fn start_match(event: &Event, cancel: CancellationToken) -> ActiveMatch {
    info!(
        "Starting match on server {} ({})",
        event.server_name, event.server_id
    );
    let (events, receiver) = mpsc::unbounded_channel();
    let game = Match::new(event.server_id, event.server_name.clone());
    let handle = tokio::spawn(run_match(game, receiver, cancel));

    ActiveMatch {
        events,
        handle,
        final_scores: 0,
    }
}

/// Owning task of one match. Returns the aggregate once its queue closes
/// or it is cancelled.
async fn run_match(
    mut game: Match,
    mut events: mpsc::UnboundedReceiver<Arc<Event>>,
    cancel: CancellationToken,
) -> Match {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => match game.apply(&event) {
                    Ok(()) | Err(ApplyError::Ignored) => {}
                    Err(e) => warn!(
                        "Server {}: cannot apply {}: {}",
                        game.server_id(),
                        event.event_type,
                        e
                    ),
                },
                None => break,
            },
            _ = cancel.cancelled() => {
                debug!("Match on server {} cancelled", game.server_id());
                break;
            }
        }
    }
    game
}

async fn finalize(server_id: i32, handle: JoinHandle<Match>, finalizers: Finalizers) {
    let mut game = match handle.await {
        Ok(game) => game,
        Err(e) => {
            error!("Match task for server {} failed: {}", server_id, e);
            return;
        }
    };

    if game.title().is_empty() {
        if let Some(state) = finalizers.states.current_state(server_id).await {
            game.set_title(state.name);
        }
    }

    let result = game.finish();
    if result.is_empty() {
        debug!("Discarding empty match on server {}", result.server_name);
        return;
    }

    // Failed saves are not retried and the match is dropped
    match finalizers.store.save_match(&result).await {
        Ok(match_id) => {
            info!(
                "Saved match #{} for server {} ({} players)",
                match_id,
                result.server_name,
                result.players.len()
            );
            finalizers.notifier.notify(result.summary(match_id));
        }
        Err(e) => error!(
            "Failed to save match for server {}, discarding it: {}",
            result.server_name, e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::ServerState;
    use crate::testing::{MemoryMatchStore, RecordingNotifier, StaticServerState};
    use chrono::NaiveDate;
    use shared::{Fields, LogPlayer, Team};
    use std::time::Duration;

    struct Harness {
        manager: Arc<MatchManager>,
        store: Arc<MemoryMatchStore>,
        notifier: Arc<RecordingNotifier>,
        cancel: CancellationToken,
    }

    fn harness(threshold: u32) -> Harness {
        let store = Arc::new(MemoryMatchStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let states = Arc::new(StaticServerState::new(HashMap::from([(
            42,
            ServerState {
                name: "Uncletopia | Chicago".to_string(),
                map: "pl_upward".to_string(),
                players: 24,
            },
        )])));
        let manager = Arc::new(MatchManager::new(
            Arc::new(Broadcaster::new()),
            Finalizers {
                store: store.clone(),
                notifier: notifier.clone(),
                states,
            },
            MatchConfig {
                final_score_threshold: threshold,
            },
        ));
        Harness {
            manager,
            store,
            notifier,
            cancel: CancellationToken::new(),
        }
    }

    fn plain_event(server_id: i32, fields: Fields) -> Event {
        let created_on = NaiveDate::from_ymd_opt(2023, 10, 21)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap();
        Event::new(server_id, format!("srv-{}", server_id), fields, created_on)
    }

    fn event(server_id: i32, fields: Fields) -> Arc<Event> {
        Arc::new(plain_event(server_id, fields))
    }

    fn final_score(team: Team) -> Fields {
        Fields::TeamFinalScore {
            team,
            score: 3,
            players: 6,
        }
    }

    fn kill() -> Fields {
        Fields::Killed {
            attacker: LogPlayer {
                name: "A".to_string(),
                user_id: 1,
                steam_id: Some("[U:1:1]".to_string()),
                team: Team::Red,
            },
            victim: LogPlayer {
                name: "B".to_string(),
                user_id: 2,
                steam_id: Some("[U:1:2]".to_string()),
                team: Team::Blue,
            },
            weapon: "scattergun".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_event_starts_match() {
        let h = harness(2);
        assert!(!h.manager.is_active(42).await);

        h.manager.route(event(42, kill()), &h.cancel).await;
        h.manager.route(event(42, kill()), &h.cancel).await;
        h.manager.route(event(7, kill()), &h.cancel).await;

        assert_eq!(h.manager.active_matches().await, vec![7, 42]);
    }

    #[tokio::test]
    async fn test_two_final_scores_finalize_once() {
        let h = harness(2);

        h.manager.route(event(42, kill()), &h.cancel).await;
        h.manager.route(event(42, final_score(Team::Red)), &h.cancel).await;
        assert!(h.manager.is_active(42).await);

        h.manager.route(event(42, final_score(Team::Blue)), &h.cancel).await;
        assert!(!h.manager.is_active(42).await);

        assert!(h.store.wait_for(1, Duration::from_secs(2)).await);
        let saved = h.store.saved();
        assert_eq!(saved.len(), 1);

        let (match_id, result) = &saved[0];
        assert_eq!(result.server_id, 42);
        assert_eq!(result.players.len(), 2);
        assert_eq!(result.red.score, 3);
        assert_eq!(result.blue.score, 3);
        assert_eq!(result.title, "Uncletopia | Chicago");

        // A later event opens a fresh match
        h.manager.route(event(42, kill()), &h.cancel).await;
        assert!(h.manager.is_active(42).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.store.saved().len(), 1);

        let summaries = h.notifier.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].match_id, *match_id);
    }

    #[tokio::test]
    async fn test_single_final_score_keeps_match_open() {
        let h = harness(2);

        h.manager.route(event(42, final_score(Team::Red)), &h.cancel).await;
        h.manager.route(event(42, kill()), &h.cancel).await;

        assert!(h.manager.is_active(42).await);
        assert!(!h.store.wait_for(1, Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_log_stop_finalizes_immediately() {
        let h = harness(2);

        h.manager.route(event(42, kill()), &h.cancel).await;
        h.manager.route(event(42, final_score(Team::Red)), &h.cancel).await;
        h.manager.route(event(42, Fields::LogStop), &h.cancel).await;

        assert!(!h.manager.is_active(42).await);
        assert!(h.store.wait_for(1, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_final_scores_do_not_carry_over() {
        let h = harness(2);

        h.manager.route(event(42, kill()), &h.cancel).await;
        h.manager.route(event(42, final_score(Team::Red)), &h.cancel).await;
        h.manager.route(event(42, Fields::LogStop), &h.cancel).await;

        // New match needs two final scores of its own
        h.manager.route(event(42, final_score(Team::Blue)), &h.cancel).await;
        assert!(h.manager.is_active(42).await);
        assert!(h.store.wait_for(1, Duration::from_secs(2)).await);
        assert_eq!(h.store.saved().len(), 1);
    }

    #[tokio::test]
    async fn test_log_stop_after_final_scores_saves_once() {
        let h = harness(2);

        h.manager.route(event(42, kill()), &h.cancel).await;
        h.manager.route(event(42, final_score(Team::Red)), &h.cancel).await;
        h.manager.route(event(42, final_score(Team::Blue)), &h.cancel).await;
        // Opens a match with nothing in it, which is finished and dropped
        h.manager.route(event(42, Fields::LogStop), &h.cancel).await;
        assert!(!h.manager.is_active(42).await);

        assert!(h.store.wait_for(1, Duration::from_secs(2)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.store.saved().len(), 1);
        assert_eq!(h.store.saved()[0].1.players.len(), 2);
        assert_eq!(h.notifier.summaries().len(), 1);
    }

    #[tokio::test]
    async fn test_configurable_threshold() {
        let h = harness(3);

        for team in [Team::Red, Team::Blue] {
            h.manager.route(event(5, final_score(team)), &h.cancel).await;
        }
        assert!(h.manager.is_active(5).await);

        h.manager.route(event(5, final_score(Team::Red)), &h.cancel).await;
        assert!(!h.manager.is_active(5).await);
    }

    #[tokio::test]
    async fn test_failed_save_discards_match() {
        let h = harness(2);
        h.store.set_failing(true);

        h.manager.route(event(42, kill()), &h.cancel).await;
        h.manager.route(event(42, Fields::LogStop), &h.cancel).await;

        assert!(!h.manager.is_active(42).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.store.saved().is_empty());
        assert!(h.notifier.summaries().is_empty());
    }

    #[tokio::test]
    async fn test_title_backfill_only_when_known() {
        let h = harness(2);

        h.manager.route(event(9, kill()), &h.cancel).await;
        h.manager.route(event(9, Fields::LogStop), &h.cancel).await;

        assert!(h.store.wait_for(1, Duration::from_secs(2)).await);
        assert_eq!(h.store.saved()[0].1.title, "");
    }

    #[tokio::test]
    async fn test_run_consumes_broadcaster() {
        let h = harness(2);
        let broadcaster = Arc::clone(&h.manager.broadcaster);
        let task = tokio::spawn(Arc::clone(&h.manager).run(h.cancel.clone()));

        // Wait for the manager's subscription
        while broadcaster.consumer_count(EventType::Any).await == 0 {
            tokio::task::yield_now().await;
        }

        broadcaster.emit((*event(42, kill())).clone()).await;
        broadcaster.emit((*event(42, Fields::LogStop)).clone()).await;
        assert!(h.store.wait_for(1, Duration::from_secs(2)).await);

        h.cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(broadcaster.consumer_count(EventType::Any).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_servers_keep_order_and_one_match() {
        const SERVERS: i32 = 10;
        const SCORES: i32 = 200;
        const MATCHES: i32 = 2;

        let h = harness(2);
        let broadcaster = Arc::clone(&h.manager.broadcaster);
        let task = tokio::spawn(Arc::clone(&h.manager).run(h.cancel.clone()));
        while broadcaster.consumer_count(EventType::Any).await == 0 {
            tokio::task::yield_now().await;
        }

        let emitters: Vec<_> = (1..=SERVERS)
            .map(|server_id| {
                let broadcaster = Arc::clone(&broadcaster);
                tokio::spawn(async move {
                    for round in 0..MATCHES {
                        broadcaster.emit(plain_event(server_id, kill())).await;
                        for seq in 1..=SCORES {
                            let score = Fields::TeamScore {
                                team: Team::Red,
                                score: round * 1000 + seq,
                                players: 6,
                            };
                            broadcaster.emit(plain_event(server_id, score)).await;
                            if seq % 50 == 0 {
                                tokio::task::yield_now().await;
                            }
                        }
                        broadcaster.emit(plain_event(server_id, Fields::LogStop)).await;
                    }
                })
            })
            .collect();
        for emitter in emitters {
            emitter.await.unwrap();
        }

        let expected = (SERVERS * MATCHES) as usize;
        assert!(h.store.wait_for(expected, Duration::from_secs(5)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let saved = h.store.saved();
        assert_eq!(saved.len(), expected);

        let mut scores: HashMap<i32, Vec<i32>> = HashMap::new();
        for (_, result) in &saved {
            assert_eq!(result.players.len(), 2);
            scores.entry(result.server_id).or_default().push(result.red.score);
        }
        assert_eq!(scores.len(), SERVERS as usize);
        for (server_id, mut finals) in scores {
            finals.sort_unstable();
            // The last score sent wins only if every score was applied in order
            assert_eq!(finals, vec![SCORES, 1000 + SCORES], "server {}", server_id);
        }
        assert!(h.manager.active_matches().await.is_empty());

        h.cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
