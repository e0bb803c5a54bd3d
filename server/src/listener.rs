//! UDP log ingestion
//!
//! Game servers stream one log line per datagram. The listener runs two
//! tasks connected by an unbounded channel so that parsing and fan-out never
//! delay draining the socket:
//!
//! - **Socket reader**: receives datagrams, decodes the framing and hands
//!   secreted lines over in arrival order
//! - **Line processor**: resolves the secret, looks up the server record,
//!   parses the line and emits the resulting [`Event`]
//!
//! A third task refreshes the secret map on a timer and tells the processor
//! to drop its server cache afterwards.

use crate::broadcaster::Broadcaster;
use crate::directory::{ServerDirectory, ServerRecord};
use crate::resolver::SecretResolver;
use log::{debug, error, info, warn};
use shared::wire::MAX_DATAGRAM_SIZE;
use shared::{decode_packet, Event, LineParser, Packet, DEFAULT_LOG_PORT};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Refresh period of the secret map and server cache
pub const SECRET_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Unsupported legacy packets are logged once per this many occurrences
pub const LEGACY_LOG_EVERY: u64 = 10_000;

/// Malformed datagrams are logged once per this many occurrences
pub const MALFORMED_LOG_EVERY: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind, as `host:port`. Host names are resolved.
    pub bind_addr: String,
    pub secret_refresh: Duration,
    pub legacy_log_every: u64,
    pub malformed_log_every: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_LOG_PORT),
            secret_refresh: SECRET_REFRESH_INTERVAL,
            legacy_log_every: LEGACY_LOG_EVERY,
            malformed_log_every: MALFORMED_LOG_EVERY,
        }
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot resolve listen address {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("listen address {0} did not resolve to anything")]
    NoAddress(String),
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("line processor stopped unexpectedly: {0}")]
    Processor(#[from] tokio::task::JoinError),
}

/// Counts occurrences and decides which of them get logged.
///
/// Logs occurrence 1, then `every + 1`, `2 * every + 1` and so on, which is
/// one line per `every` occurrences starting with the first.
#[derive(Debug)]
pub struct SampledCounter {
    count: AtomicU64,
    every: u64,
}

impl SampledCounter {
    pub fn new(every: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            every: every.max(1),
        }
    }

    /// Records one occurrence. Returns the running total when this one
    /// should be logged.
    pub fn record(&self) -> Option<u64> {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        ((count - 1) % self.every == 0).then_some(count)
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Listener counters
#[derive(Debug)]
pub struct ListenerStats {
    pub packets: AtomicU64,
    pub legacy: SampledCounter,
    pub malformed: SampledCounter,
    pub unknown_secret: AtomicU64,
    pub unknown_server: AtomicU64,
    pub parse_errors: AtomicU64,
    pub emitted: AtomicU64,
}

/// Point in time copy of [`ListenerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets: u64,
    pub legacy: u64,
    pub malformed: u64,
    pub unknown_secret: u64,
    pub unknown_server: u64,
    pub parse_errors: u64,
    pub emitted: u64,
}

impl ListenerStats {
    pub fn new(config: &ListenerConfig) -> Self {
        Self {
            packets: AtomicU64::new(0),
            legacy: SampledCounter::new(config.legacy_log_every),
            malformed: SampledCounter::new(config.malformed_log_every),
            unknown_secret: AtomicU64::new(0),
            unknown_server: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            legacy: self.legacy.get(),
            malformed: self.malformed.get(),
            unknown_secret: self.unknown_secret.load(Ordering::Relaxed),
            unknown_server: self.unknown_server.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
        }
    }
}

/// Work handed from the socket reader and refresher to the line processor
#[derive(Debug)]
enum Work {
    Line { secret: i64, line: String },
    ClearCache,
}

/// Everything the listener needs besides its socket
#[derive(Clone)]
pub struct Pipeline {
    pub resolver: Arc<SecretResolver>,
    pub directory: Arc<dyn ServerDirectory>,
    pub parser: Arc<dyn LineParser>,
    pub broadcaster: Arc<Broadcaster>,
}

/// Resolves, parses and emits lines one at a time, in the order received
struct LineProcessor {
    pipeline: Pipeline,
    stats: Arc<ListenerStats>,
    servers: HashMap<String, ServerRecord>,
}

impl LineProcessor {
    fn new(pipeline: Pipeline, stats: Arc<ListenerStats>) -> Self {
        Self {
            pipeline,
            stats,
            servers: HashMap::new(),
        }
    }

    async fn run(mut self, mut work_rx: mpsc::UnboundedReceiver<Work>) {
        while let Some(work) = work_rx.recv().await {
            match work {
                Work::Line { secret, line } => self.process(secret, &line).await,
                Work::ClearCache => {
                    debug!("Clearing {} cached servers", self.servers.len());
                    self.servers.clear();
                }
            }
        }
        debug!("Line processor stopped");
    }

    async fn server(&mut self, name: &str) -> Option<ServerRecord> {
        if let Some(server) = self.servers.get(name) {
            return Some(server.clone());
        }

        match self.pipeline.directory.server_by_name(name).await {
            Ok(Some(server)) => {
                self.servers.insert(name.to_string(), server.clone());
                Some(server)
            }
            Ok(None) => None,
            Err(e) => {
                error!("Failed to look up server {}: {}", name, e);
                None
            }
        }
    }

    async fn process(&mut self, secret: i64, line: &str) {
        let Some(ident) = self.pipeline.resolver.resolve(secret).await else {
            self.stats.unknown_secret.fetch_add(1, Ordering::Relaxed);
            error!("Rejected log line with unknown secret {}", secret);
            return;
        };

        let Some(server) = self.server(&ident.server_name).await else {
            self.stats.unknown_server.fetch_add(1, Ordering::Relaxed);
            warn!(
                "No server record for {} (secret {})",
                ident.server_name, secret
            );
            return;
        };

        let parsed = match self.pipeline.parser.parse(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Unparsed line from {}: {}", server.short_name, e);
                return;
            }
        };

        let event = Event {
            server_id: server.server_id,
            server_name: server.short_name,
            event_type: parsed.event_type,
            fields: parsed.fields,
            created_on: parsed.created_on,
        };

        self.pipeline.broadcaster.emit(event).await;
        self.stats.emitted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Receives log datagrams and turns them into events
pub struct LogListener {
    socket: UdpSocket,
    config: ListenerConfig,
    pipeline: Pipeline,
    stats: Arc<ListenerStats>,
}

impl LogListener {
    /// Resolves and binds the configured address. Failure here is fatal to
    /// the process.
    pub async fn bind(config: ListenerConfig, pipeline: Pipeline) -> Result<Self, ListenerError> {
        let addr = tokio::net::lookup_host(&config.bind_addr)
            .await
            .map_err(|source| ListenerError::Resolve {
                addr: config.bind_addr.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ListenerError::NoAddress(config.bind_addr.clone()))?;

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        info!("Log listener bound to {}", addr);

        let stats = Arc::new(ListenerStats::new(&config));
        Ok(Self {
            socket,
            config,
            pipeline,
            stats,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Spawns the timer that refreshes the secret map and then invalidates
    /// the processor's server cache.
    fn spawn_secret_refresher(
        &self,
        work_tx: mpsc::UnboundedSender<Work>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let resolver = Arc::clone(&self.pipeline.resolver);
        let period = self.config.secret_refresh;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first tick since it fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = resolver.refresh().await {
                            error!("Failed to refresh server secrets: {}", e);
                        }
                        if work_tx.send(Work::ClearCache).is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn handle_datagram(&self, data: &[u8], addr: SocketAddr, work_tx: &mpsc::UnboundedSender<Work>) {
        self.stats.packets.fetch_add(1, Ordering::Relaxed);

        match decode_packet(data) {
            Ok(Packet::Secreted { secret, line }) => {
                if work_tx.send(Work::Line { secret, line }).is_err() {
                    warn!("Line processor gone, dropping datagram from {}", addr);
                }
            }
            Ok(Packet::Legacy) => {
                if let Some(count) = self.stats.legacy.record() {
                    warn!(
                        "Received unsupported legacy log packet from {} ({} total)",
                        addr, count
                    );
                }
            }
            Err(e) => {
                if let Some(count) = self.stats.malformed.record() {
                    warn!("Malformed log packet from {}: {} ({} total)", addr, e, count);
                }
            }
        }
    }

    /// Runs until `cancel` fires. The socket is closed when this returns.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ListenerError> {
        if let Err(e) = self.pipeline.resolver.refresh().await {
            error!("Initial server secret refresh failed: {}", e);
        }

        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let processor = LineProcessor::new(self.pipeline.clone(), Arc::clone(&self.stats));
        let processor_handle = tokio::spawn(processor.run(work_rx));
        let refresher_handle = self.spawn_secret_refresher(work_tx.clone(), cancel.clone());

        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Log listener shutting down");
                    break;
                }
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => self.handle_datagram(&buffer[..len], addr, &work_tx),
                        Err(e) => {
                            error!("Error receiving log packet: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            }
        }

        drop(work_tx);
        if let Err(e) = refresher_handle.await {
            error!("Secret refresher panicked: {}", e);
        }
        // Lines already handed over are drained before the processor exits
        processor_handle.await?;

        let stats = self.stats.snapshot();
        info!(
            "Log listener stopped: {} packets, {} events, {} legacy, {} malformed, {} unknown secrets, {} parse gaps",
            stats.packets,
            stats.emitted,
            stats.legacy,
            stats.malformed,
            stats.unknown_secret,
            stats.parse_errors
        );
        Ok(())
    }
}
