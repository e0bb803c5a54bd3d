//! # Match Log Server Library
//!
//! This library ingests the remote log stream of game servers over UDP,
//! turns every accepted line into a typed event and fans events out to
//! independent consumers. The main consumer folds the stream into per-server
//! match aggregates and hands finished matches to storage and notification.
//!
//! ## Core Responsibilities
//!
//! ### Ingestion
//! Game servers send one log line per datagram. Datagrams carry a shared
//! secret that identifies the sending server:
//! - Secreted packets are authenticated against the server directory
//! - Legacy packets without a secret are counted and dropped
//! - Malformed datagrams never stop the receive loop
//!
//! ### Event Distribution
//! Consumers register a queue for the event types they care about, or for
//! every type at once. Each queue sees events in the order the listener
//! emitted them and a slow consumer never blocks the others.
//!
//! ### Match Tracking
//! One match per server is live at any time. A match ends once both teams
//! report their final score or the log stops. Finished matches are stored
//! once and summarized through a notifier.
//!
//! ## Architecture Design
//!
//! ### Task Per Concern
//! The socket loop only decodes datagrams and hands lines to a processor
//! task through a channel. Secret refreshing, the match manager and every
//! active match run as their own tasks. Shutdown is driven by a single
//! cancellation token shared by all of them.
//!
//! ### Snapshot Secrets
//! The secret to server map is rebuilt on a timer and swapped in whole, so a
//! reader always sees one consistent generation. A failed refresh keeps the
//! previous map.
//!
//! ## Module Organization
//!
//! ### Listener Module (`listener`)
//! UDP socket loop, line processing and ingestion counters.
//!
//! ### Broadcaster Module (`broadcaster`)
//! Type-keyed registry of consumer queues.
//!
//! ### Match Modules (`matches`, `match_manager`)
//! The match aggregate and the manager that owns one task per active match.
//!
//! ### Collaborators (`directory`, `resolver`, `persistence`)
//! Server directory lookups, secret resolution, match storage,
//! notifications and live server state.
//!
//! ### Chat Logger Module (`chat_logger`)
//! Small consumer that writes chat lines to the log.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::broadcaster::Broadcaster;
//! use server::directory::FileServerDirectory;
//! use server::listener::{ListenerConfig, LogListener, Pipeline};
//! use server::resolver::SecretResolver;
//! use shared::SourceLogParser;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = Arc::new(FileServerDirectory::new("servers.json"));
//!     let pipeline = Pipeline {
//!         resolver: Arc::new(SecretResolver::new(directory.clone())),
//!         directory,
//!         parser: Arc::new(SourceLogParser),
//!         broadcaster: Arc::new(Broadcaster::new()),
//!     };
//!
//!     let listener = LogListener::bind(ListenerConfig::default(), pipeline).await?;
//!     listener.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod chat_logger;
pub mod directory;
pub mod listener;
pub mod match_manager;
pub mod matches;
pub mod persistence;
pub mod resolver;
pub mod testing;
