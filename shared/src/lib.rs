//! # Shared log model
//!
//! Types shared between the ingestion server, its tools and its tests:
//!
//! - [`event`]: the typed [`Event`] built from one log line plus the server
//!   that sent it
//! - [`wire`]: the datagram format game servers use to stream log lines
//! - [`parser`]: the [`LineParser`] boundary and a parser for Source engine
//!   log lines
//!
//! Nothing in this crate depends on an async runtime, so the same decoding
//! and parsing code runs inside the server and in plain unit tests.

pub mod event;
pub mod parser;
pub mod wire;

pub use event::{Event, EventType, Fields, LogPlayer, PlayerClass, Team};
pub use parser::{LineParser, ParseError, ParsedLine, SourceLogParser};
pub use wire::{decode_packet, encode_secreted, DecodeError, Packet};

/// Default UDP port the log listener binds to
pub const DEFAULT_LOG_PORT: u16 = 27115;
