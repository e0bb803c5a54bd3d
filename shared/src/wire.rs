//! Datagram format used by game servers to stream their logs
//!
//! ```text
//! bytes[0..4)   transport framing prefix, not interpreted
//! byte[4]       protocol tag
//! bytes[5..]    for the secreted tag: "<secret>L <logline>\r\n"
//! ```

use thiserror::Error;

/// Framing prefix written by game servers in front of every log datagram
pub const FRAME_PREFIX: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Offset of the protocol tag
pub const TAG_OFFSET: usize = 4;

/// Log line without a secret. Not supported.
pub const TAG_LEGACY: u8 = 0x52;

/// Log line prefixed with the server's secret
pub const TAG_SECRETED: u8 = 0x53;

/// Marks the end of the secret and the start of the log line
pub const LINE_MARKER: &[u8] = b"L ";

/// Largest datagram a game server will send
pub const MAX_DATAGRAM_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Legacy,
    Secreted { secret: i64, line: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram too short ({0} bytes)")]
    TooShort(usize),
    #[error("unknown protocol tag {0:#04x}")]
    UnknownTag(u8),
    #[error("missing log line marker")]
    MissingMarker,
    #[error("invalid secret {0:?}")]
    InvalidSecret(String),
}

/// Decodes a single datagram.
///
/// The line keeps its leading `"L "` marker and loses the trailing two
/// bytes (normally `\r\n`).
pub fn decode_packet(data: &[u8]) -> Result<Packet, DecodeError> {
    if data.len() <= TAG_OFFSET {
        return Err(DecodeError::TooShort(data.len()));
    }

    match data[TAG_OFFSET] {
        TAG_LEGACY => Ok(Packet::Legacy),
        TAG_SECRETED => decode_secreted(data),
        tag => Err(DecodeError::UnknownTag(tag)),
    }
}

fn decode_secreted(data: &[u8]) -> Result<Packet, DecodeError> {
    let body_start = TAG_OFFSET + 1;
    let marker = data[body_start..]
        .windows(LINE_MARKER.len())
        .position(|window| window == LINE_MARKER)
        .map(|pos| pos + body_start)
        .ok_or(DecodeError::MissingMarker)?;

    let secret_text = String::from_utf8_lossy(&data[body_start..marker]);
    let secret = secret_text
        .parse::<i64>()
        .map_err(|_| DecodeError::InvalidSecret(secret_text.to_string()))?;

    // The marker is two bytes long, so this never ends before it
    let line_end = data.len() - 2;
    let line = String::from_utf8_lossy(&data[marker..line_end]).into_owned();

    Ok(Packet::Secreted { secret, line })
}

/// Builds a secreted datagram for `line`, which must not include the
/// leading `"L "` marker.
pub fn encode_secreted(secret: i64, line: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(line.len() + 32);
    data.extend_from_slice(&FRAME_PREFIX);
    data.push(TAG_SECRETED);
    data.extend_from_slice(secret.to_string().as_bytes());
    data.extend_from_slice(LINE_MARKER);
    data.extend_from_slice(line.as_bytes());
    data.extend_from_slice(b"\r\n");
    data
}
