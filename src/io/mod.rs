// src/io/mod.rs
//
// Capture data model shared by the per-port pipelines.
// Bytes flow one way: Chunk -> Packet -> PacketEvent.

mod error;
pub mod serial;
pub(crate) mod types;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use error::{OpenErrorKind, OpenFailure, TapError};
pub use serial::ProtocolType;

// ============================================================================
// Shared Types
// ============================================================================

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Index of a port within a capture session (position in the configured port list).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub usize);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inferred direction of a packet on a tapped link
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Attributed to the link's originator (master)
    #[serde(rename = "TX", alias = "tx")]
    Tx,
    /// Attributed to the responder (slave)
    #[serde(rename = "RX", alias = "rx")]
    Rx,
    #[serde(rename = "UNKNOWN", alias = "unknown")]
    Unknown,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Tx => "TX",
            Direction::Rx => "RX",
            Direction::Unknown => "UNKNOWN",
        }
    }

    /// The other side of the conversation. Unknown has no opposite.
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Tx => Direction::Rx,
            Direction::Rx => Direction::Tx,
            Direction::Unknown => Direction::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Direction::Unknown)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw bytes returned by one successful read on a port.
///
/// `gap` is the monotonic time since the previous chunk on the same port,
/// `None` for the first chunk of a session.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    /// Host UNIX timestamp in microseconds of the read call
    pub timestamp_us: u64,
    pub gap: Option<Duration>,
}

impl Chunk {
    pub fn new(bytes: Vec<u8>, timestamp_us: u64, gap: Option<Duration>) -> Self {
        Self {
            bytes,
            timestamp_us,
            gap,
        }
    }
}

/// A finalized application-level packet: one or more chunks joined by
/// quiet-period framing. Never re-split or merged once emitted.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    bytes: Vec<u8>,
    start_us: u64,
    end_us: u64,
    chunk_count: usize,
}

impl Packet {
    pub(crate) fn new(bytes: Vec<u8>, start_us: u64, end_us: u64, chunk_count: usize) -> Self {
        Self {
            bytes,
            start_us,
            end_us,
            chunk_count,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Timestamp of the first chunk
    pub fn start_us(&self) -> u64 {
        self.start_us
    }

    /// Timestamp of the last chunk
    pub fn end_us(&self) -> u64 {
        self.end_us
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }
}

/// A finalized, classified packet as handed to rendering/logging collaborators
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacketEvent {
    pub port: PortId,
    pub port_label: String,
    pub device_path: String,
    pub protocol: ProtocolType,
    pub direction: Direction,
    /// Host UNIX timestamp in microseconds of the first chunk
    pub start_timestamp_us: u64,
    /// Host UNIX timestamp in microseconds of the last chunk
    pub end_timestamp_us: u64,
    pub byte_length: usize,
    #[serde(
        serialize_with = "hex::serde::serialize_upper",
        deserialize_with = "hex::serde::deserialize"
    )]
    pub raw_bytes: Vec<u8>,
    /// Strategy that produced the direction (e.g. "alternating", "rs485")
    pub decided_by: String,
    /// The active classifier could not interpret the packet structurally
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub malformed: bool,
}

impl PacketEvent {
    /// Start timestamp truncated to millisecond precision
    pub fn start_timestamp_ms(&self) -> u64 {
        self.start_timestamp_us / 1_000
    }
}

/// Why a port's pipeline stopped
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum PortEndReason {
    /// Shutdown was requested by the coordinator
    Stopped,
    /// The source ran out of data (scripted/replayed sources only)
    EndOfStream,
    /// The device vanished or failed mid-session
    DeviceLost(String),
}

impl PortEndReason {
    pub fn is_clean(&self) -> bool {
        !matches!(self, PortEndReason::DeviceLost(_))
    }
}

impl fmt::Display for PortEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortEndReason::Stopped => f.write_str("stopped"),
            PortEndReason::EndOfStream => f.write_str("end of stream"),
            PortEndReason::DeviceLost(reason) => write!(f, "device lost: {}", reason),
        }
    }
}
