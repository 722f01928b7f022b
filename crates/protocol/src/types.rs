use serde::{Deserialize, Serialize};

/// Session parameters sent once by the producer, before any chunk.
///
/// The consumer only logs these values; buffer capacity and worker count
/// are fixed by its own configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigHandshake {
    pub producer_threads: u32,
    pub consumer_threads: u32,
    pub queue_size: u32,
    #[serde(default)]
    pub file_count: u32,
}

/// Positional metadata of a chunk, without its payload.
///
/// This is the frame header for chunk frames and the identity echoed back
/// in a `Full` reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub file_name: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// SHA-256 hex digest of the payload (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Status carried by every consumer → producer reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Handshake accepted; chunks may follow.
    Init,
    /// Chunk stored.
    Ok,
    /// Buffer capacity exhausted; resend the echoed chunk later.
    Full,
    /// Transient condition; resend after a short delay.
    Wait,
    /// Producer half-closed and all admitted work is settled.
    Complete,
}

impl Status {
    /// Returns `true` for the statuses that ask the producer to resend.
    pub fn is_retry(self) -> bool {
        matches!(self, Status::Full | Status::Wait)
    }
}

/// Per-connection protocol state, as tracked by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingHandshake,
    Streaming,
    Draining,
    Closed,
}

impl ConnectionState {
    /// Returns the state reached when a valid handshake arrives.
    ///
    /// Only `AwaitingHandshake` accepts a handshake; every other state
    /// treats a second handshake as a protocol violation.
    pub fn on_handshake(self) -> Option<ConnectionState> {
        match self {
            ConnectionState::AwaitingHandshake => Some(ConnectionState::Streaming),
            _ => None,
        }
    }

    /// Returns the state reached when the producer half-closes.
    pub fn on_half_close(self) -> ConnectionState {
        match self {
            ConnectionState::Streaming => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}
