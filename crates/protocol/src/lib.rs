//! Wire protocol for vidpipe producer → consumer uploads.
//!
//! A single duplex stream carries length-prefixed frames: the producer sends
//! one [`ConfigHandshake`] followed by [`Chunk`]s, the consumer answers every
//! frame with exactly one [`UploadResponse`].

pub mod messages;
pub mod types;
pub mod wire;

pub use messages::{Chunk, FrameHeader, UploadResponse, VideoChunk};
pub use types::{ChunkMetadata, ConfigHandshake, ConnectionState, Status};

/// Largest accepted JSON header (64 KiB).
pub const MAX_HEADER_LEN: usize = 64 * 1024;

/// Largest accepted frame payload (64 MiB).
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{what} too large: {len} bytes (max {max})")]
    FrameTooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("malformed frame: {0}")]
    Malformed(String),
}
