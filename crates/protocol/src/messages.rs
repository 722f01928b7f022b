use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::types::{ChunkMetadata, ConfigHandshake, Status};

// ---------------------------------------------------------------------------
// Producer -> consumer
// ---------------------------------------------------------------------------

/// JSON header of a producer frame.
///
/// The `kind` tag selects between the handshake and a chunk; chunk payload
/// bytes travel after the header, outside the JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameHeader {
    Config(ConfigHandshake),
    Chunk(ChunkMetadata),
}

/// One bounded slice of a file plus the metadata needed to reassemble it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub file_name: String,
    /// Zero-based, dense position within the file.
    pub index: u32,
    pub total_chunks: u32,
    pub payload: Vec<u8>,
    /// SHA-256 hex digest of `payload` (empty means no verification).
    pub checksum: String,
}

impl Chunk {
    /// Builds a chunk from a decoded header and its payload.
    pub fn from_parts(meta: ChunkMetadata, payload: Vec<u8>) -> Self {
        Self {
            file_name: meta.file_name,
            index: meta.chunk_index,
            total_chunks: meta.total_chunks,
            payload,
            checksum: meta.checksum,
        }
    }

    /// Returns the chunk's identity without its payload.
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            file_name: self.file_name.clone(),
            chunk_index: self.index,
            total_chunks: self.total_chunks,
            checksum: self.checksum.clone(),
        }
    }

    /// Returns `true` for the final chunk of its file.
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total_chunks
    }
}

/// A message on the producer -> consumer stream.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoChunk {
    Config(ConfigHandshake),
    Chunk(Chunk),
}

impl VideoChunk {
    /// Reassembles a message from a decoded header and the frame payload.
    pub fn from_header(header: FrameHeader, payload: Vec<u8>) -> Result<Self, ProtocolError> {
        match header {
            FrameHeader::Config(cfg) => {
                if !payload.is_empty() {
                    return Err(ProtocolError::Malformed(format!(
                        "config frame carries {} payload bytes",
                        payload.len()
                    )));
                }
                Ok(VideoChunk::Config(cfg))
            }
            FrameHeader::Chunk(meta) => Ok(VideoChunk::Chunk(Chunk::from_parts(meta, payload))),
        }
    }

    /// Returns the JSON header for this message.
    pub fn header(&self) -> FrameHeader {
        match self {
            VideoChunk::Config(cfg) => FrameHeader::Config(*cfg),
            VideoChunk::Chunk(chunk) => FrameHeader::Chunk(chunk.metadata()),
        }
    }

    /// Returns the raw payload bytes (empty for the handshake).
    pub fn payload(&self) -> &[u8] {
        match self {
            VideoChunk::Config(_) => &[],
            VideoChunk::Chunk(chunk) => &chunk.payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Consumer -> producer
// ---------------------------------------------------------------------------

/// Reply to a handshake or a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: Status,
    /// Identity of the chunk that must be resent (set with `Full`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkMetadata>,
    /// Human-readable reason, mostly for `Wait`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl UploadResponse {
    fn with_status(status: Status) -> Self {
        Self {
            status,
            chunk: None,
            message: String::new(),
        }
    }

    pub fn init() -> Self {
        Self::with_status(Status::Init)
    }

    pub fn ok() -> Self {
        Self::with_status(Status::Ok)
    }

    /// Rejects a chunk for capacity reasons, echoing its identity.
    pub fn full(chunk: ChunkMetadata) -> Self {
        Self {
            status: Status::Full,
            chunk: Some(chunk),
            message: String::new(),
        }
    }

    pub fn wait(message: impl Into<String>) -> Self {
        Self {
            status: Status::Wait,
            chunk: None,
            message: message.into(),
        }
    }

    pub fn complete() -> Self {
        Self::with_status(Status::Complete)
    }
}
