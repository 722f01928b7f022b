//! Chunked file transfer primitives: splitting files into protocol chunks,
//! payload checksums, file name validation and upload accounting.

mod chunked;
mod progress;
mod validation;

pub use chunked::{Chunker, checksum_bytes, total_chunks, verify_chunk};
pub use progress::{TransferStats, UploadSummary};
pub use validation::{STAGING_SUFFIX, validate_file_name};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("{len} bytes need more than u32::MAX chunks of {chunk_size} bytes")]
    TooManyChunks { len: usize, chunk_size: usize },
}
