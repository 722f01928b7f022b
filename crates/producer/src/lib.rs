//! Sending side of a vidpipe upload.
//!
//! The [`Uploader`] scans numbered input folders, performs the handshake and
//! runs one task per folder. All tasks share a single [`ReplyChannel`]: a
//! write gate over the outbound half of the stream plus an in-order queue
//! that hands each reply to the task whose chunk it answers.

pub mod channel;
pub mod scanner;
pub mod uploader;

pub use channel::ReplyChannel;
pub use scanner::{FolderPlan, MEDIA_EXTENSIONS, is_media_file, scan_input_root};
pub use uploader::{RetryPolicy, UploadConfig, Uploader};
pub use vidpipe_transfer::UploadSummary;

/// Errors produced by the producer.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] vidpipe_protocol::ProtocolError),

    #[error("transfer error: {0}")]
    Transfer(#[from] vidpipe_transfer::TransferError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("stream closed")]
    StreamClosed,

    #[error("chunk {index} of {file} refused after {attempts} attempts")]
    RetriesExhausted {
        file: String,
        index: u32,
        attempts: u32,
    },
}
