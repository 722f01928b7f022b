//! Receiving side of a vidpipe upload.
//!
//! Every producer connection runs a [`Session`] that answers the handshake
//! and ingests chunks into one [`SharedBuffer`]. A [`WorkerPool`] drains the
//! buffer file by file and reassembles the output under the configured
//! directory. [`ConsumerServer`] ties these together behind a TCP listener.

pub mod buffer;
pub mod server;
pub mod session;
pub mod worker;
pub mod writer;

pub use buffer::{Admission, Drained, FileState, SharedBuffer, WorkerId, WorkerSlot};
pub use server::ConsumerServer;
pub use session::{Session, SessionReport};
pub use worker::WorkerPool;
pub use writer::StagedFile;

use std::path::PathBuf;
use std::time::Duration;

/// Errors produced by the consumer.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] vidpipe_protocol::ProtocolError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("cancelled")]
    Cancelled,
}

/// Consumer runtime settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Address the server listens on.
    pub listen_addr: String,
    /// Root directory for reassembled files.
    pub output_dir: PathBuf,
    /// Number of reassembly workers.
    pub worker_count: usize,
    /// Maximum number of files in flight at once.
    pub buffer_capacity: usize,
    /// Byte budget for chunks of unowned files (0 = disabled).
    pub max_buffered_bytes: usize,
    /// Upper bound on the wait between half-close and `Complete`.
    pub drain_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5001".into(),
            output_dir: PathBuf::from("received"),
            worker_count: 4,
            buffer_capacity: 10,
            max_buffered_bytes: 0,
            drain_timeout: Duration::from_secs(30),
        }
    }
}
