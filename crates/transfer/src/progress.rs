use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Final accounting of an upload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    /// Files found in the producer folders.
    pub files_total: u64,
    /// Files whose every chunk was acknowledged `Ok`.
    pub files_uploaded: u64,
    /// Files abandoned after an I/O error, stream fault or retry cap.
    pub files_failed: u64,
    /// Chunks acknowledged `Ok`.
    pub chunks_sent: u64,
    /// Payload bytes acknowledged `Ok`.
    pub bytes_sent: u64,
    /// Resends caused by `Full` or `Wait`.
    pub retries: u64,
    pub elapsed: Duration,
}

impl UploadSummary {
    /// An empty summary for runs that found nothing to send.
    pub fn empty() -> Self {
        Self {
            files_total: 0,
            files_uploaded: 0,
            files_failed: 0,
            chunks_sent: 0,
            bytes_sent: 0,
            retries: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Average acknowledged throughput in bytes/second.
    ///
    /// Returns 0.0 when no time has elapsed.
    pub fn bytes_per_second(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        self.bytes_sent as f64 / self.elapsed.as_secs_f64()
    }

    /// Returns `true` if every discovered file was uploaded.
    pub fn is_complete(&self) -> bool {
        self.files_failed == 0 && self.files_uploaded == self.files_total
    }
}

/// Lock-free counters shared by concurrent file senders.
#[derive(Debug)]
pub struct TransferStats {
    files_uploaded: AtomicU64,
    files_failed: AtomicU64,
    chunks_sent: AtomicU64,
    bytes_sent: AtomicU64,
    retries: AtomicU64,
    started_at: Instant,
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferStats {
    /// Creates zeroed counters; the clock starts now.
    pub fn new() -> Self {
        Self {
            files_uploaded: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            chunks_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Records an acknowledged chunk of `bytes` payload bytes.
    pub fn chunk_acked(&self, bytes: usize) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn retried(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_uploaded(&self) {
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Produces a summary of everything recorded so far.
    pub fn summary(&self, files_total: u64) -> UploadSummary {
        UploadSummary {
            files_total,
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            elapsed: self.started_at.elapsed(),
        }
    }
}
