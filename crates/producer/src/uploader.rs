//! Concurrent chunked upload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use vidpipe_protocol::wire::{read_response, write_video_chunk};
use vidpipe_protocol::{ConfigHandshake, Status, VideoChunk};
use vidpipe_transfer::{Chunker, DEFAULT_CHUNK_SIZE, TransferError, TransferStats, UploadSummary};

use crate::ProducerError;
use crate::channel::ReplyChannel;
use crate::scanner::{FolderPlan, scan_input_root};

/// Delays applied after each reply, and the resend cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause after an `Ok` before the next chunk.
    pub ok_delay: Duration,
    /// Pause after `Full` before resending.
    pub full_delay: Duration,
    /// Pause after `Wait` (or anything unexpected) before resending.
    pub wait_delay: Duration,
    /// Sends per chunk before the file is abandoned (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ok_delay: Duration::from_millis(10),
            full_delay: Duration::from_millis(500),
            wait_delay: Duration::from_millis(100),
            max_attempts: 0,
        }
    }
}

impl RetryPolicy {
    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

/// Producer settings.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Folder holding the numbered producer folders.
    pub input_root: PathBuf,
    /// Number of producer folders (and tasks).
    pub producer_threads: u32,
    /// Consumer worker count, advertised in the handshake.
    pub consumer_threads: u32,
    /// Consumer buffer capacity, advertised in the handshake.
    pub queue_length: u32,
    /// Chunk payload size in bytes (0 = 1 MiB).
    pub chunk_size: usize,
    /// Attach SHA-256 checksums to chunks.
    pub checksums: bool,
    pub retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("videos"),
            producer_threads: 4,
            consumer_threads: 4,
            queue_length: 10,
            chunk_size: DEFAULT_CHUNK_SIZE,
            checksums: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Uploads every media file under the configured producer folders.
#[derive(Debug, Clone)]
pub struct Uploader {
    config: UploadConfig,
}

impl Uploader {
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Connects to `addr` over TCP and uploads.
    ///
    /// Returns an empty summary without connecting if no producer folder
    /// exists.
    pub async fn upload_to(&self, addr: &str) -> Result<UploadSummary, ProducerError> {
        let plans = self.scan().await?;
        if plans.is_empty() {
            return Ok(UploadSummary::empty());
        }

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!(%addr, "connected to consumer");
        self.upload_plans(plans, stream).await
    }

    /// Uploads over an already connected stream.
    pub async fn upload<S>(&self, stream: S) -> Result<UploadSummary, ProducerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let plans = self.scan().await?;
        if plans.is_empty() {
            return Ok(UploadSummary::empty());
        }
        self.upload_plans(plans, stream).await
    }

    async fn scan(&self) -> Result<Vec<FolderPlan>, ProducerError> {
        let plans = scan_input_root(&self.config.input_root, self.config.producer_threads).await?;
        if plans.is_empty() {
            warn!(root = %self.config.input_root.display(), "no producer folders found");
        }
        for plan in &plans {
            info!(folder = %plan.path.display(), files = plan.files.len(), "producer folder");
        }
        Ok(plans)
    }

    async fn upload_plans<S>(&self, plans: Vec<FolderPlan>, stream: S) -> Result<UploadSummary, ProducerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let files_total: usize = plans.iter().map(|p| p.files.len()).sum();
        let (mut reader, mut writer) = tokio::io::split(stream);

        let handshake = VideoChunk::Config(ConfigHandshake {
            producer_threads: self.config.producer_threads,
            consumer_threads: self.config.consumer_threads,
            queue_size: self.config.queue_length,
            file_count: u32::try_from(files_total).unwrap_or(u32::MAX),
        });
        write_video_chunk(&mut writer, &handshake).await?;
        match read_response(&mut reader).await? {
            Some(reply) if reply.status == Status::Init => {
                info!(files = files_total, "handshake succeeded, starting upload");
            }
            Some(reply) => {
                return Err(ProducerError::Handshake(format!(
                    "expected init, got {:?} {}",
                    reply.status, reply.message
                )));
            }
            None => {
                return Err(ProducerError::Handshake(
                    "stream closed before handshake reply".into(),
                ));
            }
        }

        let channel = Arc::new(ReplyChannel::start(reader, writer));
        let stats = Arc::new(TransferStats::new());

        let tasks: Vec<_> = plans
            .into_iter()
            .map(|plan| {
                let sender = FileSender {
                    channel: Arc::clone(&channel),
                    stats: Arc::clone(&stats),
                    chunk_size: self.config.chunk_size,
                    checksums: self.config.checksums,
                    retry: self.config.retry,
                };
                tokio::spawn(sender.send_folder(plan))
            })
            .collect();

        for task in tasks {
            if let Err(e) = task.await {
                error!("producer task failed: {e}");
            }
        }

        match channel.finish().await {
            Ok(Some(reply)) if reply.status == Status::Complete => info!("consumer confirmed completion"),
            Ok(Some(reply)) => warn!(status = ?reply.status, "unexpected final reply"),
            Ok(None) => warn!("stream ended without completion reply"),
            Err(e) => warn!("failed to close upload stream: {e}"),
        }

        let summary = stats.summary(files_total as u64);
        info!(
            uploaded = summary.files_uploaded,
            failed = summary.files_failed,
            chunks = summary.chunks_sent,
            bytes = summary.bytes_sent,
            retries = summary.retries,
            "upload finished"
        );
        Ok(summary)
    }
}

/// Per-folder state shared with the channel.
struct FileSender<W> {
    channel: Arc<ReplyChannel<W>>,
    stats: Arc<TransferStats>,
    chunk_size: usize,
    checksums: bool,
    retry: RetryPolicy,
}

impl<W> FileSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_folder(self, plan: FolderPlan) {
        debug!(folder = plan.index, files = plan.files.len(), "producer task started");
        for path in &plan.files {
            match self.send_file(path).await {
                Ok(chunks) => {
                    self.stats.file_uploaded();
                    info!(folder = plan.index, file = %path.display(), chunks, "file uploaded");
                }
                Err(e) => {
                    self.stats.file_failed();
                    error!(folder = plan.index, file = %path.display(), "error uploading file: {e}");
                }
            }
        }
    }

    /// Sends every chunk of `path`, resending on `Full`/`Wait`.
    async fn send_file(&self, path: &Path) -> Result<u32, ProducerError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidName(path.display().to_string()))?;
        let data = tokio::fs::read(path).await?;
        let chunker = Chunker::new(name, &data, self.chunk_size)?.with_checksums(self.checksums);
        let total = chunker.total_chunks();

        for chunk in chunker {
            let index = chunk.index;
            let len = chunk.payload.len();
            let msg = VideoChunk::Chunk(chunk);
            let mut attempts = 0u32;

            loop {
                attempts += 1;
                let reply = self.channel.request(&msg).await?;
                let delay = match reply.status {
                    Status::Ok => {
                        self.stats.chunk_acked(len);
                        debug!(file = name, chunk = index + 1, total, "sent chunk");
                        pause(self.retry.ok_delay).await;
                        break;
                    }
                    Status::Full => {
                        debug!(file = name, chunk = index + 1, total, "consumer buffer full");
                        self.retry.full_delay
                    }
                    status => {
                        debug!(file = name, chunk = index + 1, ?status, message = %reply.message, "consumer asked to wait");
                        self.retry.wait_delay
                    }
                };

                if self.retry.exhausted(attempts) {
                    return Err(ProducerError::RetriesExhausted {
                        file: name.to_string(),
                        index,
                        attempts,
                    });
                }
                self.stats.retried();
                pause(delay).await;
            }
        }
        Ok(total)
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
