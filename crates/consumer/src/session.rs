//! Per-connection upload session.
//!
//! Drives one producer stream through
//! `AwaitingHandshake -> Streaming -> Draining -> Closed`, answering every
//! frame with exactly one reply before reading the next.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vidpipe_protocol::wire::{Frame, read_frame, write_response};
use vidpipe_protocol::{ConfigHandshake, ConnectionState, UploadResponse, VideoChunk};
use vidpipe_transfer::{validate_file_name, verify_chunk};

use crate::ConsumerError;
use crate::buffer::{Admission, FileState, SharedBuffer};

/// What a finished session did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub handshake: Option<ConfigHandshake>,
    pub chunks_stored: u64,
    /// Chunks answered `Full`.
    pub chunks_deferred: u64,
    /// Chunks answered `Wait`.
    pub chunks_refused: u64,
    pub files_admitted: usize,
    /// Files dropped at close because chunks never arrived.
    pub files_incomplete: Vec<String>,
    /// Files the consumer abandoned after a write error.
    pub files_failed: Vec<String>,
}

/// Server side of one producer connection.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    buffer: Arc<SharedBuffer>,
    drain_timeout: Duration,
    cancel: CancellationToken,
    state: ConnectionState,
    /// File names this session got admitted into the buffer.
    admitted: HashSet<String>,
    report: SessionReport,
}

impl Session {
    pub fn new(buffer: Arc<SharedBuffer>) -> Self {
        Self {
            id: Uuid::new_v4(),
            buffer,
            drain_timeout: Duration::from_secs(30),
            cancel: CancellationToken::new(),
            state: ConnectionState::AwaitingHandshake,
            admitted: HashSet::new(),
            report: SessionReport::default(),
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs the session to completion over `stream`.
    ///
    /// Returns once `Complete` has been sent after the producer half-closed.
    /// A rejected handshake, a broken stream or cancellation end the session
    /// with an error.
    pub async fn run<S>(mut self, stream: S) -> Result<SessionReport, ConsumerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        debug!(session = %self.id, "session opened");

        let result = self.serve(&mut reader, &mut writer).await;
        self.state = ConnectionState::Closed;
        result?;

        info!(
            session = %self.id,
            files = self.report.files_admitted,
            chunks = self.report.chunks_stored,
            incomplete = self.report.files_incomplete.len(),
            failed = self.report.files_failed.len(),
            "session complete"
        );
        Ok(self.report)
    }

    async fn serve<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<(), ConsumerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.handshake(reader, writer).await?;

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ConsumerError::Cancelled),
                frame = read_frame(reader) => frame?,
            };
            let Some(frame) = frame else {
                break;
            };
            let reply = self.ingest(frame);
            write_response(writer, &reply).await?;
        }

        self.state = self.state.on_half_close();
        debug!(session = %self.id, files = self.admitted.len(), "producer half-closed, draining");
        if !self.drain().await {
            return Err(ConsumerError::Cancelled);
        }

        write_response(writer, &UploadResponse::complete()).await?;
        self.state = self.state.on_half_close();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    async fn handshake<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<(), ConsumerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let frame = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ConsumerError::Cancelled),
            frame = read_frame(reader) => frame?,
        };
        let Some(frame) = frame else {
            return Err(ConsumerError::Handshake(
                "stream closed before handshake".into(),
            ));
        };

        let reason = match frame.into_video_chunk() {
            Ok(VideoChunk::Config(config)) => {
                info!(
                    session = %self.id,
                    producer_threads = config.producer_threads,
                    consumer_threads = config.consumer_threads,
                    queue_size = config.queue_size,
                    files = config.file_count,
                    "handshake received"
                );
                self.state = self.state.on_handshake().ok_or_else(|| {
                    ConsumerError::Handshake("handshake already completed".into())
                })?;
                self.report.handshake = Some(config);
                write_response(writer, &UploadResponse::init()).await?;
                return Ok(());
            }
            Ok(VideoChunk::Chunk(chunk)) => format!(
                "expected config handshake, got chunk {} of {}",
                chunk.index, chunk.file_name
            ),
            Err(e) => format!("invalid handshake: {e}"),
        };

        warn!(session = %self.id, "{reason}");
        write_response(writer, &UploadResponse::wait(reason.clone())).await?;
        Err(ConsumerError::Handshake(reason))
    }

    // -----------------------------------------------------------------------
    // Streaming
    // -----------------------------------------------------------------------

    fn ingest(&mut self, frame: Frame) -> UploadResponse {
        let chunk = match frame.into_video_chunk() {
            Ok(VideoChunk::Chunk(chunk)) => chunk,
            Ok(VideoChunk::Config(_)) => {
                return self.refuse("handshake already received".into());
            }
            Err(e) => return self.refuse(format!("malformed frame: {e}")),
        };

        if let Err(e) = validate_file_name(&chunk.file_name) {
            return self.refuse(e.to_string());
        }
        if let Err(e) = verify_chunk(&chunk) {
            return self.refuse(format!(
                "chunk {} of {}: {e}",
                chunk.index, chunk.file_name
            ));
        }

        let meta = chunk.metadata();
        let admitted_before = self.admitted.contains(&chunk.file_name);
        match self.buffer.upsert_chunk(chunk, admitted_before) {
            Admission::Stored => {
                debug!(
                    session = %self.id,
                    file = %meta.file_name,
                    index = meta.chunk_index,
                    total = meta.total_chunks,
                    "chunk stored"
                );
                if !admitted_before {
                    self.admitted.insert(meta.file_name.clone());
                    self.report.files_admitted += 1;
                }
                self.report.chunks_stored += 1;
                UploadResponse::ok()
            }
            Admission::Duplicate => {
                debug!(session = %self.id, file = %meta.file_name, index = meta.chunk_index, "duplicate chunk dropped");
                UploadResponse::ok()
            }
            Admission::Failed => self.refuse(format!(
                "{}: file abandoned after a write error",
                meta.file_name
            )),
            Admission::Full => {
                debug!(session = %self.id, file = %meta.file_name, index = meta.chunk_index, "buffer full");
                self.report.chunks_deferred += 1;
                UploadResponse::full(meta)
            }
            Admission::Rejected(reason) => self.refuse(format!("{}: {reason}", meta.file_name)),
        }
    }

    fn refuse(&mut self, reason: String) -> UploadResponse {
        warn!(session = %self.id, "{reason}");
        self.report.chunks_refused += 1;
        UploadResponse::wait(reason)
    }

    // -----------------------------------------------------------------------
    // Draining
    // -----------------------------------------------------------------------

    /// Waits until every admitted file is written or can no longer complete,
    /// then drops the latter. Returns `false` if cancelled.
    async fn drain(&mut self) -> bool {
        let deadline = tokio::time::sleep(self.drain_timeout);
        tokio::pin!(deadline);

        loop {
            let settled = self.buffer.settled();
            tokio::pin!(settled);
            settled.as_mut().enable();

            let completing = self
                .admitted
                .iter()
                .filter(|name| self.buffer.file_state(name) == FileState::Completing)
                .count();
            if completing == 0 {
                break;
            }

            tokio::select! {
                _ = &mut settled => {}
                _ = &mut deadline => {
                    warn!(session = %self.id, completing, "drain timed out with files still being written");
                    break;
                }
                _ = self.cancel.cancelled() => return false,
            }
        }

        for name in &self.admitted {
            match self.buffer.file_state(name) {
                FileState::Missing if self.buffer.remove(name) => {
                    warn!(session = %self.id, file = %name, "producer closed with chunks missing, file dropped");
                    self.report.files_incomplete.push(name.clone());
                }
                FileState::Failed if self.buffer.clear_failed(name) => {
                    self.report.files_failed.push(name.clone());
                }
                _ => {}
            }
        }
        self.report.files_incomplete.sort();
        self.report.files_failed.sort();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    use vidpipe_protocol::wire::{read_response, write_frame, write_video_chunk};
    use vidpipe_protocol::{Chunk, Status};
    use vidpipe_transfer::checksum_bytes;

    use crate::worker::WorkerPool;

    fn config() -> VideoChunk {
        VideoChunk::Config(ConfigHandshake {
            producer_threads: 1,
            consumer_threads: 1,
            queue_size: 4,
            file_count: 1,
        })
    }

    fn chunk(name: &str, index: u32, total: u32, payload: &[u8]) -> VideoChunk {
        VideoChunk::Chunk(Chunk {
            file_name: name.into(),
            index,
            total_chunks: total,
            payload: payload.to_vec(),
            checksum: checksum_bytes(payload),
        })
    }

    fn spawn_session(
        buffer: &Arc<SharedBuffer>,
        drain_timeout: Duration,
    ) -> (DuplexStream, JoinHandle<Result<SessionReport, ConsumerError>>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let session = Session::new(Arc::clone(buffer)).with_drain_timeout(drain_timeout);
        (client, tokio::spawn(session.run(server)))
    }

    async fn send(client: &mut DuplexStream, msg: &VideoChunk) -> UploadResponse {
        write_video_chunk(client, msg).await.unwrap();
        read_response(client).await.unwrap().unwrap()
    }

    async fn handshake(client: &mut DuplexStream) {
        assert_eq!(send(client, &config()).await.status, Status::Init);
    }

    async fn close(client: &mut DuplexStream) -> Option<UploadResponse> {
        client.shutdown().await.unwrap();
        read_response(client).await.unwrap()
    }

    #[tokio::test]
    async fn full_session_reassembles_file() {
        let dir = TempDir::new().unwrap();
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(Arc::clone(&buffer), dir.path().to_path_buf(), cancel.clone());

        let (mut client, task) = spawn_session(&buffer, Duration::from_secs(5));
        handshake(&mut client).await;
        assert_eq!(send(&mut client, &chunk("v.mp4", 1, 2, b"world")).await.status, Status::Ok);
        assert_eq!(send(&mut client, &chunk("v.mp4", 0, 2, b"hello ")).await.status, Status::Ok);

        let last = close(&mut client).await.unwrap();
        assert_eq!(last.status, Status::Complete);
        // Complete is only sent once the file is settled.
        assert_eq!(std::fs::read(dir.path().join("v.mp4")).unwrap(), b"hello world");

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.chunks_stored, 2);
        assert_eq!(report.files_admitted, 1);
        assert!(report.files_incomplete.is_empty());
        assert_eq!(report.handshake.unwrap().queue_size, 4);

        cancel.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn chunk_before_handshake_is_rejected() {
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let (mut client, task) = spawn_session(&buffer, Duration::from_secs(1));

        let reply = send(&mut client, &chunk("v.mp4", 0, 1, b"x")).await;
        assert_eq!(reply.status, Status::Wait);
        assert!(reply.message.contains("handshake"));

        assert!(matches!(
            task.await.unwrap(),
            Err(ConsumerError::Handshake(_))
        ));
        assert_eq!(buffer.in_flight(), 0);
        assert!(read_response(&mut client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_before_handshake() {
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let (mut client, task) = spawn_session(&buffer, Duration::from_secs(1));
        client.shutdown().await.unwrap();
        assert!(matches!(
            task.await.unwrap(),
            Err(ConsumerError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn malformed_frame_gets_wait_and_stream_survives() {
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let (mut client, _task) = spawn_session(&buffer, Duration::from_secs(1));
        handshake(&mut client).await;

        write_frame(&mut client, b"{not json", b"").await.unwrap();
        let reply = read_response(&mut client).await.unwrap().unwrap();
        assert_eq!(reply.status, Status::Wait);

        assert_eq!(send(&mut client, &chunk("a.mp4", 0, 2, b"a")).await.status, Status::Ok);
    }

    #[tokio::test]
    async fn second_handshake_gets_wait() {
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let (mut client, _task) = spawn_session(&buffer, Duration::from_secs(1));
        handshake(&mut client).await;
        assert_eq!(send(&mut client, &config()).await.status, Status::Wait);
    }

    #[tokio::test]
    async fn checksum_mismatch_gets_wait() {
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let (mut client, _task) = spawn_session(&buffer, Duration::from_secs(1));
        handshake(&mut client).await;

        let mut bad = chunk("a.mp4", 0, 1, b"payload");
        if let VideoChunk::Chunk(c) = &mut bad {
            c.payload[0] ^= 0xFF;
        }
        let reply = send(&mut client, &bad).await;
        assert_eq!(reply.status, Status::Wait);
        assert!(reply.message.contains("checksum"));
        assert_eq!(buffer.in_flight(), 0);
    }

    #[tokio::test]
    async fn traversal_name_gets_wait() {
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let (mut client, _task) = spawn_session(&buffer, Duration::from_secs(1));
        handshake(&mut client).await;

        let reply = send(&mut client, &chunk("../evil.mp4", 0, 1, b"x")).await;
        assert_eq!(reply.status, Status::Wait);
        assert_eq!(buffer.in_flight(), 0);
    }

    #[tokio::test]
    async fn full_echoes_chunk_identity() {
        // No pool: the first file stays in flight.
        let buffer = Arc::new(SharedBuffer::new(1, 1));
        let (mut client, _task) = spawn_session(&buffer, Duration::from_secs(1));
        handshake(&mut client).await;

        assert_eq!(send(&mut client, &chunk("a.mp4", 0, 2, b"a")).await.status, Status::Ok);
        let reply = send(&mut client, &chunk("b.mp4", 0, 1, b"b")).await;
        assert_eq!(reply.status, Status::Full);
        let echoed = reply.chunk.unwrap();
        assert_eq!(echoed.file_name, "b.mp4");
        assert_eq!(echoed.chunk_index, 0);
        assert_eq!(echoed.total_chunks, 1);
    }

    #[tokio::test]
    async fn late_duplicate_is_acknowledged_and_dropped() {
        let dir = TempDir::new().unwrap();
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(Arc::clone(&buffer), dir.path().to_path_buf(), cancel.clone());

        let (mut client, task) = spawn_session(&buffer, Duration::from_secs(5));
        handshake(&mut client).await;
        assert_eq!(send(&mut client, &chunk("one.mkv", 0, 1, b"1")).await.status, Status::Ok);

        tokio::time::timeout(Duration::from_secs(5), async {
            while buffer.is_in_flight("one.mkv") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(send(&mut client, &chunk("one.mkv", 0, 1, b"1")).await.status, Status::Ok);
        assert_eq!(buffer.in_flight(), 0);

        assert_eq!(close(&mut client).await.unwrap().status, Status::Complete);
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.chunks_stored, 1);

        cancel.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn chunk_sent_twice_writes_identical_file() {
        let dir = TempDir::new().unwrap();
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(Arc::clone(&buffer), dir.path().to_path_buf(), cancel.clone());

        let (mut client, task) = spawn_session(&buffer, Duration::from_secs(5));
        handshake(&mut client).await;
        for (index, payload) in [(2, &b"cc"[..]), (1, b"bb"), (2, b"cc"), (0, b"aa"), (1, b"bb")] {
            let reply = send(&mut client, &chunk("twice.mp4", index, 3, payload)).await;
            assert_eq!(reply.status, Status::Ok);
        }

        assert_eq!(close(&mut client).await.unwrap().status, Status::Complete);
        assert_eq!(std::fs::read(dir.path().join("twice.mp4")).unwrap(), b"aabbcc");
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.files_admitted, 1);
        assert!(report.files_incomplete.is_empty());

        cancel.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn write_error_refuses_rest_of_file() {
        let dir = TempDir::new().unwrap();
        // A regular file where the output directory should be.
        let blocked = dir.path().join("out");
        std::fs::write(&blocked, b"").unwrap();

        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(Arc::clone(&buffer), blocked, cancel.clone());

        let (mut client, task) = spawn_session(&buffer, Duration::from_secs(5));
        handshake(&mut client).await;
        assert_eq!(send(&mut client, &chunk("bad.mp4", 0, 2, b"a")).await.status, Status::Ok);

        tokio::time::timeout(Duration::from_secs(5), async {
            while buffer.file_state("bad.mp4") != FileState::Failed {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let reply = send(&mut client, &chunk("bad.mp4", 1, 2, b"b")).await;
        assert_eq!(reply.status, Status::Wait);
        assert!(reply.message.contains("write error"));

        assert_eq!(close(&mut client).await.unwrap().status, Status::Complete);
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.files_failed, vec!["bad.mp4".to_string()]);
        assert!(report.files_incomplete.is_empty());
        assert_eq!(buffer.file_state("bad.mp4"), FileState::Settled);

        cancel.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn staging_name_gets_wait() {
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let (mut client, _task) = spawn_session(&buffer, Duration::from_secs(1));
        handshake(&mut client).await;

        let reply = send(&mut client, &chunk(".a.mp4.partial", 0, 1, b"x")).await;
        assert_eq!(reply.status, Status::Wait);
        assert_eq!(buffer.in_flight(), 0);
    }

    #[tokio::test]
    async fn close_drops_files_with_missing_chunks() {
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let (mut client, task) = spawn_session(&buffer, Duration::from_secs(5));
        handshake(&mut client).await;
        assert_eq!(send(&mut client, &chunk("partial.mov", 0, 3, b"p")).await.status, Status::Ok);

        assert_eq!(close(&mut client).await.unwrap().status, Status::Complete);
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.files_incomplete, vec!["partial.mov".to_string()]);
        assert_eq!(buffer.in_flight(), 0);
        assert_eq!(buffer.slot(0).unwrap().assigned_file, None);
    }

    #[tokio::test]
    async fn drain_timeout_still_completes() {
        // Whole file buffered but no pool to write it.
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let (mut client, task) = spawn_session(&buffer, Duration::from_millis(50));
        handshake(&mut client).await;
        assert_eq!(send(&mut client, &chunk("stuck.webm", 0, 1, b"s")).await.status, Status::Ok);

        assert_eq!(close(&mut client).await.unwrap().status, Status::Complete);
        let report = task.await.unwrap().unwrap();
        assert!(report.files_incomplete.is_empty());
        assert!(buffer.is_in_flight("stuck.webm"));
    }

    #[tokio::test]
    async fn cancellation_ends_session() {
        let buffer = Arc::new(SharedBuffer::new(4, 1));
        let cancel = CancellationToken::new();
        let (mut client, server) = tokio::io::duplex(1024);
        let task = tokio::spawn(
            Session::new(Arc::clone(&buffer))
                .with_cancel(cancel.clone())
                .run(server),
        );
        handshake(&mut client).await;

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(ConsumerError::Cancelled)));
    }
}
