//! Shared outbound stream with in-order reply matching.
//!
//! The consumer answers frames strictly in the order it reads them, so a
//! reply slot registered while holding the write gate is always answered by
//! the next unclaimed reply. A background reader pops slots in order.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vidpipe_protocol::wire::{read_response, write_video_chunk};
use vidpipe_protocol::{Status, UploadResponse, VideoChunk};

use crate::ProducerError;

#[derive(Debug, Default)]
struct ReplySlots {
    queue: VecDeque<oneshot::Sender<UploadResponse>>,
    closed: bool,
}

/// Write gate plus reply queue over one duplex stream.
pub struct ReplyChannel<W> {
    gate: Mutex<W>,
    slots: Arc<Mutex<ReplySlots>>,
    reader: Mutex<Option<JoinHandle<Option<UploadResponse>>>>,
}

impl<W> ReplyChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Starts the reply reader on `reader` and wraps `writer` in the gate.
    ///
    /// Call after the handshake, which is exchanged directly on the halves.
    pub fn start<R>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let slots = Arc::new(Mutex::new(ReplySlots::default()));
        let handle = tokio::spawn(read_replies(reader, Arc::clone(&slots)));
        Self {
            gate: Mutex::new(writer),
            slots,
            reader: Mutex::new(Some(handle)),
        }
    }

    /// Sends `msg` and waits for the reply that answers it.
    ///
    /// The gate is held only while registering the slot and writing; other
    /// senders may write while this one waits.
    pub async fn request(&self, msg: &VideoChunk) -> Result<UploadResponse, ProducerError> {
        let rx = {
            let mut writer = self.gate.lock().await;
            let (tx, rx) = oneshot::channel();
            {
                let mut slots = self.slots.lock().await;
                if slots.closed {
                    return Err(ProducerError::StreamClosed);
                }
                slots.queue.push_back(tx);
            }
            if let Err(e) = write_video_chunk(&mut *writer, msg).await {
                // Still holding the gate, so ours is the newest slot.
                self.slots.lock().await.queue.pop_back();
                return Err(e.into());
            }
            rx
        };

        rx.await.map_err(|_| ProducerError::StreamClosed)
    }

    /// Half-closes the outbound stream and waits for the final reply.
    ///
    /// Returns the trailing reply (normally `Complete`), or `None` if the
    /// consumer closed the stream without one.
    pub async fn finish(&self) -> Result<Option<UploadResponse>, ProducerError> {
        {
            let mut writer = self.gate.lock().await;
            writer.shutdown().await?;
        }
        debug!("outbound stream half-closed");

        let Some(handle) = self.reader.lock().await.take() else {
            return Ok(None);
        };
        handle.await.map_err(|e| {
            ProducerError::Io(std::io::Error::other(format!("reply reader failed: {e}")))
        })
    }
}

/// Hands replies to waiting slots until the stream ends.
///
/// A reply with no slot waiting ends the reader; it is returned when it is
/// the `Complete` that follows a half-close.
async fn read_replies<R>(mut reader: R, slots: Arc<Mutex<ReplySlots>>) -> Option<UploadResponse>
where
    R: AsyncRead + Unpin,
{
    let mut trailing = None;

    loop {
        let reply = match read_response(&mut reader).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                debug!("reply stream ended");
                break;
            }
            Err(e) => {
                warn!("reply stream failed: {e}");
                break;
            }
        };

        let slot = slots.lock().await.queue.pop_front();
        match slot {
            Some(tx) => {
                // The sender may have given up; nothing to do then.
                let _ = tx.send(reply);
            }
            None if reply.status == Status::Complete => {
                trailing = Some(reply);
                break;
            }
            None => {
                warn!(status = ?reply.status, "unexpected reply with no chunk outstanding");
                break;
            }
        }
    }

    let mut slots = slots.lock().await;
    slots.closed = true;
    slots.queue.clear();
    trailing
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{DuplexStream, split};
    use vidpipe_protocol::Chunk;
    use vidpipe_protocol::wire::{read_frame, write_response};

    fn chunk(name: &str) -> VideoChunk {
        VideoChunk::Chunk(Chunk {
            file_name: name.into(),
            index: 0,
            total_chunks: 1,
            payload: name.as_bytes().to_vec(),
            checksum: String::new(),
        })
    }

    /// Answers every chunk with `Wait` carrying its file name, then
    /// `Complete` at end of stream.
    async fn echo_consumer(mut stream: DuplexStream) {
        while let Some(frame) = read_frame(&mut stream).await.unwrap() {
            let VideoChunk::Chunk(chunk) = frame.into_video_chunk().unwrap() else {
                panic!("expected chunk");
            };
            write_response(&mut stream, &UploadResponse::wait(chunk.file_name))
                .await
                .unwrap();
        }
        write_response(&mut stream, &UploadResponse::complete())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn replies_reach_their_senders() {
        let (client, server) = tokio::io::duplex(1024);
        let consumer = tokio::spawn(echo_consumer(server));
        let (reader, writer) = split(client);
        let channel = Arc::new(ReplyChannel::start(reader, writer));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let channel = Arc::clone(&channel);
            tasks.push(tokio::spawn(async move {
                for round in 0..5 {
                    let name = format!("t{i}-r{round}.mp4");
                    let reply = channel.request(&chunk(&name)).await.unwrap();
                    assert_eq!(reply.message, name);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let last = channel.finish().await.unwrap().unwrap();
        assert_eq!(last.status, Status::Complete);
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn closed_stream_fails_pending_and_new_requests() {
        let (client, server) = tokio::io::duplex(1024);
        let (reader, writer) = split(client);
        let channel = ReplyChannel::start(reader, writer);

        // Consumer reads one frame and hangs up without replying.
        let consumer = tokio::spawn(async move {
            let mut server = server;
            read_frame(&mut server).await.unwrap();
        });

        let result = channel.request(&chunk("a.mp4")).await;
        assert!(matches!(result, Err(ProducerError::StreamClosed)));
        consumer.await.unwrap();

        let again = channel.request(&chunk("b.mp4")).await;
        assert!(again.is_err());
        assert!(channel.finish().await.unwrap_or(None).is_none());
    }
}
