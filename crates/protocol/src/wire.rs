//! Stream framing shared by both directions.
//!
//! # Wire format
//!
//! ```text
//! FRAME:
//!   [4 bytes BE: header_len]
//!   [header_len bytes: JSON header UTF-8]
//!   [4 bytes BE: payload_len]
//!   [payload_len bytes: raw payload]
//! ```
//!
//! Producer headers are [`FrameHeader`]s; consumer headers are
//! [`UploadResponse`]s with an empty payload. A clean end of stream at a
//! frame boundary is the producer's half-close signal.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::messages::{FrameHeader, UploadResponse, VideoChunk};
use crate::{MAX_HEADER_LEN, MAX_PAYLOAD_LEN, ProtocolError};

/// A raw frame whose header has not been decoded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Decodes a producer frame.
    ///
    /// A decode failure leaves the stream aligned on the next frame, so the
    /// caller may answer it and keep reading.
    pub fn into_video_chunk(self) -> Result<VideoChunk, ProtocolError> {
        let header: FrameHeader = serde_json::from_slice(&self.header)?;
        VideoChunk::from_header(header, self.payload)
    }

    /// Decodes a consumer frame.
    pub fn into_response(self) -> Result<UploadResponse, ProtocolError> {
        if !self.payload.is_empty() {
            return Err(ProtocolError::Malformed(format!(
                "reply frame carries {} payload bytes",
                self.payload.len()
            )));
        }
        Ok(serde_json::from_slice(&self.header)?)
    }
}

/// Writes one frame and flushes it.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &[u8],
    payload: &[u8],
) -> Result<(), ProtocolError> {
    check_len("header", header.len(), MAX_HEADER_LEN)?;
    check_len("payload", payload.len(), MAX_PAYLOAD_LEN)?;

    writer.write_u32(header.len() as u32).await?;
    writer.write_all(header).await?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `None` if the stream ends cleanly before a new frame starts.
/// An end of stream inside a frame is an I/O error.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Frame>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;
    let header_len = u32::from_be_bytes(len_buf) as usize;
    check_len("header", header_len, MAX_HEADER_LEN)?;

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header).await?;

    let payload_len = reader.read_u32().await? as usize;
    check_len("payload", payload_len, MAX_PAYLOAD_LEN)?;

    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(Frame { header, payload }))
}

/// Writes a producer message.
pub async fn write_video_chunk<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &VideoChunk,
) -> Result<(), ProtocolError> {
    let header = serde_json::to_vec(&msg.header())?;
    write_frame(writer, &header, msg.payload()).await
}

/// Writes a consumer reply.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &UploadResponse,
) -> Result<(), ProtocolError> {
    let header = serde_json::to_vec(response)?;
    write_frame(writer, &header, &[]).await
}

/// Reads a consumer reply, or `None` at end of stream.
pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<UploadResponse>, ProtocolError> {
    match read_frame(reader).await? {
        Some(frame) => frame.into_response().map(Some),
        None => Ok(None),
    }
}

fn check_len(what: &'static str, len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        return Err(ProtocolError::FrameTooLarge { what, len, max });
    }
    Ok(())
}
