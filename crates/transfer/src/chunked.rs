use sha2::{Digest, Sha256};

use vidpipe_protocol::Chunk;

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Checks a chunk's payload against its checksum.
///
/// Chunks without a checksum always pass.
pub fn verify_chunk(chunk: &Chunk) -> Result<(), TransferError> {
    if chunk.checksum.is_empty() {
        return Ok(());
    }
    if checksum_bytes(&chunk.payload) != chunk.checksum {
        return Err(TransferError::ChecksumMismatch);
    }
    Ok(())
}

/// Number of chunks needed for `len` bytes.
///
/// A zero-length payload still needs one (empty) chunk so that the
/// receiver has something to acknowledge and complete.
pub fn total_chunks(len: usize, chunk_size: usize) -> usize {
    let chunk_size = effective_chunk_size(chunk_size);
    if len == 0 { 1 } else { len.div_ceil(chunk_size) }
}

fn effective_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Lazily splits an in-memory file into fixed-size [`Chunk`]s.
///
/// Chunks come out in increasing index order and cover the data exactly
/// once. Cloning a chunker (or calling [`restart`](Self::restart)) replays
/// the sequence from its current position or from the start respectively.
#[derive(Debug, Clone)]
pub struct Chunker<'a> {
    file_name: &'a str,
    data: &'a [u8],
    chunk_size: usize,
    total: u32,
    next: u32,
    checksums: bool,
}

impl<'a> Chunker<'a> {
    /// Creates a chunker over `data`.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub fn new(file_name: &'a str, data: &'a [u8], chunk_size: usize) -> Result<Self, TransferError> {
        let chunk_size = effective_chunk_size(chunk_size);
        let total = u32::try_from(total_chunks(data.len(), chunk_size)).map_err(|_| {
            TransferError::TooManyChunks {
                len: data.len(),
                chunk_size,
            }
        })?;
        Ok(Self {
            file_name,
            data,
            chunk_size,
            total,
            next: 0,
            checksums: false,
        })
    }

    /// Attaches a SHA-256 checksum to every produced chunk.
    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.checksums = enabled;
        self
    }

    /// Total number of chunks in the sequence.
    pub fn total_chunks(&self) -> u32 {
        self.total
    }

    /// Rewinds to the first chunk.
    pub fn restart(&mut self) {
        self.next = 0;
    }

    /// Builds the chunk at `index` without moving the cursor.
    pub fn chunk_at(&self, index: u32) -> Option<Chunk> {
        if index >= self.total {
            return None;
        }
        let start = index as usize * self.chunk_size;
        let end = (start + self.chunk_size).min(self.data.len());
        let payload = self.data[start..end].to_vec();
        let checksum = if self.checksums {
            checksum_bytes(&payload)
        } else {
            String::new()
        };
        Some(Chunk {
            file_name: self.file_name.to_string(),
            index,
            total_chunks: self.total,
            payload,
            checksum,
        })
    }
}

impl Iterator for Chunker<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let chunk = self.chunk_at(self.next)?;
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunker<'_> {}
