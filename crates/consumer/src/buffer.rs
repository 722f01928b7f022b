//! Shared reassembly buffer.
//!
//! One lock guards both the per-file chunk maps and the worker slots, so the
//! ingest path can store a chunk and hand its file to an idle worker in a
//! single step. Workers are woken through per-worker [`Notify`]s after the
//! lock is released.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use vidpipe_protocol::Chunk;

/// Index of a worker in the pool.
pub type WorkerId = usize;

/// Outcome of [`SharedBuffer::upsert_chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The chunk is buffered.
    Stored,
    /// The chunk was already written, or its file already completed.
    Duplicate,
    /// The chunk's file was abandoned after a write error.
    Failed,
    /// No room for the chunk's file; nothing was stored.
    Full,
    /// The chunk contradicts what is buffered for its file.
    Rejected(String),
}

/// Where an admitted file stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Not in the buffer: fully written, dropped or never admitted.
    Settled,
    /// Every chunk is buffered or written; the file will complete.
    Completing,
    /// At least one chunk has never arrived.
    Missing,
    /// Abandoned after a write error; later chunks are refused.
    Failed,
}

/// A worker's view of its current assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSlot {
    pub id: WorkerId,
    pub assigned_file: Option<String>,
    /// Admission sequence of the assigned entry. A file that is dropped and
    /// admitted again under the same name gets a new one.
    pub assignment: Option<u64>,
    pub expected_total: u32,
    pub written_count: u32,
}

impl WorkerSlot {
    fn idle(id: WorkerId) -> Self {
        Self {
            id,
            assigned_file: None,
            assignment: None,
            expected_total: 0,
            written_count: 0,
        }
    }

    fn clear(&mut self) {
        *self = Self::idle(self.id);
    }
}

/// A contiguous run of chunks taken out of the buffer by their owner.
#[derive(Debug)]
pub struct Drained {
    pub file_name: String,
    /// Assignment the chunks were drained for.
    pub assignment: u64,
    pub total_chunks: u32,
    /// Index of `chunks[0]`.
    pub first_index: u32,
    pub chunks: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct FileEntry {
    chunks: BTreeMap<u32, Vec<u8>>,
    total_chunks: u32,
    owner: Option<WorkerId>,
    /// Next index to hand to the owner. Everything below it has been drained.
    cursor: u32,
    /// Admission order.
    seq: u64,
}

impl FileEntry {
    fn buffered_bytes(&self) -> usize {
        self.chunks.values().map(Vec::len).sum()
    }

    fn is_whole(&self) -> bool {
        self.cursor as usize + self.chunks.len() >= self.total_chunks as usize
    }
}

#[derive(Debug)]
struct Inner {
    files: HashMap<String, FileEntry>,
    /// Files abandoned after a write error.
    failed: HashSet<String>,
    workers: Vec<WorkerSlot>,
    buffered_bytes: usize,
    next_seq: u64,
}

impl Inner {
    fn idle_worker(&self) -> Option<WorkerId> {
        self.workers
            .iter()
            .find(|w| w.assigned_file.is_none())
            .map(|w| w.id)
    }

    fn assign(&mut self, file_name: &str, worker: WorkerId) -> bool {
        let Some(entry) = self.files.get_mut(file_name) else {
            return false;
        };
        if entry.owner.is_some() {
            return false;
        }
        let Some(slot) = self.workers.get_mut(worker) else {
            return false;
        };
        entry.owner = Some(worker);
        slot.assigned_file = Some(file_name.to_string());
        slot.assignment = Some(entry.seq);
        slot.expected_total = entry.total_chunks;
        slot.written_count = entry.cursor;
        true
    }

    fn try_assign(&mut self, file_name: &str) -> Option<WorkerId> {
        let worker = self.idle_worker()?;
        self.assign(file_name, worker).then_some(worker)
    }

    fn oldest_unowned(&self) -> Option<String> {
        self.files
            .iter()
            .filter(|(_, e)| e.owner.is_none())
            .min_by_key(|(_, e)| e.seq)
            .map(|(name, _)| name.clone())
    }

    /// Ends `worker`'s assignment, then hands it the oldest unowned file.
    fn hand_over(&mut self, worker: WorkerId, failed: bool) -> Option<String> {
        if let Some(name) = self.workers.get(worker)?.assigned_file.clone() {
            self.remove(&name);
            if failed {
                self.failed.insert(name);
            }
        }
        let next = self.oldest_unowned();
        if let Some(name) = &next {
            self.assign(name, worker);
        }
        next
    }

    fn remove(&mut self, file_name: &str) -> Option<FileEntry> {
        let entry = self.files.remove(file_name)?;
        self.buffered_bytes -= entry.buffered_bytes();
        if let Some(slot) = entry.owner.and_then(|w| self.workers.get_mut(w)) {
            slot.clear();
        }
        Some(entry)
    }
}

// ---------------------------------------------------------------------------
// SharedBuffer
// ---------------------------------------------------------------------------

/// Files in flight, keyed by name, plus the worker slots that own them.
///
/// Capacity counts distinct files, not chunks or bytes. An optional byte
/// budget additionally limits chunks of files that no worker owns yet.
#[derive(Debug)]
pub struct SharedBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    max_buffered_bytes: usize,
    wakers: Vec<Notify>,
    settled: Notify,
}

impl SharedBuffer {
    /// Creates a buffer for `capacity` files and `worker_count` workers.
    ///
    /// Both values are raised to at least 1.
    pub fn new(capacity: usize, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        Self {
            inner: Mutex::new(Inner {
                files: HashMap::new(),
                failed: HashSet::new(),
                workers: (0..worker_count).map(WorkerSlot::idle).collect(),
                buffered_bytes: 0,
                next_seq: 0,
            }),
            capacity: capacity.max(1),
            max_buffered_bytes: 0,
            wakers: (0..worker_count).map(|_| Notify::new()).collect(),
            settled: Notify::new(),
        }
    }

    /// Enables the byte budget for unowned files (0 disables it).
    pub fn with_byte_budget(mut self, max_buffered_bytes: usize) -> Self {
        self.max_buffered_bytes = max_buffered_bytes;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn worker_count(&self) -> usize {
        self.wakers.len()
    }

    /// Stores `chunk` under its file name, overwriting an equal index.
    ///
    /// A new file is admitted only while fewer than `capacity` files are in
    /// flight, and is handed to an idle worker if there is one. Set
    /// `admitted_before` when the caller already had this file admitted: a
    /// missing entry then means the file completed, and the chunk is a late
    /// duplicate, unless the file was abandoned. A fresh admission of an
    /// abandoned name starts the file over. The owning worker is woken on
    /// success.
    pub fn upsert_chunk(&self, chunk: Chunk, admitted_before: bool) -> Admission {
        if chunk.index >= chunk.total_chunks {
            return Admission::Rejected(format!(
                "chunk index {} out of range for {} chunks",
                chunk.index, chunk.total_chunks
            ));
        }

        let (admission, wake) = {
            let mut inner = self.lock();
            self.upsert_locked(&mut inner, chunk, admitted_before)
        };
        if let Some(worker) = wake {
            self.wake(worker);
        }
        admission
    }

    fn upsert_locked(
        &self,
        inner: &mut Inner,
        chunk: Chunk,
        admitted_before: bool,
    ) -> (Admission, Option<WorkerId>) {
        let len = chunk.payload.len();
        let owner = match inner.files.get_mut(&chunk.file_name) {
            Some(entry) => {
                if entry.total_chunks != chunk.total_chunks {
                    return (
                        Admission::Rejected(format!(
                            "total chunks changed from {} to {}",
                            entry.total_chunks, chunk.total_chunks
                        )),
                        None,
                    );
                }
                if chunk.index < entry.cursor {
                    return (Admission::Duplicate, None);
                }
                let replaced = entry.chunks.get(&chunk.index).map_or(0, Vec::len);
                let buffered = inner.buffered_bytes - replaced;
                if entry.owner.is_none() && !self.fits_budget(buffered, len) {
                    return (Admission::Full, None);
                }
                entry.chunks.insert(chunk.index, chunk.payload);
                inner.buffered_bytes = buffered + len;
                entry.owner
            }
            None => {
                if admitted_before {
                    let admission = if inner.failed.contains(&chunk.file_name) {
                        Admission::Failed
                    } else {
                        Admission::Duplicate
                    };
                    return (admission, None);
                }
                if inner.files.len() >= self.capacity {
                    return (Admission::Full, None);
                }
                if inner.idle_worker().is_none() && !self.fits_budget(inner.buffered_bytes, len) {
                    return (Admission::Full, None);
                }
                let seq = inner.next_seq;
                inner.next_seq += 1;
                let mut chunks = BTreeMap::new();
                chunks.insert(chunk.index, chunk.payload);
                inner.files.insert(
                    chunk.file_name.clone(),
                    FileEntry {
                        chunks,
                        total_chunks: chunk.total_chunks,
                        owner: None,
                        cursor: 0,
                        seq,
                    },
                );
                inner.failed.remove(&chunk.file_name);
                inner.buffered_bytes += len;
                None
            }
        };

        let wake = owner.or_else(|| inner.try_assign(&chunk.file_name));
        (Admission::Stored, wake)
    }

    /// An empty buffer always takes one chunk, so a single oversized chunk
    /// cannot wedge the budget.
    fn fits_budget(&self, buffered: usize, incoming: usize) -> bool {
        self.max_buffered_bytes == 0
            || buffered == 0
            || buffered + incoming <= self.max_buffered_bytes
    }

    /// Hands `file_name` to an idle worker if it has no owner.
    ///
    /// Returns the newly assigned worker.
    pub fn try_assign(&self, file_name: &str) -> Option<WorkerId> {
        let worker = self.lock().try_assign(file_name)?;
        self.wake(worker);
        Some(worker)
    }

    /// Takes the contiguous run of chunks starting at the cursor of
    /// `worker`'s file.
    ///
    /// Returns `None` if the worker has no assignment or the next chunk has
    /// not arrived yet.
    pub fn drain(&self, worker: WorkerId) -> Option<Drained> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let slot = inner.workers.get(worker)?;
        let file_name = slot.assigned_file.clone()?;
        let assignment = slot.assignment?;
        let entry = inner.files.get_mut(&file_name)?;

        let first_index = entry.cursor;
        let mut chunks = Vec::new();
        loop {
            let index = entry.cursor;
            let Some(payload) = entry.chunks.remove(&index) else {
                break;
            };
            inner.buffered_bytes -= payload.len();
            chunks.push(payload);
            entry.cursor += 1;
        }

        if chunks.is_empty() {
            return None;
        }
        Some(Drained {
            file_name,
            assignment,
            total_chunks: entry.total_chunks,
            first_index,
            chunks,
        })
    }

    /// Records `batch` as persisted by `worker`.
    ///
    /// Returns `Some(true)` once every chunk is written, or `None` if the
    /// worker no longer holds the assignment the batch was drained for.
    pub fn advance(&self, worker: WorkerId, batch: &Drained) -> Option<bool> {
        let mut inner = self.lock();
        let slot = inner.workers.get_mut(worker)?;
        if slot.assignment != Some(batch.assignment) {
            return None;
        }
        slot.written_count += batch.chunks.len() as u32;
        Some(slot.written_count >= slot.expected_total)
    }

    /// Ends `worker`'s assignment and gives it the oldest unowned file.
    ///
    /// The worker's current entry, if any, is removed in the same step.
    /// Returns the name of the new assignment.
    pub fn release(&self, worker: WorkerId) -> Option<String> {
        let next = self.lock().hand_over(worker, false);
        self.settled.notify_waiters();
        next
    }

    /// Drops `worker`'s file after a write error and moves on like
    /// [`release`](Self::release).
    ///
    /// The name is remembered so that later chunks from the same producer
    /// are refused instead of acknowledged. Does nothing unless `worker`
    /// still holds `assignment`.
    pub fn abandon(&self, worker: WorkerId, assignment: u64) -> Option<String> {
        let next = {
            let mut inner = self.lock();
            if inner.workers.get(worker)?.assignment != Some(assignment) {
                return None;
            }
            inner.hand_over(worker, true)
        };
        self.settled.notify_waiters();
        next
    }

    /// Forgets that `file_name` was abandoned.
    pub fn clear_failed(&self, file_name: &str) -> bool {
        self.lock().failed.remove(file_name)
    }

    /// Drops a file's entry and frees its owner, if any.
    pub fn remove(&self, file_name: &str) -> bool {
        let owner = {
            let mut inner = self.lock();
            match inner.remove(file_name) {
                Some(entry) => entry.owner,
                None => return false,
            }
        };
        if let Some(worker) = owner {
            self.wake(worker);
        }
        self.settled.notify_waiters();
        true
    }

    pub fn file_state(&self, file_name: &str) -> FileState {
        let inner = self.lock();
        match inner.files.get(file_name) {
            None if inner.failed.contains(file_name) => FileState::Failed,
            None => FileState::Settled,
            Some(entry) if entry.is_whole() => FileState::Completing,
            Some(_) => FileState::Missing,
        }
    }

    pub fn is_in_flight(&self, file_name: &str) -> bool {
        self.lock().files.contains_key(file_name)
    }

    /// Number of files in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().files.len()
    }

    /// Payload bytes buffered and not yet handed to a worker.
    pub fn buffered_bytes(&self) -> usize {
        self.lock().buffered_bytes
    }

    pub fn owner(&self, file_name: &str) -> Option<WorkerId> {
        self.lock().files.get(file_name).and_then(|e| e.owner)
    }

    pub fn slot(&self, worker: WorkerId) -> Option<WorkerSlot> {
        self.lock().workers.get(worker).cloned()
    }

    /// Waits until `worker` is woken for a new assignment or new chunks.
    ///
    /// A wake-up sent while nobody was waiting is kept for the next call.
    pub async fn wait_for_work(&self, worker: WorkerId) {
        match self.wakers.get(worker) {
            Some(notify) => notify.notified().await,
            None => std::future::pending().await,
        }
    }

    /// Resolves the next time any file leaves the buffer.
    pub fn settled(&self) -> Notified<'_> {
        self.settled.notified()
    }

    fn wake(&self, worker: WorkerId) {
        if let Some(notify) = self.wakers.get(worker) {
            notify.notify_one();
        }
    }
}
