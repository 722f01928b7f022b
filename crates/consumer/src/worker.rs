//! Reassembly worker pool.
//!
//! Each worker owns at most one file at a time. It parks until the buffer
//! wakes it, drains the contiguous chunks after its cursor, appends them to
//! a staged file and, once the last chunk is written, commits the file and
//! moves on to the oldest unowned file.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{Drained, SharedBuffer, WorkerId};
use crate::writer::StagedFile;

/// A fixed set of worker tasks draining one [`SharedBuffer`].
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns one task per worker slot of `buffer`.
    ///
    /// Workers run until `cancel` fires.
    pub fn spawn(
        buffer: Arc<SharedBuffer>,
        output_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        let handles: Vec<_> = (0..buffer.worker_count())
            .map(|id| {
                let worker = Worker {
                    id,
                    buffer: Arc::clone(&buffer),
                    output_dir: output_dir.clone(),
                    staged: None,
                };
                tokio::spawn(worker.run(cancel.clone()))
            })
            .collect();

        info!(workers = handles.len(), output = %output_dir.display(), "reassembly workers started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("worker task failed: {e}");
            }
        }
    }
}

/// Output being written for one assignment.
struct Staged {
    assignment: u64,
    file: StagedFile,
}

struct Worker {
    id: WorkerId,
    buffer: Arc<SharedBuffer>,
    output_dir: PathBuf,
    staged: Option<Staged>,
}

impl Worker {
    async fn run(mut self, cancel: CancellationToken) {
        debug!(worker = self.id, "worker started");

        loop {
            if let Some(batch) = self.buffer.drain(self.id) {
                self.write_batch(batch).await;
                continue;
            }

            let assignment = self.buffer.slot(self.id).and_then(|s| s.assignment);
            let stale = self
                .staged
                .as_ref()
                .is_some_and(|s| Some(s.assignment) != assignment);
            if stale {
                if let Some(staged) = self.staged.take() {
                    warn!(worker = self.id, file = %staged.file.name(), "file dropped from buffer, discarding partial output");
                    staged.file.discard().await;
                }
            }
            if assignment.is_none() && self.buffer.release(self.id).is_some() {
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.buffer.wait_for_work(self.id) => {}
            }
        }

        if let Some(staged) = self.staged.take() {
            staged.file.discard().await;
        }
        debug!(worker = self.id, "worker stopped");
    }

    async fn write_batch(&mut self, batch: Drained) {
        let count = batch.chunks.len() as u32;

        if let Err(e) = self.append(&batch).await {
            error!(worker = self.id, file = %batch.file_name, "write failed, abandoning file: {e}");
            if let Some(staged) = self.staged.take() {
                staged.file.discard().await;
            }
            self.buffer.abandon(self.id, batch.assignment);
            return;
        }

        debug!(
            worker = self.id,
            file = %batch.file_name,
            first = batch.first_index,
            count,
            total = batch.total_chunks,
            "chunks written"
        );

        match self.buffer.advance(self.id, &batch) {
            Some(true) => self.finish(&batch).await,
            Some(false) => {}
            None => {
                if let Some(staged) = self.staged.take() {
                    warn!(worker = self.id, file = %batch.file_name, "lost ownership, discarding partial output");
                    staged.file.discard().await;
                }
            }
        }
    }

    async fn append(&mut self, batch: &Drained) -> std::io::Result<()> {
        let staged = match self.staged.take() {
            Some(s) if s.assignment == batch.assignment && batch.first_index != 0 => s,
            other => {
                if let Some(stale) = other {
                    stale.file.discard().await;
                }
                if batch.first_index != 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("no output open for chunk {}", batch.first_index),
                    ));
                }
                Staged {
                    assignment: batch.assignment,
                    file: StagedFile::create(&self.output_dir, &batch.file_name, batch.assignment).await?,
                }
            }
        };

        let staged = self.staged.insert(staged);
        for chunk in &batch.chunks {
            staged.file.append(chunk).await?;
        }
        Ok(())
    }

    async fn finish(&mut self, batch: &Drained) {
        if let Some(Staged { file: staged, .. }) = self.staged.take() {
            let bytes = staged.written();
            match staged.commit().await {
                Ok(path) => info!(
                    worker = self.id,
                    file = %batch.file_name,
                    chunks = batch.total_chunks,
                    bytes,
                    path = %path.display(),
                    "file reassembled"
                ),
                Err(e) => {
                    error!(worker = self.id, file = %batch.file_name, "failed to finalize file, abandoning it: {e}");
                    self.buffer.abandon(self.id, batch.assignment);
                    return;
                }
            }
        }

        if let Some(next) = self.buffer.release(self.id) {
            debug!(worker = self.id, file = %next, "picked up pending file");
        }
    }
}
