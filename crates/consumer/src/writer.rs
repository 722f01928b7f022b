//! Staged output files.
//!
//! Bytes go to a hidden `.<name>.<tag>.partial` file next to the target and
//! are renamed into place on commit, so a final name only ever holds a
//! complete file. The tag keeps two attempts at the same name apart.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use vidpipe_transfer::STAGING_SUFFIX;

/// An output file being written sequentially.
#[derive(Debug)]
pub struct StagedFile {
    name: String,
    staging: PathBuf,
    target: PathBuf,
    file: File,
    written: u64,
}

impl StagedFile {
    /// Creates (or truncates) the staging file for `name` under `dir`.
    pub async fn create(dir: &Path, name: &str, tag: u64) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let staging = staging_path(dir, name, tag);
        let file = File::create(&staging).await?;
        Ok(Self {
            name: name.to_string(),
            staging,
            target: dir.join(name),
            file,
            written: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes appended so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn append(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flushes the staging file and moves it to its final name.
    ///
    /// An existing file with the same name is replaced. The staging file is
    /// removed if the move fails.
    pub async fn commit(mut self) -> std::io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        if let Err(e) = tokio::fs::rename(&self.staging, &self.target).await {
            let _ = tokio::fs::remove_file(&self.staging).await;
            return Err(e);
        }
        Ok(self.target)
    }

    /// Deletes the staging file.
    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.staging).await {
            tracing::warn!(path = %self.staging.display(), "failed to remove staging file: {e}");
        }
    }
}

/// Returns the hidden staging path for `name` under `dir`.
pub fn staging_path(dir: &Path, name: &str, tag: u64) -> PathBuf {
    dir.join(format!(".{name}.{tag}{STAGING_SUFFIX}"))
}
