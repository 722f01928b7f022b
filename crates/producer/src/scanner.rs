//! Input folder discovery.
//!
//! Producer task `i` reads `<root>/<i>`. Only regular files with a known
//! media extension are sent.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Extensions (lowercase, without the dot) accepted as media files.
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];

/// One producer folder and the files it will send, in name order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderPlan {
    pub index: u32,
    pub path: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Returns `true` if `path` has a media extension (case-insensitive).
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Lists the media files directly inside `folder`, sorted by name.
pub async fn list_media_files(folder: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && is_media_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Collects the folders `root/0 .. root/(threads-1)` that exist.
///
/// Missing folders are skipped.
pub async fn scan_input_root(root: &Path, threads: u32) -> std::io::Result<Vec<FolderPlan>> {
    let mut plans = Vec::new();
    for index in 0..threads {
        let path = root.join(index.to_string());
        let is_dir = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            debug!(folder = %path.display(), "producer folder missing, skipped");
            continue;
        }
        let files = list_media_files(&path).await?;
        plans.push(FolderPlan { index, path, files });
    }
    Ok(plans)
}
