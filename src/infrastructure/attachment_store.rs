//! Attachment storage collaborator.
//!
//! Takes a staged download plus its content hash and produces a durable
//! reference. The local implementation files attachments per channel under
//! the data directory; the trait is the seam an object-storage backend would
//! implement instead.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::{AppError, Result};

/// Accepts a staged local file and returns a durable reference for the
/// emitted record. Implementations consume the staging copy.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Persist a staged file for `(channel_name, file_id, file_name)`.
    async fn persist(
        &self,
        staged: &Path,
        channel_name: &str,
        file_id: &str,
        file_name: &str,
    ) -> Result<String>;
}

/// Filesystem-backed store: `files/<channel>/<file_id>_<file_name>`.
pub struct LocalAttachmentStore {
    root: PathBuf,
}

impl LocalAttachmentStore {
    /// Create a store rooted at `root` (typically the data dir's `files/`).
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl AttachmentStore for LocalAttachmentStore {
    async fn persist(
        &self,
        staged: &Path,
        channel_name: &str,
        file_id: &str,
        file_name: &str,
    ) -> Result<String> {
        let dir = self.root.join(sanitize(channel_name));
        std::fs::create_dir_all(&dir)
            .map_err(|e| AppError::io("failed to create attachment directory", e))?;

        let dest = next_free_path(&dir.join(format!("{file_id}_{}", sanitize(file_name))));
        // Same filesystem in the default layout; fall back to copy+remove for
        // a data dir split across mounts.
        if std::fs::rename(staged, &dest).is_err() {
            std::fs::copy(staged, &dest)
                .map_err(|e| AppError::io("failed to store attachment", e))?;
            std::fs::remove_file(staged)
                .map_err(|e| AppError::io("failed to remove staging copy", e))?;
        }

        Ok(dest.to_string_lossy().into_owned())
    }
}

/// Strip path separators and control characters from an external name.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Add an incremental suffix if the name already exists.
/// Example: file.txt, file(1).txt, file(2).txt, etc.
fn next_free_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    let mut counter = 1;
    loop {
        let candidate = parent.join(format!("{stem}({counter}){ext}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
