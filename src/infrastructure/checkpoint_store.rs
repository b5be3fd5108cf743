//! Durable checkpoint persistence.
//!
//! All per-channel progress lives in a single `checkpoints.json`, rewritten
//! atomically (temp file + rename) on every update. Channel entries are owned
//! exclusively by their orchestrator; the store only serializes the file
//! writes themselves.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::domain::{
    AppError, ChannelCheckpoint, Result, StoredAttachment, Timestamp,
};

/// File-backed checkpoint store keyed by channel id.
pub struct CheckpointStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, ChannelCheckpoint>>,
}

impl CheckpointStore {
    /// Open the store, loading existing state.
    ///
    /// A missing file is a fresh start. A present-but-unparsable file is an
    /// error: silently restarting from zero would re-emit messages into an
    /// output stream that already holds them.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed, or if
    /// the parent directory cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::checkpoint("failed to create checkpoint directory", Some(e)))?;
        }

        let state = if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| AppError::checkpoint("failed to read checkpoint file", Some(e)))?;
            serde_json::from_str(&content).map_err(|e| {
                AppError::checkpoint(
                    format!("corrupt checkpoint file {}: {e}", path.display()),
                    None,
                )
            })?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    /// Current checkpoint for a channel (default for unseen channels).
    pub async fn channel(&self, channel_id: &str) -> ChannelCheckpoint {
        self.state
            .lock()
            .await
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a channel finished in a prior run.
    pub async fn is_done(&self, channel_id: &str) -> bool {
        self.state
            .lock()
            .await
            .get(channel_id)
            .is_some_and(|cp| cp.done)
    }

    /// Advance a channel's commit boundary after a durable emission.
    ///
    /// # Errors
    /// Returns error on a non-monotonic commit (an upstream ordering bug) or
    /// if the file cannot be persisted.
    pub async fn commit_message(
        &self,
        channel_id: &str,
        ts: Timestamp,
        cursor: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = state.entry(channel_id.to_string()).or_default();
        if !entry.advance(ts.clone(), cursor) {
            return Err(AppError::checkpoint(
                format!("non-monotonic commit for channel {channel_id} at ts {ts}"),
                None,
            ));
        }
        self.persist(&state)
    }

    /// Mark a channel's history exhausted.
    ///
    /// # Errors
    /// Returns error if the file cannot be persisted.
    pub async fn mark_done(&self, channel_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.entry(channel_id.to_string()).or_default().mark_done();
        self.persist(&state)
    }

    /// Record a durably stored attachment for cross-run dedupe.
    ///
    /// # Errors
    /// Returns error if the file cannot be persisted.
    pub async fn record_materialized(
        &self,
        channel_id: &str,
        attachment_id: &str,
        stored: StoredAttachment,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .entry(channel_id.to_string())
            .or_default()
            .record_materialized(attachment_id, stored);
        self.persist(&state)
    }

    /// Record an attachment whose download exhausted its retry budget.
    ///
    /// # Errors
    /// Returns error if the file cannot be persisted.
    pub async fn record_failed_attachment(
        &self,
        channel_id: &str,
        attachment_id: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .entry(channel_id.to_string())
            .or_default()
            .record_failed_attachment(attachment_id);
        self.persist(&state)
    }

    /// Stored metadata for an attachment materialized this or a prior run.
    pub async fn stored_attachment(
        &self,
        channel_id: &str,
        attachment_id: &str,
    ) -> Option<StoredAttachment> {
        self.state
            .lock()
            .await
            .get(channel_id)
            .and_then(|cp| cp.stored(attachment_id))
            .cloned()
    }

    /// Full snapshot for status reporting.
    pub async fn snapshot(&self) -> BTreeMap<String, ChannelCheckpoint> {
        self.state.lock().await.clone()
    }

    /// Atomically replace the checkpoint file with the current state.
    fn persist(&self, state: &BTreeMap<String, ChannelCheckpoint>) -> Result<()> {
        let json = serde_json::to_vec_pretty(state).map_err(AppError::json)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| AppError::checkpoint("failed to write checkpoint temp file", Some(e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| AppError::checkpoint("failed to replace checkpoint file", Some(e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_store_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::open(&dir.path().join("checkpoints.json")).expect("open");
        assert!(!store.is_done("C1").await);
        assert!(store.channel("C1").await.last_ts.is_none());
    }

    #[tokio::test]
    async fn test_commits_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("checkpoints.json");

        {
            let store = CheckpointStore::open(&path).expect("open");
            store
                .commit_message("C1", Timestamp::from("10.000001"), Some("cur1".into()))
                .await
                .expect("commit");
            store.mark_done("C1").await.expect("done");
        }

        let store = CheckpointStore::open(&path).expect("reopen");
        assert!(store.is_done("C1").await);
        let cp = store.channel("C1").await;
        assert!(cp.is_committed(&Timestamp::from("10.000001")));
        assert_eq!(cp.messages_committed, 1);
    }

    #[tokio::test]
    async fn test_non_monotonic_commit_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::open(&dir.path().join("checkpoints.json")).expect("open");

        store
            .commit_message("C1", Timestamp::from("10.000002"), None)
            .await
            .expect("commit");
        let err = store
            .commit_message("C1", Timestamp::from("10.000001"), None)
            .await
            .expect_err("must reject");
        assert!(matches!(err, AppError::Checkpoint { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error_not_a_fresh_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("checkpoints.json");
        std::fs::write(&path, "{ truncated").expect("write");

        assert!(CheckpointStore::open(&path).is_err());
    }

    #[tokio::test]
    async fn test_attachment_records_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("checkpoints.json");

        {
            let store = CheckpointStore::open(&path).expect("open");
            store
                .record_materialized(
                    "C1",
                    "F1",
                    StoredAttachment {
                        stored_ref: "files/general/F1_a.png".into(),
                        content_hash: Some("abc".into()),
                        size: Some(7),
                    },
                )
                .await
                .expect("record");
            store
                .record_failed_attachment("C1", "F2")
                .await
                .expect("record failure");
        }

        let store = CheckpointStore::open(&path).expect("reopen");
        let stored = store.stored_attachment("C1", "F1").await.expect("stored");
        assert_eq!(stored.stored_ref, "files/general/F1_a.png");
        assert!(store.channel("C1").await.failed_attachments.contains("F2"));
        assert!(store.stored_attachment("C1", "F2").await.is_none());
    }
}
