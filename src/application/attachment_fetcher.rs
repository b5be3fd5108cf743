//! Bounded-concurrency attachment download with dedupe.
//!
//! One fetcher instance serves the whole run: the semaphore caps aggregate
//! network and disk pressure across every channel orchestrator. Attachment
//! ids already materialized — in this run or a prior checkpointed one — are
//! never downloaded or stored again.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};

use crate::domain::{AttachmentRecord, AttachmentRef, Channel, Result, StoredAttachment};
use crate::infrastructure::{AttachmentStore, CheckpointStore, SourceApi};

use super::rate_governor::RateGovernor;
use super::retry::{with_retry, RetryPolicy};

/// Downloads attachments to staging, hashes them, and hands them to the
/// attachment store.
pub struct AttachmentFetcher {
    api: Arc<dyn SourceApi>,
    store: Arc<dyn AttachmentStore>,
    checkpoints: Arc<CheckpointStore>,
    governor: Arc<RateGovernor>,
    policy: RetryPolicy,
    permits: Semaphore,
    staging_dir: PathBuf,
    /// Per-id locks so concurrent references to the same file id resolve to
    /// a single download.
    id_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AttachmentFetcher {
    #[must_use]
    pub fn new(
        api: Arc<dyn SourceApi>,
        store: Arc<dyn AttachmentStore>,
        checkpoints: Arc<CheckpointStore>,
        governor: Arc<RateGovernor>,
        policy: RetryPolicy,
        concurrency: usize,
        staging_dir: PathBuf,
    ) -> Self {
        Self {
            api,
            store,
            checkpoints,
            governor,
            policy,
            permits: Semaphore::new(concurrency.max(1)),
            staging_dir,
            id_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve every reference of one message (or reply) to durable
    /// metadata. Download failures become failed records; only checkpoint
    /// persistence problems are errors.
    ///
    /// # Errors
    /// Returns error if the checkpoint store cannot be written.
    pub async fn fetch_all(
        &self,
        channel: &Channel,
        refs: &[AttachmentRef],
    ) -> Result<Vec<AttachmentRecord>> {
        let mut records = Vec::with_capacity(refs.len());
        for r in refs {
            records.push(self.fetch_one(channel, r).await?);
        }
        Ok(records)
    }

    async fn fetch_one(&self, channel: &Channel, r: &AttachmentRef) -> Result<AttachmentRecord> {
        let id_lock = {
            let mut locks = self.id_locks.lock().await;
            locks
                .entry(r.id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _claimed = id_lock.lock().await;

        // Dedupe: materialized in this run or a prior checkpointed one.
        if let Some(stored) = self.checkpoints.stored_attachment(&channel.id, &r.id).await {
            tracing::debug!(file = %r.id, "attachment already materialized, skipping download");
            return Ok(Self::stored_record(r, &stored));
        }

        let Some(url) = r.url.as_deref() else {
            tracing::warn!(channel = %channel.name, file = %r.id, "attachment has no download URL");
            self.checkpoints
                .record_failed_attachment(&channel.id, &r.id)
                .await?;
            return Ok(Self::failed_record(r));
        };

        let Ok(_permit) = self.permits.acquire().await else {
            return Ok(Self::failed_record(r));
        };

        let staged = self.staging_dir.join(&r.id);
        let downloaded = with_retry(&self.policy, &self.governor, "attachment.download", || {
            self.api.download(url, &staged)
        })
        .await;

        match downloaded {
            Ok(download) => {
                let stored_ref = self
                    .store
                    .persist(&staged, &channel.name, &r.id, &r.name)
                    .await;
                match stored_ref {
                    Ok(stored_ref) => {
                        let stored = StoredAttachment {
                            stored_ref,
                            content_hash: Some(download.sha256),
                            size: Some(download.bytes),
                        };
                        self.checkpoints
                            .record_materialized(&channel.id, &r.id, stored.clone())
                            .await?;
                        tracing::debug!(
                            channel = %channel.name,
                            file = %r.id,
                            bytes = download.bytes,
                            "attachment stored"
                        );
                        Ok(Self::stored_record(r, &stored))
                    }
                    Err(err) => {
                        tracing::warn!(
                            channel = %channel.name,
                            file = %r.id,
                            error = %err,
                            "attachment store failed"
                        );
                        self.checkpoints
                            .record_failed_attachment(&channel.id, &r.id)
                            .await?;
                        Ok(Self::failed_record(r))
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    channel = %channel.name,
                    file = %r.id,
                    error = %err,
                    "attachment download failed after retries"
                );
                self.checkpoints
                    .record_failed_attachment(&channel.id, &r.id)
                    .await?;
                Ok(Self::failed_record(r))
            }
        }
    }

    fn stored_record(r: &AttachmentRef, stored: &StoredAttachment) -> AttachmentRecord {
        AttachmentRecord {
            id: r.id.clone(),
            name: r.name.clone(),
            stored_ref: Some(stored.stored_ref.clone()),
            content_hash: stored.content_hash.clone(),
            size: stored.size.or(r.size),
            failed: false,
        }
    }

    fn failed_record(r: &AttachmentRef) -> AttachmentRecord {
        AttachmentRecord {
            id: r.id.clone(),
            name: r.name.clone(),
            stored_ref: None,
            content_hash: None,
            size: r.size,
            failed: true,
        }
    }
}
