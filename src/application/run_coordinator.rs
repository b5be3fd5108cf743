//! Run-level coordination across the channel set.
//!
//! Enumerates channels, filters those already finished in a prior run, and
//! drives channel orchestrators under a bounded parallelism ceiling. The
//! member directory export happens first; its failure is reported but does
//! not abort channel extraction.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::domain::{AppError, Channel, ChannelOutcome, ChannelStats, Result, RunSummary};
use crate::infrastructure::JsonlWriter;

use super::channel_orchestrator::{ChannelOrchestrator, EngineContext};
use super::retry::with_retry;

/// Coordinates one full export run.
pub struct RunCoordinator {
    ctx: Arc<EngineContext>,
    users_dir: PathBuf,
    channel_parallelism: usize,
    export_members: bool,
    /// Restrict the run to these channel names/ids (empty = all).
    channel_filter: Vec<String>,
    cancel: CancellationToken,
}

impl RunCoordinator {
    #[must_use]
    pub fn new(
        ctx: Arc<EngineContext>,
        users_dir: PathBuf,
        channel_parallelism: usize,
        export_members: bool,
        channel_filter: Vec<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            users_dir,
            channel_parallelism,
            export_members,
            channel_filter,
            cancel,
        }
    }

    /// Execute the run and aggregate per-channel outcomes.
    ///
    /// # Errors
    /// Returns error only for run-fatal conditions: the channel listing is
    /// unreachable or the checkpoint store is unusable. Per-channel failures
    /// land in the summary instead.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        if self.export_members && !self.cancel.is_cancelled() {
            match self.export_member_directory().await {
                Ok(count) => {
                    tracing::info!(members = count, "member directory exported");
                    summary.members_exported = Some(count);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "member export failed; continuing with channels");
                }
            }
        }

        let channels = self.discover_channels().await?;
        let total = channels.len();
        let mut pending = Vec::new();
        for channel in channels {
            if !self.selected(&channel) {
                continue;
            }
            if self.ctx.checkpoints.is_done(&channel.id).await {
                tracing::debug!(channel = %channel.name, "already complete, skipping");
                summary.channels_completed += 1;
                continue;
            }
            pending.push(channel);
        }
        tracing::info!(
            discovered = total,
            pending = pending.len(),
            "starting channel extraction"
        );

        let permits = Arc::new(Semaphore::new(self.channel_parallelism.max(1)));
        let mut handles = Vec::with_capacity(pending.len());
        for channel in pending {
            let permits = permits.clone();
            let ctx = self.ctx.clone();
            let cancel = self.cancel.clone();
            let name = channel.name.clone();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return ChannelOutcome::Cancelled(ChannelStats::default());
                };
                if cancel.is_cancelled() {
                    return ChannelOutcome::Cancelled(ChannelStats::default());
                }
                ChannelOrchestrator::new(channel, ctx, cancel).run().await
            });
            handles.push((name, handle));
        }

        for (name, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|err| ChannelOutcome::Failed {
                error: format!("channel task panicked: {err}"),
                stats: ChannelStats::default(),
            });
            summary.absorb(&name, &outcome);
        }

        Ok(summary)
    }

    /// Full paginated channel listing. Unreachable listing is run-fatal.
    async fn discover_channels(&self) -> Result<Vec<Channel>> {
        let mut channels = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let fetch_cursor = cursor.clone();
            let page = with_retry(
                &self.ctx.policy,
                &self.ctx.governor,
                "conversations.list",
                || {
                    self.ctx
                        .api
                        .list_channels(fetch_cursor.as_deref(), self.ctx.page_size)
                },
            )
            .await
            .map_err(AppError::Api)?;

            channels.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(channels)
    }

    /// Export the workspace member directory to a dated JSONL file.
    async fn export_member_directory(&self) -> Result<u64> {
        let name = format!("users_{}.jsonl", Utc::now().format("%Y%m%d"));
        let writer = JsonlWriter::open(&self.users_dir.join(name))?;

        let mut count = 0u64;
        let mut cursor: Option<String> = None;
        loop {
            let fetch_cursor = cursor.clone();
            let page = with_retry(&self.ctx.policy, &self.ctx.governor, "users.list", || {
                self.ctx
                    .api
                    .list_members(fetch_cursor.as_deref(), self.ctx.page_size)
            })
            .await
            .map_err(AppError::Api)?;

            for member in &page.items {
                writer.append(member).await?;
                count += 1;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(count)
    }

    fn selected(&self, channel: &Channel) -> bool {
        self.channel_filter.is_empty()
            || self
                .channel_filter
                .iter()
                .any(|f| f == &channel.id || f == &channel.name)
    }
}
