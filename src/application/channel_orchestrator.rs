//! Per-channel extraction orchestration.
//!
//! Pulls pages from the walker, enriches messages (threads + attachments)
//! concurrently within a page, then emits and checkpoints strictly in
//! ascending timestamp order. Message-level failures are partial; only
//! channel-fatal errors (auth, malformed cursor, exhausted page retries)
//! end the channel.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::domain::{
    AppError, Channel, ChannelOutcome, ChannelStats, ExportRecord, Message, ReplyRecord, Result,
};
use crate::infrastructure::{CheckpointStore, OutputSink, SourceApi};

use super::attachment_fetcher::AttachmentFetcher;
use super::page_walker::PageWalker;
use super::rate_governor::RateGovernor;
use super::retry::RetryPolicy;
use super::thread_fetcher::ThreadFetcher;

/// Shared handles every channel orchestrator runs against.
pub struct EngineContext {
    pub api: Arc<dyn SourceApi>,
    pub governor: Arc<RateGovernor>,
    pub policy: RetryPolicy,
    pub sink: Arc<dyn OutputSink>,
    pub attachments: Arc<AttachmentFetcher>,
    pub checkpoints: Arc<CheckpointStore>,
    pub page_size: u32,
    pub message_concurrency: usize,
}

/// Channel extraction states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Pending,
    Paging,
    Enriching,
    Committing,
    Done,
    Failed,
}

/// A message with its thread and attachment enrichment resolved.
struct Enriched {
    record: ExportRecord,
    thread_failed: bool,
    attachments_failed: u64,
}

/// Drives one channel from `Pending` to `Done` (or `Failed`).
pub struct ChannelOrchestrator {
    channel: Channel,
    ctx: Arc<EngineContext>,
    threads: ThreadFetcher,
    cancel: CancellationToken,
    state: ChannelState,
}

impl ChannelOrchestrator {
    #[must_use]
    pub fn new(channel: Channel, ctx: Arc<EngineContext>, cancel: CancellationToken) -> Self {
        let threads = ThreadFetcher::new(
            ctx.api.clone(),
            ctx.governor.clone(),
            ctx.policy.clone(),
            ctx.page_size,
        );
        Self {
            channel,
            ctx,
            threads,
            cancel,
            state: ChannelState::Pending,
        }
    }

    /// Run the channel to a terminal state.
    pub async fn run(mut self) -> ChannelOutcome {
        let mut stats = ChannelStats::default();
        tracing::info!(channel = %self.channel.name, "channel extraction starting");

        match self.extract(&mut stats).await {
            Ok(true) => {
                self.transition(ChannelState::Done);
                tracing::info!(
                    channel = %self.channel.name,
                    messages = stats.messages_emitted,
                    "channel complete"
                );
                ChannelOutcome::Completed(stats)
            }
            Ok(false) => {
                tracing::info!(
                    channel = %self.channel.name,
                    messages = stats.messages_emitted,
                    "channel extraction cancelled; checkpoint preserved"
                );
                ChannelOutcome::Cancelled(stats)
            }
            Err(err) => {
                self.transition(ChannelState::Failed);
                tracing::error!(channel = %self.channel.name, error = %err, "channel failed");
                ChannelOutcome::Failed {
                    error: err.to_string(),
                    stats,
                }
            }
        }
    }

    /// Returns `Ok(true)` on completion, `Ok(false)` when cancelled.
    async fn extract(&mut self, stats: &mut ChannelStats) -> Result<bool> {
        let checkpoint = self.ctx.checkpoints.channel(&self.channel.id).await;
        if checkpoint.done {
            return Ok(true);
        }

        self.transition(ChannelState::Paging);
        let mut walker = PageWalker::new(
            self.ctx.api.clone(),
            self.ctx.governor.clone(),
            self.ctx.policy.clone(),
            self.channel.id.clone(),
            self.ctx.page_size,
            checkpoint,
        );

        loop {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }

            let Some(batch) = walker
                .next_batch()
                .await
                .map_err(|e| AppError::channel(&self.channel.name, e.to_string()))?
            else {
                break;
            };
            let page_cursor = walker.resume_cursor().map(ToString::to_string);

            self.transition(ChannelState::Enriching);
            let enriched: Vec<Result<Enriched>> = stream::iter(batch)
                .map(|msg| self.enrich(msg))
                .buffered(self.ctx.message_concurrency.max(1))
                .collect()
                .await;

            self.transition(ChannelState::Committing);
            for item in enriched {
                let item = item?;
                if self.cancel.is_cancelled() {
                    return Ok(false);
                }

                self.ctx.sink.emit(&item.record).await?;
                self.ctx
                    .checkpoints
                    .commit_message(&self.channel.id, item.record.ts.clone(), page_cursor.clone())
                    .await?;

                stats.messages_emitted += 1;
                stats.threads_failed += u64::from(item.thread_failed);
                stats.attachments_failed += item.attachments_failed;
            }
            self.transition(ChannelState::Paging);
        }

        self.ctx.checkpoints.mark_done(&self.channel.id).await?;
        Ok(true)
    }

    /// Resolve one message's thread and attachments. Runs concurrently with
    /// its page siblings; failures here are partial, never fatal.
    async fn enrich(&self, msg: Message) -> Result<Enriched> {
        let mut thread_failed = false;
        let replies = if msg.is_thread_root() {
            match self.threads.fetch(&self.channel.id, &msg.ts).await {
                Ok(replies) => replies,
                Err(err) => {
                    tracing::warn!(
                        channel = %self.channel.name,
                        message = %msg.ts,
                        error = %err,
                        "thread fetch failed; emitting message without its thread"
                    );
                    thread_failed = true;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let attachments = self
            .ctx
            .attachments
            .fetch_all(&self.channel, &msg.attachments)
            .await?;
        let mut attachments_failed = attachments.iter().filter(|a| a.failed).count() as u64;

        let mut reply_records = Vec::with_capacity(replies.len());
        for reply in replies {
            let reply_attachments = self
                .ctx
                .attachments
                .fetch_all(&self.channel, &reply.attachments)
                .await?;
            attachments_failed += reply_attachments.iter().filter(|a| a.failed).count() as u64;
            reply_records.push(ReplyRecord {
                ts: reply.ts,
                author: reply.author,
                text: reply.text,
                attachments: reply_attachments,
            });
        }

        Ok(Enriched {
            record: ExportRecord {
                channel_id: self.channel.id.clone(),
                channel_name: self.channel.name.clone(),
                ts: msg.ts,
                author: msg.author,
                text: msg.text,
                thread_ts: msg.thread_ts,
                replies: reply_records,
                attachments,
                thread_fetch_failed: thread_failed,
            },
            thread_failed,
            attachments_failed,
        })
    }

    fn transition(&mut self, next: ChannelState) {
        if self.state != next {
            tracing::debug!(
                channel = %self.channel.name,
                from = ?self.state,
                to = ?next,
                "state transition"
            );
            self.state = next;
        }
    }
}
