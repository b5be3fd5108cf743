//! Cursor-based pagination over one channel's message history.
//!
//! The walker yields a lazy, restartable sequence of message batches. Each
//! batch is normalized to ascending timestamp and filtered against the
//! already-committed floor, so a resumed run re-fetches the in-flight page
//! without re-emitting anything.

use std::sync::Arc;

use crate::domain::{ApiError, ChannelCheckpoint, Message};
use crate::infrastructure::SourceApi;

use super::rate_governor::RateGovernor;
use super::retry::{with_retry, RetryPolicy};

/// Lazily walks a channel's history beyond any single-page size cap.
pub struct PageWalker {
    api: Arc<dyn SourceApi>,
    governor: Arc<RateGovernor>,
    policy: RetryPolicy,
    channel_id: String,
    page_size: u32,
    /// Cursor for the next fetch.
    cursor: Option<String>,
    /// Cursor that produced the in-flight batch; this is what gets
    /// checkpointed so a restart re-fetches the same page.
    page_cursor: Option<String>,
    /// Resume state; batches drop everything at or below its commit
    /// boundary.
    checkpoint: ChannelCheckpoint,
    exhausted: bool,
}

impl PageWalker {
    /// Create a walker resuming from `checkpoint` (default for a fresh
    /// channel).
    #[must_use]
    pub fn new(
        api: Arc<dyn SourceApi>,
        governor: Arc<RateGovernor>,
        policy: RetryPolicy,
        channel_id: impl Into<String>,
        page_size: u32,
        checkpoint: ChannelCheckpoint,
    ) -> Self {
        Self {
            api,
            governor,
            policy,
            channel_id: channel_id.into(),
            page_size,
            cursor: checkpoint.cursor.clone(),
            page_cursor: None,
            checkpoint,
            exhausted: false,
        }
    }

    /// Fetch the next non-empty batch, ascending by timestamp.
    ///
    /// Returns `None` once the history is exhausted. Pages that contain only
    /// already-committed messages are skipped transparently.
    ///
    /// # Errors
    /// Returns the terminal error of the underlying fetch: transient errors
    /// retry the same cursor under the retry policy first; auth or malformed
    /// responses surface immediately and are channel-fatal.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Message>>, ApiError> {
        while !self.exhausted {
            let fetch_cursor = self.cursor.clone();
            let page = with_retry(
                &self.policy,
                &self.governor,
                "conversations.history",
                || {
                    self.api
                        .fetch_history(&self.channel_id, fetch_cursor.as_deref(), self.page_size)
                },
            )
            .await?;

            self.page_cursor = fetch_cursor;
            self.exhausted = page.next_cursor.is_none();
            self.cursor = page.next_cursor;

            let mut batch = page.items;
            batch.sort_by(|a, b| a.ts.cmp(&b.ts));
            batch.retain(|m| !self.checkpoint.is_committed(&m.ts));

            if !batch.is_empty() {
                tracing::debug!(
                    channel = %self.channel_id,
                    batch = batch.len(),
                    exhausted = self.exhausted,
                    "page fetched"
                );
                return Ok(Some(batch));
            }
        }
        Ok(None)
    }

    /// Cursor that produced the current batch, for checkpointing.
    #[must_use]
    pub fn resume_cursor(&self) -> Option<&str> {
        self.page_cursor.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::test_support::{messages, Fault, ScriptedApi};
    use super::*;

    fn walker(api: Arc<ScriptedApi>, page_size: u32, checkpoint: ChannelCheckpoint) -> PageWalker {
        PageWalker::new(
            api,
            Arc::new(RateGovernor::new(60_000, 100)),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            "C1",
            page_size,
            checkpoint,
        )
    }

    fn committed_up_to(ts: &str) -> ChannelCheckpoint {
        let mut cp = ChannelCheckpoint::default();
        cp.advance(crate::domain::Timestamp::from(ts), None);
        cp
    }

    async fn drain(walker: &mut PageWalker) -> Vec<Message> {
        let mut all = Vec::new();
        while let Some(batch) = walker.next_batch().await.expect("batch") {
            all.extend(batch);
        }
        all
    }

    #[tokio::test]
    async fn test_pagination_is_complete_with_no_gaps_or_duplicates() {
        // 2,500 messages with a 1,000 page cap: exactly 3 fetches.
        let api = Arc::new(ScriptedApi::default().with_history("C1", messages("C1", 2500)));
        let mut walker = walker(api.clone(), 1000, ChannelCheckpoint::default());

        let all = drain(&mut walker).await;
        assert_eq!(all.len(), 2500);
        assert_eq!(
            api.history_calls.load(std::sync::atomic::Ordering::SeqCst),
            3
        );

        let mut seen = std::collections::HashSet::new();
        for pair in all.windows(2) {
            assert!(pair[0].ts < pair[1].ts, "output not ascending");
        }
        for m in &all {
            assert!(seen.insert(m.ts.clone()), "duplicate {}", m.ts);
        }
    }

    #[tokio::test]
    async fn test_batches_are_normalized_to_ascending_order() {
        // Deliver the page newest-first; the walker must flip it.
        let mut msgs = messages("C1", 5);
        msgs.reverse();
        let api = Arc::new(ScriptedApi::default().with_history("C1", msgs));

        let mut walker = walker(api, 1000, ChannelCheckpoint::default());
        let batch = walker.next_batch().await.expect("ok").expect("batch");
        for pair in batch.windows(2) {
            assert!(pair[0].ts < pair[1].ts);
        }
    }

    #[tokio::test]
    async fn test_committed_floor_is_dropped() {
        let api = Arc::new(ScriptedApi::default().with_history("C1", messages("C1", 10)));
        let mut walker = walker(api, 1000, committed_up_to("1000.000007"));

        let all = drain(&mut walker).await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].ts.as_str(), "1000.000008");
    }

    #[tokio::test]
    async fn test_transient_error_retries_same_cursor() {
        let api = Arc::new(
            ScriptedApi::default()
                .with_history("C1", messages("C1", 4))
                .with_history_fault(1, Fault::Transient),
        );
        let mut walker = walker(api.clone(), 2, ChannelCheckpoint::default());

        let all = drain(&mut walker).await;
        assert_eq!(all.len(), 4);
        // First call failed, then 2 successful pages plus the retried one.
        assert_eq!(
            api.history_calls.load(std::sync::atomic::Ordering::SeqCst),
            3
        );
    }

    #[tokio::test]
    async fn test_throttle_with_hint_pauses_before_next_fetch() {
        // One throttle on page 2 with a wait hint: still 3 successful pages,
        // with a pause at least as long as the hint before the retry.
        let api = Arc::new(
            ScriptedApi::default()
                .with_history("C1", messages("C1", 6))
                .with_history_fault(2, Fault::Throttle(Some(Duration::from_millis(150)))),
        );
        let mut walker = walker(api.clone(), 2, ChannelCheckpoint::default());

        let first = walker.next_batch().await.expect("ok").expect("page 1");
        assert_eq!(first.len(), 2);

        let start = std::time::Instant::now();
        let second = walker.next_batch().await.expect("ok").expect("page 2");
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(second.len(), 2);

        let third = walker.next_batch().await.expect("ok").expect("page 3");
        assert_eq!(third.len(), 2);
        assert!(walker.next_batch().await.expect("ok").is_none());
    }

    #[tokio::test]
    async fn test_fatal_error_surfaces_immediately() {
        let api = Arc::new(
            ScriptedApi::default()
                .with_history("C1", messages("C1", 4))
                .with_history_fault(1, Fault::Auth),
        );
        let mut walker = walker(api.clone(), 1000, ChannelCheckpoint::default());

        let err = walker.next_batch().await.expect_err("auth should be fatal");
        assert!(matches!(err, ApiError::Auth { .. }));
        assert_eq!(
            api.history_calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_resume_cursor_tracks_the_inflight_page() {
        let api = Arc::new(ScriptedApi::default().with_history("C1", messages("C1", 6)));
        let mut walker = walker(api, 2, ChannelCheckpoint::default());

        walker.next_batch().await.expect("ok");
        assert_eq!(walker.resume_cursor(), None, "first page has no cursor");

        walker.next_batch().await.expect("ok");
        assert_eq!(walker.resume_cursor(), Some("1"));
    }

    #[tokio::test]
    async fn test_fully_committed_pages_are_skipped() {
        let api = Arc::new(ScriptedApi::default().with_history("C1", messages("C1", 6)));
        // Floor past the first two pages of size 2.
        let mut walker = walker(api, 2, committed_up_to("1000.000004"));

        let batch = walker.next_batch().await.expect("ok").expect("batch");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].ts.as_str(), "1000.000005");
        assert!(walker.next_batch().await.expect("ok").is_none());
    }

    #[tokio::test]
    async fn test_empty_channel_yields_nothing() {
        let api = Arc::new(ScriptedApi::default().with_history("C1", Vec::new()));
        let mut walker = walker(api, 1000, ChannelCheckpoint::default());
        assert!(walker.next_batch().await.expect("ok").is_none());
    }
}
