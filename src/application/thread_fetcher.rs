//! Thread reply fetching and nesting.
//!
//! For each root message with replies, fetches the full ordered reply
//! sequence, paginating when a thread exceeds a single page. The reply
//! listing echoes the root message; it is filtered out here so the nesting
//! holds replies only.

use std::sync::Arc;

use crate::domain::{ApiError, Reply, Timestamp};
use crate::infrastructure::SourceApi;

use super::rate_governor::RateGovernor;
use super::retry::{with_retry, RetryPolicy};

/// Fetches and nests thread replies for root messages.
pub struct ThreadFetcher {
    api: Arc<dyn SourceApi>,
    governor: Arc<RateGovernor>,
    policy: RetryPolicy,
    page_size: u32,
}

impl ThreadFetcher {
    #[must_use]
    pub fn new(
        api: Arc<dyn SourceApi>,
        governor: Arc<RateGovernor>,
        policy: RetryPolicy,
        page_size: u32,
    ) -> Self {
        Self {
            api,
            governor,
            policy,
            page_size,
        }
    }

    /// Fetch the complete reply sequence under `root_ts`, chronological.
    ///
    /// # Errors
    /// Returns the terminal fetch error. Callers treat it as a partial
    /// failure: the root message is emitted without its thread.
    pub async fn fetch(
        &self,
        channel_id: &str,
        root_ts: &Timestamp,
    ) -> Result<Vec<Reply>, ApiError> {
        let mut replies = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let fetch_cursor = cursor.clone();
            let page = with_retry(
                &self.policy,
                &self.governor,
                "conversations.replies",
                || {
                    self.api.fetch_replies(
                        channel_id,
                        root_ts,
                        fetch_cursor.as_deref(),
                        self.page_size,
                    )
                },
            )
            .await?;

            replies.extend(page.items.into_iter().filter(|r| r.ts != *root_ts));

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        replies.sort_by(|a, b| a.ts.cmp(&b.ts));
        tracing::debug!(
            channel = channel_id,
            root = %root_ts,
            replies = replies.len(),
            "thread fetched"
        );
        Ok(replies)
    }
}
