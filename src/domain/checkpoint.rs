//! Per-channel extraction progress records.
//!
//! A checkpoint is the only state that survives a process restart. It is
//! advanced exactly once per committed message, after the message (with its
//! thread and attachments) has been durably emitted — never before.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::Timestamp;

/// Metadata kept for an attachment that was durably stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAttachment {
    /// Durable reference returned by the attachment store.
    pub stored_ref: String,
    /// SHA-256 of the stored content.
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Durable progress record for one channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelCheckpoint {
    /// `ts` of the last fully-committed message. Resume refetches the
    /// in-flight page and drops everything at or below this floor.
    #[serde(default)]
    pub last_ts: Option<Timestamp>,

    /// Continuation cursor for the page that produced the last commit.
    #[serde(default)]
    pub cursor: Option<String>,

    /// Set once the page walker signals exhaustion; done channels are
    /// filtered out of subsequent runs.
    #[serde(default)]
    pub done: bool,

    /// Attachment id → stored metadata, for cross-run download dedupe.
    #[serde(default)]
    pub materialized: BTreeMap<String, StoredAttachment>,

    /// Attachment ids whose download exhausted the retry budget, kept for a
    /// later reconciliation pass.
    #[serde(default)]
    pub failed_attachments: BTreeSet<String>,

    /// Messages committed so far.
    #[serde(default)]
    pub messages_committed: u64,

    /// Last mutation time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChannelCheckpoint {
    /// Advance the commit boundary to `ts`.
    ///
    /// Advancement is monotonic: a commit at or below the current boundary is
    /// rejected, which turns an ordering bug upstream into a loud error
    /// instead of a silently corrupted resume point.
    pub fn advance(&mut self, ts: Timestamp, cursor: Option<String>) -> bool {
        if self.last_ts.as_ref().is_some_and(|last| *last >= ts) {
            return false;
        }
        self.last_ts = Some(ts);
        self.cursor = cursor;
        self.messages_committed += 1;
        self.updated_at = Some(Utc::now());
        true
    }

    /// Whether `ts` is already covered by the commit boundary.
    #[must_use]
    pub fn is_committed(&self, ts: &Timestamp) -> bool {
        self.last_ts.as_ref().is_some_and(|last| last >= ts)
    }

    /// Mark the channel exhausted.
    pub fn mark_done(&mut self) {
        self.done = true;
        self.cursor = None;
        self.updated_at = Some(Utc::now());
    }

    /// Record a durably stored attachment.
    pub fn record_materialized(&mut self, id: impl Into<String>, stored: StoredAttachment) {
        let id = id.into();
        self.failed_attachments.remove(&id);
        self.materialized.insert(id, stored);
        self.updated_at = Some(Utc::now());
    }

    /// Record an attachment that exhausted its retry budget.
    pub fn record_failed_attachment(&mut self, id: impl Into<String>) {
        self.failed_attachments.insert(id.into());
        self.updated_at = Some(Utc::now());
    }

    /// Stored metadata for an already-materialized attachment id.
    #[must_use]
    pub fn stored(&self, id: &str) -> Option<&StoredAttachment> {
        self.materialized.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_monotonic() {
        let mut cp = ChannelCheckpoint::default();
        assert!(cp.advance(Timestamp::from("100.000001"), None));
        assert!(cp.advance(Timestamp::from("100.000002"), Some("cur".into())));

        // Replays and reorders are rejected.
        assert!(!cp.advance(Timestamp::from("100.000002"), None));
        assert!(!cp.advance(Timestamp::from("99.000000"), None));

        assert_eq!(cp.messages_committed, 2);
        assert_eq!(cp.cursor.as_deref(), Some("cur"));
    }

    #[test]
    fn test_committed_floor() {
        let mut cp = ChannelCheckpoint::default();
        assert!(!cp.is_committed(&Timestamp::from("1.000000")));

        cp.advance(Timestamp::from("50.000000"), None);
        assert!(cp.is_committed(&Timestamp::from("50.000000")));
        assert!(cp.is_committed(&Timestamp::from("49.999999")));
        assert!(!cp.is_committed(&Timestamp::from("50.000001")));
    }

    fn stored(stored_ref: &str) -> StoredAttachment {
        StoredAttachment {
            stored_ref: stored_ref.to_string(),
            content_hash: Some("deadbeef".into()),
            size: Some(42),
        }
    }

    #[test]
    fn test_materialized_clears_failure() {
        let mut cp = ChannelCheckpoint::default();
        cp.record_failed_attachment("F1");
        assert!(cp.failed_attachments.contains("F1"));

        cp.record_materialized("F1", stored("files/general/F1_report.pdf"));
        assert!(!cp.failed_attachments.contains("F1"));
        assert_eq!(
            cp.stored("F1").map(|s| s.stored_ref.as_str()),
            Some("files/general/F1_report.pdf")
        );
    }

    #[test]
    fn test_serde_roundtrip_keeps_boundary() {
        let mut cp = ChannelCheckpoint::default();
        cp.advance(Timestamp::from("123.000456"), Some("abc".into()));
        cp.record_materialized("F9", stored("files/x/F9_a.png"));

        let json = serde_json::to_string(&cp).expect("serialize");
        let back: ChannelCheckpoint = serde_json::from_str(&json).expect("deserialize");
        assert!(back.is_committed(&Timestamp::from("123.000456")));
        assert_eq!(
            back.stored("F9").map(|s| s.stored_ref.as_str()),
            Some("files/x/F9_a.png")
        );
    }
}
