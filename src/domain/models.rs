//! Domain models for exported Slack data.
//!
//! These models represent the core entities pulled from the workspace API:
//! channels, messages with their nested threads, and file attachments.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A Slack message timestamp (`ts`), e.g. `"1726000000.000100"`.
///
/// Within a channel the `ts` value is unique and serves as both the message
/// identity and its ordering key. The wire string is kept verbatim (the API
/// expects it back unchanged for thread lookups); ordering compares the
/// numeric value, not the string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Wrap a raw `ts` string.
    #[must_use]
    pub fn new(ts: impl Into<String>) -> Self {
        Self(ts.into())
    }

    /// The raw wire value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value as (whole seconds, microsecond fraction).
    ///
    /// Unparsable values sort first rather than panicking; the API does not
    /// emit them, but a checkpoint file edited by hand might.
    fn parts(&self) -> (i64, u32) {
        let (secs, frac) = self.0.split_once('.').unwrap_or((self.0.as_str(), ""));
        let secs = secs.parse::<i64>().unwrap_or(0);
        // Right-pad so "1.1" and "1.100000" compare equal.
        let mut micros = 0u32;
        for i in 0..6 {
            let digit = frac
                .as_bytes()
                .get(i)
                .filter(|b| b.is_ascii_digit())
                .map_or(0, |b| u32::from(b - b'0'));
            micros = micros * 10 + digit;
        }
        (secs, micros)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts().cmp(&other.parts())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Timestamp {
    fn from(ts: &str) -> Self {
        Self(ts.to_string())
    }
}

/// Channel visibility in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelVisibility {
    Public,
    Private,
}

impl std::fmt::Display for ChannelVisibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// A conversation container discovered at run start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Workspace-unique channel id (e.g. `C0123456789`).
    pub id: String,
    /// Human-readable channel name.
    pub name: String,
    /// Public or private.
    pub visibility: ChannelVisibility,
}

/// Reference to a file attached to a message or reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Workspace-unique file id.
    pub id: String,
    /// Original file name.
    pub name: String,
    /// Time-limited download URL. Absent for tombstoned/external files.
    #[serde(default)]
    pub url: Option<String>,
    /// Byte size as reported by the API.
    #[serde(default)]
    pub size: Option<u64>,
    /// Mime type as reported by the API.
    #[serde(default)]
    pub mimetype: Option<String>,
}

/// A threaded reply. Same shape as a message minus nesting; owned by its
/// parent message, chronological within the thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub ts: Timestamp,
    #[serde(default)]
    pub author: Option<String>,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

/// A single channel message as fetched from the history API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Owning channel id.
    pub channel_id: String,
    /// Message identity and ordering key.
    pub ts: Timestamp,
    /// Author user id. System messages may have none.
    #[serde(default)]
    pub author: Option<String>,
    /// Message body.
    pub text: String,
    /// Thread root `ts` when the message belongs to a thread.
    #[serde(default)]
    pub thread_ts: Option<Timestamp>,
    /// Reply count reported by the API; non-zero marks a thread root.
    #[serde(default)]
    pub reply_count: u32,
    /// Files attached to the message itself.
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

impl Message {
    /// Whether this message is the root of a thread with replies to fetch.
    ///
    /// A reply inside someone else's thread carries a `thread_ts` different
    /// from its own `ts`; fetching replies for those would duplicate the
    /// whole thread once per participant.
    #[must_use]
    pub fn is_thread_root(&self) -> bool {
        self.reply_count > 0
            && self
                .thread_ts
                .as_ref()
                .map_or(true, |root| *root == self.ts)
    }
}

/// Durable metadata for one attachment, as emitted in the output record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: String,
    pub name: String,
    /// Durable reference returned by the attachment store. Absent when the
    /// download failed.
    #[serde(default)]
    pub stored_ref: Option<String>,
    /// SHA-256 of the stored content.
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    /// True when the download exhausted its retry budget or had no URL.
    #[serde(default)]
    pub failed: bool,
}

/// A reply as emitted, with attachment metadata resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRecord {
    pub ts: Timestamp,
    #[serde(default)]
    pub author: Option<String>,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
}

/// One committed, fully-enriched message record handed to the output sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub channel_id: String,
    pub channel_name: String,
    pub ts: Timestamp,
    #[serde(default)]
    pub author: Option<String>,
    pub text: String,
    #[serde(default)]
    pub thread_ts: Option<Timestamp>,
    /// Nested thread replies, chronological. Empty when the message has no
    /// thread or the thread fetch failed (the failure is recorded).
    #[serde(default)]
    pub replies: Vec<ReplyRecord>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
    /// True when the thread fetch for this root failed.
    #[serde(default)]
    pub thread_fetch_failed: bool,
}

/// Terminal outcome of one channel's extraction.
#[derive(Debug, Clone)]
pub enum ChannelOutcome {
    /// All pages consumed and committed.
    Completed(ChannelStats),
    /// Channel-fatal error after exhausting channel-level retries.
    Failed { error: String, stats: ChannelStats },
    /// Stopped by the run's cancellation signal; resumable.
    Cancelled(ChannelStats),
}

/// Per-channel counters aggregated into the run summary.
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    pub messages_emitted: u64,
    pub threads_failed: u64,
    pub attachments_failed: u64,
}

/// Aggregated outcome of a whole run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub channels_completed: usize,
    pub channels_cancelled: usize,
    /// Failed channels with their error, for the exit report.
    pub channels_failed: Vec<(String, String)>,
    pub messages_emitted: u64,
    pub threads_failed: u64,
    pub attachments_failed: u64,
    pub members_exported: Option<u64>,
}

impl RunSummary {
    /// Whether the process should exit non-zero.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.channels_failed.is_empty()
    }

    pub(crate) fn absorb(&mut self, channel_name: &str, outcome: &ChannelOutcome) {
        let stats = match outcome {
            ChannelOutcome::Completed(stats) => {
                self.channels_completed += 1;
                stats
            }
            ChannelOutcome::Failed { error, stats } => {
                self.channels_failed
                    .push((channel_name.to_string(), error.clone()));
                stats
            }
            ChannelOutcome::Cancelled(stats) => {
                self.channels_cancelled += 1;
                stats
            }
        };
        self.messages_emitted += stats.messages_emitted;
        self.threads_failed += stats.threads_failed;
        self.attachments_failed += stats.attachments_failed;
    }
}
