//! Scripted in-memory collaborators for engine tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    ApiError, AppError, AttachmentRef, Channel, ChannelVisibility, ExportRecord, Message, Reply,
    Result, Timestamp,
};
use crate::infrastructure::{ApiResult, AttachmentStore, Download, OutputSink, Page, SourceApi};

/// A failure injected into a scripted call.
#[derive(Debug, Clone)]
pub enum Fault {
    Throttle(Option<Duration>),
    Transient,
    Auth,
}

impl Fault {
    fn into_error(self) -> ApiError {
        match self {
            Self::Throttle(retry_after) => ApiError::Throttled { retry_after },
            Self::Transient => ApiError::transient("scripted transient failure"),
            Self::Auth => ApiError::Auth {
                message: "scripted auth failure".into(),
            },
        }
    }
}

/// In-memory `SourceApi` with scripted pages and failures.
///
/// Cursors are page indices rendered as strings, so tests can assert exact
/// fetch counts. Stored message order is delivered verbatim; callers are
/// expected to normalize.
#[derive(Default)]
pub struct ScriptedApi {
    pub channels: Vec<Channel>,
    pub history: HashMap<String, Vec<Message>>,
    pub replies: HashMap<(String, String), Vec<Reply>>,
    pub members: Vec<serde_json::Value>,
    /// One-shot faults keyed by 1-based history call number.
    pub history_faults: Mutex<HashMap<u32, Fault>>,
    /// Thread roots (by ts) whose reply fetch always fails.
    pub fail_threads: HashSet<String>,
    /// Download URLs that always fail.
    pub fail_downloads: HashSet<String>,
    pub history_calls: AtomicU32,
    pub download_log: Mutex<Vec<String>>,
}

impl ScriptedApi {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels,
            ..Self::default()
        }
    }

    pub fn with_history(mut self, channel_id: &str, messages: Vec<Message>) -> Self {
        self.history.insert(channel_id.to_string(), messages);
        self
    }

    pub fn with_replies(mut self, channel_id: &str, root_ts: &str, replies: Vec<Reply>) -> Self {
        self.replies
            .insert((channel_id.to_string(), root_ts.to_string()), replies);
        self
    }

    pub fn with_history_fault(self, call_number: u32, fault: Fault) -> Self {
        self.history_faults
            .lock()
            .expect("faults lock")
            .insert(call_number, fault);
        self
    }

    pub fn with_failed_thread(mut self, root_ts: &str) -> Self {
        self.fail_threads.insert(root_ts.to_string());
        self
    }

    pub fn with_failed_download(mut self, url: &str) -> Self {
        self.fail_downloads.insert(url.to_string());
        self
    }

    pub fn downloads(&self) -> Vec<String> {
        self.download_log.lock().expect("download lock").clone()
    }

    fn page_of<T: Clone>(items: &[T], cursor: Option<&str>, limit: u32) -> Page<T> {
        let index: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let start = index * limit as usize;
        let end = (start + limit as usize).min(items.len());
        let slice = if start < items.len() {
            items[start..end].to_vec()
        } else {
            Vec::new()
        };
        let next_cursor = if end < items.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Page {
            items: slice,
            next_cursor,
        }
    }
}

#[async_trait]
impl SourceApi for ScriptedApi {
    async fn list_channels(&self, cursor: Option<&str>, limit: u32) -> ApiResult<Page<Channel>> {
        Ok(Self::page_of(&self.channels, cursor, limit))
    }

    async fn fetch_history(
        &self,
        channel_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<Page<Message>> {
        let call = self.history_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(fault) = self.history_faults.lock().expect("faults lock").remove(&call) {
            return Err(fault.into_error());
        }

        let messages = self
            .history
            .get(channel_id)
            .ok_or_else(|| ApiError::malformed(format!("unknown channel {channel_id}")))?;
        Ok(Self::page_of(messages, cursor, limit))
    }

    async fn fetch_replies(
        &self,
        channel_id: &str,
        thread_ts: &Timestamp,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<Page<Reply>> {
        if self.fail_threads.contains(thread_ts.as_str()) {
            return Err(ApiError::transient("scripted thread failure"));
        }
        let replies = self
            .replies
            .get(&(channel_id.to_string(), thread_ts.as_str().to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(Self::page_of(&replies, cursor, limit))
    }

    async fn list_members(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<Page<serde_json::Value>> {
        Ok(Self::page_of(&self.members, cursor, limit))
    }

    async fn download(&self, url: &str, dest: &Path) -> ApiResult<Download> {
        if self.fail_downloads.contains(url) {
            return Err(ApiError::transient("scripted download failure"));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ApiError::transient(format!("staging dir: {e}")))?;
        }
        std::fs::write(dest, url.as_bytes())
            .map_err(|e| ApiError::transient(format!("staging write: {e}")))?;
        self.download_log
            .lock()
            .expect("download lock")
            .push(url.to_string());
        Ok(Download {
            bytes: url.len() as u64,
            sha256: format!("hash-of-{url}"),
        })
    }
}

/// Sink that captures records in memory and can trip a cancellation token
/// after N emissions, simulating a process interrupt mid-channel.
#[derive(Default)]
pub struct CapturingSink {
    pub records: Mutex<Vec<ExportRecord>>,
    pub cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_after(&self, emissions: usize, token: CancellationToken) {
        *self.cancel_after.lock().expect("cancel lock") = Some((emissions, token));
    }

    pub fn emitted_ts(&self) -> Vec<String> {
        self.records
            .lock()
            .expect("records lock")
            .iter()
            .map(|r| r.ts.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl OutputSink for CapturingSink {
    async fn emit(&self, record: &ExportRecord) -> Result<()> {
        let emitted = {
            let mut records = self.records.lock().expect("records lock");
            records.push(record.clone());
            records.len()
        };
        if let Some((limit, token)) = self.cancel_after.lock().expect("cancel lock").as_ref() {
            if emitted >= *limit {
                token.cancel();
            }
        }
        Ok(())
    }
}

/// Attachment store that records persists in memory.
#[derive(Default)]
pub struct MemoryAttachmentStore {
    pub persisted: Mutex<Vec<String>>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persist_count(&self) -> usize {
        self.persisted.lock().expect("persist lock").len()
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn persist(
        &self,
        staged: &Path,
        channel_name: &str,
        file_id: &str,
        file_name: &str,
    ) -> Result<String> {
        std::fs::remove_file(staged)
            .map_err(|e| AppError::io("failed to consume staging copy", e))?;
        let stored_ref = format!("mem://{channel_name}/{file_id}_{file_name}");
        self.persisted
            .lock()
            .expect("persist lock")
            .push(stored_ref.clone());
        Ok(stored_ref)
    }
}

/// Build a plain message for tests.
pub fn message(channel_id: &str, ts: &str) -> Message {
    Message {
        channel_id: channel_id.to_string(),
        ts: Timestamp::from(ts),
        author: Some("U1".into()),
        text: format!("message {ts}"),
        thread_ts: None,
        reply_count: 0,
        attachments: Vec::new(),
    }
}

/// Build a sequence of messages with microsecond-spaced timestamps.
pub fn messages(channel_id: &str, count: usize) -> Vec<Message> {
    (1..=count)
        .map(|i| message(channel_id, &format!("1000.{i:06}")))
        .collect()
}

/// Build a thread reply for tests.
pub fn reply(ts: &str, text: &str) -> Reply {
    Reply {
        ts: Timestamp::from(ts),
        author: Some("U2".into()),
        text: text.to_string(),
        attachments: Vec::new(),
    }
}

/// Build an attachment reference for tests.
pub fn attachment(id: &str, url: &str) -> AttachmentRef {
    AttachmentRef {
        id: id.to_string(),
        name: format!("{id}.bin"),
        url: Some(url.to_string()),
        size: Some(4),
        mimetype: None,
    }
}

/// Build a test channel.
pub fn channel(id: &str, name: &str) -> Channel {
    Channel {
        id: id.to_string(),
        name: name.to_string(),
        visibility: ChannelVisibility::Public,
    }
}
