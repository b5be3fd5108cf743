//! Output sink collaborator: line-delimited record streams.
//!
//! Committed records land in a dated JSONL file, one object per line, flushed
//! per record so a checkpoint never advances past data still in a buffer.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::domain::{AppError, ExportRecord, Result};

/// Receives committed, fully-enriched message records.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Append one record. At-least-once semantics; dedupe key is
    /// `(channel_id, ts)`.
    async fn emit(&self, record: &ExportRecord) -> Result<()>;
}

/// Append-only JSONL file writer shared by the sink and the member export.
pub struct JsonlWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlWriter {
    /// Open `path` for appending, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns error if the directory or file cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::io("failed to create output directory", e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| AppError::io(format!("failed to open {}", path.display()), e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Append one value as a JSON line and flush it.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub async fn append<T: Serialize>(&self, value: &T) -> Result<()> {
        let mut line = serde_json::to_string(value).map_err(AppError::json)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).map_err(|e| AppError::Sink {
            message: format!("write to {}: {e}", self.path.display()),
        })?;
        file.flush().map_err(|e| AppError::Sink {
            message: format!("flush {}: {e}", self.path.display()),
        })
    }

    /// The file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The default sink: a dated `slack_<YYYYMMDD>.jsonl` under the messages
/// directory.
pub struct JsonlSink {
    writer: JsonlWriter,
}

impl JsonlSink {
    /// Open today's record stream under `messages_dir`.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened.
    pub fn open(messages_dir: &Path) -> Result<Self> {
        let name = format!("slack_{}.jsonl", Utc::now().format("%Y%m%d"));
        Ok(Self {
            writer: JsonlWriter::open(&messages_dir.join(name))?,
        })
    }

    /// The file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.writer.path()
    }
}

#[async_trait]
impl OutputSink for JsonlSink {
    async fn emit(&self, record: &ExportRecord) -> Result<()> {
        self.writer.append(record).await
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::Timestamp;

    use super::*;

    fn record(ts: &str) -> ExportRecord {
        ExportRecord {
            channel_id: "C1".into(),
            channel_name: "general".into(),
            ts: Timestamp::from(ts),
            author: Some("U1".into()),
            text: "hello".into(),
            thread_ts: None,
            replies: Vec::new(),
            attachments: Vec::new(),
            thread_fetch_failed: false,
        }
    }

    #[tokio::test]
    async fn test_emits_one_json_object_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = JsonlSink::open(dir.path()).expect("open");

        sink.emit(&record("1.000001")).await.expect("emit");
        sink.emit(&record("1.000002")).await.expect("emit");

        let content = std::fs::read_to_string(sink.path()).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: ExportRecord = serde_json::from_str(line).expect("valid JSON line");
            assert_eq!(parsed.channel_id, "C1");
        }
    }

    #[tokio::test]
    async fn test_reopen_appends_instead_of_truncating() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let sink = JsonlSink::open(dir.path()).expect("open");
            sink.emit(&record("1.000001")).await.expect("emit");
        }
        let sink = JsonlSink::open(dir.path()).expect("reopen");
        sink.emit(&record("1.000002")).await.expect("emit");

        let content = std::fs::read_to_string(sink.path()).expect("read");
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_writer_accepts_opaque_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = JsonlWriter::open(&dir.path().join("users.jsonl")).expect("open");
        writer
            .append(&serde_json::json!({"id": "U1", "name": "ada"}))
            .await
            .expect("append");

        let content = std::fs::read_to_string(writer.path()).expect("read");
        assert!(content.contains("\"ada\""));
    }
}
