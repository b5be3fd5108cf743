//! Wire-format types for the Slack Web API.
//!
//! Response envelopes carry `ok`/`error` plus the payload; pagination uses
//! `response_metadata.next_cursor`, which is an empty string once exhausted.
//! Conversion into domain types happens here so the rest of the crate never
//! sees wire field names.

use serde::Deserialize;

use crate::domain::{
    AttachmentRef, Channel, ChannelVisibility, Message, Reply, Timestamp,
};

/// Cursor continuation metadata.
#[derive(Debug, Default, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: String,
}

impl ResponseMetadata {
    /// Continuation cursor, `None` when the sequence is exhausted.
    #[must_use]
    pub fn into_cursor(self) -> Option<String> {
        if self.next_cursor.is_empty() {
            None
        } else {
            Some(self.next_cursor)
        }
    }
}

/// `conversations.history` / `conversations.replies` response.
#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub response_metadata: Option<ResponseMetadata>,
}

/// `conversations.list` response.
#[derive(Debug, Deserialize)]
pub struct ChannelsResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub channels: Vec<WireChannel>,
    #[serde(default)]
    pub response_metadata: Option<ResponseMetadata>,
}

/// `users.list` response. Members are passed through opaquely; the export
/// preserves whatever the workspace reports.
#[derive(Debug, Deserialize)]
pub struct MembersResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub members: Vec<serde_json::Value>,
    #[serde(default)]
    pub response_metadata: Option<ResponseMetadata>,
}

/// A message as it appears on the wire, in history or reply lists.
#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub files: Vec<WireFile>,
}

impl WireMessage {
    /// Convert into a domain message owned by `channel_id`.
    #[must_use]
    pub fn into_message(self, channel_id: &str) -> Message {
        Message {
            channel_id: channel_id.to_string(),
            ts: Timestamp::new(self.ts),
            author: self.user,
            text: self.text,
            thread_ts: self.thread_ts.map(Timestamp::new),
            reply_count: self.reply_count,
            attachments: self.files.into_iter().map(WireFile::into_ref).collect(),
        }
    }

    /// Convert into a thread reply.
    #[must_use]
    pub fn into_reply(self) -> Reply {
        Reply {
            ts: Timestamp::new(self.ts),
            author: self.user,
            text: self.text,
            attachments: self.files.into_iter().map(WireFile::into_ref).collect(),
        }
    }
}

/// A file reference as it appears on the wire.
#[derive(Debug, Deserialize)]
pub struct WireFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url_private_download: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

impl WireFile {
    /// Convert into a domain attachment reference.
    #[must_use]
    pub fn into_ref(self) -> AttachmentRef {
        AttachmentRef {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            url: self.url_private_download,
            size: self.size,
            mimetype: self.mimetype,
        }
    }
}

/// A channel as it appears on the wire.
#[derive(Debug, Deserialize)]
pub struct WireChannel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_private: bool,
}

impl WireChannel {
    /// Convert into a domain channel.
    #[must_use]
    pub fn into_channel(self) -> Channel {
        Channel {
            id: self.id,
            name: self.name,
            visibility: if self.is_private {
                ChannelVisibility::Private
            } else {
                ChannelVisibility::Public
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_response_decodes() {
        let json = r#"{
            "ok": true,
            "messages": [
                {"ts": "1726000000.000100", "user": "U1", "text": "hello",
                 "thread_ts": "1726000000.000100", "reply_count": 2,
                 "files": [{"id": "F1", "name": "a.png",
                            "url_private_download": "https://files/a.png",
                            "size": 123, "mimetype": "image/png"}]}
            ],
            "has_more": true,
            "response_metadata": {"next_cursor": "bmV4dA=="}
        }"#;

        let parsed: HistoryResponse = serde_json::from_str(json).expect("decode");
        assert!(parsed.ok);
        assert_eq!(parsed.messages.len(), 1);

        let msg = parsed
            .messages
            .into_iter()
            .next()
            .map(|m| m.into_message("C1"))
            .expect("one message");
        assert_eq!(msg.channel_id, "C1");
        assert!(msg.is_thread_root());
        assert_eq!(msg.attachments[0].id, "F1");
        assert_eq!(msg.attachments[0].url.as_deref(), Some("https://files/a.png"));
    }

    #[test]
    fn test_empty_cursor_means_exhausted() {
        let meta = ResponseMetadata {
            next_cursor: String::new(),
        };
        assert!(meta.into_cursor().is_none());

        let meta = ResponseMetadata {
            next_cursor: "abc".into(),
        };
        assert_eq!(meta.into_cursor().as_deref(), Some("abc"));
    }

    #[test]
    fn test_file_without_name_falls_back_to_id() {
        let file = WireFile {
            id: "F7".into(),
            name: None,
            url_private_download: None,
            size: None,
            mimetype: None,
        };
        let r = file.into_ref();
        assert_eq!(r.name, "F7");
        assert!(r.url.is_none());
    }

    #[test]
    fn test_error_envelope_decodes() {
        let json = r#"{"ok": false, "error": "invalid_auth"}"#;
        let parsed: ChannelsResponse = serde_json::from_str(json).expect("decode");
        assert!(!parsed.ok);
        assert_eq!(parsed.error.as_deref(), Some("invalid_auth"));
    }
}
