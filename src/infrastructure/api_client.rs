//! Source API collaborator: trait seam plus the Slack Web API client.
//!
//! The engine only sees [`SourceApi`]; [`SlackApiClient`] is the reqwest
//! implementation. Throttling surfaces as a distinct error variant so the
//! rate governor can honor server wait hints.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::domain::{ApiError, AppError, Channel, Message, Reply, Timestamp};

use super::wire::{ChannelsResponse, HistoryResponse, MembersResponse, ResponseMetadata};

/// Result alias for single API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Continuation cursor; `None` signals exhaustion.
    pub next_cursor: Option<String>,
}

/// Result of a completed attachment download.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the downloaded content.
    pub sha256: String,
}

/// The paginated message-history API the extraction engine runs against.
///
/// Pagination contract: passing a page's `next_cursor` back yields the next
/// page; pages advance forward in time and each page's internal order is
/// unspecified (callers normalize to ascending timestamp).
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// One page of the workspace channel listing (public and private).
    async fn list_channels(&self, cursor: Option<&str>, limit: u32) -> ApiResult<Page<Channel>>;

    /// One page of a channel's message history.
    async fn fetch_history(
        &self,
        channel_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<Page<Message>>;

    /// One page of the reply sequence under a thread root. The root message
    /// itself is echoed in the listing and must be filtered by the caller.
    async fn fetch_replies(
        &self,
        channel_id: &str,
        thread_ts: &Timestamp,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<Page<Reply>>;

    /// One page of the workspace member directory, passed through opaquely.
    async fn list_members(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<Page<serde_json::Value>>;

    /// Download a time-limited attachment URL to `dest`, returning the byte
    /// count and content hash.
    async fn download(&self, url: &str, dest: &Path) -> ApiResult<Download>;
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Slack Web API client (bearer-token GET calls).
pub struct SlackApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl SlackApiClient {
    /// Create a client against `base_url` with the given bot token.
    ///
    /// # Errors
    /// Returns error if the underlying HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> crate::domain::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::config(format!("failed to build HTTP client: {e}")))?;

        let base_url: String = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Create a client reading the bot token from `SLACK_BOT_TOKEN`.
    ///
    /// # Errors
    /// Returns error if the variable is unset.
    pub fn from_env(base_url: &str) -> crate::domain::Result<Self> {
        let token = std::env::var("SLACK_BOT_TOKEN")
            .map_err(|_| AppError::config("SLACK_BOT_TOKEN environment variable not set"))?;
        Self::new(base_url, token)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> ApiResult<T> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::Throttled {
                retry_after: parse_retry_after(&response),
            });
        }
        if status.is_server_error() {
            return Err(ApiError::transient(format!("{method}: HTTP {status}")));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Auth {
                message: format!("{method}: HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(ApiError::malformed(format!("{method}: HTTP {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::malformed(format!("{method}: undecodable response: {e}")))
    }
}

/// Classify a payload-level `ok=false` error code.
fn slack_error(method: &str, code: &str) -> ApiError {
    match code {
        "ratelimited" => ApiError::Throttled { retry_after: None },
        "invalid_auth" | "not_authed" | "token_revoked" | "token_expired" | "account_inactive"
        | "missing_scope" => ApiError::Auth {
            message: format!("{method}: {code}"),
        },
        "internal_error" | "service_unavailable" | "fatal_error" | "request_timeout" => {
            ApiError::transient(format!("{method}: {code}"))
        }
        _ => ApiError::malformed(format!("{method}: {code}")),
    }
}

/// Classify a reqwest transport failure.
fn transport_error(err: reqwest::Error) -> ApiError {
    ApiError::transient(format!("transport error: {err}"))
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn cursor_of(meta: Option<ResponseMetadata>) -> Option<String> {
    meta.and_then(ResponseMetadata::into_cursor)
}

#[async_trait]
impl SourceApi for SlackApiClient {
    async fn list_channels(&self, cursor: Option<&str>, limit: u32) -> ApiResult<Page<Channel>> {
        let mut query = vec![
            ("types", "public_channel,private_channel".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response: ChannelsResponse = self.get_json("conversations.list", &query).await?;
        if !response.ok {
            return Err(slack_error(
                "conversations.list",
                response.error.as_deref().unwrap_or("unknown_error"),
            ));
        }

        Ok(Page {
            items: response
                .channels
                .into_iter()
                .map(super::wire::WireChannel::into_channel)
                .collect(),
            next_cursor: cursor_of(response.response_metadata),
        })
    }

    async fn fetch_history(
        &self,
        channel_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<Page<Message>> {
        let mut query = vec![
            ("channel", channel_id.to_string()),
            ("limit", limit.to_string()),
            // Anchor at the epoch so cursoring advances forward in time.
            ("oldest", "0".to_string()),
            ("inclusive", "true".to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response: HistoryResponse = self.get_json("conversations.history", &query).await?;
        if !response.ok {
            return Err(slack_error(
                "conversations.history",
                response.error.as_deref().unwrap_or("unknown_error"),
            ));
        }

        Ok(Page {
            items: response
                .messages
                .into_iter()
                .map(|m| m.into_message(channel_id))
                .collect(),
            next_cursor: cursor_of(response.response_metadata),
        })
    }

    async fn fetch_replies(
        &self,
        channel_id: &str,
        thread_ts: &Timestamp,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<Page<Reply>> {
        let mut query = vec![
            ("channel", channel_id.to_string()),
            ("ts", thread_ts.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response: HistoryResponse = self.get_json("conversations.replies", &query).await?;
        if !response.ok {
            return Err(slack_error(
                "conversations.replies",
                response.error.as_deref().unwrap_or("unknown_error"),
            ));
        }

        Ok(Page {
            items: response
                .messages
                .into_iter()
                .map(super::wire::WireMessage::into_reply)
                .collect(),
            next_cursor: cursor_of(response.response_metadata),
        })
    }

    async fn list_members(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> ApiResult<Page<serde_json::Value>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response: MembersResponse = self.get_json("users.list", &query).await?;
        if !response.ok {
            return Err(slack_error(
                "users.list",
                response.error.as_deref().unwrap_or("unknown_error"),
            ));
        }

        Ok(Page {
            items: response.members,
            next_cursor: cursor_of(response.response_metadata),
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> ApiResult<Download> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::Throttled {
                retry_after: parse_retry_after(&response),
            });
        }
        if status.is_server_error() {
            return Err(ApiError::transient(format!("download: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ApiError::malformed(format!("download: HTTP {status}")));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ApiError::transient(format!("staging dir: {e}")))?;
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ApiError::transient(format!("staging file: {e}")))?;

        let mut response = response;
        let mut hasher = Sha256::new();
        let mut bytes = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            hasher.update(&chunk);
            bytes += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| ApiError::transient(format!("staging write: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| ApiError::transient(format!("staging flush: {e}")))?;

        let sha256 = hasher
            .finalize()
            .iter()
            .fold(String::with_capacity(64), |mut acc, byte| {
                use std::fmt::Write;
                let _ = write!(acc, "{byte:02x}");
                acc
            });

        Ok(Download { bytes, sha256 })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn client(server: &MockServer) -> SlackApiClient {
        SlackApiClient::new(server.uri(), "xoxb-test").expect("client")
    }

    #[tokio::test]
    async fn test_history_page_decodes_with_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .and(query_param("channel", "C1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"ok": true,
                    "messages": [{"ts": "2.000000", "user": "U1", "text": "b"},
                                 {"ts": "1.000000", "user": "U2", "text": "a"}],
                    "response_metadata": {"next_cursor": "cur2"}}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let page = client(&server)
            .await
            .fetch_history("C1", None, 1000)
            .await
            .expect("page");
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_cursor.as_deref(), Some("cur2"));
        assert_eq!(page.items[0].channel_id, "C1");
    }

    #[tokio::test]
    async fn test_http_429_maps_to_throttled_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .fetch_history("C1", None, 1000)
            .await
            .expect_err("throttled");
        match err {
            ApiError::Throttled { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected throttled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_payload_error_codes_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.list"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"ok": false, "error": "invalid_auth"}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .list_channels(None, 200)
            .await
            .expect_err("auth error");
        assert!(matches!(err, ApiError::Auth { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.list"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .list_members(None, 200)
            .await
            .expect_err("transient");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_download_stages_file_and_hashes_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/a.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"attachment-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("staged").join("F1_a.bin");
        let download = client(&server)
            .await
            .download(&format!("{}/files/a.bin", server.uri()), &dest)
            .await
            .expect("download");

        assert_eq!(download.bytes, 16);
        assert_eq!(
            std::fs::read(&dest).expect("staged file"),
            b"attachment-bytes"
        );
        // SHA-256 of "attachment-bytes".
        let expected = {
            let mut hasher = Sha256::new();
            hasher.update(b"attachment-bytes");
            hasher
                .finalize()
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>()
        };
        assert_eq!(download.sha256, expected);
    }
}
