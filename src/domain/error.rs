//! Domain-level error types for slack-chat-archiver.
//!
//! All errors are typed with `thiserror`. The split matters operationally:
//! `ApiError` classifies a single outbound call (retry or give up), while
//! `AppError` attributes a failure to the channel or subsystem it belongs to.

use std::time::Duration;

use thiserror::Error;

/// Outcome classification for one outbound API call.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The server throttled the call. Retried after the governor's cooldown
    /// without consuming the retry budget.
    #[error("throttled by server{}", retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    Throttled {
        /// Server-provided wait hint, when present.
        retry_after: Option<Duration>,
    },

    /// Network timeout, connection failure, 5xx, or a transient server-side
    /// error code. Retried under the retry policy.
    #[error("transient API error: {message}")]
    Transient { message: String },

    /// Invalid, expired, or under-scoped credentials. Never retried.
    #[error("authentication failure: {message}")]
    Auth { message: String },

    /// Malformed response or request the server will never accept (e.g. an
    /// invalid cursor). Never retried.
    #[error("malformed request or response: {message}")]
    Malformed { message: String },
}

impl ApiError {
    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a malformed-data error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Whether the retry wrapper may try this call again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Throttled { .. })
    }
}

/// Application-level errors, attributed to the place they occurred.
#[derive(Error, Debug)]
pub enum AppError {
    /// An API call failed terminally (budget exhausted or fatal class).
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// A channel's extraction hit a channel-fatal condition.
    #[error("channel {channel}: {message}")]
    Channel { channel: String, message: String },

    /// Checkpoint file could not be read, parsed, or written. Run-fatal.
    #[error("checkpoint store error: {message}")]
    Checkpoint {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Output sink write failed. Run-fatal for the owning channel.
    #[error("output sink error: {message}")]
    Sink { message: String },

    /// Configuration or environment error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// JSON encoding/decoding failed outside the wire layer.
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// IO operation failed.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl AppError {
    /// Attribute an error to a channel.
    pub fn channel(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a checkpoint error with context.
    pub fn checkpoint(message: impl Into<String>, source: Option<std::io::Error>) -> Self {
        Self::Checkpoint {
            message: message.into(),
            source,
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a JSON error.
    pub fn json(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create an IO error with context.
    pub fn io(message: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(err),
        }
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::transient("timeout").is_transient());
        assert!(ApiError::Throttled { retry_after: None }.is_transient());
        assert!(!ApiError::Auth {
            message: "invalid_auth".into()
        }
        .is_transient());
        assert!(!ApiError::malformed("invalid_cursor").is_transient());
    }

    #[test]
    fn test_throttled_display_includes_hint() {
        let err = ApiError::Throttled {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert!(err.to_string().contains("5s"));
    }
}
