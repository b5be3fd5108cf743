//! Application configuration.
//!
//! Contains the typed configuration sections loaded from `config.toml`.
//! Credentials are never part of the file; the bot token comes from the
//! `SLACK_BOT_TOKEN` environment variable.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Source API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the Slack Web API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Page size requested from paginated calls (API caps at 1000).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Steady-state call budget refill rate.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Burst capacity of the token bucket.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
        }
    }
}

fn default_base_url() -> String {
    "https://slack.com/api".to_string()
}

const fn default_page_size() -> u32 {
    1000
}

const fn default_requests_per_minute() -> u32 {
    50
}

const fn default_burst() -> u32 {
    10
}

/// Run-level concurrency and scope settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Channels processed concurrently.
    #[serde(default = "default_channel_parallelism")]
    pub channel_parallelism: usize,

    /// Concurrent message enrichments within one page.
    #[serde(default = "default_message_concurrency")]
    pub message_concurrency: usize,

    /// Run-wide attachment download ceiling.
    #[serde(default = "default_attachment_concurrency")]
    pub attachment_concurrency: usize,

    /// Export the workspace member directory before channel extraction.
    #[serde(default = "default_export_members")]
    pub export_members: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            channel_parallelism: default_channel_parallelism(),
            message_concurrency: default_message_concurrency(),
            attachment_concurrency: default_attachment_concurrency(),
            export_members: default_export_members(),
        }
    }
}

const fn default_channel_parallelism() -> usize {
    4
}

const fn default_message_concurrency() -> usize {
    8
}

const fn default_attachment_concurrency() -> usize {
    4
}

const fn default_export_members() -> bool {
    true
}

/// Retry policy configuration, applied uniformly to API calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per call before a transient error becomes terminal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

impl RetryConfig {
    /// First backoff delay.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Backoff ceiling.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathConfig {
    /// Base data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Run concurrency and scope.
    #[serde(default)]
    pub run: RunConfig,

    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Path settings.
    #[serde(default)]
    pub paths: PathConfig,
}

impl AppConfig {
    /// Get the data directory, using default if not configured.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".slack-chat-archiver")
    }

    /// Get the checkpoint file path.
    #[must_use]
    pub fn checkpoint_file_path(&self) -> PathBuf {
        self.data_dir().join("checkpoints.json")
    }

    /// Get the config file path.
    #[must_use]
    pub fn config_file_path(&self) -> PathBuf {
        self.data_dir().join("config.toml")
    }

    /// Directory for in-flight attachment downloads.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir().join("downloads")
    }

    /// Directory for durably stored attachments.
    #[must_use]
    pub fn files_dir(&self) -> PathBuf {
        self.data_dir().join("files")
    }

    /// Directory for emitted message records.
    #[must_use]
    pub fn messages_dir(&self) -> PathBuf {
        self.data_dir().join("messages")
    }

    /// Directory for the exported member directory.
    #[must_use]
    pub fn users_dir(&self) -> PathBuf {
        self.data_dir().join("users")
    }
}
