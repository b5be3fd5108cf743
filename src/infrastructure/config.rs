//! Configuration file management.
//!
//! Handles loading and saving TOML configuration files. The bot token is
//! deliberately not part of the file; see `SLACK_BOT_TOKEN`.

use std::fs;
use std::path::Path;

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# Slack Chat Archiver Configuration
# Auto-generated - edit as needed
# The bot token is read from the SLACK_BOT_TOKEN environment variable.

[api]
# Base URL of the Slack Web API
base_url = "https://slack.com/api"

# Page size for paginated calls (the API caps at 1000)
page_size = 1000

# Steady-state call budget
requests_per_minute = 50

# Burst capacity of the call budget
burst = 10

[run]
# Channels processed concurrently
channel_parallelism = 4

# Concurrent message enrichments within one page
message_concurrency = 8

# Run-wide attachment download ceiling
attachment_concurrency = 4

# Export the workspace member directory before channel extraction
export_members = true

[retry]
# Attempts per API call before a transient error becomes terminal
max_attempts = 5

# First backoff delay in milliseconds; doubles per attempt
base_delay_ms = 500

# Backoff ceiling in milliseconds
max_delay_ms = 30000

[paths]
# Custom data directory (optional, defaults to ~/.slack-chat-archiver)
# data_dir = "/custom/path"
"#;

/// Load configuration from file or create default.
///
/// # Errors
/// Returns error if file exists but cannot be read or parsed.
pub fn load_config() -> Result<AppConfig> {
    let config_path = AppConfig::default_data_dir().join("config.toml");

    if config_path.exists() {
        load_config_from_file(&config_path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read or parsed.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file: {e}"),
    })
}

/// Save configuration to file.
///
/// # Errors
/// Returns error if file cannot be written.
pub fn save_config(config: &AppConfig) -> Result<()> {
    let config_path = config.config_file_path();

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| AppError::Config {
        message: format!("Failed to serialize config: {e}"),
    })?;

    fs::write(&config_path, content)
        .map_err(|e| AppError::io(format!("Failed to write config file: {}", config_path.display()), e))?;

    tracing::info!(path = %config_path.display(), "Configuration saved");

    Ok(())
}

/// Create default configuration file if it doesn't exist.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn ensure_config_exists() -> Result<()> {
    let config_path = AppConfig::default_data_dir().join("config.toml");

    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::io("Failed to create config directory", e))?;
        }

        fs::write(&config_path, DEFAULT_CONFIG)
            .map_err(|e| AppError::io("Failed to create default config", e))?;

        tracing::info!(path = %config_path.display(), "Created default configuration");
    }

    Ok(())
}
