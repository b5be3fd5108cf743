//! Domain layer - core business types.
//!
//! This layer contains pure domain models, checkpoint records, configuration
//! and error types without any external dependencies (HTTP, IO, etc.).

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod models;

pub use checkpoint::{ChannelCheckpoint, StoredAttachment};
pub use config::{ApiConfig, AppConfig, PathConfig, RetryConfig, RunConfig};
pub use error::{ApiError, AppError, Result};
pub use models::{
    AttachmentRecord, AttachmentRef, Channel, ChannelOutcome, ChannelStats, ChannelVisibility,
    ExportRecord, Message, Reply, ReplyRecord, RunSummary, Timestamp,
};
