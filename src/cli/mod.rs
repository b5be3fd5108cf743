//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the tool.

use clap::{Parser, Subcommand};

/// Slack Chat Archiver - export a workspace's full message history
/// (threads and files included) for analytics loading.
///
/// Requires SLACK_BOT_TOKEN in the environment for API commands.
#[derive(Parser, Debug)]
#[command(name = "slack-chat-archiver")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a full export: members, channels, messages, threads, files.
    /// Resumes from the last checkpoint automatically.
    Export {
        /// Restrict the run to specific channels (name or id, repeatable).
        #[arg(short, long)]
        channel: Vec<String>,

        /// Skip the workspace member directory export.
        #[arg(long)]
        skip_members: bool,
    },

    /// List the workspace channels and their extraction status.
    Channels,

    /// Show per-channel checkpoint progress from the last run.
    Status,

    /// Show the data directory paths being used.
    Paths,
}
