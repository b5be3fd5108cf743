//! Slack Chat Archiver - export a workspace's complete message history.
//!
//! This tool walks every channel of a Slack workspace through the rate-limited
//! Web API, nests threaded replies, downloads file attachments, and appends
//! committed records to dated JSONL files ready for warehouse loading. Runs
//! are resumable: progress is checkpointed per channel after each durably
//! emitted message.
//!
//! QUICK START:
//!   slack-chat-archiver export                 # full export, resumes automatically
//!   slack-chat-archiver export -c general      # one channel only
//!   slack-chat-archiver channels               # list channels + status
//!   slack-chat-archiver status                 # checkpoint progress
//!   slack-chat-archiver paths                  # where data lands

mod application;
mod cli;
mod domain;
mod infrastructure;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use application::{AttachmentFetcher, EngineContext, RateGovernor, RetryPolicy, RunCoordinator};
use cli::{Cli, Commands};
use domain::{AppConfig, RunSummary};
use infrastructure::{
    CheckpointStore, JsonlSink, LocalAttachmentStore, SlackApiClient, SourceApi,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            std::process::exit(1);
        }
    }
}

/// Main application logic. Returns the process exit code.
async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Export {
            channel,
            skip_members,
        } => cmd_export(channel, skip_members).await,
        Commands::Channels => {
            cmd_channels().await?;
            Ok(0)
        }
        Commands::Status => {
            cmd_status().await?;
            Ok(0)
        }
        Commands::Paths => {
            cmd_paths()?;
            Ok(0)
        }
    }
}

/// Run a full export.
async fn cmd_export(channels: Vec<String>, skip_members: bool) -> anyhow::Result<i32> {
    infrastructure::ensure_config_exists().context("preparing configuration")?;
    let config = infrastructure::load_config().context("loading configuration")?;

    let api: Arc<dyn SourceApi> =
        Arc::new(SlackApiClient::from_env(&config.api.base_url).context("creating API client")?);
    let governor = Arc::new(RateGovernor::new(
        config.api.requests_per_minute,
        config.api.burst,
    ));
    let policy = RetryPolicy::from(&config.retry);

    let checkpoints = Arc::new(
        CheckpointStore::open(&config.checkpoint_file_path()).context("opening checkpoint store")?,
    );
    let sink = Arc::new(JsonlSink::open(&config.messages_dir()).context("opening output sink")?);
    let attachments = Arc::new(AttachmentFetcher::new(
        api.clone(),
        Arc::new(LocalAttachmentStore::new(config.files_dir())),
        checkpoints.clone(),
        governor.clone(),
        policy.clone(),
        config.run.attachment_concurrency,
        config.staging_dir(),
    ));

    let ctx = Arc::new(EngineContext {
        api,
        governor,
        policy,
        sink: sink.clone(),
        attachments,
        checkpoints,
        page_size: config.api.page_size,
        message_concurrency: config.run.message_concurrency,
    });

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("stop signal received; letting in-flight work settle");
            signal_token.cancel();
        }
    });

    let coordinator = RunCoordinator::new(
        ctx,
        config.users_dir(),
        config.run.channel_parallelism,
        config.run.export_members && !skip_members,
        channels,
        cancel,
    );

    let summary = coordinator.run().await.context("export run failed")?;
    print_summary(&summary, sink.path());

    Ok(i32::from(summary.has_failures()))
}

/// Print the run summary in a human-readable form.
fn print_summary(summary: &RunSummary, output_path: &std::path::Path) {
    println!();
    println!(
        "{} {} channels completed, {} messages emitted",
        "✓".green().bold(),
        summary.channels_completed,
        summary.messages_emitted
    );
    if let Some(members) = summary.members_exported {
        println!("{} {} workspace members exported", "✓".green(), members);
    }
    if summary.channels_cancelled > 0 {
        println!(
            "{} {} channels interrupted (resume with the same command)",
            "∙".yellow(),
            summary.channels_cancelled
        );
    }
    if summary.threads_failed > 0 || summary.attachments_failed > 0 {
        println!(
            "{} partial failures: {} threads, {} attachments (recorded in checkpoints)",
            "⚠".yellow().bold(),
            summary.threads_failed,
            summary.attachments_failed
        );
    }
    for (channel, error) in &summary.channels_failed {
        println!("{} {} failed: {}", "✗".red().bold(), channel.cyan(), error);
    }
    println!("Records: {}", output_path.display());
}

/// List workspace channels with extraction status.
async fn cmd_channels() -> anyhow::Result<()> {
    let config = infrastructure::load_config().context("loading configuration")?;
    let api =
        SlackApiClient::from_env(&config.api.base_url).context("creating API client")?;
    let governor = RateGovernor::new(config.api.requests_per_minute, config.api.burst);
    let policy = RetryPolicy::from(&config.retry);
    let checkpoints = CheckpointStore::open(&config.checkpoint_file_path())
        .context("opening checkpoint store")?;

    let mut channels = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let fetch_cursor = cursor.clone();
        let page = application::with_retry(&policy, &governor, "conversations.list", || {
            api.list_channels(fetch_cursor.as_deref(), config.api.page_size)
        })
        .await
        .context("listing channels")?;
        channels.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Name", "Visibility", "Committed", "Status"]);

    for channel in &channels {
        let cp = checkpoints.channel(&channel.id).await;
        let status = if cp.done {
            "done"
        } else if cp.messages_committed > 0 {
            "in progress"
        } else {
            "pending"
        };
        table.add_row(vec![
            channel.id.clone(),
            channel.name.clone(),
            channel.visibility.to_string(),
            cp.messages_committed.to_string(),
            status.to_string(),
        ]);
    }

    println!("{table}");
    println!("Total: {} channel(s)", channels.len());

    Ok(())
}

/// Show checkpoint progress from the last run.
async fn cmd_status() -> anyhow::Result<()> {
    let config = infrastructure::load_config().context("loading configuration")?;
    let checkpoints = CheckpointStore::open(&config.checkpoint_file_path())
        .context("opening checkpoint store")?;
    let snapshot = checkpoints.snapshot().await;

    if snapshot.is_empty() {
        println!("No checkpoints yet. Run {} first.", "export".cyan());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Channel",
        "Committed",
        "Last ts",
        "Files stored",
        "Files failed",
        "Done",
    ]);

    let mut failed_total = 0usize;
    for (channel_id, cp) in &snapshot {
        failed_total += cp.failed_attachments.len();
        table.add_row(vec![
            channel_id.clone(),
            cp.messages_committed.to_string(),
            cp.last_ts
                .as_ref()
                .map_or_else(|| "-".to_string(), |ts| ts.as_str().to_string()),
            cp.materialized.len().to_string(),
            cp.failed_attachments.len().to_string(),
            if cp.done { "✓".to_string() } else { String::new() },
        ]);
    }

    println!("{table}");
    if failed_total > 0 {
        println!(
            "{} {failed_total} attachment(s) pending reconciliation",
            "⚠".yellow().bold()
        );
    }

    Ok(())
}

/// Show data directory paths.
fn cmd_paths() -> anyhow::Result<()> {
    let config = infrastructure::load_config().context("loading configuration")?;

    println!("{}", "📂 Archiver Paths".bold());
    println!();
    println!("  config      {}", config.config_file_path().display());
    println!("  checkpoints {}", config.checkpoint_file_path().display());
    println!("  messages    {}", config.messages_dir().display());
    println!("  users       {}", config.users_dir().display());
    println!("  files       {}", config.files_dir().display());
    println!("  staging     {}", config.staging_dir().display());
    println!();
    println!(
        "Default data dir: {}",
        AppConfig::default_data_dir().display()
    );

    Ok(())
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
