#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI that drains an IMAP folder as a queue of message identifiers

use std::io::Write;
use std::time::Duration;

use clap::{Parser, Subcommand};
use imap_queue::{
    Identifier, ImapConfig, ImapMailClient, MailClient, MailQueue, QueueConfig,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imap-queue")]
#[command(about = "Drain an IMAP folder as a FIFO queue of message identifiers")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print identifiers as they arrive, waiting in IDLE when idle
    Drain {
        /// Ignore messages that exist before the queue starts
        #[arg(long)]
        skip_initial: bool,

        /// Resume from this watermark instead of the full backlog
        #[arg(long, conflicts_with = "skip_initial")]
        watermark: Option<Identifier>,

        /// Stop after this many identifiers
        #[arg(long)]
        limit: Option<usize>,

        /// Reconnect attempts before giving up
        #[arg(long)]
        max_retry: Option<u32>,

        /// Seconds to wait in IDLE before re-checking the folder
        #[arg(long)]
        idle_timeout: Option<u64>,
    },

    /// Fetch once without waiting and print what is pending
    Pending {
        /// Only show identifiers at or above this watermark
        #[arg(long)]
        watermark: Option<Identifier>,
    },

    /// Print the server's next identifier
    Watermark,
}

#[derive(Serialize)]
struct Dequeued {
    id: Identifier,
    watermark: Option<Identifier>,
    dequeued_at: String,
}

#[derive(Serialize)]
struct Pending<'a> {
    ids: &'a [Identifier],
    watermark: Option<Identifier>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let imap = ImapConfig::from_env()?;
    let queue_config = QueueConfig::from_env()?;
    let mut client = ImapMailClient::connect(imap).await?;

    match &args.command {
        Command::Drain {
            skip_initial,
            watermark,
            limit,
            max_retry,
            idle_timeout,
        } => {
            let mut config = queue_config;
            config.skip_initial |= *skip_initial;
            resume_from(&mut config, *watermark);
            if max_retry.is_some() {
                config.max_retry = *max_retry;
            }
            if let Some(secs) = idle_timeout {
                config.idle_timeout = Duration::from_secs(*secs);
            }
            cmd_drain(&mut client, &args, config, *limit).await?;
        }
        Command::Pending { watermark } => {
            let mut config = queue_config;
            resume_from(&mut config, *watermark);
            cmd_pending(&mut client, &args, config).await?;
        }
        Command::Watermark => {
            let next = client.next_identifier_watermark().await?;
            println!("{next}");
        }
    }

    client.logout().await.ok();
    Ok(())
}

/// Apply `--watermark`. Skipping the backlog would overwrite it, so an
/// explicit watermark turns off `QUEUE_SKIP_INITIAL`.
fn resume_from(config: &mut QueueConfig, watermark: Option<Identifier>) {
    let Some(watermark) = watermark else {
        return;
    };
    if config.skip_initial {
        tracing::warn!(watermark, "--watermark given, ignoring QUEUE_SKIP_INITIAL");
        config.skip_initial = false;
    }
    config.initial_watermark = Some(watermark);
}

async fn cmd_drain(
    client: &mut ImapMailClient,
    args: &Args,
    config: QueueConfig,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let mut queue = MailQueue::new(client, config).await?;
    let mut stdout = std::io::stdout().lock();
    let mut count = 0;

    while limit.is_none_or(|max| count < max) {
        let id = queue.dequeue_message().await?;
        count += 1;

        if args.json {
            let record = Dequeued {
                id,
                watermark: queue.watermark(),
                dequeued_at: chrono::Utc::now().to_rfc3339(),
            };
            writeln!(stdout, "{}", serde_json::to_string(&record)?)?;
        } else {
            writeln!(stdout, "{id}")?;
        }
        stdout.flush()?;
    }

    Ok(())
}

async fn cmd_pending(
    client: &mut ImapMailClient,
    args: &Args,
    config: QueueConfig,
) -> anyhow::Result<()> {
    let mut queue = MailQueue::new(client, config).await?;
    queue.update_messages().await?;

    let ids = queue.peek_messages();
    if args.json {
        let pending = Pending {
            ids,
            watermark: queue.watermark(),
        };
        println!("{}", serde_json::to_string_pretty(&pending)?);
    } else {
        if ids.is_empty() {
            println!("No pending messages.");
        }
        for id in ids {
            println!("{id}");
        }
        if let Some(watermark) = queue.watermark() {
            println!("\nwatermark: {watermark}");
        }
    }

    Ok(())
}
