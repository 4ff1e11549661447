//! `ferry` binary: config bootstrap plus a dry-run event driver.
//!
//! Wire adapters for the two platforms live outside this repo; the binary
//! drives the bridge with the in-memory platform doubles, reading normalized
//! events as JSON lines on stdin and printing outbound traffic on exit.
//! `check` validates configuration without starting anything, `tickets`
//! prints the open-ticket summary from the state store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use ferry_core::BridgeConfig;
use ferry_engine::platform_contract::{ChannelEvent, DmEvent};
use ferry_engine::platform_testkit::{InMemoryChannelClient, InMemoryDmClient};
use ferry_runtime::{BridgeDispatcher, BridgeRuntime};
use ferry_state::BridgeStateStore;

#[derive(Parser)]
#[command(name = "ferry", about = "Ticket bridge and notification router")]
struct Cli {
    /// TOML config file; omit to use defaults plus FERRY_* overrides.
    #[arg(long, env = "FERRY_CONFIG")]
    config: Option<PathBuf>,
    /// Staff chat id, required when no config file is given.
    #[arg(long, env = "FERRY_STAFF_CHAT")]
    staff_chat: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive the bridge with JSON-line events from stdin.
    Run,
    /// Validate the configuration and exit.
    Check,
    /// Print the open tickets recorded in the state store.
    Tickets,
}

#[derive(Deserialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
enum InboundEvent {
    Channel {
        #[serde(flatten)]
        event: ChannelEvent,
    },
    Dm {
        #[serde(flatten)]
        event: DmEvent,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("FERRY_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    match &cli.config {
        Some(path) => BridgeConfig::load(path),
        None => {
            let staff_chat = cli
                .staff_chat
                .clone()
                .context("either --config or --staff-chat is required")?;
            BridgeConfig::from_env(staff_chat)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Check => {
            println!(
                "config ok: staff_chat={}, state_dir={}, digest_window={}",
                config.staff_chat,
                config.state_dir.display(),
                config.digest_window
            );
            Ok(())
        }
        Command::Tickets => {
            let store = BridgeStateStore::load(&config.state_dir)?;
            let tickets = store.open_tickets();
            if tickets.is_empty() {
                println!("no open tickets");
            }
            for ticket in tickets {
                println!(
                    "{}  {}  {}  channel={}",
                    ticket.ticket_id,
                    ticket.kind.as_str(),
                    ticket.customer_display,
                    ticket.channel_id
                );
            }
            Ok(())
        }
        Command::Run => run_dry(config).await,
    }
}

async fn run_dry(config: BridgeConfig) -> Result<()> {
    let channel = Arc::new(InMemoryChannelClient::new());
    let dm = Arc::new(InMemoryDmClient::new(true));
    let runtime = Arc::new(BridgeRuntime::new(config, channel.clone(), dm.clone())?);
    let dispatcher = BridgeDispatcher::new(runtime);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut submitted = 0usize;
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<InboundEvent>(trimmed) {
            Ok(InboundEvent::Channel { event }) => {
                dispatcher.submit_channel_event(event);
                submitted += 1;
            }
            Ok(InboundEvent::Dm { event }) => {
                dispatcher.submit_dm_event(event);
                submitted += 1;
            }
            Err(error) => {
                tracing::warn!(%error, "skipping malformed event line");
            }
        }
    }
    dispatcher.drain().await;

    println!("processed {submitted} event(s)");
    for post in channel.all_posts() {
        if !post.deleted {
            println!("channel {} <- {}", post.channel_id, post.post.body);
        }
    }
    for message in dm.all_sent() {
        if !message.deleted {
            println!("dm {} <- {}", message.chat, message.text);
        }
    }
    Ok(())
}
