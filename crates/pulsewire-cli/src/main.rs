//! Terminal client for a pulsewire stream.
//!
//! Prints connectivity, workflow progress and notifications as they change.
//! Lines typed on stdin are sent as JSON; lines starting with `:` are
//! commands (`:connect`, `:disconnect`, `:read <id>`, `:clear`, `:status`).
//!
//!   pulsewire --url ws://localhost:8000/ws
//!   PULSEWIRE_WS_URL=wss://dash.example.com/ws pulsewire --until-settled

mod render;

use clap::Parser;
use pulsewire_client::{Client, ClientConfig};
use pulsewire_core::{Session, gate};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pulsewire", version, about = "Follow a pulsewire real-time stream")]
struct Args {
    /// WebSocket endpoint.
    #[arg(long, env = "PULSEWIRE_WS_URL")]
    url: Option<String>,

    /// TOML file with client settings.
    #[arg(long, short, env = "PULSEWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Base reconnect delay in milliseconds.
    #[arg(long)]
    reconnect_interval_ms: Option<u64>,

    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    #[arg(long)]
    heartbeat_interval_ms: Option<u64>,

    /// Do not connect until `:connect` is typed.
    #[arg(long)]
    no_connect: bool,

    /// Stop reconnecting once every tracked workflow has finished.
    #[arg(long)]
    until_settled: bool,
}

impl Args {
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(ms) = self.reconnect_interval_ms {
            config.reconnect_interval_ms = ms;
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            config.max_reconnect_attempts = attempts;
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            config.heartbeat_interval_ms = ms;
        }
        if self.no_connect {
            config.auto_connect = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsewire=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.client_config()?;
    tracing::info!("Following {}", config.url);

    let mut session = Session::new(config.session_config());
    if args.until_settled {
        session = session.with_reconnect_gate(gate::until_workflows_settled());
    }
    let client = Client::spawn_session(session, config.auto_connect);

    let mut updates = client.subscribe();
    let mut previous = client.snapshot();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = updates.borrow_and_update().clone();
                for line in render::changes(&previous, &current) {
                    println!("{line}");
                }
                previous = current;
            }

            line = lines.next_line() => match line? {
                Some(line) => handle_input(&client, line.trim()),
                None => break,
            }
        }
    }

    client.dispose().await?;
    Ok(())
}

fn handle_input(client: &Client, line: &str) {
    if line.is_empty() {
        return;
    }
    match line.split_once(' ').unwrap_or((line, "")) {
        (":connect", _) => client.connect(),
        (":disconnect", _) => client.disconnect(),
        (":read", id) if !id.trim().is_empty() => client.mark_notification_read(id.trim()),
        (":clear", _) => client.clear_all_notifications(),
        (":status", _) => println!("{}", render::status(&client.snapshot())),
        (command, _) if command.starts_with(':') => {
            tracing::warn!("Unknown command: {}", command);
        }
        _ => match serde_json::from_str(line) {
            Ok(payload) => client.send(payload),
            Err(e) => tracing::warn!("Not JSON, nothing sent: {}", e),
        },
    }
}
