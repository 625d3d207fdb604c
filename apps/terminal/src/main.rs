mod commands;
mod config;
mod render;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    ClientEvent, ClientHandle, RealtimeClient, Selection, StaticSession, SyncError,
};
use shared::protocol::CreateGroupRequest;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    commands::{Command, HELP},
    config::{load_settings, Settings},
};

#[derive(Parser, Debug)]
struct Args {
    /// Config file; defaults to ./chat.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    api_prefix: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    roster_refresh_secs: Option<u64>,
    #[arg(long)]
    optimistic_group_echo: bool,
    #[arg(long)]
    log_filter: Option<String>,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.server_url {
            settings.server_url = v;
        }
        if let Some(v) = self.api_prefix {
            settings.api_prefix = v;
        }
        if let Some(v) = self.username {
            settings.username = Some(v);
        }
        if let Some(v) = self.token {
            settings.access_token = Some(v);
        }
        if let Some(v) = self.roster_refresh_secs {
            settings.roster_refresh_secs = Some(v);
        }
        if self.optimistic_group_echo {
            settings.optimistic_group_echo = true;
        }
        if let Some(v) = self.log_filter {
            settings.log_filter = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    args.apply(&mut settings);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let username = settings
        .username
        .clone()
        .context("username is required (--username, CHAT_USERNAME or chat.toml)")?;
    let token = settings
        .access_token
        .clone()
        .context("access token is required (--token, CHAT_ACCESS_TOKEN or chat.toml)")?;

    let client = RealtimeClient::new(
        settings.client_options()?,
        Arc::new(StaticSession::new(token)),
    )?;
    let mut events = client.subscribe_events();
    client.connect(&username).await?;
    info!(%username, server = %settings.server_url, "terminal: session started");
    println!("logged in as {username}; /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let command = match commands::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(err) => {
                        println!("! {err}");
                        continue;
                    }
                };
                if command == Command::Quit {
                    break;
                }
                if let Err(err) = run_command(&client, command).await {
                    println!("! {err:#}");
                }
            }
            event = events.recv() => match event {
                Ok(ClientEvent::SessionInvalid) => {
                    if let Some(line) = render::event_line(&ClientEvent::SessionInvalid) {
                        println!("{line}");
                    }
                    break;
                }
                Ok(event) => {
                    if let Some(line) = render::event_line(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "terminal: event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect().await?;
    info!("terminal: session closed");
    Ok(())
}

async fn run_command(client: &Arc<RealtimeClient>, command: Command) -> Result<()> {
    match command {
        Command::Public => client.select(Selection::Public).await?,
        Command::Dm(peer) => client.select(Selection::Peer(peer)).await?,
        Command::Group(group_id) => client.select(Selection::Group(group_id)).await?,
        Command::Groups => {
            let groups = client.view().await.map(|view| view.groups).unwrap_or_default();
            for line in render::group_lines(&groups) {
                println!("{line}");
            }
        }
        Command::Members(group_id) => {
            let members = client.group_members(group_id).await?;
            for line in render::member_lines(&members) {
                println!("{line}");
            }
        }
        Command::Create { name, members } => {
            let group = client
                .create_group(CreateGroupRequest::new(name, members))
                .await?;
            println!("* created group {} ({})", group.id, group.name);
        }
        Command::Add { group_id, members } => client.add_members(group_id, members).await?,
        Command::Leave(group_id) => client.leave_group(group_id).await?,
        Command::Refresh => client.refresh_groups().await?,
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
        Command::Say(draft) => {
            if let Err(err) = client.send_message(&draft).await {
                if matches!(err.downcast_ref::<SyncError>(), Some(SyncError::NotConnected)) {
                    println!("! not connected; message not sent: {draft}");
                    return Ok(());
                }
                return Err(err);
            }
        }
    }
    Ok(())
}
