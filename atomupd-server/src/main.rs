use anyhow::Context;
use clap::Parser;
use config::ServerConfig;
use state::ServerState;
use std::{net::Ipv4Addr, path::PathBuf, process::ExitCode};
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub mod admin;
pub mod api;
pub mod config;
pub mod extract;
pub mod state;

#[derive(Parser, Debug)]
#[clap(author, version, about = "OS update server", long_about = None)]
struct CommandLine {
    /// Configuration file
    #[clap(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Show debug messages
    #[clap(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let command_line = CommandLine::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if command_line.debug { "debug" } else { "info" })
        }))
        .init();

    match run(command_line).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command_line: CommandLine) -> anyhow::Result<()> {
    let config = ServerConfig::load(&command_line.config)?;

    let images = config.images.clone();
    let state = tokio::task::spawn_blocking(move || ServerState::new(images))
        .await?
        .context("Failed to create the image pool")?;
    state.dump();

    let (requests, receiver) = mpsc::channel(8);
    admin::listen_for_signals(requests.clone())?;
    tokio::spawn(admin::run(state.clone(), receiver));

    if let Some(port) = config.server.admin_port {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .with_context(|| format!("Failed to bind admin port {port}"))?;
        info!(address = ?listener.local_addr()?, "Admin listening");

        tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, api::admin_router(requests)).await {
                error!(error = %error, "Admin listener stopped");
            }
        });
    }

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;
    info!(address = ?listener.local_addr()?, "Listening");

    axum::serve(listener, api::router(state)).await?;
    Ok(())
}
