//! `browser-broker` CLI entry point.
//!
//! Logging-first startup (matches the teacher's `main.rs` convention):
//! `env_logger` is initialized before anything else runs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use browser_broker::coordinator::Coordinator;
use browser_broker::proto::limits::MAX_SESSION_ID;

/// Local broker that lets a non-GUI application drive a browser window.
#[derive(Parser, Debug)]
#[command(name = "browser-broker", version, about)]
struct Cli {
    /// Listener TCP port the browser connects to.
    port: u16,

    /// TCP port application processes connect to; each connection sends
    /// its session id as a newline-terminated line before control traffic
    /// begins. A stand-in for the out-of-scope handshake/accept framework
    /// that normally hands the broker a ready application stream. `0`
    /// (the default) disables it.
    #[arg(long, default_value_t = 0)]
    app_port: u16,

    /// Directory holding per-session sandbox directories. Defaults to a
    /// fresh directory under the OS temp root.
    #[arg(long)]
    sessions_root: Option<PathBuf>,

    /// Raise logging verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let sessions_root = cli
        .sessions_root
        .unwrap_or_else(|| std::env::temp_dir().join("browser-broker"));

    let (coordinator, mut events) = Coordinator::new(sessions_root, cli.port).await?;
    coordinator.sweep_stale_sessions().await?;
    let coordinator = Arc::new(coordinator);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!("window event: {event:?}");
        }
    });

    if cli.app_port != 0 {
        spawn_application_listener(coordinator.clone(), cli.app_port).await?;
    }

    let http_addr: SocketAddr = ([127, 0, 0, 1], cli.port).into();
    let http_listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding HTTP listener on {http_addr}"))?;
    info!("listening for browser connections on {http_addr}");

    let router = browser_broker::listener::router(coordinator.sessions());
    axum::serve(http_listener, router)
        .await
        .context("HTTP listener stopped")?;

    Ok(())
}

async fn spawn_application_listener(coordinator: Arc<Coordinator>, app_port: u16) -> Result<()> {
    let app_addr: SocketAddr = ([127, 0, 0, 1], app_port).into();
    let app_listener = TcpListener::bind(app_addr)
        .await
        .with_context(|| format!("binding application listener on {app_addr}"))?;
    info!("listening for application connections on {app_addr}");

    tokio::spawn(async move {
        loop {
            match app_listener.accept().await {
                Ok((stream, peer)) => {
                    let coordinator = coordinator.clone();
                    tokio::spawn(async move {
                        if let Err(e) = accept_application(&coordinator, stream).await {
                            error!("application connection from {peer} rejected: {e:#}");
                        }
                    });
                }
                Err(e) => error!("application listener accept failed: {e:#}"),
            }
        }
    });
    Ok(())
}

/// Read the session id preamble line, then hand the rest of the stream to
/// the coordinator for admission.
async fn accept_application(coordinator: &Coordinator, mut stream: TcpStream) -> Result<()> {
    let mut id_buf = Vec::with_capacity(MAX_SESSION_ID);
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        if id_buf.len() >= MAX_SESSION_ID {
            anyhow::bail!("session id preamble too long");
        }
        id_buf.push(byte[0]);
    }
    let id = String::from_utf8(id_buf)?;
    coordinator.admit(id, stream).await?;
    Ok(())
}
