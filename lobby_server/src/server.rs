// Lobby service bootstrap: runtime init, accept loop, admin shell.

use crate::dispatcher;
use crate::registry::SessionRegistry;
use common::config;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct LobbyConfig {
    pub db_ip: String,
    pub db_port: u16,
    /// Address handed to game clients for reaching spawned game servers.
    pub server_ip: String,
    pub storage_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl LobbyConfig {
    pub fn from_env() -> Self {
        Self {
            db_ip: config::db_ip(),
            db_port: config::db_port(),
            server_ip: config::server_ip(),
            storage_dir: config::storage_dir(),
            temp_dir: config::temp_dir(),
        }
    }
}

pub struct LobbyState {
    pub config: LobbyConfig,
    pub registry: SessionRegistry,
}

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

/// Env-configured entry point for the binary.
pub async fn run_with_env() -> io::Result<()> {
    init_runtime();

    let config = LobbyConfig::from_env();
    std::fs::create_dir_all(&config.storage_dir)?;
    std::fs::create_dir_all(&config.temp_dir)?;

    let address = format!("{}:{}", config::lobby_ip(), config::lobby_port());
    let listener = TcpListener::bind(&address).await.inspect_err(|e| {
        error!(%address, error = %e, "failed to bind");
    })?;

    let shutdown = Arc::new(Notify::new());
    tokio::spawn(admin_shell(shutdown.clone()));

    run(listener, config, shutdown).await
}

/// Accept loop; one worker task per client. Exits when `shutdown` fires;
/// live workers run on until their next read times out.
pub async fn run(
    listener: TcpListener,
    config: LobbyConfig,
    shutdown: Arc<Notify>,
) -> io::Result<()> {
    let address = listener.local_addr()?;
    let state = Arc::new(LobbyState {
        config,
        registry: SessionRegistry::new(),
    });
    info!(%address, "lobby server listening");

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("lobby server stopping");
                break;
            }
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                info!(%addr, "client connected");
                tokio::spawn(dispatcher::run_connection(stream, addr, state.clone()));
            }
        }
    }
    Ok(())
}

/// `exit` on stdin stops the service.
pub async fn admin_shell(shutdown: Arc<Notify>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().eq_ignore_ascii_case("exit") {
            shutdown.notify_waiters();
            break;
        }
    }
}
