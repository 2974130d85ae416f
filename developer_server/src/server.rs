// Developer service bootstrap and per-connection loop.

use crate::handlers::{self, HandlerCtx, HandlerError, Outcome, Session};
use common::codec::{self, CodecError};
use common::config;
use common::db::{DatabaseClient, DbError};
use serde_json::{Value, json};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{error, info, warn};

const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(20);
// Consecutive idle reads tolerated before the worker gives up on the client.
const IDLE_RETRY_LIMIT: u32 = 15;

#[derive(Debug, Clone)]
pub struct DeveloperConfig {
    pub db_ip: String,
    pub db_port: u16,
    pub storage_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl DeveloperConfig {
    pub fn from_env() -> Self {
        Self {
            db_ip: config::db_ip(),
            db_port: config::db_port(),
            storage_dir: config::storage_dir(),
            temp_dir: config::temp_dir(),
        }
    }
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
}

/// Env-configured entry point for the binary.
pub async fn run_with_env() -> io::Result<()> {
    init_runtime();

    let config = DeveloperConfig::from_env();
    std::fs::create_dir_all(&config.storage_dir)?;
    std::fs::create_dir_all(&config.temp_dir)?;

    let address = format!("0.0.0.0:{}", config::developer_server_port());
    let listener = TcpListener::bind(&address).await.inspect_err(|e| {
        error!(%address, error = %e, "failed to bind");
    })?;

    let shutdown = Arc::new(Notify::new());
    tokio::spawn(admin_shell(shutdown.clone()));

    run(listener, config, shutdown).await
}

/// Accept loop; exits when `shutdown` fires.
pub async fn run(
    listener: TcpListener,
    config: DeveloperConfig,
    shutdown: Arc<Notify>,
) -> io::Result<()> {
    let address = listener.local_addr()?;
    info!(%address, "developer server listening");

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("developer server stopping");
                break;
            }
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                info!(%addr, "client connected");
                tokio::spawn(handle_client(stream, addr, config.clone()));
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

async fn handle_client(stream: TcpStream, addr: SocketAddr, config: DeveloperConfig) {
    let (mut reader, mut writer) = stream.into_split();

    let mut db = match DatabaseClient::connect(&config.db_ip, config.db_port).await {
        Ok(db) => db,
        Err(err) => {
            error!(%addr, error = %err, "db gateway unavailable");
            return;
        }
    };

    let mut session = Session::default();
    let mut idle_strikes = 0u32;

    loop {
        let (frame, file) = match codec::recv_file(&mut reader, &config.temp_dir, Some(IDLE_READ_TIMEOUT)).await
        {
            Ok(Some(received)) => {
                idle_strikes = 0;
                received
            }
            Ok(None) => {
                idle_strikes += 1;
                if idle_strikes >= IDLE_RETRY_LIMIT {
                    info!(%addr, "idle client dropped");
                    break;
                }
                continue;
            }
            Err(CodecError::ConnectionClosed) => {
                info!(%addr, "client disconnected");
                break;
            }
            Err(err) => {
                warn!(%addr, error = %err, "read failed");
                break;
            }
        };

        let outcome = route(&mut db, &mut writer, &config, &frame, file.as_deref(), &mut session).await;

        // Received files are scratch input; whatever the handler did not
        // consume is gone after the request.
        if let Some(path) = file {
            let _ = tokio::fs::remove_file(path).await;
        }

        match outcome {
            Ok(Outcome::Continue) => {}
            Ok(Outcome::Disconnect) => break,
            Err(HandlerError::Codec(CodecError::ConnectionClosed)) => break,
            Err(HandlerError::Codec(err)) => {
                warn!(%addr, error = %err, "write failed");
                break;
            }
            Err(err) => {
                let op = frame.get("op").and_then(Value::as_str).unwrap_or("unknown");
                let message = match &err {
                    HandlerError::Db(DbError::Server(text)) => text.clone(),
                    other => format!("Internal server error: {other}"),
                };
                error!(%addr, op, error = %err, "handler failed");
                let reply = json!({"status": "error", "op": op, "error": message});
                if codec::send_json(&mut writer, reply).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(user_id) = session.user_id.take() {
        if let Err(err) = db.update_user_status(user_id, "offline").await {
            warn!(%addr, user_id, error = %err, "offline update failed");
        }
    }
}

async fn route(
    db: &mut DatabaseClient,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    config: &DeveloperConfig,
    frame: &Value,
    file: Option<&std::path::Path>,
    session: &mut Session,
) -> Result<Outcome, HandlerError> {
    let Some(op) = frame.get("op").and_then(Value::as_str) else {
        handlers::reply(
            writer,
            json!({"status": "error", "op": "unknown", "error": "Missing 'op' field"}),
        )
        .await?;
        return Ok(Outcome::Continue);
    };

    let Some(spec) = handlers::op_spec(op) else {
        handlers::reply(
            writer,
            json!({"status": "error", "op": op, "error": "Unknown op"}),
        )
        .await?;
        return Ok(Outcome::Continue);
    };

    if spec.auth_required && session.user_id.is_none() {
        handlers::reply(
            writer,
            json!({"status": "error", "op": op, "error": "Login required"}),
        )
        .await?;
        return Ok(Outcome::Continue);
    }

    let mut ctx = HandlerCtx {
        db,
        writer,
        storage_dir: &config.storage_dir,
        temp_dir: &config.temp_dir,
    };
    handlers::dispatch(op, &mut ctx, frame, file, session).await
}
