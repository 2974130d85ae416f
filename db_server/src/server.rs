// Framed TCP front end for the SQLite store, plus the admin stdin shell.

use crate::store::SqlStore;
use common::codec::{self, CodecError};
use common::config;
use serde_json::{Value, json};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

// Clients hold their gateway connection open between requests, so the
// per-read timeout is generous.
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(30);

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

    let db_path = std::path::PathBuf::from(config::db_path());
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqlStore::open(&db_path)
        .await
        .map_err(|e| io::Error::other(format!("failed to open {}: {e}", db_path.display())))?;
    store
        .init_schema()
        .await
        .map_err(|e| io::Error::other(format!("schema init failed: {e}")))?;

    let address = format!("{}:{}", config::db_ip(), config::db_port());
    let listener = TcpListener::bind(&address).await.inspect_err(|e| {
        error!(%address, error = %e, "failed to bind");
    })?;

    let shutdown = Arc::new(Notify::new());
    tokio::spawn(admin_shell(store.clone(), shutdown.clone()));

    run(listener, store, shutdown).await
}

/// Accept loop; exits when `shutdown` fires.
pub async fn run(
    listener: TcpListener,
    store: SqlStore,
    shutdown: Arc<Notify>,
) -> io::Result<()> {
    let address = listener.local_addr()?;
    info!(%address, "db server listening");

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("db server stopping");
                break;
            }
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                info!(%addr, "client connected");
                tokio::spawn(handle_client(stream, addr, store.clone()));
            }
        }
    }
    Ok(())
}

async fn handle_client(stream: TcpStream, addr: SocketAddr, store: SqlStore) {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let request = match codec::recv_json(&mut reader, Some(CLIENT_READ_TIMEOUT)).await {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(CodecError::ConnectionClosed) => {
                info!(%addr, "client disconnected");
                break;
            }
            Err(err) => {
                warn!(%addr, error = %err, "read failed");
                break;
            }
        };

        let reply = match request.get("sql").and_then(Value::as_str) {
            Some(sql) => {
                let params = request
                    .get("params")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                debug!(%addr, sql, "executing");
                match store.execute(sql, &params).await {
                    Ok(rows) => json!({"status": "ok", "data": rows}),
                    Err(err) => json!({"status": "error", "error": err.to_string()}),
                }
            }
            None => json!({"status": "error", "error": "missing sql"}),
        };

        if let Err(err) = codec::send_json(&mut writer, reply).await {
            warn!(%addr, error = %err, "reply failed");
            break;
        }
    }
}

/// Ad-hoc SQL on stdin; `exit` stops the service, empty lines do nothing.
pub async fn admin_shell(store: SqlStore, shutdown: Arc<Notify>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            // stdin closed: the service keeps serving, shutdown comes via signal.
            Ok(None) | Err(_) => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") {
            shutdown.notify_waiters();
            break;
        }
        match store.execute(line, &[]).await {
            Ok(rows) => info!(rows = %json!(rows), "admin sql ok"),
            Err(err) => warn!(error = %err, "admin sql failed"),
        }
    }
}
