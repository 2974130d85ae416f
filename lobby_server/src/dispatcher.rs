// Per-connection worker: receive, route, fence errors.

use crate::handlers::{self, HandlerCtx, HandlerError, Outcome, Session};
use crate::registry::SharedWriter;
use crate::server::LobbyState;
use common::codec::{self, CodecError};
use common::db::{DatabaseClient, DbError};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(20);
// Consecutive idle reads tolerated before the worker gives up on the client.
const IDLE_RETRY_LIMIT: u32 = 15;

pub struct OpSpec {
    pub op: &'static str,
    pub auth_required: bool,
}

// The single authoritative table of ops and their auth gate; tests
// enumerate it to keep routing and gating in sync.
pub const OPS: &[OpSpec] = &[
    OpSpec { op: "register", auth_required: false },
    OpSpec { op: "login", auth_required: false },
    OpSpec { op: "back", auth_required: false },
    OpSpec { op: "logout", auth_required: true },
    OpSpec { op: "list_rooms", auth_required: true },
    OpSpec { op: "list_online_users", auth_required: true },
    OpSpec { op: "list_games", auth_required: true },
    OpSpec { op: "show_game_data", auth_required: true },
    OpSpec { op: "show_comment", auth_required: true },
    OpSpec { op: "add_comment", auth_required: true },
    OpSpec { op: "create_room", auth_required: true },
    OpSpec { op: "leave_room", auth_required: true },
    OpSpec { op: "invite_user", auth_required: true },
    OpSpec { op: "respond_invite", auth_required: true },
    OpSpec { op: "list_invite", auth_required: true },
    OpSpec { op: "request", auth_required: true },
    OpSpec { op: "respond_request", auth_required: true },
    OpSpec { op: "list_request", auth_required: true },
    OpSpec { op: "download_game", auth_required: true },
    OpSpec { op: "start", auth_required: true },
];

pub fn op_spec(op: &str) -> Option<&'static OpSpec> {
    OPS.iter().find(|spec| spec.op == op)
}

/// Owns one client connection from accept to close.
pub async fn run_connection(stream: TcpStream, addr: SocketAddr, state: Arc<LobbyState>) {
    let (mut reader, writer) = stream.into_split();
    let writer: SharedWriter = Arc::new(Mutex::new(writer));

    let mut db = match DatabaseClient::connect(&state.config.db_ip, state.config.db_port).await {
        Ok(db) => db,
        Err(err) => {
            error!(%addr, error = %err, "db gateway unavailable");
            return;
        }
    };

    let mut session = Session::default();
    let mut idle_strikes = 0u32;

    loop {
        let frame = match codec::recv_file(
            &mut reader,
            &state.config.temp_dir,
            Some(IDLE_READ_TIMEOUT),
        )
        .await
        {
            Ok(Some((frame, file))) => {
                idle_strikes = 0;
                // Lobby requests never legitimately carry a file body.
                if let Some(path) = file {
                    let _ = tokio::fs::remove_file(path).await;
                }
                frame
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

        match route(&mut db, &writer, &state, &frame, &mut session).await {
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
                if handlers::reply(&writer, reply).await.is_err() {
                    break;
                }
            }
        }
    }

    // Transport death counts as logout: cascade, then wait until no
    // notification is in flight before the writer goes away.
    if let Some(user_id) = session.user_id.take() {
        if let Err(err) = handlers::auth::cascade_disconnect(&mut db, user_id).await {
            warn!(%addr, user_id, error = %err, "disconnect cascade failed");
        }
        state.registry.unbind(user_id).await;
        info!(%addr, user_id, "session closed");
    }
}

async fn route(
    db: &mut DatabaseClient,
    writer: &SharedWriter,
    state: &Arc<LobbyState>,
    frame: &Value,
    session: &mut Session,
) -> Result<Outcome, HandlerError> {
    let Some(op) = frame.get("op").and_then(Value::as_str) else {
        // No user id yet on unauthenticated connections, so this goes on the
        // direct socket rather than through the registry.
        handlers::reply(
            writer,
            json!({"status": "error", "op": "unknown", "error": "Missing 'op' field"}),
        )
        .await?;
        return Ok(Outcome::Continue);
    };

    let Some(spec) = op_spec(op) else {
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
        registry: &state.registry,
        config: &state.config,
        session,
    };
    handlers::dispatch(op, &mut ctx, frame).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_session_establishing_ops_skip_the_auth_gate() {
        for spec in OPS {
            let expect_open = matches!(spec.op, "register" | "login" | "back");
            assert_eq!(
                !spec.auth_required, expect_open,
                "unexpected auth gate for {}",
                spec.op
            );
        }
    }

    #[test]
    fn op_table_has_no_duplicates() {
        for (i, spec) in OPS.iter().enumerate() {
            assert!(
                OPS.iter().skip(i + 1).all(|other| other.op != spec.op),
                "duplicate op {}",
                spec.op
            );
        }
    }
}
