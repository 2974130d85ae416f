// Game-server subprocess lifecycle.
//
// The contract with a game server: one JSON line on stdin
// (`{ip_address, users, userIDs}`), then the first non-empty stdout line
// ends with the listening port. After that the process logs freely until it
// exits; both pipes must be drained or the child can deadlock.

use common::db::DatabaseClient;
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, error, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("game version has no launch command")]
    EmptyCommand,
    #[error("failed to spawn game server: {0}")]
    Spawn(std::io::Error),
    #[error("game server handshake failed: {0}")]
    Handshake(String),
}

/// A successfully handshaken match; hand it to [`spawn_monitor`].
#[derive(Debug)]
pub struct MatchLaunch {
    pub port: u16,
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: ChildStderr,
}

/// Spawns the game server from its version directory and completes the
/// stdin/stdout handshake. The child is killed if the handshake dies.
pub async fn launch(
    server_dir: &Path,
    command: &str,
    lobby_ip: &str,
    user_ids: &[i64],
) -> Result<MatchLaunch, MatchError> {
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or(MatchError::EmptyCommand)?;

    let mut child = Command::new(program)
        .args(parts)
        .current_dir(server_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(MatchError::Spawn)?;

    match handshake(&mut child, lobby_ip, user_ids).await {
        Ok((port, stdout)) => {
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| MatchError::Handshake("stderr pipe unavailable".to_string()))?;
            info!(port, ?server_dir, "game server up");
            Ok(MatchLaunch {
                port,
                child,
                stdout,
                stderr,
            })
        }
        Err(err) => {
            let _ = child.kill().await;
            Err(err)
        }
    }
}

async fn handshake(
    child: &mut Child,
    lobby_ip: &str,
    user_ids: &[i64],
) -> Result<(u16, BufReader<ChildStdout>), MatchError> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| MatchError::Handshake("stdin pipe unavailable".to_string()))?;
    let payload = json!({
        "ip_address": lobby_ip,
        "users": user_ids.len(),
        "userIDs": user_ids,
    });
    stdin
        .write_all(format!("{payload}\n").as_bytes())
        .await
        .map_err(|e| MatchError::Handshake(format!("stdin write failed: {e}")))?;
    // Closing stdin tells the child its input is complete.
    drop(stdin);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MatchError::Handshake("stdout pipe unavailable".to_string()))?;
    let mut reader = BufReader::new(stdout);

    let port = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_port(&mut reader))
        .await
        .map_err(|_| MatchError::Handshake("timed out waiting for port".to_string()))??;
    Ok((port, reader))
}

// First non-empty line; its trailing whitespace-separated token is the port.
async fn read_port(reader: &mut BufReader<ChildStdout>) -> Result<u16, MatchError> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| MatchError::Handshake(format!("stdout read failed: {e}")))?;
        if read == 0 {
            return Err(MatchError::Handshake(
                "game server exited before publishing a port".to_string(),
            ));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return trimmed
            .split_whitespace()
            .next_back()
            .and_then(|token| token.parse().ok())
            .ok_or_else(|| MatchError::Handshake(format!("no port in line {trimmed:?}")));
    }
}

/// Drains both pipes, reaps the child, and flips the room back to idle.
pub fn spawn_monitor(launch: MatchLaunch, room_id: i64, db_ip: String, db_port: u16) {
    tokio::spawn(async move {
        let MatchLaunch {
            mut child,
            stdout,
            stderr,
            ..
        } = launch;

        let stdout_drain = tokio::spawn(drain(stdout, room_id, "stdout"));
        let stderr_drain = tokio::spawn(drain(BufReader::new(stderr), room_id, "stderr"));

        let status = child.wait().await;
        let _ = stdout_drain.await;
        let _ = stderr_drain.await;
        info!(room_id, ?status, "game server exited");

        match DatabaseClient::connect(&db_ip, db_port).await {
            Ok(mut db) => {
                if let Err(err) = db.set_room_status(room_id, "idle").await {
                    error!(room_id, error = %err, "failed to mark room idle");
                }
            }
            Err(err) => error!(room_id, error = %err, "db unavailable after match"),
        }
    });
}

async fn drain<R>(mut reader: R, room_id: i64, stream: &'static str)
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => debug!(room_id, stream, line = line.trim_end(), "game server output"),
            Err(err) => {
                warn!(room_id, stream, error = %err, "pipe read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Launch commands are whitespace-split like the stored version Command,
    // so test servers are tiny scripts inside the fake version dir.
    fn write_script(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).expect("write script");
    }

    #[tokio::test]
    async fn launch_parses_the_trailing_port_token() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "server.sh", "echo listening on port 23456\n");

        let launch = launch(dir.path(), "sh server.sh", "127.0.0.1", &[1, 2])
            .await
            .expect("launch should succeed");
        assert_eq!(launch.port, 23456);
    }

    #[tokio::test]
    async fn launch_skips_blank_lines_before_the_port() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "server.sh", "echo\necho 9100\n");

        let launch = launch(dir.path(), "sh server.sh", "127.0.0.1", &[1, 2])
            .await
            .expect("launch should succeed");
        assert_eq!(launch.port, 9100);
    }

    #[tokio::test]
    async fn early_exit_without_a_port_is_a_handshake_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = launch(dir.path(), "true", "127.0.0.1", &[1, 2])
            .await
            .expect_err("launch should fail");
        assert!(matches!(err, MatchError::Handshake(_)));
    }

    #[tokio::test]
    async fn unparsable_port_line_is_a_handshake_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "server.sh", "echo not a port\n");

        let err = launch(dir.path(), "sh server.sh", "127.0.0.1", &[1])
            .await
            .expect_err("launch should fail");
        assert!(matches!(err, MatchError::Handshake(_)));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = launch(dir.path(), "definitely-not-a-real-binary", "127.0.0.1", &[1])
            .await
            .expect_err("launch should fail");
        assert!(matches!(err, MatchError::Spawn(_)));
    }
}
