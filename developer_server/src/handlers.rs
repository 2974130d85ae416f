// Request handlers for the developer service.
//
// Handlers write their own replies; business failures are replies, not
// errors. Only DB/transport faults propagate to the connection loop.

use crate::package::{self, GameConfig};
use common::codec::{self, CodecError};
use common::db::{DatabaseClient, DbError};
use serde_json::{Value, json};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::net::tcp::OwnedWriteHalf;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct Session {
    pub user_id: Option<i64>,
    pub username: Option<String>,
}

pub enum Outcome {
    Continue,
    Disconnect,
}

#[derive(Debug)]
pub enum HandlerError {
    Db(DbError),
    Codec(CodecError),
    Internal(String),
}

impl From<DbError> for HandlerError {
    fn from(err: DbError) -> Self {
        HandlerError::Db(err)
    }
}

impl From<CodecError> for HandlerError {
    fn from(err: CodecError) -> Self {
        HandlerError::Codec(err)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Db(err) => write!(f, "{err}"),
            HandlerError::Codec(err) => write!(f, "{err}"),
            HandlerError::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

pub struct OpSpec {
    pub op: &'static str,
    pub auth_required: bool,
}

pub const OPS: &[OpSpec] = &[
    OpSpec { op: "register", auth_required: false },
    OpSpec { op: "login", auth_required: false },
    OpSpec { op: "logout", auth_required: false },
    OpSpec { op: "upload_game", auth_required: true },
    OpSpec { op: "update_game", auth_required: true },
    OpSpec { op: "remove_game", auth_required: true },
    OpSpec { op: "list_games", auth_required: true },
    OpSpec { op: "list_versions", auth_required: true },
];

pub fn op_spec(op: &str) -> Option<&'static OpSpec> {
    OPS.iter().find(|spec| spec.op == op)
}

pub struct HandlerCtx<'a> {
    pub db: &'a mut DatabaseClient,
    pub writer: &'a mut OwnedWriteHalf,
    pub storage_dir: &'a Path,
    pub temp_dir: &'a Path,
}

pub async fn reply(writer: &mut OwnedWriteHalf, frame: Value) -> Result<(), CodecError> {
    codec::send_json(writer, frame).await
}

async fn reply_error(
    writer: &mut OwnedWriteHalf,
    op: &str,
    message: &str,
) -> Result<(), CodecError> {
    reply(writer, json!({"status": "error", "op": op, "error": message})).await
}

pub async fn dispatch(
    op: &str,
    ctx: &mut HandlerCtx<'_>,
    frame: &Value,
    file: Option<&Path>,
    session: &mut Session,
) -> Result<Outcome, HandlerError> {
    match op {
        "register" => register(ctx, frame).await,
        "login" => login(ctx, frame, session).await,
        "logout" => logout(ctx, session).await,
        "upload_game" => upload_game(ctx, session, file).await,
        "update_game" => update_game(ctx, session, file).await,
        "remove_game" => remove_game(ctx, frame, session).await,
        "list_games" => list_games(ctx, session).await,
        "list_versions" => list_versions(ctx, frame).await,
        _ => Err(HandlerError::Internal(format!("unroutable op {op}"))),
    }
}

fn str_field<'a>(frame: &'a Value, key: &str) -> Option<&'a str> {
    frame.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

async fn register(ctx: &mut HandlerCtx<'_>, frame: &Value) -> Result<Outcome, HandlerError> {
    let (Some(username), Some(password_hash)) =
        (str_field(frame, "username"), str_field(frame, "passwordHash"))
    else {
        reply_error(ctx.writer, "register", "Missing username or passwordHash").await?;
        return Ok(Outcome::Continue);
    };

    if ctx.db.find_user_by_name(username).await?.is_some() {
        reply_error(ctx.writer, "register", "User already exists").await?;
        return Ok(Outcome::Continue);
    }

    let user_id = ctx.db.insert_user(username, password_hash, "developer").await?;
    tokio::fs::create_dir_all(ctx.storage_dir.join(user_id.to_string())).await
        .map_err(|e| HandlerError::Internal(format!("storage dir: {e}")))?;
    info!(user_id, username, "developer registered");

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "register", "id": user_id}),
    )
    .await?;
    Ok(Outcome::Continue)
}

async fn login(
    ctx: &mut HandlerCtx<'_>,
    frame: &Value,
    session: &mut Session,
) -> Result<Outcome, HandlerError> {
    let (Some(username), Some(password_hash)) =
        (str_field(frame, "username"), str_field(frame, "passwordHash"))
    else {
        reply_error(ctx.writer, "login", "Missing username or passwordHash").await?;
        return Ok(Outcome::Continue);
    };

    let Some(user) = ctx
        .db
        .find_user_by_name_and_password(username, password_hash)
        .await?
    else {
        reply_error(ctx.writer, "login", "Invalid credentials").await?;
        return Ok(Outcome::Continue);
    };
    if user.role != "developer" {
        reply_error(ctx.writer, "login", "Not a developer account").await?;
        return Ok(Outcome::Continue);
    }

    ctx.db.update_user_status(user.id, "online").await?;
    session.user_id = Some(user.id);
    session.username = Some(user.name.clone());
    info!(user_id = user.id, username, "developer logged in");

    reply(
        ctx.writer,
        json!({
            "status": "ok",
            "op": "login",
            "id": user.id,
            "message": format!("Welcome {username}"),
        }),
    )
    .await?;
    Ok(Outcome::Continue)
}

async fn logout(ctx: &mut HandlerCtx<'_>, session: &mut Session) -> Result<Outcome, HandlerError> {
    if let Some(user_id) = session.user_id.take() {
        ctx.db.update_user_status(user_id, "offline").await?;
        info!(user_id, "developer logged out");
    }
    session.username = None;

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "logout", "message": "Logged out"}),
    )
    .await?;
    Ok(Outcome::Continue)
}

// Removes the extraction dir when an upload bails out halfway.
struct ExtractGuard {
    root: Option<PathBuf>,
}

impl Drop for ExtractGuard {
    fn drop(&mut self) {
        if let Some(root) = self.root.take() {
            let _ = std::fs::remove_dir_all(root);
        }
    }
}

// Extract + validate an uploaded archive; Ok carries the guard keeping the
// extraction dir alive until the files are installed.
async fn stage_package(
    ctx: &mut HandlerCtx<'_>,
    op: &'static str,
    file: Option<&Path>,
) -> Result<Option<(ExtractGuard, PathBuf, GameConfig)>, HandlerError> {
    let Some(zip_path) = file else {
        reply_error(ctx.writer, op, "No file").await?;
        return Ok(None);
    };

    let zip_path = zip_path.to_path_buf();
    let temp_root = ctx.temp_dir.to_path_buf();
    let extracted =
        tokio::task::spawn_blocking(move || package::extract_archive(&zip_path, &temp_root))
            .await
            .map_err(|e| HandlerError::Internal(format!("extract task: {e}")))?;

    let (extract_root, content_root) = match extracted {
        Ok(pair) => pair,
        Err(err) => {
            reply_error(ctx.writer, op, &err.to_string()).await?;
            return Ok(None);
        }
    };
    let guard = ExtractGuard {
        root: Some(extract_root),
    };

    if let Err(err) = package::check_layout(&content_root) {
        reply_error(ctx.writer, op, &err.to_string()).await?;
        return Ok(None);
    }
    let config = match package::read_config(&content_root) {
        Ok(config) => config,
        Err(err) => {
            reply_error(ctx.writer, op, &err.to_string()).await?;
            return Ok(None);
        }
    };

    Ok(Some((guard, content_root, config)))
}

async fn install_package(
    content_root: PathBuf,
    dest: PathBuf,
) -> Result<(), HandlerError> {
    tokio::task::spawn_blocking(move || package::install(&content_root, &dest))
        .await
        .map_err(|e| HandlerError::Internal(format!("install task: {e}")))?
        .map_err(|e| HandlerError::Internal(format!("install failed: {e}")))
}

async fn upload_game(
    ctx: &mut HandlerCtx<'_>,
    session: &Session,
    file: Option<&Path>,
) -> Result<Outcome, HandlerError> {
    let user_id = session.user_id.unwrap_or_default();

    let Some((_guard, content_root, config)) = stage_package(ctx, "upload_game", file).await?
    else {
        return Ok(Outcome::Continue);
    };

    if ctx.db.game_by_name(&config.name).await?.is_some() {
        reply_error(ctx.writer, "upload_game", "Game already exists").await?;
        return Ok(Outcome::Continue);
    }

    let game_id = ctx
        .db
        .insert_game(&config.name, &config.description, user_id, &config.version)
        .await?;
    ctx.db
        .insert_game_version(game_id, &config.version, &config.command)
        .await?;

    let dest = ctx
        .storage_dir
        .join(user_id.to_string())
        .join(&config.name)
        .join(&config.version);
    install_package(content_root, dest).await?;
    info!(user_id, game = %config.name, version = %config.version, "game uploaded");

    reply(
        ctx.writer,
        json!({
            "status": "ok",
            "op": "upload_game",
            "game_id": game_id,
            "message": format!("Uploaded {} v{}", config.name, config.version),
        }),
    )
    .await?;
    Ok(Outcome::Continue)
}

async fn update_game(
    ctx: &mut HandlerCtx<'_>,
    session: &Session,
    file: Option<&Path>,
) -> Result<Outcome, HandlerError> {
    let user_id = session.user_id.unwrap_or_default();

    let Some((_guard, content_root, config)) = stage_package(ctx, "update_game", file).await?
    else {
        return Ok(Outcome::Continue);
    };

    let Some(game) = ctx.db.game_by_name(&config.name).await? else {
        reply_error(ctx.writer, "update_game", "Game not found").await?;
        return Ok(Outcome::Continue);
    };
    if game.owner_id != user_id {
        reply_error(ctx.writer, "update_game", "Not the owner").await?;
        return Ok(Outcome::Continue);
    }
    if ctx.db.version_of(game.id, &config.version).await?.is_some() {
        reply_error(ctx.writer, "update_game", "Version exists").await?;
        return Ok(Outcome::Continue);
    }

    ctx.db
        .insert_game_version(game.id, &config.version, &config.command)
        .await?;
    ctx.db.set_latest_version(game.id, &config.version).await?;

    let dest = ctx
        .storage_dir
        .join(user_id.to_string())
        .join(&config.name)
        .join(&config.version);
    install_package(content_root, dest).await?;
    info!(user_id, game = %config.name, version = %config.version, "game updated");

    reply(
        ctx.writer,
        json!({
            "status": "ok",
            "op": "update_game",
            "message": format!("Updated {} v{}", config.name, config.version),
        }),
    )
    .await?;
    Ok(Outcome::Continue)
}

async fn remove_game(
    ctx: &mut HandlerCtx<'_>,
    frame: &Value,
    session: &Session,
) -> Result<Outcome, HandlerError> {
    let user_id = session.user_id.unwrap_or_default();

    let Some(game_name) = str_field(frame, "game_name") else {
        reply_error(ctx.writer, "remove_game", "Missing game_name").await?;
        return Ok(Outcome::Continue);
    };
    // An explicit null version means "remove the whole game".
    let version = str_field(frame, "version");

    let Some(game) = ctx.db.game_by_name(game_name).await? else {
        reply_error(ctx.writer, "remove_game", "Game not found").await?;
        return Ok(Outcome::Continue);
    };
    if game.owner_id != user_id {
        reply_error(ctx.writer, "remove_game", "Not the owner").await?;
        return Ok(Outcome::Continue);
    }

    let game_root = ctx
        .storage_dir
        .join(user_id.to_string())
        .join(game_name);

    let message = match version {
        Some(version) => {
            let Some(target) = ctx.db.version_of(game.id, version).await? else {
                reply_error(ctx.writer, "remove_game", "Version not found").await?;
                return Ok(Outcome::Continue);
            };

            ctx.db.delete_version(target.id).await?;
            let _ = tokio::fs::remove_dir_all(game_root.join(version)).await;

            let remaining = ctx.db.versions_newest_first(game.id).await?;
            if remaining.is_empty() {
                ctx.db.delete_game(game.id).await?;
                let _ = tokio::fs::remove_dir_all(&game_root).await;
                format!("Removed version {version}. No versions left, game deleted.")
            } else if version == game.latest_version {
                let promoted = &remaining[0].version;
                ctx.db.set_latest_version(game.id, promoted).await?;
                format!("Removed {version}. Promoted {promoted} to latest.")
            } else {
                format!("Removed version {version}.")
            }
        }
        None => {
            ctx.db.delete_versions_of(game.id).await?;
            ctx.db.delete_game(game.id).await?;
            let _ = tokio::fs::remove_dir_all(&game_root).await;
            format!("Game '{game_name}' and all versions deleted.")
        }
    };
    info!(user_id, game = game_name, "game removed");

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "remove_game", "message": message}),
    )
    .await?;
    Ok(Outcome::Continue)
}

async fn list_games(ctx: &mut HandlerCtx<'_>, session: &Session) -> Result<Outcome, HandlerError> {
    let user_id = session.user_id.unwrap_or_default();

    let games = ctx.db.games_by_owner(user_id).await?;
    let data: Vec<Value> = games
        .iter()
        .map(|g| {
            json!({
                "id": g.id,
                "name": g.name,
                "description": g.description,
                "ownerId": g.owner_id,
                "latestVersion": g.latest_version,
            })
        })
        .collect();

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "list_games", "data": data}),
    )
    .await?;
    Ok(Outcome::Continue)
}

async fn list_versions(ctx: &mut HandlerCtx<'_>, frame: &Value) -> Result<Outcome, HandlerError> {
    let Some(game_name) = str_field(frame, "game_name") else {
        reply_error(ctx.writer, "list_versions", "Missing game_name").await?;
        return Ok(Outcome::Continue);
    };

    let Some(game) = ctx.db.game_by_name(game_name).await? else {
        reply_error(ctx.writer, "list_versions", "Game not found").await?;
        return Ok(Outcome::Continue);
    };

    let versions = ctx.db.version_strings(game.id).await?;
    if versions.is_empty() {
        warn!(game = game_name, "game row exists with no versions");
    }

    reply(
        ctx.writer,
        json!({
            "status": "ok",
            "op": "list_versions",
            "versions": versions,
            "message": format!("Found {} versions", versions.len()),
        }),
    )
    .await?;
    Ok(Outcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_table_gates_everything_but_account_ops() {
        for spec in OPS {
            let expect_open = matches!(spec.op, "register" | "login" | "logout");
            assert_eq!(
                !spec.auth_required, expect_open,
                "unexpected auth gate for {}",
                spec.op
            );
        }
    }

    #[test]
    fn unknown_op_has_no_spec() {
        assert!(op_spec("download_game").is_none());
        assert!(op_spec("upload_game").is_some());
    }
}
