// Room lifecycle and match start.

use super::{HandlerCtx, HandlerError, Outcome, int_field, reply, reply_error, str_field};
use crate::{match_control, storage};
use serde_json::{Value, json};
use tracing::{info, warn};

pub async fn create_room(
    ctx: &mut HandlerCtx<'_>,
    frame: &Value,
) -> Result<Outcome, HandlerError> {
    let user_id = ctx.user_id();

    let Some(name) = str_field(frame, "name") else {
        reply_error(ctx.writer, "create_room", "Missing name").await?;
        return Ok(Outcome::Continue);
    };
    let visibility = str_field(frame, "visibility").unwrap_or_default();
    if visibility != "public" && visibility != "private" {
        reply_error(ctx.writer, "create_room", "Visibility must be public or private").await?;
        return Ok(Outcome::Continue);
    }
    let Some(game_id) = int_field(frame, "gameId") else {
        reply_error(ctx.writer, "create_room", "Missing gameId").await?;
        return Ok(Outcome::Continue);
    };

    if ctx.db.room_of_user(user_id).await?.is_some() {
        reply_error(ctx.writer, "create_room", "Already in room").await?;
        return Ok(Outcome::Continue);
    }
    if ctx.db.game_by_id(game_id).await?.is_none() {
        reply_error(ctx.writer, "create_room", "Game not found").await?;
        return Ok(Outcome::Continue);
    }

    let room_id = ctx.db.create_room(name, user_id, visibility, game_id).await?;
    info!(user_id, room_id, name, "room created");

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "create_room", "room_id": room_id}),
    )
    .await?;
    Ok(Outcome::Continue)
}

pub async fn leave_room(ctx: &mut HandlerCtx<'_>) -> Result<Outcome, HandlerError> {
    let user_id = ctx.user_id();

    let left = ctx.db.leave_room(user_id).await?;
    if left.is_empty() {
        reply_error(ctx.writer, "leave_room", "Not in a room").await?;
        return Ok(Outcome::Continue);
    }

    for room_id in left {
        if ctx.db.room_members(room_id).await?.is_empty() {
            ctx.db.delete_room(room_id).await?;
            info!(room_id, "room emptied and deleted");
        }
    }

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "leave_room", "message": "Left room"}),
    )
    .await?;
    Ok(Outcome::Continue)
}

/// Match start: resolve the room's game files, spawn the game server, and
/// fan the endpoint out to every member. Any failure leaves the room
/// untouched and is reported only to the initiator.
pub async fn start(ctx: &mut HandlerCtx<'_>) -> Result<Outcome, HandlerError> {
    let user_id = ctx.user_id();

    let Some(room_id) = ctx.db.room_of_user(user_id).await? else {
        reply_error(ctx.writer, "start", "Not in a room").await?;
        return Ok(Outcome::Continue);
    };
    let members = ctx.db.room_members(room_id).await?;
    if members.len() < 2 {
        reply_error(ctx.writer, "start", "Not enough players").await?;
        return Ok(Outcome::Continue);
    }

    let Some(room) = ctx.db.room_by_id(room_id, None).await? else {
        reply_error(ctx.writer, "start", "Room not found").await?;
        return Ok(Outcome::Continue);
    };
    if room.status == "playing" {
        reply_error(ctx.writer, "start", "Match already running").await?;
        return Ok(Outcome::Continue);
    }

    let Some(game) = ctx.db.game_by_id(room.game_id).await? else {
        reply_error(ctx.writer, "start", "Game not found").await?;
        return Ok(Outcome::Continue);
    };
    let Some(version) = ctx.db.version_of(game.id, &game.latest_version).await? else {
        reply_error(ctx.writer, "start", "Game version missing").await?;
        return Ok(Outcome::Continue);
    };

    let server_dir = storage::version_dir(
        &ctx.config.storage_dir,
        game.owner_id,
        &game.name,
        &game.latest_version,
    );
    if !server_dir.is_dir() {
        reply_error(ctx.writer, "start", "Game files missing").await?;
        return Ok(Outcome::Continue);
    }

    let member_ids: Vec<i64> = members.iter().map(|(id, _)| *id).collect();
    let launch = match match_control::launch(
        &server_dir,
        &version.command,
        &ctx.config.server_ip,
        &member_ids,
    )
    .await
    {
        Ok(launch) => launch,
        Err(err) => {
            warn!(room_id, error = %err, "match start failed");
            reply_error(
                ctx.writer,
                "start",
                &format!("Failed to start game server: {err}"),
            )
            .await?;
            return Ok(Outcome::Continue);
        }
    };

    ctx.db.set_room_status(room_id, "playing").await?;
    info!(room_id, port = launch.port, game = %game.name, "match started");

    // The endpoint is fanned out asynchronously to every member, the
    // initiator included.
    for member_id in &member_ids {
        let delivered = ctx
            .registry
            .notify(
                *member_id,
                json!({
                    "op": "start",
                    "status": "ok",
                    "game_server_ip": ctx.config.server_ip,
                    "game_server_port": launch.port,
                    "game_name": game.name,
                    "message": format!("Game {} is starting", game.name),
                }),
            )
            .await;
        if !delivered {
            warn!(room_id, member_id, "member unreachable for start notification");
        }
    }

    match_control::spawn_monitor(
        launch,
        room_id,
        ctx.config.db_ip.clone(),
        ctx.config.db_port,
    );
    Ok(Outcome::Continue)
}
