// Account lifecycle: register, login, back, logout, and the disconnect
// cascade shared with the dispatcher's transport-death path.

use super::{HandlerCtx, HandlerError, Outcome, int_field, reply, reply_error, str_field};
use common::db::{DatabaseClient, DbError};
use serde_json::{Value, json};
use tracing::info;

pub async fn register(ctx: &mut HandlerCtx<'_>, frame: &Value) -> Result<Outcome, HandlerError> {
    let (Some(name), Some(password_hash)) =
        (str_field(frame, "name"), str_field(frame, "passwordHash"))
    else {
        reply_error(ctx.writer, "register", "Missing name or passwordHash").await?;
        return Ok(Outcome::Continue);
    };

    // Existence is keyed on the name alone so the same name can never be
    // registered twice under different hashes.
    if ctx.db.find_user_by_name(name).await?.is_some() {
        reply_error(ctx.writer, "register", "User already exists").await?;
        return Ok(Outcome::Continue);
    }

    let user_id = ctx.db.insert_user(name, password_hash, "player").await?;
    ctx.db.update_user_status(user_id, "online").await?;
    ctx.registry.bind(user_id, ctx.writer.clone()).await;
    ctx.session.user_id = Some(user_id);
    info!(user_id, name, "player registered");

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "register", "id": user_id}),
    )
    .await?;
    Ok(Outcome::Continue)
}

pub async fn login(ctx: &mut HandlerCtx<'_>, frame: &Value) -> Result<Outcome, HandlerError> {
    let (Some(name), Some(password_hash)) =
        (str_field(frame, "name"), str_field(frame, "passwordHash"))
    else {
        reply_error(ctx.writer, "login", "Missing name or passwordHash").await?;
        return Ok(Outcome::Continue);
    };

    let Some(user) = ctx
        .db
        .find_user_by_name_and_password(name, password_hash)
        .await?
    else {
        reply_error(ctx.writer, "login", "Invalid credentials").await?;
        return Ok(Outcome::Continue);
    };
    if user.role != "player" {
        reply_error(ctx.writer, "login", "Not a player account").await?;
        return Ok(Outcome::Continue);
    }

    ctx.db.update_user_status(user.id, "online").await?;
    ctx.registry.bind(user.id, ctx.writer.clone()).await;
    ctx.session.user_id = Some(user.id);
    info!(user_id = user.id, name, "player logged in");

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "login", "id": user.id}),
    )
    .await?;
    Ok(Outcome::Continue)
}

/// Re-binds an existing user id to this connection after the client comes
/// back from an external game process.
pub async fn back(ctx: &mut HandlerCtx<'_>, frame: &Value) -> Result<Outcome, HandlerError> {
    let Some(user_id) = int_field(frame, "userId") else {
        reply_error(ctx.writer, "back", "Missing userId").await?;
        return Ok(Outcome::Continue);
    };

    let Some(user) = ctx.db.find_user_by_id(user_id).await? else {
        reply_error(ctx.writer, "back", "Unknown user").await?;
        return Ok(Outcome::Continue);
    };

    ctx.db.update_user_status(user.id, "online").await?;
    ctx.registry.bind(user.id, ctx.writer.clone()).await;
    ctx.session.user_id = Some(user.id);
    info!(user_id = user.id, "player returned from game");

    reply(ctx.writer, json!({"status": "ok", "op": "back", "id": user.id})).await?;
    Ok(Outcome::Continue)
}

pub async fn logout(ctx: &mut HandlerCtx<'_>) -> Result<Outcome, HandlerError> {
    let user_id = ctx.user_id();

    cascade_disconnect(ctx.db, user_id).await?;
    ctx.registry.unbind(user_id).await;
    ctx.session.user_id = None;
    info!(user_id, "player logged out");

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "logout", "message": "Logged out"}),
    )
    .await?;
    Ok(Outcome::Disconnect)
}

/// The user-lifecycle cascade. Runs on the worker's own DB connection, so
/// no other worker can observe a partially cascaded user.
pub async fn cascade_disconnect(db: &mut DatabaseClient, user_id: i64) -> Result<(), DbError> {
    // Leave whatever room the user is in, deleting it when it empties.
    for room_id in db.leave_room(user_id).await? {
        if db.room_members(room_id).await?.is_empty() {
            db.delete_room(room_id).await?;
        }
    }
    // Hosted rooms go away with their host.
    db.delete_rooms_by_host(user_id).await?;

    db.remove_invites_to(user_id).await?;
    db.remove_invites_from(user_id).await?;
    db.remove_join_requests_from(user_id).await?;
    db.remove_join_requests_to(user_id).await?;

    db.update_user_status(user_id, "offline").await
}
