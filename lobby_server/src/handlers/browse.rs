// Lobby browsing: rooms, users, games, comments.

use super::{HandlerCtx, HandlerError, Outcome, int_field, reply, reply_error, str_field};
use serde_json::{Value, json};

pub async fn list_rooms(ctx: &mut HandlerCtx<'_>) -> Result<Outcome, HandlerError> {
    let rooms = ctx.db.list_public_rooms().await?;
    let rooms: Vec<Value> = rooms
        .iter()
        .map(|r| {
            json!({
                "roomId": r.room_id,
                "name": r.name,
                "hostId": r.host_id,
                "status": r.status,
                "gameId": r.game_id,
                "gameName": r.game_name,
            })
        })
        .collect();

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "list_rooms", "rooms": rooms}),
    )
    .await?;
    Ok(Outcome::Continue)
}

pub async fn list_online_users(ctx: &mut HandlerCtx<'_>) -> Result<Outcome, HandlerError> {
    let users = ctx.db.list_online_players().await?;
    let users: Vec<Value> = users
        .iter()
        .map(|(id, name)| json!({"id": id, "name": name}))
        .collect();

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "list_online_users", "users": users}),
    )
    .await?;
    Ok(Outcome::Continue)
}

pub async fn list_games(ctx: &mut HandlerCtx<'_>) -> Result<Outcome, HandlerError> {
    let games = ctx.db.list_games().await?;
    let games: Vec<Value> = games
        .iter()
        .map(|(id, name)| json!({"game_id": id, "name": name}))
        .collect();

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "list_games", "games": games}),
    )
    .await?;
    Ok(Outcome::Continue)
}

/// Clients also use this as their version-existence check before creating
/// or joining rooms, so a missing game must be an error reply.
pub async fn show_game_data(
    ctx: &mut HandlerCtx<'_>,
    frame: &Value,
) -> Result<Outcome, HandlerError> {
    let Some(game_id) = int_field(frame, "game_id") else {
        reply_error(ctx.writer, "show_game_data", "Missing game_id").await?;
        return Ok(Outcome::Continue);
    };

    let Some(game) = ctx.db.game_by_id(game_id).await? else {
        reply_error(ctx.writer, "show_game_data", "Game not found").await?;
        return Ok(Outcome::Continue);
    };

    reply(
        ctx.writer,
        json!({
            "status": "ok",
            "op": "show_game_data",
            "data": {
                "id": game.id,
                "name": game.name,
                "description": game.description,
                "owner_id": game.owner_id,
                "latest_version": game.latest_version,
            },
        }),
    )
    .await?;
    Ok(Outcome::Continue)
}

pub async fn show_comment(
    ctx: &mut HandlerCtx<'_>,
    frame: &Value,
) -> Result<Outcome, HandlerError> {
    let Some(game_id) = int_field(frame, "game_id") else {
        reply_error(ctx.writer, "show_comment", "Missing game_id").await?;
        return Ok(Outcome::Continue);
    };
    if ctx.db.game_by_id(game_id).await?.is_none() {
        reply_error(ctx.writer, "show_comment", "Game not found").await?;
        return Ok(Outcome::Continue);
    }

    let comments = ctx.db.comments_for(game_id).await?;
    let comments: Vec<Value> = comments
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "user": c.user,
                "content": c.content,
                "score": c.score,
                "timestamp": c.timestamp,
            })
        })
        .collect();
    let average = ctx.db.average_score(game_id).await?;

    reply(
        ctx.writer,
        json!({
            "status": "ok",
            "op": "show_comment",
            "comments": comments,
            "average_score": average,
        }),
    )
    .await?;
    Ok(Outcome::Continue)
}

pub async fn add_comment(
    ctx: &mut HandlerCtx<'_>,
    frame: &Value,
) -> Result<Outcome, HandlerError> {
    let user_id = ctx.user_id();

    let Some(game_id) = int_field(frame, "game_id") else {
        reply_error(ctx.writer, "add_comment", "Missing game_id").await?;
        return Ok(Outcome::Continue);
    };
    let Some(content) = str_field(frame, "content") else {
        reply_error(ctx.writer, "add_comment", "Missing content").await?;
        return Ok(Outcome::Continue);
    };
    // A non-integer score (5.5, "good") fails the same way as one out of
    // range.
    let score = frame.get("score").and_then(Value::as_i64);
    let Some(score) = score.filter(|s| (1..=5).contains(s)) else {
        reply_error(
            ctx.writer,
            "add_comment",
            "Score must be an integer between 1 and 5",
        )
        .await?;
        return Ok(Outcome::Continue);
    };

    if ctx.db.game_by_id(game_id).await?.is_none() {
        reply_error(ctx.writer, "add_comment", "Game not found").await?;
        return Ok(Outcome::Continue);
    }

    ctx.db.insert_comment(game_id, user_id, content, score).await?;

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "add_comment", "message": "Comment added"}),
    )
    .await?;
    Ok(Outcome::Continue)
}
