// Join-request workflow for public rooms. Requests are addressed to the
// host; the host-scoped lookup is the authorization check.

use super::{HandlerCtx, HandlerError, Outcome, int_field, reply, reply_error, str_field};
use serde_json::{Value, json};
use tracing::info;

pub async fn request(ctx: &mut HandlerCtx<'_>, frame: &Value) -> Result<Outcome, HandlerError> {
    let user_id = ctx.user_id();

    let Some(room_id) = int_field(frame, "room_id") else {
        reply_error(ctx.writer, "request", "Missing room_id").await?;
        return Ok(Outcome::Continue);
    };

    if ctx.db.room_of_user(user_id).await?.is_some() {
        reply_error(ctx.writer, "request", "Already in room").await?;
        return Ok(Outcome::Continue);
    }
    // Private rooms are invisible to requests.
    let Some(room) = ctx.db.room_by_id(room_id, Some("public")).await? else {
        reply_error(ctx.writer, "request", "Room not found").await?;
        return Ok(Outcome::Continue);
    };

    let from_name = ctx
        .db
        .find_user_by_id(user_id)
        .await?
        .map(|u| u.name)
        .unwrap_or_default();

    let request_id = ctx
        .db
        .add_join_request(room_id, user_id, room.host_user_id)
        .await?;
    info!(user_id, room_id, request_id, "join request sent");

    ctx.registry
        .notify(
            room.host_user_id,
            json!({
                "op": "receive_request",
                "status": "ok",
                "request_id": request_id,
                "roomId": room_id,
                "from_id": user_id,
                "fromName": from_name,
                "message": format!("{from_name} wants to join room {room_id}"),
            }),
        )
        .await;

    reply(
        ctx.writer,
        json!({
            "status": "ok",
            "op": "request",
            "request_id": request_id,
            "message": "Request sent",
        }),
    )
    .await?;
    Ok(Outcome::Continue)
}

pub async fn respond_request(
    ctx: &mut HandlerCtx<'_>,
    frame: &Value,
) -> Result<Outcome, HandlerError> {
    let user_id = ctx.user_id();

    let Some(request_id) = int_field(frame, "request_id") else {
        reply_error(ctx.writer, "respond_request", "Missing request_id").await?;
        return Ok(Outcome::Continue);
    };
    let response = str_field(frame, "response").unwrap_or_default();
    if response != "accept" && response != "decline" {
        reply_error(ctx.writer, "respond_request", "Response must be accept or decline").await?;
        return Ok(Outcome::Continue);
    }

    let Some(request) = ctx.db.join_request_for_host(request_id, user_id).await? else {
        reply_error(ctx.writer, "respond_request", "Request not found").await?;
        return Ok(Outcome::Continue);
    };
    let requester_id = request.from_id;

    if response == "decline" {
        ctx.db.remove_join_request(request_id).await?;
        info!(user_id, request_id, "join request declined");

        ctx.registry
            .notify(
                requester_id,
                json!({
                    "op": "request_declined",
                    "status": "ok",
                    "roomId": request.room_id,
                    "message": "Your join request was declined",
                }),
            )
            .await;

        reply(
            ctx.writer,
            json!({"status": "ok", "op": "respond_request", "message": "Request declined"}),
        )
        .await?;
        return Ok(Outcome::Continue);
    }

    if ctx.db.room_by_id(request.room_id, None).await?.is_none() {
        ctx.db.remove_join_request(request_id).await?;
        reply_error(ctx.writer, "respond_request", "Room not found").await?;
        return Ok(Outcome::Continue);
    }
    if ctx.db.room_of_user(requester_id).await?.is_some() {
        reply_error(ctx.writer, "respond_request", "User already in a room").await?;
        return Ok(Outcome::Continue);
    }

    // Acceptance clears every join request the requester had pending.
    ctx.db.remove_join_requests_from(requester_id).await?;
    ctx.db.add_user_to_room(request.room_id, requester_id).await?;
    info!(user_id, request_id, room_id = request.room_id, "join request accepted");

    ctx.registry
        .notify(
            requester_id,
            json!({
                "op": "request_accepted",
                "status": "ok",
                "roomId": request.room_id,
                "message": "Your join request was accepted",
            }),
        )
        .await;

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "respond_request", "message": "Request accepted"}),
    )
    .await?;
    Ok(Outcome::Continue)
}

pub async fn list_request(ctx: &mut HandlerCtx<'_>) -> Result<Outcome, HandlerError> {
    let user_id = ctx.user_id();

    let requests = ctx.db.list_join_requests_for(user_id).await?;
    let requests: Vec<Value> = requests
        .iter()
        .map(|r| {
            json!({
                "request_id": r.request_id,
                "roomId": r.room_id,
                "fromId": r.from_id,
                "fromName": r.from_name,
            })
        })
        .collect();

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "list_request", "requests": requests}),
    )
    .await?;
    Ok(Outcome::Continue)
}
