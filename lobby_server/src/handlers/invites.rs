// Invitation workflow. The invite row is durable in the DB before the
// invitee's notification is enqueued.

use super::{HandlerCtx, HandlerError, Outcome, int_field, reply, reply_error, str_field};
use serde_json::{Value, json};
use tracing::info;

pub async fn invite_user(
    ctx: &mut HandlerCtx<'_>,
    frame: &Value,
) -> Result<Outcome, HandlerError> {
    let user_id = ctx.user_id();

    let Some(invitee_id) = int_field(frame, "invitee_id") else {
        reply_error(ctx.writer, "invite_user", "Missing invitee_id").await?;
        return Ok(Outcome::Continue);
    };

    let Some(room_id) = ctx.db.room_of_user(user_id).await? else {
        reply_error(ctx.writer, "invite_user", "Not in a room").await?;
        return Ok(Outcome::Continue);
    };
    if invitee_id == user_id {
        reply_error(ctx.writer, "invite_user", "Cannot invite yourself").await?;
        return Ok(Outcome::Continue);
    }

    let Some(invitee) = ctx.db.find_user_by_id(invitee_id).await? else {
        reply_error(ctx.writer, "invite_user", "User not found").await?;
        return Ok(Outcome::Continue);
    };
    if invitee.status != "online" {
        reply_error(ctx.writer, "invite_user", "User is not online").await?;
        return Ok(Outcome::Continue);
    }

    let from_name = ctx
        .db
        .find_user_by_id(user_id)
        .await?
        .map(|u| u.name)
        .unwrap_or_default();

    let invite_id = ctx.db.add_invite(room_id, user_id, invitee_id).await?;
    info!(user_id, invitee_id, room_id, invite_id, "invite sent");

    ctx.registry
        .notify(
            invitee_id,
            json!({
                "op": "receive_invite",
                "status": "ok",
                "roomId": room_id,
                "from_id": user_id,
                "invite_id": invite_id,
                "fromName": from_name,
                "message": format!("{from_name} invited you to room {room_id}"),
            }),
        )
        .await;

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "invite_user", "invite_id": invite_id}),
    )
    .await?;
    Ok(Outcome::Continue)
}

pub async fn respond_invite(
    ctx: &mut HandlerCtx<'_>,
    frame: &Value,
) -> Result<Outcome, HandlerError> {
    let user_id = ctx.user_id();

    let Some(invite_id) = int_field(frame, "invite_id") else {
        reply_error(ctx.writer, "respond_invite", "Missing invite_id").await?;
        return Ok(Outcome::Continue);
    };
    let response = str_field(frame, "response").unwrap_or_default();
    if response != "accept" && response != "decline" {
        reply_error(ctx.writer, "respond_invite", "Response must be accept or decline").await?;
        return Ok(Outcome::Continue);
    }

    // Only the invitee may respond.
    let invite = match ctx.db.invite_by_id(invite_id).await? {
        Some(invite) if invite.to_id == user_id => invite,
        _ => {
            reply_error(ctx.writer, "respond_invite", "Invite not found").await?;
            return Ok(Outcome::Continue);
        }
    };

    if response == "decline" {
        ctx.db.remove_invite(invite_id).await?;
        info!(user_id, invite_id, "invite declined");

        ctx.registry
            .notify(
                invite.from_id,
                json!({
                    "op": "invite_declined",
                    "status": "ok",
                    "roomId": invite.room_id,
                    "from_id": user_id,
                    "message": "Your invite was declined",
                }),
            )
            .await;

        reply(
            ctx.writer,
            json!({"status": "ok", "op": "respond_invite", "message": "Invite declined"}),
        )
        .await?;
        return Ok(Outcome::Continue);
    }

    if ctx.db.room_by_id(invite.room_id, None).await?.is_none() {
        // The room evaporated since the invite went out.
        ctx.db.remove_invite(invite_id).await?;
        reply_error(ctx.writer, "respond_invite", "Room not found").await?;
        return Ok(Outcome::Continue);
    }
    if ctx.db.room_of_user(user_id).await?.is_some() {
        reply_error(ctx.writer, "respond_invite", "Already in room").await?;
        return Ok(Outcome::Continue);
    }

    // Accepting one invite implicitly declines every other invite involving
    // the accepter, in either direction.
    ctx.db.remove_invites_to(user_id).await?;
    ctx.db.remove_invites_from(user_id).await?;
    ctx.db.add_user_to_room(invite.room_id, user_id).await?;
    info!(user_id, invite_id, room_id = invite.room_id, "invite accepted");

    ctx.registry
        .notify(
            invite.from_id,
            json!({
                "op": "invite_accepted",
                "status": "ok",
                "roomId": invite.room_id,
                "from_id": user_id,
                "message": "Your invite was accepted",
            }),
        )
        .await;

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "respond_invite", "room_id": invite.room_id}),
    )
    .await?;
    Ok(Outcome::Continue)
}

pub async fn list_invite(ctx: &mut HandlerCtx<'_>) -> Result<Outcome, HandlerError> {
    let user_id = ctx.user_id();

    let invites = ctx.db.list_invites_for(user_id).await?;
    let invites: Vec<Value> = invites
        .iter()
        .map(|i| {
            json!({
                "invite_id": i.invite_id,
                "roomId": i.room_id,
                "fromId": i.from_id,
                "fromName": i.from_name,
                "roomName": i.room_name,
                "gameId": i.game_id,
                "gameName": i.game_name,
            })
        })
        .collect();

    reply(
        ctx.writer,
        json!({"status": "ok", "op": "list_invite", "invites": invites}),
    )
    .await?;
    Ok(Outcome::Continue)
}
