// Game download: bundle the client subset of the latest version and stream
// it back as a file-carrying frame.

use super::{HandlerCtx, HandlerError, Outcome, reply_error, str_field};
use crate::storage;
use common::codec;
use serde_json::{Value, json};
use tracing::info;

pub async fn download_game(
    ctx: &mut HandlerCtx<'_>,
    frame: &Value,
) -> Result<Outcome, HandlerError> {
    let Some(game_name) = str_field(frame, "game_name") else {
        reply_error(ctx.writer, "download_game", "Missing game_name").await?;
        return Ok(Outcome::Continue);
    };

    let Some(game) = ctx.db.game_by_name(game_name).await? else {
        reply_error(ctx.writer, "download_game", "Game not found").await?;
        return Ok(Outcome::Continue);
    };

    let version_dir = storage::version_dir(
        &ctx.config.storage_dir,
        game.owner_id,
        &game.name,
        &game.latest_version,
    );
    if !version_dir.is_dir() {
        reply_error(ctx.writer, "download_game", "Game files missing").await?;
        return Ok(Outcome::Continue);
    }

    let temp_root = ctx.config.temp_dir.clone();
    let bundled =
        tokio::task::spawn_blocking(move || storage::build_client_bundle(&version_dir, &temp_root))
            .await
            .map_err(|e| HandlerError::Internal(format!("bundle task: {e}")))?;
    let zip_path = bundled.map_err(|e| HandlerError::Internal(format!("bundle failed: {e}")))?;

    let header = json!({
        "status": "ok",
        "op": "download_game",
        "game_name": game.name,
        "version": game.latest_version,
    });
    // Hold the writer lock for the whole streamed write; the registry
    // notifier queues behind it, so frames never interleave mid-file.
    let sent = {
        let mut writer = ctx.writer.lock().await;
        codec::send_file(&mut *writer, &zip_path, header).await
    };
    let _ = tokio::fs::remove_file(&zip_path).await;
    sent?;

    info!(game = %game.name, version = %game.latest_version, "game download served");
    Ok(Outcome::Continue)
}
