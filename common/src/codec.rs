// Length-prefixed JSON framing shared by every service and client.
//
// A frame is a u32 big-endian length prefix followed by that many bytes of
// UTF-8 JSON. A file-carrying frame is a JSON header frame that additionally
// holds `filename` and `filesize`, followed by exactly `filesize` raw bytes
// on the same connection.

use crate::config;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;

// Upper bound on a single JSON frame; file bodies are streamed and not
// subject to this limit.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

const FILE_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

fn map_read_error(err: io::Error) -> CodecError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        CodecError::ConnectionClosed
    } else {
        CodecError::Io(err)
    }
}

// Fill `buf` completely, or report a timeout as Ok(false).
async fn read_exact_bounded<R>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<bool, CodecError>
where
    R: AsyncRead + Unpin,
{
    match timeout {
        Some(limit) => match time::timeout(limit, reader.read_exact(buf)).await {
            Ok(result) => {
                result.map_err(map_read_error)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        },
        None => {
            reader.read_exact(buf).await.map_err(map_read_error)?;
            Ok(true)
        }
    }
}

/// Send one JSON object as a length-prefixed frame.
///
/// The configured opaque `token` is injected into every outbound object;
/// receivers are free to validate or ignore it.
pub async fn send_json<W>(writer: &mut W, mut obj: Value) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    if let Some(map) = obj.as_object_mut() {
        map.insert("token".to_string(), Value::String(config::frame_token()));
    }

    let data = serde_json::to_vec(&obj)?;
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive one length-prefixed JSON frame.
///
/// Returns `Ok(None)` when the read times out or the payload is not valid
/// JSON; `Err(ConnectionClosed)` when the peer closes mid-frame.
pub async fn recv_json<R>(
    reader: &mut R,
    timeout: Option<Duration>,
) -> Result<Option<Value>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    if !read_exact_bounded(reader, &mut prefix, timeout).await? {
        return Ok(None);
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut data = vec![0u8; len];
    if !read_exact_bounded(reader, &mut data, timeout).await? {
        return Ok(None);
    }

    Ok(serde_json::from_slice(&data).ok())
}

/// Send a file as metadata header plus raw body.
///
/// `filename` and `filesize` are added to `header` before it goes out, then
/// the file bytes are streamed on the same connection.
pub async fn send_file<W>(
    writer: &mut W,
    file_path: &Path,
    mut header: Value,
) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let size = tokio::fs::metadata(file_path).await?.len();
    let name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            CodecError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file name is not valid UTF-8",
            ))
        })?;

    if let Some(map) = header.as_object_mut() {
        map.insert("filename".to_string(), Value::String(name.to_string()));
        map.insert("filesize".to_string(), Value::from(size));
    }
    send_json(writer, header).await?;

    let mut file = tokio::fs::File::open(file_path).await?;
    tokio::io::copy(&mut file, writer).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a JSON header, and its file body when the header carries one.
///
/// A header without `filesize`/`filename` is returned as a plain message.
/// The body is streamed to `save_dir/<filename>`; a partial file is removed
/// when the transfer dies. Timeouts surface as `Ok(None)`, matching
/// [`recv_json`].
pub async fn recv_file<R>(
    reader: &mut R,
    save_dir: &Path,
    timeout: Option<Duration>,
) -> Result<Option<(Value, Option<PathBuf>)>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let Some(header) = recv_json(reader, timeout).await? else {
        return Ok(None);
    };

    let filesize = header.get("filesize").and_then(Value::as_u64);
    let filename = header.get("filename").and_then(Value::as_str);
    let (Some(filesize), Some(filename)) = (filesize, filename) else {
        return Ok(Some((header, None)));
    };

    // Only the final path component is honored, so a header cannot direct
    // the write outside of `save_dir`.
    let name = Path::new(filename).file_name().ok_or_else(|| {
        CodecError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "header filename has no file name component",
        ))
    })?;
    tokio::fs::create_dir_all(save_dir).await?;
    let path = save_dir.join(name);

    match receive_body(reader, &path, filesize, timeout).await {
        Ok(true) => Ok(Some((header, Some(path)))),
        Ok(false) => {
            let _ = tokio::fs::remove_file(&path).await;
            Ok(None)
        }
        Err(err) => {
            let _ = tokio::fs::remove_file(&path).await;
            Err(err)
        }
    }
}

// Stream exactly `filesize` bytes into `path`; Ok(false) means a timeout.
async fn receive_body<R>(
    reader: &mut R,
    path: &Path,
    filesize: u64,
    timeout: Option<Duration>,
) -> Result<bool, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::File::create(path).await?;
    let mut chunk = [0u8; FILE_CHUNK_BYTES];
    let mut remaining = filesize;

    while remaining > 0 {
        let want = chunk.len().min(remaining as usize);
        let read = match timeout {
            Some(limit) => match time::timeout(limit, reader.read(&mut chunk[..want])).await {
                Ok(result) => result?,
                Err(_) => return Ok(false),
            },
            None => reader.read(&mut chunk[..want]).await?,
        };
        if read == 0 {
            return Err(CodecError::ConnectionClosed);
        }
        file.write_all(&chunk[..read]).await?;
        remaining -= read as u64;
    }

    file.flush().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_a_sequence_of_frames() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        send_json(&mut client, json!({"op": "login", "name": "alice"}))
            .await
            .expect("send should succeed");
        send_json(&mut client, json!({"op": "list_rooms"}))
            .await
            .expect("send should succeed");

        let first = recv_json(&mut server, None)
            .await
            .expect("recv should succeed")
            .expect("frame expected");
        assert_eq!(first["op"], "login");
        assert_eq!(first["name"], "alice");

        let second = recv_json(&mut server, None)
            .await
            .expect("recv should succeed")
            .expect("frame expected");
        assert_eq!(second["op"], "list_rooms");
    }

    #[tokio::test]
    async fn every_outbound_frame_carries_the_token() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        send_json(&mut client, json!({"op": "logout"}))
            .await
            .expect("send should succeed");

        let frame = recv_json(&mut server, None)
            .await
            .expect("recv should succeed")
            .expect("frame expected");
        assert!(frame.get("token").is_some());
    }

    #[tokio::test]
    async fn eof_before_a_full_frame_is_connection_closed() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        // A prefix announcing 100 bytes, then the writer goes away.
        client
            .write_all(&100u32.to_be_bytes())
            .await
            .expect("write should succeed");
        client.write_all(b"short").await.expect("write should succeed");
        drop(client);

        let err = recv_json(&mut server, None)
            .await
            .expect_err("truncated frame should fail");
        assert!(matches!(err, CodecError::ConnectionClosed));
    }

    #[tokio::test]
    async fn timeout_on_an_idle_stream_returns_none() {
        let (_client, mut server) = tokio::io::duplex(4096);

        let got = recv_json(&mut server, Some(Duration::from_millis(20)))
            .await
            .expect("timeout is not an error");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn malformed_json_payload_returns_none() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let garbage = b"not json at all";
        client
            .write_all(&(garbage.len() as u32).to_be_bytes())
            .await
            .expect("write should succeed");
        client.write_all(garbage).await.expect("write should succeed");

        let got = recv_json(&mut server, None)
            .await
            .expect("decode failure is not an error");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn file_frame_streams_the_body_to_disk() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let inbox = tempfile::tempdir().expect("tempdir");

        let source = scratch.path().join("package.zip");
        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &body).expect("write source");

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let sender = tokio::spawn(async move {
            send_file(&mut client, &source, json!({"op": "upload_game"})).await
        });

        let (header, path) = recv_file(&mut server, inbox.path(), None)
            .await
            .expect("recv should succeed")
            .expect("frame expected");
        sender.await.expect("join").expect("send should succeed");

        assert_eq!(header["op"], "upload_game");
        assert_eq!(header["filename"], "package.zip");
        assert_eq!(header["filesize"], body.len() as u64);
        let saved = path.expect("file expected");
        assert_eq!(std::fs::read(&saved).expect("read saved"), body);
    }

    #[tokio::test]
    async fn plain_header_without_filesize_carries_no_file() {
        let inbox = tempfile::tempdir().expect("tempdir");
        let (mut client, mut server) = tokio::io::duplex(4096);

        send_json(&mut client, json!({"op": "list_games"}))
            .await
            .expect("send should succeed");

        let (header, path) = recv_file(&mut server, inbox.path(), None)
            .await
            .expect("recv should succeed")
            .expect("frame expected");
        assert_eq!(header["op"], "list_games");
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn header_filename_cannot_escape_the_save_dir() {
        let inbox = tempfile::tempdir().expect("tempdir");
        let (mut client, mut server) = tokio::io::duplex(4096);

        let body = b"payload";
        send_json(
            &mut client,
            json!({"op": "upload_game", "filename": "../../escape.bin", "filesize": body.len()}),
        )
        .await
        .expect("send should succeed");
        client.write_all(body).await.expect("write should succeed");

        let (_, path) = recv_file(&mut server, inbox.path(), None)
            .await
            .expect("recv should succeed")
            .expect("frame expected");
        let saved = path.expect("file expected");
        assert_eq!(saved.parent(), Some(inbox.path()));
        assert_eq!(saved.file_name().and_then(|n| n.to_str()), Some("escape.bin"));
    }
}
