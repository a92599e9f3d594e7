// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-delimited JSON framing with a hard message cap.
//!
//! One JSON object per `\n`-terminated line. Messages over the cap are
//! rejected without dropping the connection; the remainder of the
//! oversized line is drained so the stream stays in sync.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard cap on one message (the JSON line, excluding the terminator).
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out")]
    Timeout,

    #[error("message exceeds {MAX_MESSAGE_BYTES} bytes")]
    TooLarge,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one message. `timeout` of `None` waits indefinitely (used between
/// requests on an idle control connection).
pub async fn read_message<R, T>(
    reader: &mut R,
    timeout: Option<Duration>,
) -> Result<T, ProtocolError>
where
    R: AsyncBufReadExt + Unpin,
    T: DeserializeOwned,
{
    let line = match timeout {
        Some(limit) => tokio::time::timeout(limit, read_line(reader))
            .await
            .map_err(|_| ProtocolError::Timeout)??,
        None => read_line(reader).await?,
    };
    serde_json::from_str(&line).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

async fn read_line<R>(reader: &mut R) -> Result<String, ProtocolError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    // Read at most cap + newline; a line that fills the budget without a
    // terminator is oversized.
    let n = (&mut *reader)
        .take((MAX_MESSAGE_BYTES + 1) as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_MESSAGE_BYTES {
        drain_oversized_line(reader).await?;
        return Err(ProtocolError::TooLarge);
    }
    String::from_utf8(buf).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Discard the rest of an oversized line, in bounded chunks, so the next
/// read starts at a fresh message.
pub async fn drain_oversized_line<R>(reader: &mut R) -> Result<(), ProtocolError>
where
    R: AsyncBufReadExt + Unpin,
{
    loop {
        let mut chunk: Vec<u8> = Vec::new();
        let n = (&mut *reader).take(64 * 1024).read_until(b'\n', &mut chunk).await?;
        if n == 0 || chunk.last() == Some(&b'\n') {
            return Ok(());
        }
    }
}

/// Write one message as a JSON line.
pub async fn write_message<W, T>(
    writer: &mut W,
    message: &T,
    timeout: Duration,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line =
        serde_json::to_string(message).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    line.push('\n');
    tokio::time::timeout(timeout, async {
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| ProtocolError::Timeout)??;
    Ok(())
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
