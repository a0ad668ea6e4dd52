//! Line-delimited JSON framing.
//!
//! Every message is one compact JSON record followed by `\n`. JSON string
//! escaping keeps payload newlines out of the record.

use crate::config::ProtocolConfig;
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

pub fn encode<M: Serialize>(message: &M) -> Result<Vec<u8>, CodecError> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

pub fn decode<M: DeserializeOwned>(line: &[u8]) -> Result<M, CodecError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Ok(serde_json::from_slice(line)?)
}

/// Read one message line, terminator included.
///
/// Returns `None` if the peer closed the stream before sending anything.
pub async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, CodecError> {
    let limit = ProtocolConfig::MAX_MESSAGE_SIZE;
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if line.len() > limit {
        return Err(CodecError::TooLarge { limit });
    }
    Ok(Some(line))
}

/// Write `line`, appending the terminator if it is missing.
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &[u8]) -> io::Result<()> {
    writer.write_all(line).await?;
    if !line.ends_with(b"\n") {
        writer.write_all(b"\n").await?;
    }
    writer.flush().await
}
