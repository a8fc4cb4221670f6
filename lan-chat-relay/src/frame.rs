use std::{io, time::Duration};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// Largest payload a text frame can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Reads one length-prefixed UTF-8 frame.
///
/// Returns `Ok(None)` when the peer closed the stream before a new frame
/// started. A stream that ends inside a frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u16().await {
        Ok(len) => len as usize,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut buf = vec![0; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| FrameError::InvalidUtf8)
}

pub async fn write_frame<W>(writer: &mut W, text: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = text.as_bytes();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLong(bytes.len()));
    }

    // Header and body go out in one write so a frame is never split by a failed flush.
    let mut encoded = Vec::with_capacity(bytes.len() + 2);
    encoded.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    encoded.extend_from_slice(bytes);
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the 8-byte total length that opens a file transfer.
pub async fn read_transfer_len<R>(
    reader: &mut R,
    deadline: Option<Duration>,
) -> Result<u64, FrameError>
where
    R: AsyncRead + Unpin,
{
    with_deadline(deadline, async { reader.read_u64().await.map_err(FrameError::from) }).await
}

/// Reads one chunk: a 4-byte length followed by exactly that many bytes.
///
/// The length has to be non-zero, no larger than `remaining` and no larger
/// than `max_len`.
pub async fn read_chunk<R>(
    reader: &mut R,
    remaining: u64,
    max_len: u32,
    deadline: Option<Duration>,
) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    with_deadline(deadline, async {
        let len = reader.read_u32().await?;
        if len == 0 || u64::from(len) > remaining || len > max_len {
            return Err(FrameError::InvalidChunk { len, remaining });
        }

        let mut buf = vec![0; len as usize];
        reader.read_exact(&mut buf).await?;
        Ok(buf)
    })
    .await
}

async fn with_deadline<F, T>(deadline: Option<Duration>, future: F) -> Result<T, FrameError>
where
    F: std::future::Future<Output = Result<T, FrameError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| FrameError::TimedOut)?,
        None => future.await,
    }
}
