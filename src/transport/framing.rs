//! Length-prefixed frame codec shared by the Stream Transport: a 4-byte
//! big-endian length followed by exactly that many bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Write one frame. Rejects payloads larger than `max_frame` without
/// writing anything.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    max_frame: usize,
) -> Result<()> {
    if payload.len() > max_frame {
        return Err(Error::FrameTooLarge(payload.len()));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. A declared length exceeding `max_frame` is rejected
/// without reading the body. A stream that closes mid-frame surfaces
/// `Truncated`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_frame: usize) -> Result<Vec<u8>> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(_) => return Err(Error::Truncated),
    };
    if len > max_frame {
        return Err(Error::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(|_| Error::Truncated)?;
    Ok(buf)
}
