//! Small byte-level helpers shared by the frame reader and writer. Kept
//! separate from `frame.rs` since they operate on raw `AsyncRead`/
//! `AsyncWrite` halves rather than on `Frame` values.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

/// Reading fewer bytes than `buf` holds before the peer closes the stream
/// is the normal "other side hung up" case, not an I/O failure -- mapped to
/// `Error::TransportClosed` so callers can tell it apart from a genuine
/// transport error (RFC 6455's framing gives no way to resynchronize after
/// a short read either way, but the distinction matters for whether the
/// connection should settle into `Closed` or `Aborted`).
pub async fn read_exact<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), Error> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(error) if error.kind() == ErrorKind::UnexpectedEof => Err(Error::TransportClosed),
        Err(error) => Err(error.into()),
    }
}

pub async fn read_u8<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8, Error> {
    let mut buf = [0u8; 1];
    read_exact(reader, &mut buf).await?;
    Ok(buf[0])
}

pub async fn read_u16_be<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u16, Error> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf).await?;
    Ok(u16::from_be_bytes(buf))
}

pub async fn read_u64_be<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64, Error> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf).await?;
    Ok(u64::from_be_bytes(buf))
}

pub async fn write_u16_be<W: AsyncWrite + Unpin>(writer: &mut W, value: u16) -> Result<(), Error> {
    writer.write_all(&value.to_be_bytes()).await?;
    Ok(())
}

pub async fn write_u64_be<W: AsyncWrite + Unpin>(writer: &mut W, value: u64) -> Result<(), Error> {
    writer.write_all(&value.to_be_bytes()).await?;
    Ok(())
}
