//! Message framing over byte streams.
//!
//! Each frame is a 4-byte big-endian length prefix followed by the payload.
//! The reader enforces a caller-supplied maximum so a peer cannot make us
//! allocate an arbitrarily large buffer.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Error;

/// Maximum frame payload size (4 MB).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a payload with a length prefix.
///
/// Returns a new buffer containing `[length (4 bytes BE)][payload]`.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, Error> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "payload size {} exceeds maximum {}",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode the payload length from a 4-byte header, rejecting lengths over `max`.
pub fn decode_frame_length(header: &[u8; LENGTH_PREFIX_SIZE], max: usize) -> Result<usize, Error> {
    let len = u32::from_be_bytes(*header) as usize;
    if len > max {
        return Err(Error::InvalidMessage(format!(
            "frame length {} exceeds maximum {}",
            len, max
        )));
    }
    Ok(len)
}

/// Read one frame payload from `reader`.
///
/// Returns `Ok(None)` on a clean end of stream before a new frame starts.
/// An end of stream in the middle of a frame is an error.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = decode_frame_length(&header, max)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write an already length-prefixed frame to `writer` and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
