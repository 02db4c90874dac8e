//! Length-framed control message codec.
//!
//! Wire format:
//!
//! ```text
//! [u16 LE: body_len] [body_len bytes: control message]
//! ```
//!
//! The header width is a function of the shared buffer size (2048): a u16
//! comfortably encodes any length up to that bound. Control messages always
//! use this framing; raw upload/download bodies (file contents, app-message
//! payloads, streamed-upload chunks) bypass it entirely and are transferred
//! as a known number of bytes per `proto::limits`.

use anyhow::{bail, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::limits::BUFFER_SIZE;

/// Header width in bytes (u16 LE).
pub const HEADER_SIZE: usize = 2;

/// Encode a frame header for a body of `body_len` bytes.
///
/// # Errors
///
/// Returns an error if `body_len` exceeds the shared buffer size — this is
/// always a caller bug (oversized encoder input), never a wire condition.
pub fn encode_header(body_len: usize) -> Result<[u8; HEADER_SIZE]> {
    if body_len > BUFFER_SIZE {
        bail!("frame body of {body_len} bytes exceeds buffer size {BUFFER_SIZE}");
    }
    Ok((body_len as u16).to_le_bytes())
}

/// Decode a frame header, returning the declared body length.
pub fn decode_header(hdr: &[u8; HEADER_SIZE]) -> Result<usize> {
    let len = u16::from_le_bytes(*hdr) as usize;
    if len > BUFFER_SIZE {
        bail!("frame declares body of {len} bytes, exceeds buffer size {BUFFER_SIZE}");
    }
    Ok(len)
}

/// Write one framed message: header followed immediately by `body`.
///
/// The body is written contiguously with the header so that a peer reading
/// the stream never observes a header without its matching body.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, body: &[u8]) -> Result<()> {
    let hdr = encode_header(body.len())?;
    w.write_all(&hdr).await?;
    w.write_all(body).await?;
    w.flush().await?;
    Ok(())
}

/// Read one framed message: a header followed by exactly that many body
/// bytes. Returns the body.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>> {
    let mut hdr = [0u8; HEADER_SIZE];
    r.read_exact(&mut hdr).await?;
    let len = decode_header(&hdr)?;
    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let hdr = encode_header(17).unwrap();
        assert_eq!(decode_header(&hdr).unwrap(), 17);
    }

    #[test]
    fn header_rejects_oversize() {
        assert!(encode_header(BUFFER_SIZE + 1).is_err());
    }

    #[tokio::test]
    async fn frame_round_trip_over_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, b"hello").await.unwrap();
        let body = read_frame(&mut server).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn body_is_contiguous_with_header() {
        // Two frames written back to back must be read back as two distinct
        // frames, never merged or split.
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, b"first").await.unwrap();
        write_frame(&mut client, b"second").await.unwrap();
        assert_eq!(read_frame(&mut server).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut server).await.unwrap(), b"second");
    }
}
