//! Wire frame reader for one reassembled TCP flow.
//!
//! A frame on the wire is `size:i32 | api_key:i16 | api_version:i16 | rest`,
//! where `size` counts everything after itself. The reader accumulates bytes
//! from the flow's `AsyncRead` into an internal buffer in 4 KiB chunks and
//! hands out one frame at a time.
//!
//! Size violations never kill the flow: an undersized frame is skipped in
//! place, and an oversized frame is discarded by consuming exactly the
//! reported size so the reader lands on the next frame boundary. The reader
//! never rewinds.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default ceiling on a single frame (100 MiB), matching the broker default.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 100 * 1024 * 1024;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame size above the configured ceiling. The frame has already been
    /// discarded when this is returned; the next read starts at the
    /// following frame boundary.
    #[error("oversized frame: {size} bytes exceeds limit of {limit}")]
    Oversized { size: i32, limit: usize },

    /// Frame size too small to carry a request header.
    #[error("undersized frame: {size} bytes")]
    Undersized { size: i32 },

    /// The flow ended. Also returned when the flow ends mid-frame; either
    /// way the orchestrator exits cleanly.
    #[error("end of stream")]
    EndOfStream,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Fixed fields every frame leads with.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub size: i32,
    pub api_key: i16,
    pub api_version: i16,
}

pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    max_request_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_request_size: usize) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_request_size,
        }
    }

    /// Bytes already pulled off the flow but not yet consumed. Purely a
    /// view; performs no read.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Best-effort peek at the next `n` bytes without consuming them.
    /// Returns fewer than `n` bytes only when the flow ends first.
    pub async fn peek(&mut self, n: usize) -> std::io::Result<&[u8]> {
        while self.buf.len() < n {
            let read = self.reader.read_buf(&mut self.buf).await?;
            if read == 0 {
                break;
            }
        }
        let end = n.min(self.buf.len());
        Ok(&self.buf[..end])
    }

    /// Consume exactly `n` bytes and return them. Used for raw SASL tokens
    /// that sit between wire frames.
    pub async fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        self.fill(n).await?;
        Ok(self.buf.split_to(n).freeze())
    }

    /// Read the next wire frame: header triple plus the body bytes that
    /// follow the api_key/api_version pair.
    pub async fn next_frame(&mut self) -> Result<(FrameHeader, Bytes)> {
        if let Err(e) = self.fill(8).await {
            // A cleanly closed flow between frames is normal termination;
            // partial header bytes at EOF get the same treatment.
            return Err(e);
        }

        let header = FrameHeader {
            size: i32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]),
            api_key: i16::from_be_bytes([self.buf[4], self.buf[5]]),
            api_version: i16::from_be_bytes([self.buf[6], self.buf[7]]),
        };

        if header.size <= 4 {
            // Not even room for a correlation id. Skip what we can identify
            // of the frame and let the caller move on.
            let skip = 4 + header.size.max(0) as usize;
            self.buf.advance(skip.min(self.buf.len()));
            return Err(FrameError::Undersized { size: header.size });
        }

        if header.size as usize > self.max_request_size {
            self.discard_frame(header.size).await?;
            return Err(FrameError::Oversized {
                size: header.size,
                limit: self.max_request_size,
            });
        }

        let body_len = header.size as usize - 4;
        self.fill(8 + body_len).await?;
        self.buf.advance(8);
        let body = self.buf.split_to(body_len).freeze();
        Ok((header, body))
    }

    /// Ensure at least `n` bytes are buffered, reading in chunks.
    async fn fill(&mut self, n: usize) -> Result<()> {
        while self.buf.len() < n {
            self.buf.reserve(READ_CHUNK);
            let read = self.reader.read_buf(&mut self.buf).await?;
            if read == 0 {
                return Err(FrameError::EndOfStream);
            }
        }
        Ok(())
    }

    /// Drop an entire frame (size prefix plus `size` bytes) without
    /// buffering it, resynchronising at the next frame boundary.
    async fn discard_frame(&mut self, size: i32) -> Result<()> {
        let mut remaining = 4 + size as usize;
        let buffered = remaining.min(self.buf.len());
        self.buf.advance(buffered);
        remaining -= buffered;

        let mut scratch = [0u8; READ_CHUNK];
        while remaining > 0 {
            let want = remaining.min(READ_CHUNK);
            let read = self.reader.read(&mut scratch[..want]).await?;
            if read == 0 {
                return Err(FrameError::EndOfStream);
            }
            remaining -= read;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn frame(api_key: i16, api_version: i16, body: &[u8]) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_i32(4 + body.len() as i32);
        out.put_i16(api_key);
        out.put_i16(api_version);
        out.put_slice(body);
        out.to_vec()
    }

    #[tokio::test]
    async fn reads_a_single_frame() {
        let wire = frame(18, 2, &[0, 0, 0, 7, 0, 3, b'c', b'l', b'i']);
        let mut reader = FrameReader::new(wire.as_slice(), DEFAULT_MAX_REQUEST_SIZE);

        let (header, body) = reader.next_frame().await.unwrap();
        assert_eq!(header.api_key, 18);
        assert_eq!(header.api_version, 2);
        assert_eq!(header.size, 13);
        assert_eq!(body.len(), 9);

        assert!(matches!(
            reader.next_frame().await,
            Err(FrameError::EndOfStream)
        ));
    }

    #[tokio::test]
    async fn reads_back_to_back_frames() {
        let mut wire = frame(0, 3, &[1, 2, 3, 4]);
        wire.extend(frame(1, 11, &[5, 6]));
        let mut reader = FrameReader::new(wire.as_slice(), DEFAULT_MAX_REQUEST_SIZE);

        let (first, _) = reader.next_frame().await.unwrap();
        let (second, body) = reader.next_frame().await.unwrap();
        assert_eq!(first.api_key, 0);
        assert_eq!(second.api_key, 1);
        assert_eq!(body.as_ref(), &[5, 6]);
    }

    #[tokio::test]
    async fn oversized_frame_resyncs_on_next_boundary() {
        let mut wire = frame(0, 1, &vec![0u8; 64]);
        wire.extend(frame(3, 1, &[0, 0, 0, 2, 0, 1, b'x']));
        // Limit below the first frame's size, above the second's.
        let mut reader = FrameReader::new(wire.as_slice(), 32);

        match reader.next_frame().await {
            Err(FrameError::Oversized { size, limit }) => {
                assert_eq!(size, 68);
                assert_eq!(limit, 32);
            }
            other => panic!("expected oversized error, got {other:?}"),
        }

        let (header, _) = reader.next_frame().await.unwrap();
        assert_eq!(header.api_key, 3);
    }

    #[tokio::test]
    async fn undersized_frame_is_skipped() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&2i32.to_be_bytes());
        wire.extend_from_slice(&[0, 0]); // the 2 declared bytes
        wire.extend(frame(18, 0, &[0, 0, 0, 9, 0xff, 0xff]));
        let mut reader = FrameReader::new(wire.as_slice(), DEFAULT_MAX_REQUEST_SIZE);

        assert!(matches!(
            reader.next_frame().await,
            Err(FrameError::Undersized { size: 2 })
        ));
        let (header, _) = reader.next_frame().await.unwrap();
        assert_eq!(header.api_key, 18);
    }

    #[tokio::test]
    async fn eof_mid_frame_ends_the_stream() {
        let full = frame(0, 1, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let truncated = &full[..full.len() - 3];
        let mut reader = FrameReader::new(truncated, DEFAULT_MAX_REQUEST_SIZE);

        assert!(matches!(
            reader.next_frame().await,
            Err(FrameError::EndOfStream)
        ));
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let wire = frame(2, 5, &[9, 9, 9, 9]);
        let mut reader = FrameReader::new(wire.as_slice(), DEFAULT_MAX_REQUEST_SIZE);

        let peeked = reader.peek(16).await.unwrap().to_vec();
        assert_eq!(peeked.len(), 12);

        let (header, _) = reader.next_frame().await.unwrap();
        assert_eq!(header.api_key, 2);
    }

    #[tokio::test]
    async fn read_bytes_consumes_exactly() {
        let wire = [0u8, 0, 0, 16, 0, b'u', 0, b'p', 1, 2, 3, 4];
        let mut reader = FrameReader::new(&wire[..], DEFAULT_MAX_REQUEST_SIZE);

        let token = reader.read_bytes(8).await.unwrap();
        assert_eq!(token.as_ref(), &[0, 0, 0, 16, 0, b'u', 0, b'p']);
        assert_eq!(reader.peek(16).await.unwrap(), &[1, 2, 3, 4]);
    }
}
