//! Length-prefixed frame reassembly over a byte stream.
//!
//! TCP hands out bytes in chunks unrelated to frame boundaries. Bytes read
//! past the end of the current frame stay in the caller's `carry` buffer and
//! are consumed first by the next call, so a connection can carry several
//! frames (or a frame followed by raw file bytes) without losing data.

use crate::network::error::{NetworkError, NetworkResult};
use crate::network::types::{LEN_PREFIX_SIZE, MAX_FRAME_LEN};
use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, Copy)]
pub struct FrameReader {
    pub buffer_size: usize,
    pub timeout: Duration,
}

impl FrameReader {
    pub fn new(buffer_size: usize, timeout: Duration) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            timeout,
        }
    }

    /// Read exactly one frame, keeping any surplus bytes in `carry`
    pub async fn read_frame<R>(&self, reader: &mut R, carry: &mut BytesMut) -> NetworkResult<Bytes>
    where
        R: AsyncRead + Unpin,
    {
        // Length phase
        while carry.len() < LEN_PREFIX_SIZE {
            self.fill(reader, carry).await?;
        }
        let frame_len = carry.get_u32_le() as usize;
        if frame_len > MAX_FRAME_LEN {
            return Err(NetworkError::FrameTooLarge(frame_len));
        }

        // Body phase
        while carry.len() < frame_len {
            self.fill(reader, carry).await?;
        }

        tracing::trace!(
            "Read frame of {} bytes, {} bytes carried over",
            frame_len,
            carry.len() - frame_len
        );
        Ok(carry.split_to(frame_len).freeze())
    }

    /// One socket read appended to `carry`
    async fn fill<R>(&self, reader: &mut R, carry: &mut BytesMut) -> NetworkResult<usize>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.buffer_size];
        let n = tokio::time::timeout(self.timeout, reader.read(&mut buf))
            .await
            .map_err(|_| NetworkError::Timeout {
                operation: "receive",
                timeout: self.timeout,
            })?
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        if n == 0 {
            return Err(NetworkError::ConnectionClosed(
                "remote socket is no longer receiving data".into(),
            ));
        }
        carry.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

/// Write a length prefix followed by the frame
pub async fn write_frame<W>(writer: &mut W, frame: &[u8], timeout: Duration) -> NetworkResult<()>
where
    W: AsyncWrite + Unpin,
{
    if frame.len() > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge(frame.len()));
    }

    let mut out = Vec::with_capacity(LEN_PREFIX_SIZE + frame.len());
    out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
    out.extend_from_slice(frame);

    tokio::time::timeout(timeout, async {
        writer.write_all(&out).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| NetworkError::Timeout {
        operation: "send",
        timeout,
    })?
    .map_err(|e| NetworkError::SendFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Hands out a byte stream in the given chunk sizes (cycled), then EOF
    struct ChunkedReader {
        data: Vec<u8>,
        pos: usize,
        sizes: Vec<usize>,
        reads: usize,
    }

    impl ChunkedReader {
        fn new(data: Vec<u8>, chunk: usize) -> Self {
            Self::with_sizes(data, vec![chunk])
        }

        fn with_sizes(data: Vec<u8>, sizes: Vec<usize>) -> Self {
            Self {
                data,
                pos: 0,
                sizes,
                reads: 0,
            }
        }
    }

    impl AsyncRead for ChunkedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let chunk = self.sizes[self.reads % self.sizes.len()];
            let end = (self.pos + chunk)
                .min(self.data.len())
                .min(self.pos + buf.remaining());
            let start = self.pos;
            buf.put_slice(&self.data[start..end]);
            self.pos = end;
            self.reads += 1;
            Poll::Ready(Ok(()))
        }
    }

    fn framed(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for p in payloads {
            out.extend_from_slice(&(p.len() as u32).to_le_bytes());
            out.extend_from_slice(p);
        }
        out
    }

    fn reader(buffer: usize) -> FrameReader {
        FrameReader::new(buffer, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_single_frame_one_byte_reads() {
        let stream = framed(&[b"hello frame"]);
        let mut src = ChunkedReader::new(stream, 1);
        let mut carry = BytesMut::new();

        let frame = reader(64).read_frame(&mut src, &mut carry).await.unwrap();
        assert_eq!(&frame[..], b"hello frame");
        assert!(carry.is_empty());
    }

    #[tokio::test]
    async fn test_surplus_bytes_carried_to_next_frame() {
        let stream = framed(&[b"first", b"second", b""]);
        let mut src = ChunkedReader::new(stream, 1024);
        let mut carry = BytesMut::new();
        let r = reader(1024);

        assert_eq!(&r.read_frame(&mut src, &mut carry).await.unwrap()[..], b"first");
        assert!(!carry.is_empty());
        assert_eq!(&r.read_frame(&mut src, &mut carry).await.unwrap()[..], b"second");
        assert!(r.read_frame(&mut src, &mut carry).await.unwrap().is_empty());
        assert!(carry.is_empty());
    }

    #[tokio::test]
    async fn test_trailing_raw_bytes_left_in_carry() {
        let mut stream = framed(&[b"accepted"]);
        stream.extend_from_slice(b"RAWFILEBYTES");
        let mut src = ChunkedReader::new(stream, 4096);
        let mut carry = BytesMut::new();

        let frame = reader(4096).read_frame(&mut src, &mut carry).await.unwrap();
        assert_eq!(&frame[..], b"accepted");
        assert_eq!(&carry[..], b"RAWFILEBYTES");
    }

    #[tokio::test]
    async fn test_closed_socket_is_an_error() {
        let mut stream = framed(&[b"truncated body"]);
        stream.truncate(8);
        let mut src = ChunkedReader::new(stream, 3);
        let mut carry = BytesMut::new();

        let err = reader(16).read_frame(&mut src, &mut carry).await.unwrap_err();
        assert!(matches!(err, NetworkError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (mut client, _server) = tokio::io::duplex(64);
        let mut carry = BytesMut::new();
        let r = FrameReader::new(64, Duration::from_millis(50));

        let err = r.read_frame(&mut client, &mut carry).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut stream = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes().to_vec();
        stream.extend_from_slice(b"xx");
        let mut src = ChunkedReader::new(stream, 64);
        let mut carry = BytesMut::new();

        let err = reader(64).read_frame(&mut src, &mut carry).await.unwrap_err();
        assert!(matches!(err, NetworkError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"over the pipe", Duration::from_secs(1))
            .await
            .unwrap();

        let mut carry = BytesMut::new();
        let frame = reader(7).read_frame(&mut server, &mut carry).await.unwrap();
        assert_eq!(&frame[..], b"over the pipe");
    }

    #[tokio::test]
    async fn test_random_chunkings_yield_same_frames() {
        use rand::{Rng, SeedableRng};

        let payloads: Vec<Vec<u8>> = (0..12)
            .map(|i| (0..(i * 37 % 500)).map(|b| (b % 251) as u8).collect())
            .collect();
        let refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let mut stream = framed(&refs);
        stream.extend_from_slice(b"tail");

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let sizes: Vec<usize> = (0..16).map(|_| rng.gen_range(1..700)).collect();
            let buffer = rng.gen_range(1..2048);
            let mut src = ChunkedReader::with_sizes(stream.clone(), sizes);
            let mut carry = BytesMut::new();
            let r = reader(buffer);

            for expected in &payloads {
                let frame = r.read_frame(&mut src, &mut carry).await.unwrap();
                assert_eq!(&frame[..], expected.as_slice());
            }

            // Whatever is left after the last frame is the unframed tail
            let mut rest = carry.to_vec();
            rest.extend_from_slice(&src.data[src.pos..]);
            assert_eq!(rest, b"tail");
        }
    }
}
