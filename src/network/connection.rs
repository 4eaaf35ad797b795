use crate::network::error::{NetworkError, NetworkResult};
use crate::network::frame::{write_frame, FrameReader};
use crate::network::types::SocketSettings;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// One TCP connection plus the bytes read past the last frame boundary.
///
/// The carry buffer lives as long as the connection, so a later
/// `read_frame` or `read_chunk` picks up exactly where the previous one
/// stopped.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    carry: BytesMut,
    peer: SocketAddr,
    reader: FrameReader,
    io_timeout: Duration,
}

impl Connection {
    /// Open an outbound connection, bounded by the connect timeout
    pub async fn connect(addr: SocketAddr, settings: &SocketSettings) -> NetworkResult<Self> {
        let stream = tokio::time::timeout(settings.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::Timeout {
                operation: "connect",
                timeout: settings.connect_timeout,
            })?
            .map_err(|source| NetworkError::ConnectionFailed { addr, source })?;

        stream.set_nodelay(true)?;
        tracing::debug!("Connected to {}", addr);
        Ok(Self::from_stream(stream, addr, settings))
    }

    /// Wrap a socket handed out by the listener
    pub fn accepted(stream: TcpStream, peer: SocketAddr, settings: &SocketSettings) -> Self {
        Self::from_stream(stream, peer, settings)
    }

    fn from_stream(stream: TcpStream, peer: SocketAddr, settings: &SocketSettings) -> Self {
        Self {
            stream,
            carry: BytesMut::new(),
            peer,
            reader: FrameReader::new(settings.buffer_size, settings.io_timeout),
            io_timeout: settings.io_timeout,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Bytes already read off the socket but not yet consumed
    pub fn carried(&self) -> usize {
        self.carry.len()
    }

    pub async fn read_frame(&mut self) -> NetworkResult<Bytes> {
        self.reader.read_frame(&mut self.stream, &mut self.carry).await
    }

    pub async fn write_frame(&mut self, frame: &[u8]) -> NetworkResult<()> {
        write_frame(&mut self.stream, frame, self.io_timeout).await
    }

    /// Read up to `max` raw bytes, draining carried-over bytes first.
    ///
    /// Returns an empty buffer only when `max` is zero; a closed socket is
    /// an error.
    pub async fn read_chunk(&mut self, max: usize) -> NetworkResult<Bytes> {
        if max == 0 {
            return Ok(Bytes::new());
        }
        if !self.carry.is_empty() {
            let take = max.min(self.carry.len());
            return Ok(self.carry.split_to(take).freeze());
        }

        let mut buf = vec![0u8; max];
        let n = tokio::time::timeout(self.io_timeout, self.stream.read(&mut buf))
            .await
            .map_err(|_| NetworkError::Timeout {
                operation: "receive",
                timeout: self.io_timeout,
            })?
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        if n == 0 {
            return Err(NetworkError::ConnectionClosed(format!(
                "{} closed the connection",
                self.peer
            )));
        }
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// Write raw bytes with no framing
    pub async fn write_all(&mut self, data: &[u8]) -> NetworkResult<()> {
        tokio::time::timeout(self.io_timeout, self.stream.write_all(data))
            .await
            .map_err(|_| NetworkError::Timeout {
                operation: "send",
                timeout: self.io_timeout,
            })?
            .map_err(|e| NetworkError::SendFailed(e.to_string()))
    }

    /// Flush and half-close the write side, then drop the socket
    pub async fn shutdown(mut self) -> NetworkResult<()> {
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            // Peer already gone
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn settings() -> SocketSettings {
        SocketSettings {
            io_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_millis(500),
            ..SocketSettings::default()
        }
    }

    #[tokio::test]
    async fn test_frame_then_raw_bytes_on_one_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut conn = Connection::connect(addr, &settings()).await.unwrap();
            conn.write_frame(b"header").await.unwrap();
            conn.write_all(b"0123456789").await.unwrap();
            conn.shutdown().await.unwrap();
        });

        let (stream, peer) = listener.accept().await.unwrap();
        let mut conn = Connection::accepted(stream, peer, &settings());
        client.await.unwrap();

        assert_eq!(&conn.read_frame().await.unwrap()[..], b"header");

        let mut body = Vec::new();
        while body.len() < 10 {
            let chunk = conn.read_chunk(3).await.unwrap();
            assert!(chunk.len() <= 3);
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"0123456789");

        let err = conn.read_chunk(3).await.unwrap_err();
        assert!(matches!(err, NetworkError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Connection::connect(addr, &settings()).await.unwrap_err();
        assert!(matches!(err, NetworkError::ConnectionFailed { .. }));
    }
}
