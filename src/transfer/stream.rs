//! Raw file bytes on an accepted transfer connection.
//!
//! Chunks move strictly one after another. Both directions watch the
//! transfer's own stop signal and the process-wide shutdown signal, and a
//! stop returns `Ok(StreamOutcome::Stopped)` rather than an error.

use crate::network::Connection;
use crate::transfer::control::StopSignal;
use crate::transfer::error::{TransferError, TransferResult};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { bytes: u64 },
    Stopped { bytes: u64 },
}

impl StreamOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            StreamOutcome::Completed { bytes } | StreamOutcome::Stopped { bytes } => *bytes,
        }
    }
}

/// Signals a byte stream watches between (and during) chunks
#[derive(Debug, Clone, Copy)]
pub struct StreamSignals<'a> {
    pub stop: &'a StopSignal,
    pub shutdown: &'a StopSignal,
}

impl StreamSignals<'_> {
    fn is_triggered(&self) -> bool {
        self.stop.is_triggered() || self.shutdown.is_triggered()
    }

    async fn triggered(&self) {
        tokio::select! {
            _ = self.stop.triggered() => {}
            _ = self.shutdown.triggered() => {}
        }
    }
}

/// Stream `file_size` bytes of `path` to the peer.
///
/// `on_progress` receives the running total after each chunk.
pub async fn send_file_bytes<F>(
    conn: &mut Connection,
    path: &Path,
    file_size: u64,
    chunk_size: usize,
    signals: StreamSignals<'_>,
    mut on_progress: F,
) -> TransferResult<StreamOutcome>
where
    F: FnMut(u64),
{
    let mut file = File::open(path).await?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut sent: u64 = 0;

    while sent < file_size {
        if signals.is_triggered() {
            return Ok(StreamOutcome::Stopped { bytes: sent });
        }

        let want = buf.len().min((file_size - sent) as usize);
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(TransferError::FileTruncated {
                read: sent,
                expected: file_size,
            });
        }

        tokio::select! {
            biased;
            _ = signals.triggered() => return Ok(StreamOutcome::Stopped { bytes: sent }),
            written = conn.write_all(&buf[..n]) => written?,
        }

        sent += n as u64;
        on_progress(sent);
    }

    tracing::debug!("Sent {} bytes of {} to {}", sent, path.display(), conn.peer_addr());
    Ok(StreamOutcome::Completed { bytes: sent })
}

/// Receive `file_size` bytes from the peer into `path`, replacing any
/// partial file from an earlier attempt.
///
/// Bytes the connection already buffered while reading the last frame are
/// written first.
pub async fn receive_file_bytes<F>(
    conn: &mut Connection,
    path: &Path,
    file_size: u64,
    chunk_size: usize,
    signals: StreamSignals<'_>,
    mut on_progress: F,
) -> TransferResult<StreamOutcome>
where
    F: FnMut(u64),
{
    let mut file = File::create(path).await?;
    let mut received: u64 = 0;
    let chunk_size = chunk_size.max(1);

    while received < file_size {
        if signals.is_triggered() {
            file.flush().await?;
            return Ok(StreamOutcome::Stopped { bytes: received });
        }

        let want = chunk_size.min((file_size - received) as usize);
        let chunk = tokio::select! {
            biased;
            _ = signals.triggered() => {
                file.flush().await?;
                return Ok(StreamOutcome::Stopped { bytes: received });
            }
            chunk = conn.read_chunk(want) => chunk?,
        };

        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
        on_progress(received);
    }

    file.flush().await?;
    file.sync_all().await?;
    tracing::debug!(
        "Received {} bytes into {} from {}",
        received,
        path.display(),
        conn.peer_addr()
    );
    Ok(StreamOutcome::Completed { bytes: received })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::types::SocketSettings;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn settings() -> SocketSettings {
        SocketSettings {
            io_timeout: Duration::from_secs(2),
            ..SocketSettings::default()
        }
    }

    async fn pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(async move { Connection::connect(addr, &settings()).await });
        let (stream, peer) = listener.accept().await.unwrap();
        let client = connect.await.unwrap().unwrap();
        (client, Connection::accepted(stream, peer, &settings()))
    }

    #[tokio::test]
    async fn test_file_crosses_connection() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        tokio::fs::write(&src, &data).await.unwrap();

        let (mut tx, mut rx) = pair().await;
        let stop = StopSignal::new();
        let shutdown = StopSignal::new();

        let sender = {
            let (stop, shutdown, src) = (stop.clone(), shutdown.clone(), src.clone());
            tokio::spawn(async move {
                let signals = StreamSignals {
                    stop: &stop,
                    shutdown: &shutdown,
                };
                send_file_bytes(&mut tx, &src, 10_000, 1024, signals, |_| {}).await
            })
        };

        let mut updates = Vec::new();
        let signals = StreamSignals {
            stop: &stop,
            shutdown: &shutdown,
        };
        let outcome = receive_file_bytes(&mut rx, &dst, 10_000, 700, signals, |n| updates.push(n))
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Completed { bytes: 10_000 });
        assert_eq!(
            sender.await.unwrap().unwrap(),
            StreamOutcome::Completed { bytes: 10_000 }
        );
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), data);
        assert!(updates.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(updates.last(), Some(&10_000));
    }

    #[tokio::test]
    async fn test_stop_signal_ends_receive_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("partial.bin");
        let (mut tx, mut rx) = pair().await;
        tx.write_all(&[7u8; 100]).await.unwrap();

        let stop = StopSignal::new();
        let shutdown = StopSignal::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.trigger();
        });

        let signals = StreamSignals {
            stop: &stop,
            shutdown: &shutdown,
        };
        let outcome = receive_file_bytes(&mut rx, &dst, 1000, 64, signals, |_| {})
            .await
            .unwrap();
        assert_eq!(outcome, StreamOutcome::Stopped { bytes: 100 });
    }

    #[tokio::test]
    async fn test_short_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("short.bin");
        tokio::fs::write(&src, b"only ten b").await.unwrap();
        let (mut tx, _rx) = pair().await;

        let stop = StopSignal::new();
        let signals = StreamSignals {
            stop: &stop,
            shutdown: &stop,
        };
        let err = send_file_bytes(&mut tx, &src, 50, 8, signals, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::FileTruncated {
                read: 10,
                expected: 50
            }
        ));
    }
}
