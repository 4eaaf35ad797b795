use crate::engine::error::EngineResult;
use crate::engine::events::{EventObserver, ServerEvent};
use crate::metrics::recorder;
use crate::network::{Connection, NetworkStats, SocketSettings};
use crate::wire::{self, Request, RequestPayload};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;

/// Sends and receives single request frames.
///
/// Every request travels on its own connection, which is closed right after
/// the frame is written. The exception is an accepted transfer: the
/// connection carrying `FileTransferAccepted` stays open for the raw file
/// bytes, see [`RequestEngine::send_request_holding`].
pub struct RequestEngine {
    socket: SocketSettings,
    /// Address written into the sender header of outgoing requests
    advertised: RwLock<SocketAddr>,
    observer: Arc<dyn EventObserver>,
    stats: RwLock<NetworkStats>,
}

impl RequestEngine {
    pub fn new(
        socket: SocketSettings,
        advertised: SocketAddr,
        observer: Arc<dyn EventObserver>,
    ) -> Self {
        Self {
            socket,
            advertised: RwLock::new(advertised),
            observer,
            stats: RwLock::new(NetworkStats::default()),
        }
    }

    pub fn socket_settings(&self) -> &SocketSettings {
        &self.socket
    }

    pub fn advertised_addr(&self) -> SocketAddr {
        *self.advertised.read()
    }

    pub fn set_advertised_addr(&self, addr: SocketAddr) {
        *self.advertised.write() = addr;
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats.read().clone()
    }

    pub fn emit(&self, event: ServerEvent) {
        self.observer.on_event(&event);
    }

    /// Send one request and close the connection
    pub async fn send_request(&self, target: SocketAddr, payload: RequestPayload) -> EngineResult<()> {
        let conn = self.send_request_holding(target, payload).await?;
        if let Err(e) = conn.shutdown().await {
            // The frame is already written; a failed half-close loses nothing
            tracing::debug!("Shutdown of connection to {} failed: {}", target, e);
        }
        Ok(())
    }

    /// Send one request and hand back the open connection
    pub async fn send_request_holding(
        &self,
        target: SocketAddr,
        payload: RequestPayload,
    ) -> EngineResult<Connection> {
        let request = Request::new(self.advertised_addr(), payload);
        let kind = request.kind();
        self.emit(ServerEvent::SendRequestStarted {
            kind,
            remote: target,
        });

        let result = async {
            let frame = wire::encode(&request)?;
            let mut conn = Connection::connect(target, &self.socket).await?;
            self.stats.write().connections_opened += 1;
            conn.write_frame(&frame).await?;
            Ok::<_, crate::engine::EngineError>((conn, frame.len()))
        }
        .await;

        match result {
            Ok((conn, len)) => {
                {
                    let mut stats = self.stats.write();
                    stats.frames_sent += 1;
                    stats.total_bytes_sent += len as u64;
                }
                recorder::record_request_sent(kind);
                tracing::debug!("Sent {:?} ({} bytes) to {}", kind, len, target);
                self.emit(ServerEvent::SendRequestComplete {
                    kind,
                    remote: target,
                });
                Ok(conn)
            }
            Err(e) => {
                recorder::record_request_failed("send");
                self.emit(ServerEvent::RequestFailed {
                    stage: format!("send {kind:?}"),
                    remote: target,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Read and decode one request from an accepted connection.
    ///
    /// The sender IP is replaced by the observed peer IP unless the kind
    /// reports the sender's own addresses. Bytes past the frame stay
    /// buffered in `conn`.
    pub async fn receive_request(&self, conn: &mut Connection) -> EngineResult<Request> {
        let peer = conn.peer_addr();
        self.emit(ServerEvent::ReceiveRequestStarted { remote: peer });

        let result = async {
            let frame = conn.read_frame().await?;
            let request = wire::decode(&frame)?;
            Ok::<_, crate::engine::EngineError>((request, frame.len()))
        }
        .await;

        match result {
            Ok((mut request, len)) => {
                if !request.kind().reports_own_address() {
                    request.sender = SocketAddr::new(peer.ip(), request.sender.port());
                }
                {
                    let mut stats = self.stats.write();
                    stats.frames_received += 1;
                    stats.total_bytes_received += len as u64;
                }
                recorder::record_request_received(request.kind());
                tracing::debug!(
                    "Received {:?} ({} bytes) from {}, {} bytes carried",
                    request.kind(),
                    len,
                    request.sender,
                    conn.carried()
                );
                self.emit(ServerEvent::ReceiveRequestComplete {
                    kind: request.kind(),
                    remote: request.sender,
                });
                Ok(request)
            }
            Err(e) => {
                recorder::record_request_failed("receive");
                self.emit(ServerEvent::RequestFailed {
                    stage: "receive".into(),
                    remote: peer,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn record_accepted(&self) {
        self.stats.write().connections_accepted += 1;
    }
}
