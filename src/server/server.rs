use crate::config::ServerSettings;
use crate::engine::{EventObserver, RequestEngine, ServerEvent, TracingObserver};
use crate::metrics::recorder;
use crate::network::{Connection, Listener, NetworkStats};
use crate::platform::{fs, IpDiscovery, Ipv4Cidr, SystemIpDiscovery};
use crate::server::conversation::{Conversation, ConversationStore, MessageAuthor};
use crate::server::error::{ServerError, ServerResult};
use crate::server::info::ServerInfo;
use crate::server::logs::{ErrorLog, ErrorRecord, EventLog, LoggedEvent, RecordingObserver};
use crate::server::peers::{PeerRegistry, RemoteFileList, RemotePeer};
use crate::server::requests::{RequestId, RequestLog, RequestRecord, RequestStatus};
use crate::transfer::{
    FileTransfer, NewTransfer, StopSignal, TransferDirection, TransferEvent, TransferId,
    TransferInitiator, TransferRegistry,
};
use crate::wire::{FileOffer, RequestKind, RequestPayload};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub(super) struct ServerState {
    pub(super) settings: ServerSettings,
    pub(super) cidr: Ipv4Cidr,
    pub(super) engine: RequestEngine,
    listener: Mutex<Option<Listener>>,
    local_addr: SocketAddr,
    pub(super) info: ServerInfo,
    pub(super) transfers: TransferRegistry,
    pub(super) requests: RequestLog,
    pub(super) conversations: ConversationStore,
    pub(super) peers: PeerRegistry,
    errors: ErrorLog,
    events: Arc<EventLog>,
    /// Set while a request is being processed
    busy: AtomicBool,
    /// Set while a task owns the backlog drain
    draining: AtomicBool,
    /// One request is processed at a time
    processing: tokio::sync::Mutex<()>,
    pub(super) shutdown: StopSignal,
    stopped: StopSignal,
}

/// One peer-to-peer node: a listener plus the client side of the protocol.
///
/// Cloning is cheap; clones share the same node.
#[derive(Clone)]
pub struct FileServer {
    pub(super) state: Arc<ServerState>,
}

/// Held while one request is processed; the node reports busy meanwhile
struct Processing<'a> {
    _lock: tokio::sync::MutexGuard<'a, ()>,
    busy: &'a AtomicBool,
}

impl Drop for Processing<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl FileServer {
    /// Bind with system address discovery and `tracing` event logging
    pub async fn bind(settings: ServerSettings) -> ServerResult<Self> {
        let discovery = Arc::new(SystemIpDiscovery::new(
            settings.public_ip_lookup_url.clone(),
            settings.connect_timeout(),
        ));
        Self::bind_with(settings, discovery, Arc::new(TracingObserver)).await
    }

    pub async fn bind_with(
        settings: ServerSettings,
        discovery: Arc<dyn IpDiscovery>,
        observer: Arc<dyn EventObserver>,
    ) -> ServerResult<Self> {
        settings.validate()?;
        let cidr = settings.cidr()?;
        recorder::init_metrics();
        tokio::fs::create_dir_all(&settings.local_server_folder_path).await?;

        let socket = settings.socket_settings();
        let listener = Listener::bind(&socket)?;
        let local_addr = listener.local_addr()?;

        let local_ip = discovery.local_ipv4(&cidr).unwrap_or_else(|| {
            let fallback = if local_addr.ip().is_unspecified() {
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            } else {
                local_addr.ip()
            };
            tracing::warn!("No local address in {}, advertising {}", cidr, fallback);
            fallback
        });
        let public_ip = match discovery.public_ipv4().await {
            Ok(ip) => Some(ip),
            Err(e) => {
                tracing::warn!("Public address unavailable: {}", e);
                None
            }
        };

        let info = ServerInfo {
            local_ip,
            public_ip,
            port: local_addr.port(),
            platform: ServerInfo::local_platform(),
            transfer_folder: settings.local_server_folder_path.display().to_string(),
        };

        let events = Arc::new(EventLog::default());
        let observer: Arc<dyn EventObserver> =
            Arc::new(RecordingObserver::new(events.clone(), observer));
        let engine = RequestEngine::new(socket, SocketAddr::new(local_ip, info.port), observer);

        tracing::info!(
            "File server bound to {} (local {}, public {:?})",
            local_addr,
            local_ip,
            public_ip
        );

        Ok(Self {
            state: Arc::new(ServerState {
                settings,
                cidr,
                engine,
                listener: Mutex::new(Some(listener)),
                local_addr,
                info,
                transfers: TransferRegistry::new(),
                requests: RequestLog::new(),
                conversations: ConversationStore::new(),
                peers: PeerRegistry::new(),
                errors: ErrorLog::default(),
                events,
                busy: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                processing: tokio::sync::Mutex::new(()),
                shutdown: StopSignal::new(),
                stopped: StopSignal::new(),
            }),
        })
    }

    /// Accept connections until shut down
    pub async fn run(&self) -> ServerResult<()> {
        let taken = self.state.listener.lock().take();
        let listener =
            taken.ok_or_else(|| ServerError::ProtocolState("server is already running".into()))?;

        self.emit(ServerEvent::ServerStarted {
            addr: self.state.local_addr,
        });

        loop {
            let accepted = tokio::select! {
                _ = self.state.shutdown.triggered() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok(conn) => {
                    self.state.engine.record_accepted();
                    let server = self.clone();
                    tokio::spawn(async move { server.handle_connection(conn).await });
                }
                Err(e) => self.record_error(format!("Failed to accept connection: {e}"), None, None),
            }
        }

        drop(listener);
        tracing::info!("Accept loop on {} stopped", self.state.local_addr);
        self.emit(ServerEvent::ShutdownComplete);
        self.state.stopped.trigger();
        Ok(())
    }

    /// Run the accept loop on its own task
    pub fn start(&self) -> JoinHandle<ServerResult<()>> {
        let server = self.clone();
        tokio::spawn(async move { server.run().await })
    }

    /// Resolves once the accept loop has exited
    pub async fn wait_stopped(&self) {
        self.state.stopped.triggered().await
    }

    async fn handle_connection(&self, mut conn: Connection) {
        let request = match self.state.engine.receive_request(&mut conn).await {
            Ok(request) => request,
            Err(e) => {
                self.record_error(
                    format!("Failed to receive request from {}: {e}", conn.peer_addr()),
                    None,
                    None,
                );
                return;
            }
        };

        let id = self.state.requests.record_received(&request);
        let kind = request.kind();
        tracing::info!("Received {:?} from {} (request {})", kind, request.sender, id);

        if kind == RequestKind::ShutdownServerCommand {
            self.handle_shutdown_command(id, request.sender);
            return;
        }

        if kind.is_deferrable() {
            drop(conn);
            let backlog = self.state.requests.enqueue(id, request);
            self.emit(ServerEvent::RequestQueued {
                request_id: id,
                kind,
                backlog,
            });
            self.drain_backlog().await;
            return;
        }

        // Waits only for the request in hand, never for the backlog
        let _processing = self.begin_processing().await;
        let result = self.process_request(id, request, Some(conn)).await;
        self.finish_request(id, result);
    }

    async fn begin_processing(&self) -> Processing<'_> {
        let lock = self.state.processing.lock().await;
        self.state.busy.store(true, Ordering::SeqCst);
        Processing {
            _lock: lock,
            busy: &self.state.busy,
        }
    }

    /// Process queued requests in arrival order unless another task already is
    async fn drain_backlog(&self) {
        loop {
            if self
                .state
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }

            self.emit(ServerEvent::ProcessingBacklog {
                pending: self.state.requests.backlog_len(),
            });
            loop {
                // Immediate requests already waiting go first
                let _processing = self.begin_processing().await;
                let Some((id, request)) = self.state.requests.dequeue() else {
                    break;
                };
                let result = self.process_request(id, request, None).await;
                self.finish_request(id, result);
            }

            self.state.draining.store(false, Ordering::SeqCst);

            // Requests queued after the last dequeue but before the drain ended
            if self.state.requests.backlog_len() == 0 {
                return;
            }
        }
    }

    fn finish_request(&self, id: RequestId, result: ServerResult<()>) {
        match result {
            Ok(()) => self.mark_request(id, RequestStatus::Processed),
            Err(e) => {
                if let Err(missing) = self.state.requests.fail(id, &e) {
                    tracing::warn!("{}", missing);
                }
                recorder::record_request_failed("process");
                self.record_error(format!("Failed to process request {id}: {e}"), None, Some(id));
            }
        }
    }

    pub(super) fn mark_request(&self, id: RequestId, status: RequestStatus) {
        if let Err(e) = self.state.requests.set_status(id, status) {
            tracing::warn!("{}", e);
        }
    }

    fn handle_shutdown_command(&self, id: RequestId, sender: SocketAddr) {
        if self.state.info.is_own_addr(sender) {
            tracing::info!("Shutdown command received, stopping accept loop");
            self.emit(ServerEvent::ShutdownStarted);
            self.mark_request(id, RequestStatus::Processed);
            self.state.shutdown.trigger();
        } else {
            let message = format!("Ignoring shutdown command from {sender}");
            if let Err(e) = self.state.requests.fail(id, &message) {
                tracing::warn!("{}", e);
            }
            self.record_error(message, None, Some(id));
        }
    }

    // ============== Error and event plumbing ==============

    pub(super) fn emit(&self, event: ServerEvent) {
        self.state.engine.emit(event);
    }

    pub(super) fn record_error(
        &self,
        message: String,
        transfer_id: Option<TransferId>,
        request_id: Option<RequestId>,
    ) {
        tracing::warn!("{}", message);
        self.state.errors.push(ErrorRecord {
            timestamp: chrono::Utc::now(),
            message: message.clone(),
            transfer_id,
            request_id,
        });
        self.emit(ServerEvent::ErrorOccurred { message });
    }

    /// Log a failed public operation
    fn report<T>(&self, operation: &str, result: ServerResult<T>) -> ServerResult<T> {
        if let Err(e) = &result {
            self.record_error(format!("{operation} failed: {e}"), None, None);
        }
        result
    }

    /// Log a failed operation on a transfer, ending the transfer on I/O errors
    pub(super) fn report_transfer<T>(
        &self,
        operation: &str,
        id: TransferId,
        result: ServerResult<T>,
    ) -> ServerResult<T> {
        let result = self.with_transfer(id, result);
        if let Err(e) = &result {
            self.record_error(format!("{operation} failed for transfer {id}: {e}"), Some(id), None);
        }
        result
    }

    /// Move the transfer to `Error` when `result` is an I/O failure
    pub(super) fn with_transfer<T>(&self, id: TransferId, result: ServerResult<T>) -> ServerResult<T> {
        if let Err(e) = &result {
            if e.is_io() {
                let failed = self.state.transfers.update(id, |t| {
                    t.apply(TransferEvent::Fail {
                        error: e.to_string(),
                    })
                });
                if let Ok(Ok(status)) = failed {
                    self.emit(ServerEvent::TransferStatusChanged {
                        transfer_id: id,
                        status,
                    });
                }
            }
        }
        result
    }

    /// Apply `event` to a transfer and announce the new status
    pub(super) fn transition(&self, id: TransferId, event: TransferEvent) -> ServerResult<FileTransfer> {
        let transfer = self
            .state
            .transfers
            .update(id, |t| t.apply(event).map(|_| t.clone()))??;
        self.emit(ServerEvent::TransferStatusChanged {
            transfer_id: id,
            status: transfer.status,
        });
        Ok(transfer)
    }

    /// Send one request, recording it in the request log
    pub(super) async fn send(&self, target: SocketAddr, payload: RequestPayload) -> ServerResult<()> {
        let id = self.state.requests.record_sent(payload.kind(), target);
        match self.state.engine.send_request(target, payload).await {
            Ok(()) => {
                self.mark_request(id, RequestStatus::Processed);
                Ok(())
            }
            Err(e) => {
                if let Err(missing) = self.state.requests.fail(id, &e) {
                    tracing::warn!("{}", missing);
                }
                Err(e.into())
            }
        }
    }

    /// Send one request and keep its connection open
    pub(super) async fn send_holding(
        &self,
        target: SocketAddr,
        payload: RequestPayload,
    ) -> ServerResult<Connection> {
        let id = self.state.requests.record_sent(payload.kind(), target);
        match self.state.engine.send_request_holding(target, payload).await {
            Ok(conn) => {
                self.mark_request(id, RequestStatus::Processed);
                Ok(conn)
            }
            Err(e) => {
                if let Err(missing) = self.state.requests.fail(id, &e) {
                    tracing::warn!("{}", missing);
                }
                Err(e.into())
            }
        }
    }

    fn self_addr(&self) -> SocketAddr {
        let addr = self.state.local_addr;
        match addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
            }
            IpAddr::V6(ip) if ip.is_unspecified() => {
                SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
            }
            _ => addr,
        }
    }

    // ============== Public operations ==============

    pub async fn send_text_message(&self, remote: SocketAddr, text: impl Into<String>) -> ServerResult<()> {
        let text = text.into();
        let result = self
            .send(
                remote,
                RequestPayload::TextMessage {
                    message: text.clone(),
                },
            )
            .await;
        if result.is_ok() {
            self.state
                .conversations
                .add(remote, MessageAuthor::LocalServer, text);
        }
        self.report("send_text_message", result)
    }

    /// Offer `local_folder/file_name` to `remote`, to be stored in `remote_folder`
    pub async fn send_file(
        &self,
        remote: SocketAddr,
        file_name: &str,
        file_size: u64,
        local_folder: impl AsRef<Path>,
        remote_folder: &str,
    ) -> ServerResult<TransferId> {
        let local_folder = local_folder.as_ref().to_path_buf();
        let path = local_folder.join(file_name);
        if !super::handlers::is_plain_file_name(file_name) || !fs::file_exists(&path).await {
            return self.report("send_file", Err(ServerError::FileNotFound(path)));
        }

        let retry_limit = self.state.settings.transfer_retry_limit;
        let transfer = self.state.transfers.create(NewTransfer {
            direction: TransferDirection::Outbound,
            initiator: TransferInitiator::LocalServer,
            remote,
            file_name: file_name.to_string(),
            file_size,
            local_folder: local_folder.clone(),
            remote_folder: remote_folder.to_string(),
            retry_limit,
        });
        let id = transfer.id;
        let response_code = self.state.transfers.generate_response_code();
        self.state.transfers.update(id, |t| t.response_code = response_code)?;

        tracing::info!("Transfer {}: offering {} to {}", id, file_name, remote);
        let offer = FileOffer {
            transfer_id: id,
            recipient_transfer_id: 0,
            file_name: file_name.to_string(),
            file_size,
            sender_folder: local_folder.display().to_string(),
            recipient_folder: remote_folder.to_string(),
            response_code,
            retry_counter: transfer.retry_counter,
            retry_limit,
        };
        let result = self
            .send(remote, RequestPayload::OutboundFileTransferRequest(offer))
            .await
            .map(|_| id);
        self.report_transfer("send_file", id, result)
    }

    /// Ask `remote` for `remote_folder/file_name`, to be stored in `local_folder`
    pub async fn get_file(
        &self,
        remote: SocketAddr,
        file_name: &str,
        file_size: u64,
        remote_folder: &str,
        local_folder: impl AsRef<Path>,
    ) -> ServerResult<TransferId> {
        let local_folder = local_folder.as_ref().to_path_buf();
        let transfer = self.state.transfers.create(NewTransfer {
            direction: TransferDirection::Inbound,
            initiator: TransferInitiator::LocalServer,
            remote,
            file_name: file_name.to_string(),
            file_size,
            local_folder: local_folder.clone(),
            remote_folder: remote_folder.to_string(),
            retry_limit: self.state.settings.transfer_retry_limit,
        });
        let id = transfer.id;

        tracing::info!("Transfer {}: requesting {} from {}", id, file_name, remote);
        let result = self
            .send(
                remote,
                RequestPayload::InboundFileTransferRequest {
                    transfer_id: id,
                    file_name: file_name.to_string(),
                    remote_folder: remote_folder.to_string(),
                    local_folder: local_folder.display().to_string(),
                },
            )
            .await
            .map(|_| id);
        self.report_transfer("get_file", id, result)
    }

    pub async fn accept_inbound_file_transfer(&self, id: TransferId) -> ServerResult<()> {
        let result = self.accept_transfer(id).await;
        self.report_transfer("accept_inbound_file_transfer", id, result)
    }

    pub async fn reject_inbound_file_transfer(&self, id: TransferId) -> ServerResult<()> {
        let result = self.reject_transfer(id).await;
        self.report_transfer("reject_inbound_file_transfer", id, result)
    }

    /// Ask the sender for another attempt, subject to the retry limit and lockout
    pub async fn retry_file_transfer(&self, id: TransferId) -> ServerResult<()> {
        let result = self.retry_transfer(id).await;
        self.report_transfer("retry_file_transfer", id, result)
    }

    pub async fn notify_file_transfer_stalled(&self, id: TransferId) -> ServerResult<()> {
        let result = self.notify_stalled(id).await;
        self.report_transfer("notify_file_transfer_stalled", id, result)
    }

    pub async fn request_file_list(&self, remote: SocketAddr, folder: &str) -> ServerResult<()> {
        let result = self
            .send(
                remote,
                RequestPayload::FileListRequest {
                    folder: folder.to_string(),
                },
            )
            .await;
        self.report("request_file_list", result)
    }

    pub async fn request_server_info(&self, remote: SocketAddr) -> ServerResult<()> {
        let result = self.send(remote, RequestPayload::ServerInfoRequest).await;
        self.report("request_server_info", result)
    }

    /// Stop the accept loop by sending this node a shutdown command
    pub async fn shutdown(&self) -> ServerResult<()> {
        if self.state.shutdown.is_triggered() {
            return Ok(());
        }
        if self.state.listener.lock().is_some() {
            // Accept loop never started
            self.state.shutdown.trigger();
            self.state.stopped.trigger();
            return Ok(());
        }

        let result = self
            .send(self.self_addr(), RequestPayload::ShutdownServerCommand)
            .await;
        if result.is_err() {
            self.state.shutdown.trigger();
        }
        self.report("shutdown", result)
    }

    // ============== Queries ==============

    pub fn info(&self) -> &ServerInfo {
        &self.state.info
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.state.local_addr
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.state.settings
    }

    /// Address to dial for a peer, chosen against this node's network
    pub fn session_addr(&self, peer: &ServerInfo) -> SocketAddr {
        peer.session_addr(&self.state.cidr)
    }

    pub fn transfers(&self) -> Vec<FileTransfer> {
        self.state.transfers.snapshot()
    }

    pub fn transfer(&self, id: TransferId) -> ServerResult<FileTransfer> {
        Ok(self.state.transfers.get(id)?)
    }

    /// Offers from peers waiting for accept or reject
    pub fn pending_inbound_transfers(&self) -> Vec<FileTransfer> {
        self.state.transfers.pending_inbound()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.conversations.snapshot()
    }

    pub fn conversation(&self, remote: SocketAddr) -> Option<Conversation> {
        self.state.conversations.get(remote)
    }

    pub fn mark_conversation_read(&self, remote: SocketAddr) -> usize {
        self.state.conversations.mark_read(remote)
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.state.requests.snapshot()
    }

    /// Queued request ids in processing order
    pub fn backlog(&self) -> Vec<RequestId> {
        self.state.requests.backlog_ids()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.state.errors.snapshot()
    }

    pub fn events(&self) -> Vec<LoggedEvent> {
        self.state.events.snapshot()
    }

    pub fn peers(&self) -> Vec<RemotePeer> {
        self.state.peers.snapshot()
    }

    pub fn remote_file_list(&self, remote: SocketAddr) -> Option<RemoteFileList> {
        self.state.peers.find(remote).and_then(|p| p.file_list)
    }

    /// Whether a request is being processed right now
    pub fn is_busy(&self) -> bool {
        self.state.busy.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.shutdown.is_triggered()
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.state.engine.stats()
    }
}
