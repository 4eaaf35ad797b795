//! Handling for each received request kind, plus the byte-stream tasks an
//! accepted transfer runs on.

use crate::engine::ServerEvent;
use crate::metrics::{recorder, TransferMetrics};
use crate::network::Connection;
use crate::platform::{fs, PlatformError};
use crate::server::conversation::MessageAuthor;
use crate::server::error::{ServerError, ServerResult};
use crate::server::info::ServerInfo;
use crate::server::requests::{RequestId, RequestStatus};
use crate::server::server::FileServer;
use crate::transfer::{
    receive_file_bytes, send_file_bytes, FileTransfer, NewTransfer, StopSignal, StreamOutcome,
    StreamSignals, TransferDirection, TransferError, TransferEvent, TransferId, TransferInitiator,
    TransferResult, TransferStatus,
};
use crate::wire::{FileOffer, Request, RequestPayload};
use chrono::{DateTime, TimeZone, Utc};
use std::ffi::OsStr;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// A bare file name with no directory parts
pub(super) fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && Path::new(name).file_name() == Some(OsStr::new(name))
}

impl FileServer {
    pub(super) async fn process_request(
        &self,
        id: RequestId,
        request: Request,
        conn: Option<Connection>,
    ) -> ServerResult<()> {
        self.mark_request(id, RequestStatus::InProgress);
        let Request { sender, payload } = request;

        match payload {
            RequestPayload::TextMessage { message } => {
                self.on_text_message(sender, message);
                Ok(())
            }
            RequestPayload::InboundFileTransferRequest {
                transfer_id,
                file_name,
                remote_folder,
                local_folder,
            } => {
                self.on_file_requested(sender, transfer_id, file_name, remote_folder, local_folder)
                    .await
            }
            RequestPayload::OutboundFileTransferRequest(offer) => self.on_file_offered(sender, offer).await,
            RequestPayload::FileListRequest { folder } => self.on_file_list_requested(sender, folder).await,
            RequestPayload::FileListResponse { folder, files } => {
                self.emit(ServerEvent::ReceivedFileList {
                    remote: sender,
                    folder: folder.clone(),
                    files: files.len(),
                });
                self.state.peers.record_file_list(sender, folder, files);
                Ok(())
            }
            RequestPayload::NoFilesAvailableForDownload { folder } => {
                self.state
                    .peers
                    .record_file_list(sender, folder.clone(), Default::default());
                self.emit(ServerEvent::RemoteFolderUnavailable {
                    remote: sender,
                    folder,
                    empty: true,
                });
                Ok(())
            }
            RequestPayload::RequestedFolderDoesNotExist { folder } => {
                self.emit(ServerEvent::RemoteFolderUnavailable {
                    remote: sender,
                    folder,
                    empty: false,
                });
                Ok(())
            }
            RequestPayload::RequestedFileDoesNotExist { transfer_id } => {
                self.on_file_missing(sender, transfer_id)
            }
            RequestPayload::FileTransferAccepted { response_code } => {
                self.on_transfer_accepted(response_code, conn)
            }
            RequestPayload::FileTransferRejected { response_code } => {
                let transfer = self.find_transfer(response_code, TransferDirection::Outbound)?;
                self.transition(
                    transfer.id,
                    TransferEvent::Reject {
                        reason: Some(format!("Rejected by {}", transfer.remote)),
                    },
                )?;
                Ok(())
            }
            RequestPayload::FileTransferStalled { response_code } => {
                let transfer = self.find_transfer(response_code, TransferDirection::Outbound)?;
                self.state.transfers.stop(transfer.id);
                self.transition(transfer.id, TransferEvent::RemoteStalled)?;
                Ok(())
            }
            RequestPayload::FileTransferComplete { response_code } => {
                let transfer = self.find_transfer(response_code, TransferDirection::Outbound)?;
                self.transition(transfer.id, TransferEvent::Complete)?;
                tracing::info!("Transfer {}: {} confirmed by {}", transfer.id, transfer.file_name, sender);
                Ok(())
            }
            RequestPayload::RetryOutboundFileTransfer {
                response_code,
                retry_counter,
                transfer_id,
            } => {
                self.on_retry_requested(response_code, retry_counter, transfer_id)
                    .await
            }
            RequestPayload::RetryLimitExceeded {
                response_code,
                retry_limit,
                lockout_expire_ms,
            } => self.on_retry_limit_exceeded(response_code, retry_limit, lockout_expire_ms),
            RequestPayload::ServerInfoRequest => {
                let info = &self.state.info;
                let response = RequestPayload::ServerInfoResponse {
                    local_ip: info.local_ip,
                    public_ip: info.public_ip,
                    platform: info.platform.clone(),
                    transfer_folder: info.transfer_folder.clone(),
                };
                self.send(sender, response).await
            }
            RequestPayload::ServerInfoResponse {
                local_ip,
                public_ip,
                platform,
                transfer_folder,
            } => {
                self.emit(ServerEvent::ReceivedServerInfo {
                    remote: sender,
                    platform: platform.clone(),
                    transfer_folder: transfer_folder.clone(),
                });
                self.state.peers.remember(ServerInfo {
                    local_ip,
                    public_ip,
                    port: sender.port(),
                    platform,
                    transfer_folder,
                });
                Ok(())
            }
            RequestPayload::ShutdownServerCommand => Err(ServerError::ProtocolState(
                "shutdown commands are handled by the accept loop".into(),
            )),
        }
    }

    fn on_text_message(&self, sender: SocketAddr, message: String) {
        self.state
            .conversations
            .add(sender, MessageAuthor::RemoteServer, message.clone());
        self.emit(ServerEvent::ReceivedTextMessage {
            remote: sender,
            message,
        });
    }

    fn folder_or_default(&self, folder: &str) -> PathBuf {
        if folder.is_empty() {
            self.state.settings.local_server_folder_path.clone()
        } else {
            PathBuf::from(folder)
        }
    }

    fn find_transfer(&self, response_code: i64, direction: TransferDirection) -> ServerResult<FileTransfer> {
        let transfer = self.state.transfers.find_by_response_code(response_code)?;
        if transfer.direction != direction {
            return Err(ServerError::ProtocolState(format!(
                "response code {} belongs to {:?} transfer {}",
                response_code, transfer.direction, transfer.id
            )));
        }
        Ok(transfer)
    }

    fn lockout_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lockout = chrono::Duration::from_std(self.state.settings.retry_lockout_duration)
            .unwrap_or_else(|_| chrono::Duration::zero());
        now + lockout
    }

    // ============== File holder side ==============

    async fn on_file_list_requested(&self, sender: SocketAddr, folder: String) -> ServerResult<()> {
        let path = self.folder_or_default(&folder);
        let folder = path.display().to_string();

        let response = match fs::list_folder(&path).await {
            Ok(files) if files.is_empty() => RequestPayload::NoFilesAvailableForDownload { folder },
            Ok(files) => RequestPayload::FileListResponse { folder, files },
            Err(PlatformError::FolderNotFound(_)) => RequestPayload::RequestedFolderDoesNotExist { folder },
            Err(e) => return Err(e.into()),
        };
        self.send(sender, response).await
    }

    /// A peer asked for one of our files; offer it back or say it is missing
    async fn on_file_requested(
        &self,
        sender: SocketAddr,
        requester_id: TransferId,
        file_name: String,
        folder: String,
        requester_folder: String,
    ) -> ServerResult<()> {
        let folder = self.folder_or_default(&folder);
        let file_size = if is_plain_file_name(&file_name) {
            fs::file_size(&folder.join(&file_name)).await
        } else {
            None
        };

        let Some(file_size) = file_size else {
            tracing::info!("{} asked for {} in {}, which does not exist", sender, file_name, folder.display());
            return self
                .send(
                    sender,
                    RequestPayload::RequestedFileDoesNotExist {
                        transfer_id: requester_id,
                    },
                )
                .await;
        };

        let retry_limit = self.state.settings.transfer_retry_limit;
        let transfer = self.state.transfers.create(NewTransfer {
            direction: TransferDirection::Outbound,
            initiator: TransferInitiator::RemoteServer,
            remote: sender,
            file_name: file_name.clone(),
            file_size,
            local_folder: folder.clone(),
            remote_folder: requester_folder.clone(),
            retry_limit,
        });
        let id = transfer.id;
        let response_code = self.state.transfers.generate_response_code();
        self.state.transfers.update(id, |t| {
            t.response_code = response_code;
            t.remote_transfer_id = requester_id;
        })?;

        tracing::info!("Transfer {}: offering requested file {} to {}", id, file_name, sender);
        let offer = FileOffer {
            transfer_id: id,
            recipient_transfer_id: requester_id,
            file_name,
            file_size,
            sender_folder: folder.display().to_string(),
            recipient_folder: requester_folder,
            response_code,
            retry_counter: transfer.retry_counter,
            retry_limit,
        };
        let result = self
            .send(sender, RequestPayload::OutboundFileTransferRequest(offer))
            .await;
        self.with_transfer(id, result)
    }

    /// The receiver accepted; stream the file on the connection the accept
    /// arrived on
    fn on_transfer_accepted(&self, response_code: i64, conn: Option<Connection>) -> ServerResult<()> {
        let transfer = self.find_transfer(response_code, TransferDirection::Outbound)?;
        if transfer.status != TransferStatus::Pending {
            return Err(ServerError::ProtocolState(format!(
                "transfer {} was accepted while {}",
                transfer.id, transfer.status
            )));
        }
        let conn = conn.ok_or_else(|| {
            ServerError::ProtocolState("accepted transfer arrived without its connection".into())
        })?;

        let id = transfer.id;
        self.transition(id, TransferEvent::Accept)?;
        let transfer = self.transition(id, TransferEvent::BytesStarted)?;
        let stop = self.state.transfers.arm_stop(id);

        let server = self.clone();
        tokio::spawn(async move {
            let result = server.stream_to_peer(transfer, conn, stop).await;
            let _ = server.report_transfer("send file bytes", id, result);
        });
        Ok(())
    }

    async fn stream_to_peer(
        &self,
        transfer: FileTransfer,
        mut conn: Connection,
        stop: StopSignal,
    ) -> ServerResult<()> {
        let id = transfer.id;
        self.emit(ServerEvent::SendFileBytesStarted {
            transfer_id: id,
            file_size: transfer.file_size,
        });
        tracing::info!(
            "Transfer {}: sending {} ({} bytes) to {}",
            id,
            transfer.file_name,
            transfer.file_size,
            conn.peer_addr()
        );

        let mut metrics = TransferMetrics::start(TransferDirection::Outbound, transfer.file_size);
        let signals = StreamSignals {
            stop: &stop,
            shutdown: &self.state.shutdown,
        };
        let outcome = send_file_bytes(
            &mut conn,
            &transfer.local_path(),
            transfer.file_size,
            self.state.settings.socket_buffer_size,
            signals,
            self.progress_callback(id, transfer.file_size, &mut metrics),
        )
        .await;

        match outcome {
            Ok(StreamOutcome::Completed { bytes }) => {
                tracing::info!(
                    "Transfer {}: sent {} bytes in {:?} ({:.0} B/s)",
                    id,
                    bytes,
                    metrics.elapsed(),
                    metrics.throughput()
                );
                metrics.complete();
                self.emit(ServerEvent::SendFileBytesComplete {
                    transfer_id: id,
                    bytes,
                });
                conn.shutdown().await?;
                Ok(())
            }
            Ok(StreamOutcome::Stopped { bytes }) => {
                metrics.stopped();
                tracing::info!("Transfer {}: sending stopped after {} bytes", id, bytes);
                self.emit(ServerEvent::OutboundFileTransferStalled { transfer_id: id });
                Ok(())
            }
            Err(e) if stop.is_triggered() => {
                metrics.stopped();
                tracing::debug!("Transfer {}: stream ended after stop: {}", id, e);
                self.emit(ServerEvent::OutboundFileTransferStalled { transfer_id: id });
                Ok(())
            }
            Err(TransferError::NetworkError(e)) => {
                // The receiver may close its end before its stall notice lands
                metrics.stopped();
                tracing::info!("Transfer {}: peer stopped taking bytes: {}", id, e);
                self.mark_send_stalled(id);
                self.emit(ServerEvent::OutboundFileTransferStalled { transfer_id: id });
                Ok(())
            }
            Err(e) => {
                metrics.fail("send");
                Err(e.into())
            }
        }
    }

    /// Outbound stream broke off; a stall notice that already cancelled the
    /// transfer wins
    fn mark_send_stalled(&self, id: TransferId) {
        match self.state.transfers.update(id, |t| t.apply(TransferEvent::Stall)) {
            Ok(Ok(status)) => self.emit(ServerEvent::TransferStatusChanged {
                transfer_id: id,
                status,
            }),
            Ok(Err(e)) => tracing::debug!("{}", e),
            Err(e) => tracing::warn!("{}", e),
        }
    }

    /// The receiver asked for another attempt
    async fn on_retry_requested(
        &self,
        response_code: i64,
        attempt: u32,
        requester_id: TransferId,
    ) -> ServerResult<()> {
        let transfer = self.find_transfer(response_code, TransferDirection::Outbound)?;
        let id = transfer.id;
        let now = Utc::now();
        if !transfer.status.is_retryable() {
            return Err(ServerError::ProtocolState(format!(
                "retry asked for transfer {} while {}",
                id, transfer.status
            )));
        }

        if transfer.is_locked_out(now) || attempt > transfer.retry_limit {
            let expires_at = match transfer.retry_lockout_expire {
                Some(expire) if now < expire => expire,
                _ => self.lockout_expiry(now),
            };
            self.state
                .transfers
                .update(id, |t| t.retry_lockout_expire = Some(expires_at))?;
            if transfer.status != TransferStatus::RetryLimitExceeded {
                self.transition(id, TransferEvent::RetryLimitReached)?;
            }
            self.emit(ServerEvent::RetryLimitExceeded {
                transfer_id: id,
                retry_limit: transfer.retry_limit,
                lockout_expire: expires_at,
            });
            tracing::info!("Transfer {}: refusing attempt {}, locked out until {}", id, attempt, expires_at);

            let result = self
                .send(
                    transfer.remote,
                    RequestPayload::RetryLimitExceeded {
                        response_code,
                        retry_limit: transfer.retry_limit,
                        lockout_expire_ms: expires_at.timestamp_millis(),
                    },
                )
                .await;
            return self.with_transfer(id, result);
        }

        let new_code = self.state.transfers.generate_response_code();
        let transfer = self
            .state
            .transfers
            .update(id, |t| -> TransferResult<FileTransfer> {
                t.apply(TransferEvent::Retry)?;
                t.reset_for_retry();
                t.retry_counter = attempt;
                t.remote_transfer_id = requester_id;
                t.retry_lockout_expire = None;
                t.response_code = new_code;
                Ok(t.clone())
            })??;
        self.emit(ServerEvent::TransferStatusChanged {
            transfer_id: id,
            status: transfer.status,
        });
        recorder::record_retry(attempt);
        tracing::info!("Transfer {}: re-offering {} (attempt {})", id, transfer.file_name, attempt);

        let offer = FileOffer {
            transfer_id: id,
            recipient_transfer_id: requester_id,
            file_name: transfer.file_name.clone(),
            file_size: transfer.file_size,
            sender_folder: transfer.local_folder.display().to_string(),
            recipient_folder: transfer.remote_folder.clone(),
            response_code: new_code,
            retry_counter: attempt,
            retry_limit: transfer.retry_limit,
        };
        let result = self
            .send(transfer.remote, RequestPayload::OutboundFileTransferRequest(offer))
            .await;
        self.with_transfer(id, result)
    }

    // ============== Receiver side ==============

    async fn on_file_offered(&self, sender: SocketAddr, offer: FileOffer) -> ServerResult<()> {
        if offer.recipient_transfer_id != 0 {
            return self.on_file_reoffered(offer).await;
        }

        let transfer = self.state.transfers.create(NewTransfer {
            direction: TransferDirection::Inbound,
            initiator: TransferInitiator::RemoteServer,
            remote: sender,
            file_name: offer.file_name.clone(),
            file_size: offer.file_size,
            local_folder: self.folder_or_default(&offer.recipient_folder),
            remote_folder: offer.sender_folder.clone(),
            retry_limit: offer.retry_limit,
        });
        let id = transfer.id;
        let transfer = self.state.transfers.update(id, |t| {
            t.response_code = offer.response_code;
            t.remote_transfer_id = offer.transfer_id;
            t.retry_counter = offer.retry_counter.max(1);
            t.clone()
        })?;

        self.emit(ServerEvent::InboundFileTransferOffered {
            transfer_id: id,
            remote: sender,
            file_name: transfer.file_name.clone(),
            file_size: transfer.file_size,
        });
        tracing::info!(
            "Transfer {}: {} offers {} ({} bytes)",
            id,
            sender,
            transfer.file_name,
            transfer.file_size
        );

        self.reject_if_unwritable(transfer).await
    }

    /// A fresh offer for a transfer this node already knows: the answer to
    /// `get_file` or a retry
    async fn on_file_reoffered(&self, offer: FileOffer) -> ServerResult<()> {
        let id = offer.recipient_transfer_id;
        let existing = self.state.transfers.get(id)?;
        if existing.direction != TransferDirection::Inbound || existing.status != TransferStatus::Pending {
            return Err(ServerError::ProtocolState(format!(
                "offer names transfer {} which is not waiting for one ({})",
                id, existing.status
            )));
        }

        let transfer = self.state.transfers.update(id, |t| {
            t.response_code = offer.response_code;
            t.remote_transfer_id = offer.transfer_id;
            t.file_size = offer.file_size;
            t.retry_limit = offer.retry_limit;
            t.retry_counter = offer.retry_counter.max(1);
            t.clone()
        })?;

        self.emit(ServerEvent::InboundFileTransferOffered {
            transfer_id: id,
            remote: transfer.remote,
            file_name: transfer.file_name.clone(),
            file_size: transfer.file_size,
        });

        if transfer.accepted_once {
            tracing::info!("Transfer {}: accepting attempt {}", id, transfer.retry_counter);
            let result = self.accept_transfer(id).await;
            return self.with_transfer(id, result);
        }
        self.reject_if_unwritable(transfer).await
    }

    /// Reject offers that would overwrite a local file or escape the folder
    async fn reject_if_unwritable(&self, transfer: FileTransfer) -> ServerResult<()> {
        let reason = if !is_plain_file_name(&transfer.file_name) {
            format!("{:?} is not a plain file name", transfer.file_name)
        } else if fs::file_exists(&transfer.local_path()).await {
            format!(
                "{} already exists in {}",
                transfer.file_name,
                transfer.local_folder.display()
            )
        } else {
            return Ok(());
        };

        let id = transfer.id;
        self.transition(
            id,
            TransferEvent::Reject {
                reason: Some(reason.clone()),
            },
        )?;
        self.record_error(format!("Transfer {id} rejected: {reason}"), Some(id), None);

        let result = self
            .send(
                transfer.remote,
                RequestPayload::FileTransferRejected {
                    response_code: transfer.response_code,
                },
            )
            .await;
        self.with_transfer(id, result)
    }

    fn on_file_missing(&self, sender: SocketAddr, transfer_id: TransferId) -> ServerResult<()> {
        let transfer = self.state.transfers.find_requested(transfer_id)?;
        let reason = format!("{} does not exist on {}", transfer.file_name, sender);
        self.transition(
            transfer.id,
            TransferEvent::Reject {
                reason: Some(reason.clone()),
            },
        )?;
        self.record_error(format!("Transfer {}: {}", transfer.id, reason), Some(transfer.id), None);
        Ok(())
    }

    fn on_retry_limit_exceeded(
        &self,
        response_code: i64,
        retry_limit: u32,
        lockout_expire_ms: i64,
    ) -> ServerResult<()> {
        let transfer = self.find_transfer(response_code, TransferDirection::Inbound)?;
        let id = transfer.id;
        let expires_at = Utc
            .timestamp_millis_opt(lockout_expire_ms)
            .single()
            .unwrap_or_else(Utc::now);

        self.state.transfers.update(id, |t| {
            t.retry_limit = retry_limit;
            t.retry_lockout_expire = Some(expires_at);
        })?;
        if transfer.status != TransferStatus::RetryLimitExceeded {
            self.transition(id, TransferEvent::RetryRefused)?;
        }
        self.emit(ServerEvent::RetryLimitExceeded {
            transfer_id: id,
            retry_limit,
            lockout_expire: expires_at,
        });
        Ok(())
    }

    /// Offer from a peer that is still waiting for accept or reject
    fn pending_offer(&self, id: TransferId) -> ServerResult<FileTransfer> {
        let transfer = self.state.transfers.get(id)?;
        if transfer.direction != TransferDirection::Inbound
            || transfer.status != TransferStatus::Pending
            || transfer.response_code == 0
        {
            return Err(ServerError::ProtocolState(format!(
                "transfer {} is not an offer awaiting a decision ({})",
                id, transfer.status
            )));
        }
        Ok(transfer)
    }

    pub(super) async fn accept_transfer(&self, id: TransferId) -> ServerResult<()> {
        self.pending_offer(id)?;
        let transfer = self.transition(id, TransferEvent::Accept)?;

        // Hold the connection open; the sender streams the bytes back on it
        let conn = self
            .send_holding(
                transfer.remote,
                RequestPayload::FileTransferAccepted {
                    response_code: transfer.response_code,
                },
            )
            .await?;
        let stop = self.state.transfers.arm_stop(id);

        let server = self.clone();
        tokio::spawn(async move {
            let result = server.stream_from_peer(transfer, conn, stop).await;
            let _ = server.report_transfer("receive file bytes", id, result);
        });
        Ok(())
    }

    async fn stream_from_peer(
        &self,
        transfer: FileTransfer,
        mut conn: Connection,
        stop: StopSignal,
    ) -> ServerResult<()> {
        let id = transfer.id;
        tokio::fs::create_dir_all(&transfer.local_folder).await?;
        self.transition(id, TransferEvent::BytesStarted)?;
        self.emit(ServerEvent::ReceiveFileBytesStarted {
            transfer_id: id,
            file_size: transfer.file_size,
        });

        let mut metrics = TransferMetrics::start(TransferDirection::Inbound, transfer.file_size);
        let signals = StreamSignals {
            stop: &stop,
            shutdown: &self.state.shutdown,
        };
        let outcome = receive_file_bytes(
            &mut conn,
            &transfer.local_path(),
            transfer.file_size,
            self.state.settings.socket_buffer_size,
            signals,
            self.progress_callback(id, transfer.file_size, &mut metrics),
        )
        .await;

        match outcome {
            Ok(StreamOutcome::Completed { bytes }) => {
                let (elapsed, throughput) = (metrics.elapsed(), metrics.throughput());
                metrics.complete();
                drop(conn);
                let transfer = self.transition(id, TransferEvent::Complete)?;
                self.emit(ServerEvent::ReceiveFileBytesComplete {
                    transfer_id: id,
                    bytes,
                });
                tracing::info!(
                    "Transfer {}: received {} ({} bytes in {:?}, {:.0} B/s)",
                    id,
                    transfer.file_name,
                    bytes,
                    elapsed,
                    throughput
                );

                self.send(
                    transfer.remote,
                    RequestPayload::FileTransferComplete {
                        response_code: transfer.response_code,
                    },
                )
                .await
            }
            Ok(StreamOutcome::Stopped { bytes }) => {
                metrics.stopped();
                tracing::info!("Transfer {}: receiving stopped after {} bytes", id, bytes);
                Ok(())
            }
            Err(e) if stop.is_triggered() || self.is_stalled(id) => {
                metrics.stopped();
                tracing::debug!("Transfer {}: stream ended after stop: {}", id, e);
                Ok(())
            }
            Err(e) => {
                metrics.fail("receive");
                Err(e.into())
            }
        }
    }

    /// The sender may close the stream as soon as it reads our stall
    /// notice, before our own stop fires
    fn is_stalled(&self, id: TransferId) -> bool {
        self.state
            .transfers
            .get(id)
            .map(|t| t.status == TransferStatus::Stalled)
            .unwrap_or(false)
    }

    pub(super) async fn reject_transfer(&self, id: TransferId) -> ServerResult<()> {
        self.pending_offer(id)?;
        let transfer = self.transition(
            id,
            TransferEvent::Reject {
                reason: Some("Rejected by user".into()),
            },
        )?;
        self.send(
            transfer.remote,
            RequestPayload::FileTransferRejected {
                response_code: transfer.response_code,
            },
        )
        .await
    }

    pub(super) async fn retry_transfer(&self, id: TransferId) -> ServerResult<()> {
        let transfer = self.state.transfers.get(id)?;
        if transfer.direction != TransferDirection::Inbound {
            return Err(ServerError::ProtocolState(format!(
                "transfer {id} is outbound; only the receiving side asks for a retry"
            )));
        }
        if !transfer.status.is_retryable() {
            return Err(ServerError::ProtocolState(format!(
                "transfer {id} cannot be retried while {}",
                transfer.status
            )));
        }

        let now = Utc::now();
        if transfer.status == TransferStatus::RetryLimitExceeded {
            if let Some(expires_at) = transfer.retry_lockout_expire.filter(|expire| now < *expire) {
                return Err(TransferError::RetryLockout {
                    transfer_id: id,
                    expires_at,
                }
                .into());
            }
            // Lockout over: the attempt count starts again
            self.state.transfers.update(id, |t| {
                t.retry_counter = 0;
                t.retry_lockout_expire = None;
            })?;
        }

        let transfer = self.state.transfers.get(id)?;
        let attempt = transfer.retry_counter + 1;
        if attempt > transfer.retry_limit {
            if transfer.status != TransferStatus::RetryLimitExceeded {
                self.transition(id, TransferEvent::RetryLimitReached)?;
            }
            let expires_at = self.lockout_expiry(now);
            self.state
                .transfers
                .update(id, |t| t.retry_lockout_expire = Some(expires_at))?;
            self.emit(ServerEvent::RetryLimitExceeded {
                transfer_id: id,
                retry_limit: transfer.retry_limit,
                lockout_expire: expires_at,
            });
            return Err(TransferError::RetryLockout {
                transfer_id: id,
                expires_at,
            }
            .into());
        }

        let transfer = self
            .state
            .transfers
            .update(id, |t| -> TransferResult<FileTransfer> {
                t.apply(TransferEvent::Retry)?;
                t.reset_for_retry();
                t.retry_counter = attempt;
                Ok(t.clone())
            })??;
        self.emit(ServerEvent::TransferStatusChanged {
            transfer_id: id,
            status: transfer.status,
        });
        recorder::record_retry(attempt);
        tracing::info!(
            "Transfer {}: requesting attempt {} of {}",
            id,
            attempt,
            transfer.retry_limit
        );

        self.send(
            transfer.remote,
            RequestPayload::RetryOutboundFileTransfer {
                response_code: transfer.response_code,
                retry_counter: attempt,
                transfer_id: id,
            },
        )
        .await
    }

    pub(super) async fn notify_stalled(&self, id: TransferId) -> ServerResult<()> {
        let transfer = self.state.transfers.get(id)?;
        if transfer.direction != TransferDirection::Inbound {
            return Err(ServerError::ProtocolState(format!(
                "transfer {id} is outbound; only the receiving side reports a stall"
            )));
        }

        let transfer = self.transition(id, TransferEvent::Stall)?;
        // Tell the sender before our end of the stream closes
        let result = self
            .send(
                transfer.remote,
                RequestPayload::FileTransferStalled {
                    response_code: transfer.response_code,
                },
            )
            .await;
        self.state.transfers.stop(id);
        result
    }

    /// Progress hook for a byte stream: updates the record and metrics, and
    /// emits a progress event every configured fraction of the file
    fn progress_callback<'a>(
        &'a self,
        id: TransferId,
        file_size: u64,
        metrics: &'a mut TransferMetrics,
    ) -> impl FnMut(u64) + Send + 'a {
        let step = self.state.settings.progress_step(file_size);
        let mut next_report = step;
        move |total| {
            if let Err(e) = self.state.transfers.update(id, |t| t.record_progress(total)) {
                tracing::debug!("Progress for transfer {}: {}", id, e);
            }
            metrics.set_bytes(total);
            if total >= next_report || total == file_size {
                next_report = total.saturating_add(step);
                self.emit(ServerEvent::TransferProgress {
                    transfer_id: id,
                    bytes: total,
                    file_size,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_file_names() {
        assert!(is_plain_file_name("report.pdf"));
        assert!(is_plain_file_name(".hidden"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("../secret"));
        assert!(!is_plain_file_name("nested/file.txt"));
        assert!(!is_plain_file_name("/etc/passwd"));
    }
}
