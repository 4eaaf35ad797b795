use crate::wire::error::{CodecError, CodecResult};
use crate::wire::file_list::FileList;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Stable integer tags identifying each request on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum RequestKind {
    TextMessage = 1,
    InboundFileTransferRequest = 2,
    OutboundFileTransferRequest = 3,
    FileListRequest = 4,
    FileListResponse = 5,
    NoFilesAvailableForDownload = 6,
    RequestedFolderDoesNotExist = 7,
    RequestedFileDoesNotExist = 8,
    FileTransferAccepted = 9,
    FileTransferRejected = 10,
    FileTransferStalled = 11,
    FileTransferComplete = 12,
    RetryOutboundFileTransfer = 13,
    RetryLimitExceeded = 14,
    ServerInfoRequest = 15,
    ServerInfoResponse = 16,
    ShutdownServerCommand = 17,
}

impl RequestKind {
    pub const ALL: [RequestKind; 17] = [
        RequestKind::TextMessage,
        RequestKind::InboundFileTransferRequest,
        RequestKind::OutboundFileTransferRequest,
        RequestKind::FileListRequest,
        RequestKind::FileListResponse,
        RequestKind::NoFilesAvailableForDownload,
        RequestKind::RequestedFolderDoesNotExist,
        RequestKind::RequestedFileDoesNotExist,
        RequestKind::FileTransferAccepted,
        RequestKind::FileTransferRejected,
        RequestKind::FileTransferStalled,
        RequestKind::FileTransferComplete,
        RequestKind::RetryOutboundFileTransfer,
        RequestKind::RetryLimitExceeded,
        RequestKind::ServerInfoRequest,
        RequestKind::ServerInfoResponse,
        RequestKind::ShutdownServerCommand,
    ];

    pub fn tag(self) -> i32 {
        self as i32
    }

    /// Deferrable kinds wait in the backlog while the node is busy; every
    /// other kind is a short control message processed on arrival.
    pub fn is_deferrable(self) -> bool {
        matches!(
            self,
            RequestKind::TextMessage | RequestKind::OutboundFileTransferRequest
        )
    }

    /// Kinds whose payload carries the sender's self-reported addresses.
    pub fn reports_own_address(self) -> bool {
        matches!(self, RequestKind::ServerInfoResponse)
    }
}

impl TryFrom<i32> for RequestKind {
    type Error = CodecError;

    fn try_from(tag: i32) -> Result<Self, Self::Error> {
        RequestKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.tag() == tag)
            .ok_or(CodecError::UnknownKind(tag))
    }
}

/// Offer to send one file; also used to re-offer a file after a retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOffer {
    /// Transfer id on the sending node
    pub transfer_id: u32,
    /// Existing transfer id on the receiving node, 0 for a fresh offer
    pub recipient_transfer_id: u32,
    pub file_name: String,
    pub file_size: u64,
    pub sender_folder: String,
    pub recipient_folder: String,
    pub response_code: i64,
    pub retry_counter: u32,
    pub retry_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPayload {
    TextMessage {
        message: String,
    },
    InboundFileTransferRequest {
        transfer_id: u32,
        file_name: String,
        remote_folder: String,
        local_folder: String,
    },
    OutboundFileTransferRequest(FileOffer),
    FileListRequest {
        folder: String,
    },
    FileListResponse {
        folder: String,
        files: FileList,
    },
    NoFilesAvailableForDownload {
        folder: String,
    },
    RequestedFolderDoesNotExist {
        folder: String,
    },
    RequestedFileDoesNotExist {
        transfer_id: u32,
    },
    FileTransferAccepted {
        response_code: i64,
    },
    FileTransferRejected {
        response_code: i64,
    },
    FileTransferStalled {
        response_code: i64,
    },
    FileTransferComplete {
        response_code: i64,
    },
    RetryOutboundFileTransfer {
        response_code: i64,
        retry_counter: u32,
        transfer_id: u32,
    },
    RetryLimitExceeded {
        response_code: i64,
        retry_limit: u32,
        lockout_expire_ms: i64,
    },
    ServerInfoRequest,
    ServerInfoResponse {
        local_ip: IpAddr,
        public_ip: Option<IpAddr>,
        platform: String,
        transfer_folder: String,
    },
    ShutdownServerCommand,
}

impl RequestPayload {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestPayload::TextMessage { .. } => RequestKind::TextMessage,
            RequestPayload::InboundFileTransferRequest { .. } => {
                RequestKind::InboundFileTransferRequest
            }
            RequestPayload::OutboundFileTransferRequest(_) => {
                RequestKind::OutboundFileTransferRequest
            }
            RequestPayload::FileListRequest { .. } => RequestKind::FileListRequest,
            RequestPayload::FileListResponse { .. } => RequestKind::FileListResponse,
            RequestPayload::NoFilesAvailableForDownload { .. } => {
                RequestKind::NoFilesAvailableForDownload
            }
            RequestPayload::RequestedFolderDoesNotExist { .. } => {
                RequestKind::RequestedFolderDoesNotExist
            }
            RequestPayload::RequestedFileDoesNotExist { .. } => {
                RequestKind::RequestedFileDoesNotExist
            }
            RequestPayload::FileTransferAccepted { .. } => RequestKind::FileTransferAccepted,
            RequestPayload::FileTransferRejected { .. } => RequestKind::FileTransferRejected,
            RequestPayload::FileTransferStalled { .. } => RequestKind::FileTransferStalled,
            RequestPayload::FileTransferComplete { .. } => RequestKind::FileTransferComplete,
            RequestPayload::RetryOutboundFileTransfer { .. } => {
                RequestKind::RetryOutboundFileTransfer
            }
            RequestPayload::RetryLimitExceeded { .. } => RequestKind::RetryLimitExceeded,
            RequestPayload::ServerInfoRequest => RequestKind::ServerInfoRequest,
            RequestPayload::ServerInfoResponse { .. } => RequestKind::ServerInfoResponse,
            RequestPayload::ShutdownServerCommand => RequestKind::ShutdownServerCommand,
        }
    }
}

/// One decoded (or about-to-be-encoded) request frame.
///
/// `sender` is the address the sending node listens on. For received
/// requests the engine replaces its IP with the observed socket peer,
/// except for kinds that report the sender's own addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub sender: SocketAddr,
    pub payload: RequestPayload,
}

impl Request {
    pub fn new(sender: SocketAddr, payload: RequestPayload) -> Self {
        Self { sender, payload }
    }

    pub fn kind(&self) -> RequestKind {
        self.payload.kind()
    }

    /// Text of a `TextMessage` request
    pub fn text_message(&self) -> CodecResult<&str> {
        match &self.payload {
            RequestPayload::TextMessage { message } => Ok(message),
            _ => Err(self.wrong_kind(RequestKind::TextMessage)),
        }
    }

    /// Response code carried by the transfer control kinds and file offers
    pub fn response_code(&self) -> CodecResult<i64> {
        match &self.payload {
            RequestPayload::OutboundFileTransferRequest(offer) => Ok(offer.response_code),
            RequestPayload::FileTransferAccepted { response_code }
            | RequestPayload::FileTransferRejected { response_code }
            | RequestPayload::FileTransferStalled { response_code }
            | RequestPayload::FileTransferComplete { response_code }
            | RequestPayload::RetryOutboundFileTransfer { response_code, .. }
            | RequestPayload::RetryLimitExceeded { response_code, .. } => Ok(*response_code),
            _ => Err(self.wrong_kind(RequestKind::FileTransferAccepted)),
        }
    }

    /// Listing of a `FileListResponse` request
    pub fn file_list(&self) -> CodecResult<&FileList> {
        match &self.payload {
            RequestPayload::FileListResponse { files, .. } => Ok(files),
            _ => Err(self.wrong_kind(RequestKind::FileListResponse)),
        }
    }

    fn wrong_kind(&self, expected: RequestKind) -> CodecError {
        CodecError::WrongKind {
            expected,
            actual: self.kind(),
        }
    }
}
