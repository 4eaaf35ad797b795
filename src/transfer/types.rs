use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub type TransferId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    Inbound,
    Outbound,
}

/// Which node asked for the transfer to happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferInitiator {
    LocalServer,
    RemoteServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    Accepted,
    Rejected,
    InProgress,
    Stalled,
    Cancelled,
    ConfirmedComplete,
    RetryLimitExceeded,
    Error,
}

impl TransferStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TransferStatus::Accepted | TransferStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Rejected | TransferStatus::ConfirmedComplete | TransferStatus::Error
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferStatus::Stalled | TransferStatus::Cancelled | TransferStatus::RetryLimitExceeded
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Fields fixed when a transfer record is created
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub direction: TransferDirection,
    pub initiator: TransferInitiator,
    pub remote: SocketAddr,
    pub file_name: String,
    pub file_size: u64,
    pub local_folder: PathBuf,
    pub remote_folder: String,
    pub retry_limit: u32,
}

/// One file moving in one direction between this node and a peer.
///
/// Records are kept for the life of the process; a retry reuses the same
/// record (and id) with fresh byte counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTransfer {
    pub id: TransferId,
    /// The peer's id for the same transfer, 0 until known
    pub remote_transfer_id: TransferId,
    /// Correlation token for the current attempt, 0 until assigned
    pub response_code: i64,
    pub direction: TransferDirection,
    pub initiator: TransferInitiator,
    pub status: TransferStatus,
    pub remote: SocketAddr,
    pub file_name: String,
    pub file_size: u64,
    pub local_folder: PathBuf,
    pub remote_folder: String,
    pub bytes_transferred: u64,
    pub chunk_count: u64,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Attempt number of the current attempt, starting at 1
    pub retry_counter: u32,
    pub retry_limit: u32,
    pub retry_lockout_expire: Option<DateTime<Utc>>,
    /// Set once the transfer has been accepted; re-offers are then accepted
    /// without asking again
    pub accepted_once: bool,
    pub error_message: Option<String>,
}

impl FileTransfer {
    pub fn new(id: TransferId, new: NewTransfer) -> Self {
        Self {
            id,
            remote_transfer_id: 0,
            response_code: 0,
            direction: new.direction,
            initiator: new.initiator,
            status: TransferStatus::Pending,
            remote: new.remote,
            file_name: new.file_name,
            file_size: new.file_size,
            local_folder: new.local_folder,
            remote_folder: new.remote_folder,
            bytes_transferred: 0,
            chunk_count: 0,
            requested_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_counter: 1,
            retry_limit: new.retry_limit,
            retry_lockout_expire: None,
            accepted_once: false,
            error_message: None,
        }
    }

    pub fn local_path(&self) -> PathBuf {
        self.local_folder.join(&self.file_name)
    }

    pub fn bytes_remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.bytes_transferred)
    }

    pub fn percent_complete(&self) -> f64 {
        if self.file_size == 0 {
            return if self.status == TransferStatus::ConfirmedComplete {
                100.0
            } else {
                0.0
            };
        }
        (self.bytes_transferred as f64 / self.file_size as f64) * 100.0
    }

    /// Time spent moving bytes, up to completion or now
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - started).to_std().ok()
    }

    pub fn throughput_bps(&self) -> f64 {
        match self.elapsed() {
            Some(elapsed) if elapsed.as_secs_f64() > 0.0 => {
                self.bytes_transferred as f64 / elapsed.as_secs_f64()
            }
            _ => 0.0,
        }
    }

    /// Locked out while `now` is before the lockout expiry
    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        self.retry_lockout_expire
            .map(|expire| now < expire)
            .unwrap_or(false)
    }

    /// Clear per-attempt progress; identity and retry counters are kept
    pub fn reset_for_retry(&mut self) {
        self.bytes_transferred = 0;
        self.chunk_count = 0;
        self.started_at = None;
        self.completed_at = None;
        self.error_message = None;
    }

    pub fn record_progress(&mut self, total_bytes: u64) {
        self.bytes_transferred = total_bytes.min(self.file_size);
        self.chunk_count += 1;
    }
}
