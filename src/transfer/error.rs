use crate::transfer::types::TransferStatus;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transfer {transfer_id}: cannot apply {event} while {status}")]
    InvalidTransition {
        transfer_id: u32,
        status: TransferStatus,
        event: String,
    },

    #[error("Transfer {transfer_id}: maximum attempts reached, retry locked out until {expires_at}")]
    RetryLockout {
        transfer_id: u32,
        expires_at: DateTime<Utc>,
    },

    #[error("File ended after {read} of {expected} bytes")]
    FileTruncated { read: u64, expected: u64 },

    #[error("Network error: {0}")]
    NetworkError(#[from] crate::network::NetworkError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type TransferResult<T> = Result<T, TransferError>;

/// Failure to locate the transfer or request a message refers to
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("No transfer matches response code {response_code}")]
    NoMatch { response_code: i64 },

    #[error("{count} transfers match response code {response_code}")]
    Ambiguous { response_code: i64, count: usize },

    #[error("Transfer not found: {0}")]
    UnknownTransfer(u32),

    #[error("Request not found: {0}")]
    UnknownRequest(u32),
}

pub type CorrelationResult<T> = Result<T, CorrelationError>;
