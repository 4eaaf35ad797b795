use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::types::{FileTransfer, TransferStatus};
use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Accept,
    Reject { reason: Option<String> },
    BytesStarted,
    /// Bytes stopped flowing: reported by the receiver, or seen by the
    /// sender when the stream breaks
    Stall,
    /// Receiver told the sender the transfer stalled
    RemoteStalled,
    Complete,
    Retry,
    RetryLimitReached,
    /// Sender answered a requested attempt with RetryLimitExceeded
    RetryRefused,
    Fail { error: String },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferEvent::Accept => "accept",
            TransferEvent::Reject { .. } => "reject",
            TransferEvent::BytesStarted => "bytes-started",
            TransferEvent::Stall => "stall",
            TransferEvent::RemoteStalled => "remote-stalled",
            TransferEvent::Complete => "complete",
            TransferEvent::Retry => "retry",
            TransferEvent::RetryLimitReached => "retry-limit-reached",
            TransferEvent::RetryRefused => "retry-refused",
            TransferEvent::Fail { .. } => "fail",
        };
        f.write_str(name)
    }
}

/// Next status for `event`, or `None` if the event is not valid in `status`
pub fn next_status(status: TransferStatus, event: &TransferEvent) -> Option<TransferStatus> {
    use TransferStatus::*;

    let next = match (status, event) {
        (Pending, TransferEvent::Accept) => Accepted,
        (Pending, TransferEvent::Reject { .. }) => Rejected,

        (Accepted, TransferEvent::BytesStarted) => InProgress,

        // Receiving side
        (Accepted | InProgress, TransferEvent::Stall) => Stalled,

        // Sending side learns of the stall from the receiver
        (Accepted | InProgress | Stalled, TransferEvent::RemoteStalled) => Cancelled,

        (Accepted | InProgress, TransferEvent::Complete) => ConfirmedComplete,

        // New attempt on the same record
        (Stalled | Cancelled | RetryLimitExceeded, TransferEvent::Retry) => Pending,

        (Stalled | Cancelled, TransferEvent::RetryLimitReached) => RetryLimitExceeded,
        // Receiver waits in Pending for the re-offer that never comes
        (Pending, TransferEvent::RetryRefused) => RetryLimitExceeded,

        (current, TransferEvent::Fail { .. }) if !current.is_terminal() => Error,

        _ => return None,
    };
    Some(next)
}

impl FileTransfer {
    /// Apply a lifecycle event, updating status and the timestamps tied to it
    pub fn apply(&mut self, event: TransferEvent) -> TransferResult<TransferStatus> {
        let next = next_status(self.status, &event).ok_or_else(|| {
            TransferError::InvalidTransition {
                transfer_id: self.id,
                status: self.status,
                event: event.to_string(),
            }
        })?;

        match event {
            TransferEvent::Accept => self.accepted_once = true,
            TransferEvent::BytesStarted => self.started_at = Some(Utc::now()),
            TransferEvent::Complete => {
                self.bytes_transferred = self.file_size;
                self.completed_at = Some(Utc::now());
            }
            TransferEvent::Reject { reason } => self.error_message = reason,
            TransferEvent::Fail { error } => self.error_message = Some(error),
            _ => {}
        }

        tracing::debug!("Transfer {}: {} -> {}", self.id, self.status, next);
        self.status = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::types::{NewTransfer, TransferDirection, TransferInitiator};
    use std::path::PathBuf;

    fn transfer() -> FileTransfer {
        FileTransfer::new(
            7,
            NewTransfer {
                direction: TransferDirection::Outbound,
                initiator: TransferInitiator::LocalServer,
                remote: "127.0.0.1:9002".parse().unwrap(),
                file_name: "data.bin".into(),
                file_size: 1000,
                local_folder: PathBuf::from("/tmp/out"),
                remote_folder: "/tmp/in".into(),
                retry_limit: 2,
            },
        )
    }

    #[test]
    fn test_happy_path() {
        let mut t = transfer();
        assert_eq!(t.apply(TransferEvent::Accept).unwrap(), TransferStatus::Accepted);
        assert!(t.accepted_once);
        assert_eq!(
            t.apply(TransferEvent::BytesStarted).unwrap(),
            TransferStatus::InProgress
        );
        assert!(t.started_at.is_some());
        assert_eq!(
            t.apply(TransferEvent::Complete).unwrap(),
            TransferStatus::ConfirmedComplete
        );
        assert_eq!(t.bytes_transferred, 1000);
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn test_reject_keeps_reason() {
        let mut t = transfer();
        t.apply(TransferEvent::Reject {
            reason: Some("data.bin already exists".into()),
        })
        .unwrap();
        assert_eq!(t.status, TransferStatus::Rejected);
        assert!(t.error_message.unwrap().contains("already exists"));
    }

    #[test]
    fn test_stall_cancel_retry_cycle() {
        let mut t = transfer();
        t.apply(TransferEvent::Accept).unwrap();
        t.apply(TransferEvent::BytesStarted).unwrap();
        assert_eq!(t.apply(TransferEvent::RemoteStalled).unwrap(), TransferStatus::Cancelled);
        assert_eq!(t.apply(TransferEvent::Retry).unwrap(), TransferStatus::Pending);
        t.apply(TransferEvent::Accept).unwrap();
        assert_eq!(t.apply(TransferEvent::Stall).unwrap(), TransferStatus::Stalled);
        assert_eq!(
            t.apply(TransferEvent::RetryLimitReached).unwrap(),
            TransferStatus::RetryLimitExceeded
        );
        assert_eq!(t.apply(TransferEvent::Retry).unwrap(), TransferStatus::Pending);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut t = transfer();
        let err = t.apply(TransferEvent::Complete).unwrap_err();
        assert!(matches!(
            err,
            TransferError::InvalidTransition {
                transfer_id: 7,
                status: TransferStatus::Pending,
                ..
            }
        ));
        assert!(t.apply(TransferEvent::Retry).is_err());
        assert!(t.apply(TransferEvent::RetryLimitReached).is_err());
        assert_eq!(t.status, TransferStatus::Pending);
    }

    #[test]
    fn test_broken_send_then_remote_stall() {
        let mut t = transfer();
        t.apply(TransferEvent::Accept).unwrap();
        t.apply(TransferEvent::BytesStarted).unwrap();
        assert_eq!(t.apply(TransferEvent::Stall).unwrap(), TransferStatus::Stalled);
        assert_eq!(t.apply(TransferEvent::RemoteStalled).unwrap(), TransferStatus::Cancelled);
        assert!(t.apply(TransferEvent::Stall).is_err());
    }

    #[test]
    fn test_refused_retry_only_from_pending() {
        let mut t = transfer();
        t.apply(TransferEvent::Accept).unwrap();
        t.apply(TransferEvent::Stall).unwrap();
        assert!(t.apply(TransferEvent::RetryRefused).is_err());
        t.apply(TransferEvent::Retry).unwrap();
        assert_eq!(
            t.apply(TransferEvent::RetryRefused).unwrap(),
            TransferStatus::RetryLimitExceeded
        );
    }

    #[test]
    fn test_error_is_terminal() {
        let mut t = transfer();
        t.apply(TransferEvent::Fail {
            error: "connection reset".into(),
        })
        .unwrap();
        assert_eq!(t.status, TransferStatus::Error);
        assert!(t.apply(TransferEvent::Retry).is_err());
        assert!(t
            .apply(TransferEvent::Fail {
                error: "again".into()
            })
            .is_err());
    }
}
