use crate::transfer::{TransferId, TransferStatus};
use crate::wire::RequestKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Protocol milestones reported to the node's observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    ServerStarted {
        addr: SocketAddr,
    },
    ShutdownStarted,
    ShutdownComplete,

    // Request traffic
    SendRequestStarted {
        kind: RequestKind,
        remote: SocketAddr,
    },
    SendRequestComplete {
        kind: RequestKind,
        remote: SocketAddr,
    },
    ReceiveRequestStarted {
        remote: SocketAddr,
    },
    ReceiveRequestComplete {
        kind: RequestKind,
        remote: SocketAddr,
    },
    RequestFailed {
        stage: String,
        remote: SocketAddr,
        error: String,
    },

    // Scheduling
    RequestQueued {
        request_id: u32,
        kind: RequestKind,
        backlog: usize,
    },
    ProcessingBacklog {
        pending: usize,
    },

    // Content
    ReceivedTextMessage {
        remote: SocketAddr,
        message: String,
    },
    ReceivedServerInfo {
        remote: SocketAddr,
        platform: String,
        transfer_folder: String,
    },
    ReceivedFileList {
        remote: SocketAddr,
        folder: String,
        files: usize,
    },
    RemoteFolderUnavailable {
        remote: SocketAddr,
        folder: String,
        empty: bool,
    },

    // Transfers
    InboundFileTransferOffered {
        transfer_id: TransferId,
        remote: SocketAddr,
        file_name: String,
        file_size: u64,
    },
    TransferStatusChanged {
        transfer_id: TransferId,
        status: TransferStatus,
    },
    SendFileBytesStarted {
        transfer_id: TransferId,
        file_size: u64,
    },
    ReceiveFileBytesStarted {
        transfer_id: TransferId,
        file_size: u64,
    },
    TransferProgress {
        transfer_id: TransferId,
        bytes: u64,
        file_size: u64,
    },
    SendFileBytesComplete {
        transfer_id: TransferId,
        bytes: u64,
    },
    ReceiveFileBytesComplete {
        transfer_id: TransferId,
        bytes: u64,
    },
    OutboundFileTransferStalled {
        transfer_id: TransferId,
    },
    RetryLimitExceeded {
        transfer_id: TransferId,
        retry_limit: u32,
        lockout_expire: DateTime<Utc>,
    },

    ErrorOccurred {
        message: String,
    },
}

impl ServerEvent {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ServerEvent::RequestFailed { .. } | ServerEvent::ErrorOccurred { .. }
        )
    }
}

/// Receives every event a node emits
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &ServerEvent);
}

impl<F> EventObserver for F
where
    F: Fn(&ServerEvent) + Send + Sync,
{
    fn on_event(&self, event: &ServerEvent) {
        self(event)
    }
}

/// Logs events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EventObserver for TracingObserver {
    fn on_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::TransferProgress { .. }
            | ServerEvent::SendRequestStarted { .. }
            | ServerEvent::ReceiveRequestStarted { .. } => tracing::debug!("{:?}", event),
            e if e.is_error() => tracing::warn!("{:?}", e),
            e => tracing::info!("{:?}", e),
        }
    }
}

/// Publishes events on an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventObserver for ChannelObserver {
    fn on_event(&self, event: &ServerEvent) {
        // Receiver dropped means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}

/// Writes each event as one JSON object per line
pub struct JsonLinesObserver<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesObserver<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> EventObserver for JsonLinesObserver<W> {
    fn on_event(&self, event: &ServerEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize event: {}", e);
                return;
            }
        };
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            tracing::warn!("Failed to write event: {}", e);
        }
    }
}

/// Forwards every event to each inner observer in order
#[derive(Clone, Default)]
pub struct FanOutObserver {
    observers: Vec<Arc<dyn EventObserver>>,
}

impl FanOutObserver {
    pub fn new(observers: Vec<Arc<dyn EventObserver>>) -> Self {
        Self { observers }
    }

    pub fn with(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl EventObserver for FanOutObserver {
    fn on_event(&self, event: &ServerEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_lines_are_tagged() {
        let observer = JsonLinesObserver::new(Vec::new());
        observer.on_event(&ServerEvent::ShutdownStarted);
        observer.on_event(&ServerEvent::TransferStatusChanged {
            transfer_id: 3,
            status: TransferStatus::Accepted,
        });

        let out = String::from_utf8(observer.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "transfer_status_changed");
        assert_eq!(second["status"], "Accepted");

        let back: ServerEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(back, ServerEvent::ShutdownStarted);
    }

    #[tokio::test]
    async fn test_fan_out_to_channel_and_closure() {
        let (channel, mut rx) = ChannelObserver::new();
        let seen = Arc::new(Mutex::new(0usize));
        let counter = {
            let seen = seen.clone();
            move |_: &ServerEvent| *seen.lock() += 1
        };

        let fan_out = FanOutObserver::default()
            .with(Arc::new(channel))
            .with(Arc::new(counter));
        fan_out.on_event(&ServerEvent::ProcessingBacklog { pending: 2 });

        assert_eq!(rx.recv().await, Some(ServerEvent::ProcessingBacklog { pending: 2 }));
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_error_classification() {
        assert!(ServerEvent::ErrorOccurred {
            message: "boom".into()
        }
        .is_error());
        assert!(!ServerEvent::ShutdownComplete.is_error());
    }
}
