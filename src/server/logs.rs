use crate::engine::{EventObserver, ServerEvent};
use crate::server::requests::RequestId;
use crate::transfer::TransferId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub transfer_id: Option<TransferId>,
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<Vec<ErrorRecord>>,
}

impl ErrorLog {
    pub fn push(&self, record: ErrorRecord) {
        self.entries.lock().push(record);
    }

    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.entries.lock().clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub timestamp: DateTime<Utc>,
    pub event: ServerEvent,
}

#[derive(Debug, Default)]
pub struct EventLog {
    entries: Mutex<Vec<LoggedEvent>>,
}

impl EventLog {
    pub fn snapshot(&self) -> Vec<LoggedEvent> {
        self.entries.lock().clone()
    }
}

/// Records every event in the node's event log, then hands it to the
/// caller's observer
pub struct RecordingObserver {
    log: Arc<EventLog>,
    inner: Arc<dyn EventObserver>,
}

impl RecordingObserver {
    pub fn new(log: Arc<EventLog>, inner: Arc<dyn EventObserver>) -> Self {
        Self { log, inner }
    }
}

impl EventObserver for RecordingObserver {
    fn on_event(&self, event: &ServerEvent) {
        self.log.entries.lock().push(LoggedEvent {
            timestamp: Utc::now(),
            event: event.clone(),
        });
        self.inner.on_event(event);
    }
}
