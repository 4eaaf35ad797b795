use crate::metrics::recorder;
use crate::transfer::{CorrelationError, CorrelationResult};
use crate::wire::{Request, RequestKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};

pub type RequestId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestDirection {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    InProgress,
    Processed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub direction: RequestDirection,
    pub kind: RequestKind,
    pub remote: SocketAddr,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Append-only log of every request sent or received, plus the backlog of
/// received requests waiting to be processed
#[derive(Debug)]
pub struct RequestLog {
    records: Mutex<Vec<RequestRecord>>,
    backlog: Mutex<VecDeque<(RequestId, Request)>>,
    next_id: AtomicU32,
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLog {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            backlog: Mutex::new(VecDeque::new()),
            next_id: AtomicU32::new(1),
        }
    }

    fn append(&self, direction: RequestDirection, kind: RequestKind, remote: SocketAddr) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records.lock().push(RequestRecord {
            id,
            direction,
            kind,
            remote,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        });
        id
    }

    pub fn record_sent(&self, kind: RequestKind, remote: SocketAddr) -> RequestId {
        self.append(RequestDirection::Sent, kind, remote)
    }

    pub fn record_received(&self, request: &Request) -> RequestId {
        self.append(RequestDirection::Received, request.kind(), request.sender)
    }

    pub fn set_status(&self, id: RequestId, status: RequestStatus) -> CorrelationResult<()> {
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(CorrelationError::UnknownRequest(id))?;
        record.status = status;
        if matches!(status, RequestStatus::Processed | RequestStatus::Error) {
            record.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn fail(&self, id: RequestId, error: impl ToString) -> CorrelationResult<()> {
        self.set_status(id, RequestStatus::Error)?;
        if let Some(record) = self.records.lock().iter_mut().find(|r| r.id == id) {
            record.error = Some(error.to_string());
        }
        Ok(())
    }

    pub fn get(&self, id: RequestId) -> CorrelationResult<RequestRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(CorrelationError::UnknownRequest(id))
    }

    pub fn snapshot(&self) -> Vec<RequestRecord> {
        self.records.lock().clone()
    }

    /// Queue a received request; returns the backlog length
    pub fn enqueue(&self, id: RequestId, request: Request) -> usize {
        let mut backlog = self.backlog.lock();
        backlog.push_back((id, request));
        recorder::set_backlog_depth(backlog.len());
        backlog.len()
    }

    /// Oldest queued request
    pub fn dequeue(&self) -> Option<(RequestId, Request)> {
        let mut backlog = self.backlog.lock();
        let next = backlog.pop_front();
        recorder::set_backlog_depth(backlog.len());
        next
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    /// Ids of queued requests in processing order
    pub fn backlog_ids(&self) -> Vec<RequestId> {
        self.backlog.lock().iter().map(|(id, _)| *id).collect()
    }
}
