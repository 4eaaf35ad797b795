//! Metrics recorder for the file server
//!
//! Records request traffic, transfer lifecycle and backlog depth through the
//! `metrics` facade. Nothing is exported unless the embedding process
//! installs a recorder.

use crate::transfer::TransferDirection;
use crate::wire::RequestKind;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    describe_counter!("p2pfs_requests_sent_total", "Requests sent to peers");
    describe_counter!("p2pfs_requests_received_total", "Requests received from peers");
    describe_counter!(
        "p2pfs_requests_failed_total",
        "Requests that failed to send, receive or process"
    );

    describe_counter!("p2pfs_bytes_sent_total", "Raw file bytes sent");
    describe_counter!("p2pfs_bytes_received_total", "Raw file bytes received");

    describe_counter!("p2pfs_transfers_started_total", "File transfers started");
    describe_counter!(
        "p2pfs_transfers_completed_total",
        "File transfers confirmed complete"
    );
    describe_counter!("p2pfs_transfers_failed_total", "File transfers that failed");
    describe_counter!("p2pfs_transfers_stalled_total", "File transfers reported stalled");
    describe_counter!("p2pfs_transfer_retries_total", "Retry attempts requested");

    describe_gauge!("p2pfs_active_transfers", "File byte streams currently running");
    describe_gauge!("p2pfs_backlog_depth", "Deferred requests waiting to be processed");

    describe_histogram!("p2pfs_transfer_duration_seconds", "Total transfer duration");
    describe_histogram!(
        "p2pfs_throughput_bytes_per_second",
        "Transfer throughput in bytes per second"
    );
}

fn direction_label(direction: TransferDirection) -> &'static str {
    match direction {
        TransferDirection::Inbound => "inbound",
        TransferDirection::Outbound => "outbound",
    }
}

// ============== Requests ==============

pub fn record_request_sent(kind: RequestKind) {
    counter!("p2pfs_requests_sent_total", "kind" => format!("{kind:?}")).increment(1);
}

pub fn record_request_received(kind: RequestKind) {
    counter!("p2pfs_requests_received_total", "kind" => format!("{kind:?}")).increment(1);
}

pub fn record_request_failed(stage: &'static str) {
    counter!("p2pfs_requests_failed_total", "stage" => stage).increment(1);
}

pub fn set_backlog_depth(depth: usize) {
    gauge!("p2pfs_backlog_depth").set(depth as f64);
}

// ============== Transfers ==============

pub fn record_transfer_started(direction: TransferDirection, file_size: u64) {
    counter!("p2pfs_transfers_started_total", "direction" => direction_label(direction))
        .increment(1);
    gauge!("p2pfs_active_transfers").increment(1.0);
    histogram!("p2pfs_transfer_size_bytes").record(file_size as f64);
}

pub fn record_transfer_complete(direction: TransferDirection, duration: Duration, bytes: u64) {
    counter!("p2pfs_transfers_completed_total", "direction" => direction_label(direction))
        .increment(1);
    gauge!("p2pfs_active_transfers").decrement(1.0);
    histogram!("p2pfs_transfer_duration_seconds").record(duration.as_secs_f64());

    let throughput = if duration.as_secs_f64() > 0.0 {
        bytes as f64 / duration.as_secs_f64()
    } else {
        0.0
    };
    histogram!("p2pfs_throughput_bytes_per_second").record(throughput);
}

pub fn record_transfer_failed(direction: TransferDirection, reason: &str) {
    counter!(
        "p2pfs_transfers_failed_total",
        "direction" => direction_label(direction),
        "reason" => reason.to_string()
    )
    .increment(1);
    gauge!("p2pfs_active_transfers").decrement(1.0);
}

/// Stream ended without completing (stall or shutdown)
pub fn record_transfer_stopped(direction: TransferDirection) {
    counter!("p2pfs_transfers_stalled_total", "direction" => direction_label(direction))
        .increment(1);
    gauge!("p2pfs_active_transfers").decrement(1.0);
}

pub fn record_retry(attempt: u32) {
    counter!("p2pfs_transfer_retries_total").increment(1);
    histogram!("p2pfs_retry_attempt").record(attempt as f64);
}

/// Tracks one running byte stream and records its outcome
pub struct TransferMetrics {
    direction: TransferDirection,
    start_time: Instant,
    bytes_transferred: u64,
}

impl TransferMetrics {
    pub fn start(direction: TransferDirection, file_size: u64) -> Self {
        record_transfer_started(direction, file_size);
        Self {
            direction,
            start_time: Instant::now(),
            bytes_transferred: 0,
        }
    }

    /// Record the running byte total reported by the stream
    pub fn set_bytes(&mut self, total: u64) {
        let delta = total.saturating_sub(self.bytes_transferred);
        self.bytes_transferred = total;
        match self.direction {
            TransferDirection::Outbound => counter!("p2pfs_bytes_sent_total").increment(delta),
            TransferDirection::Inbound => counter!("p2pfs_bytes_received_total").increment(delta),
        }
    }

    pub fn complete(self) {
        record_transfer_complete(self.direction, self.elapsed(), self.bytes_transferred);
    }

    pub fn stopped(self) {
        record_transfer_stopped(self.direction);
    }

    pub fn fail(self, reason: &str) {
        record_transfer_failed(self.direction, reason);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Bytes per second so far
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.bytes_transferred as f64 / secs
        } else {
            0.0
        }
    }
}
