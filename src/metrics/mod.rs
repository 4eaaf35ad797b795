//! Metrics for monitoring the file server
//!
//! Key metrics:
//! - Requests sent, received and failed by kind
//! - Transfers started, completed, failed and stalled
//! - Backlog depth and transfer throughput

pub mod recorder;

pub use recorder::{init_metrics, TransferMetrics};
