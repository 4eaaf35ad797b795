//! Peer-to-peer file server.
//!
//! Every node is both a server and a client. Requests travel as
//! length-prefixed frames over short-lived TCP connections; an accepted file
//! transfer keeps its connection open and the raw file bytes follow the
//! acceptance on it.
//!
//! - [`wire`]: request types and the frame codec
//! - [`network`]: frame reading, connections and the listener
//! - [`transfer`]: transfer records, their state machine and byte streams
//! - [`engine`]: sending and receiving single requests, plus server events
//! - [`server`]: the node itself ([`FileServer`])

pub mod config;
pub mod engine;
pub mod metrics;
pub mod network;
pub mod platform;
pub mod server;
pub mod transfer;
pub mod wire;

pub use config::ServerSettings;
pub use engine::{EventObserver, ServerEvent};
pub use server::{FileServer, ServerError, ServerResult};
pub use transfer::{FileTransfer, TransferId, TransferStatus};
pub use wire::{Request, RequestKind, RequestPayload};
