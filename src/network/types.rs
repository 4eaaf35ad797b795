use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Largest frame accepted off the wire
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Size of the length prefix preceding every frame
pub const LEN_PREFIX_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct SocketSettings {
    pub bind_addr: SocketAddr,
    pub listen_backlog: u32,
    pub buffer_size: usize,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            listen_backlog: 5,
            buffer_size: 8 * 1024,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub connections_opened: u64,
    pub connections_accepted: u64,
}
