pub mod connection;
pub mod error;
pub mod frame;
pub mod listener;
pub mod types;

pub use connection::Connection;
pub use error::{NetworkError, NetworkResult};
pub use frame::{write_frame, FrameReader};
pub use listener::Listener;
pub use types::{NetworkStats, SocketSettings, LEN_PREFIX_SIZE, MAX_FRAME_LEN};
