pub mod conversation;
pub mod error;
mod handlers;
pub mod info;
pub mod logs;
pub mod peers;
pub mod requests;
pub mod server;

pub use conversation::{Conversation, ConversationStore, MessageAuthor, TextMessage};
pub use error::{ServerError, ServerResult};
pub use info::ServerInfo;
pub use logs::{ErrorLog, ErrorRecord, EventLog, LoggedEvent, RecordingObserver};
pub use peers::{PeerRegistry, RemoteFileList, RemotePeer};
pub use requests::{RequestDirection, RequestId, RequestLog, RequestRecord, RequestStatus};
pub use server::FileServer;
