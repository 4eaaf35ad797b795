pub mod control;
pub mod error;
pub mod registry;
pub mod state_machine;
pub mod stream;
pub mod types;

pub use control::StopSignal;
pub use error::{CorrelationError, CorrelationResult, TransferError, TransferResult};
pub use registry::TransferRegistry;
pub use state_machine::TransferEvent;
pub use stream::{receive_file_bytes, send_file_bytes, StreamOutcome, StreamSignals};
pub use types::{
    FileTransfer, NewTransfer, TransferDirection, TransferId, TransferInitiator, TransferStatus,
};
