use crate::engine::EngineError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Codec error: {0}")]
    CodecError(#[from] crate::wire::CodecError),

    #[error("Network error: {0}")]
    NetworkError(#[from] crate::network::NetworkError),

    #[error("Transfer error: {0}")]
    TransferError(#[from] crate::transfer::TransferError),

    #[error("Correlation error: {0}")]
    CorrelationError(#[from] crate::transfer::CorrelationError),

    #[error("Platform error: {0}")]
    PlatformError(#[from] crate::platform::PlatformError),

    #[error("Config error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("Protocol state error: {0}")]
    ProtocolState(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<EngineError> for ServerError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::CodecError(e) => ServerError::CodecError(e),
            EngineError::NetworkError(e) => ServerError::NetworkError(e),
            e @ EngineError::UnexpectedKind { .. } => ServerError::ProtocolState(e.to_string()),
        }
    }
}

impl ServerError {
    /// Socket, codec or disk failures; these end a transfer in `Error`
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            ServerError::CodecError(_)
                | ServerError::NetworkError(_)
                | ServerError::IoError(_)
                | ServerError::TransferError(
                    crate::transfer::TransferError::NetworkError(_)
                        | crate::transfer::TransferError::IoError(_)
                        | crate::transfer::TransferError::FileTruncated { .. }
                )
        )
    }

    pub fn is_retry_lockout(&self) -> bool {
        matches!(
            self,
            ServerError::TransferError(crate::transfer::TransferError::RetryLockout { .. })
        )
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
