use crate::wire::RequestKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Codec error: {0}")]
    CodecError(#[from] crate::wire::CodecError),

    #[error("Network error: {0}")]
    NetworkError(#[from] crate::network::NetworkError),

    #[error("Expected {expected:?} request, received {actual:?}")]
    UnexpectedKind {
        expected: RequestKind,
        actual: RequestKind,
    },
}

impl EngineError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::NetworkError(e) if e.is_timeout())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
