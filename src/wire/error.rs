use crate::wire::types::RequestKind;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unknown request kind tag: {0}")]
    UnknownKind(i32),

    #[error("Truncated frame reading {field} at offset {offset}: need {needed} bytes, have {available}")]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Invalid length for {field} at offset {offset}: expected {expected}, found {actual}")]
    InvalidFieldLength {
        field: &'static str,
        offset: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Field {field} at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str, offset: usize },

    #[error("Field {field} holds an invalid IP address: {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{remaining} unexpected trailing bytes at offset {offset}")]
    TrailingBytes { offset: usize, remaining: usize },

    #[error("Field {field} is {len} bytes, larger than the frame format allows")]
    FieldTooLarge { field: &'static str, len: usize },

    #[error("Expected a {expected:?} request, found {actual:?}")]
    WrongKind {
        expected: RequestKind,
        actual: RequestKind,
    },
}

pub type CodecResult<T> = Result<T, CodecError>;
